//! Interactive OAuth authorization (operator at a terminal).

use std::io::{BufRead, Write};

use anyhow::{anyhow, Context, Result};
use gains_broker::{extract_authorization_code, TokenClient, TokenPair};

/// Print the authorize URL, read the URL the browser was redirected to and
/// exchange its `code` for a token pair.
///
/// Only used at startup or from the operator CLI; never in steady state.
pub async fn authorize_interactive<R, W>(
    client: &TokenClient,
    input: &mut R,
    output: &mut W,
) -> Result<TokenPair>
where
    R: BufRead,
    W: Write,
{
    let url = client.authorize_url()?;
    writeln!(output, "Open this URL in a browser and log in:\n\n  {url}\n")?;
    write!(output, "Paste the URL you were redirected to: ")?;
    output.flush()?;

    let code = read_authorization_code(input)?;
    client
        .exchange_code(&code)
        .await
        .context("authorization code exchange failed")
}

fn read_authorization_code<R: BufRead>(input: &mut R) -> Result<String> {
    let mut line = String::new();
    let n = input.read_line(&mut line).context("failed to read redirect URL")?;
    if n == 0 {
        return Err(anyhow!("no redirect URL entered"));
    }
    extract_authorization_code(&line)
        .ok_or_else(|| anyhow!("redirect URL has no `code` parameter"))
}
