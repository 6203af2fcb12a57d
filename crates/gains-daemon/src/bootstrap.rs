//! Startup: obtain working credentials and resolve the tracked account.

use std::io::IsTerminal;

use anyhow::{bail, Context, Result};
use gains_broker::{BrokerClient, CredentialCell, TokenClient};
use gains_db::LedgerStore;
use gains_runtime::{authorize_interactive, refresh_once, TokenSink};
use gains_schemas::AccountNumber;
use tracing::{error, info, warn};

/// Make `cell` hold a pair the brokerage accepts, and return the account.
///
/// Order of attempts: cached pair, one refresh, interactive authorization
/// (only when `interactive`). Each is validated with an account lookup.
pub async fn initialize_credentials(
    broker: &BrokerClient,
    tokens: &TokenClient,
    cell: &CredentialCell,
    sink: &dyn TokenSink,
    interactive: bool,
) -> Result<AccountNumber> {
    if cell.current().is_empty() {
        warn!("no cached tokens in config");
    } else {
        match broker.primary_account().await {
            Ok(account) => {
                info!("cached credentials accepted");
                return Ok(account);
            }
            Err(e) => warn!(error = %e, "cached credentials rejected; trying refresh"),
        }

        match refresh_once(tokens, sink, cell).await {
            Ok(()) => match broker.primary_account().await {
                Ok(account) => {
                    info!("credentials refreshed at startup");
                    return Ok(account);
                }
                Err(e) => warn!(error = %e, "refreshed credentials rejected"),
            },
            Err(e) => warn!(error = %e, "startup refresh failed"),
        }
    }

    if !interactive {
        bail!("no usable credentials and stdin is not a terminal; run `gains authorize` first");
    }

    let mut input = std::io::BufReader::new(std::io::stdin());
    let mut output = std::io::stderr();
    let pair = authorize_interactive(tokens, &mut input, &mut output).await?;
    cell.publish(pair.clone());
    if let Err(e) = sink.persist(&pair) {
        error!(error = %format!("{e:#}"), "authorized tokens could not be persisted");
    }

    broker
        .primary_account()
        .await
        .context("account lookup failed with freshly authorized credentials")
}

pub fn stdin_is_interactive() -> bool {
    std::io::stdin().is_terminal()
}

/// Parse the plaintext account number and persist its hash when it is new or
/// has changed.
pub async fn resolve_account(store: &dyn LedgerStore, account: &AccountNumber) -> Result<i64> {
    let account_id: i64 = account
        .account_number
        .trim()
        .parse()
        .with_context(|| "brokerage returned a non-numeric account number".to_string())?;
    if account.hash_value.is_empty() {
        bail!("brokerage returned an empty account hash");
    }

    let stored = store
        .fetch_account_hash(account_id)
        .await
        .context("read account hash")?;
    if stored.as_deref() != Some(account.hash_value.as_str()) {
        store
            .save_account_hash(account_id, &account.hash_value)
            .await
            .context("save account hash")?;
        info!(account_id, replaced = stored.is_some(), "account hash saved");
    }
    Ok(account_id)
}
