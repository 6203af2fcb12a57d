use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use gains_broker::TokenClient;
use gains_config::{ConfigStore, ServiceSettings};
use gains_runtime::authorize_interactive;

/// Interactive code flow; saves the new pair into the config file.
pub async fn run(config_path: &Path) -> Result<()> {
    let settings = ServiceSettings::from_env().context("invalid service settings")?;
    let store = ConfigStore::open(config_path)?;
    let cfg = store.snapshot();
    if cfg.app_key.is_empty() || cfg.app_secret.is_empty() {
        anyhow::bail!(
            "AppKey and AppSecret must be set in {}",
            config_path.display()
        );
    }

    let client = TokenClient::new(
        settings.oauth_base_url,
        cfg.app_key,
        cfg.app_secret,
        settings.redirect_uri,
        settings.request_timeout,
    )?;

    let mut input = BufReader::new(std::io::stdin());
    let mut output = std::io::stderr();
    let pair = authorize_interactive(&client, &mut input, &mut output).await?;

    store.update_tokens(&pair.bearer, &pair.refresh)?;
    println!("tokens_saved=true config={}", config_path.display());
    Ok(())
}
