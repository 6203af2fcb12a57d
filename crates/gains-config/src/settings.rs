//! Environment-driven service settings.
//!
//! All variables are prefixed `GAINS_`. Unset or empty variables take the
//! default; set-but-malformed variables fail startup rather than silently
//! falling back.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

use crate::AppConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

const ENV_DATABASE_URL: &str = "GAINS_DATABASE_URL";

#[derive(Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Overrides `DBConnectionString` from the config file when set.
    pub database_url: Option<String>,
    pub poll_interval: Duration,
    pub lookback: Duration,
    /// Width of the very first poll window, in days. 0 = use `lookback`.
    pub backfill_days: u32,
    pub refresh_interval: Duration,
    /// Bound for every network call (brokerage, token endpoint, DB statement).
    pub request_timeout: Duration,
    pub store_retry_attempts: u32,
    pub store_retry_backoff: Duration,
    pub feed_capacity: usize,
    pub daemon_addr: SocketAddr,
    pub broker_base_url: String,
    pub oauth_base_url: String,
    pub redirect_uri: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            poll_interval: Duration::from_secs(60),
            lookback: Duration::from_secs(300),
            backfill_days: 0,
            refresh_interval: Duration::from_secs(1500),
            request_timeout: Duration::from_secs(10),
            store_retry_attempts: 3,
            store_retry_backoff: Duration::from_millis(500),
            feed_capacity: 256,
            daemon_addr: SocketAddr::from(([127, 0, 0, 1], 8898)),
            broker_base_url: "https://api.schwabapi.com/trader/v1".to_string(),
            oauth_base_url: "https://api.schwabapi.com/v1/oauth".to_string(),
            redirect_uri: "https://127.0.0.1".to_string(),
        }
    }
}

impl std::fmt::Debug for ServiceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSettings")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<REDACTED>"),
            )
            .field("poll_interval", &self.poll_interval)
            .field("lookback", &self.lookback)
            .field("backfill_days", &self.backfill_days)
            .field("refresh_interval", &self.refresh_interval)
            .field("request_timeout", &self.request_timeout)
            .field("store_retry_attempts", &self.store_retry_attempts)
            .field("store_retry_backoff", &self.store_retry_backoff)
            .field("feed_capacity", &self.feed_capacity)
            .field("daemon_addr", &self.daemon_addr)
            .field("broker_base_url", &self.broker_base_url)
            .field("oauth_base_url", &self.oauth_base_url)
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{key} must be a non-negative integer, got '{raw}'")),
    }
}

fn parse_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl ServiceSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build settings from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();

        let poll_secs = parse_u64(&lookup, "GAINS_POLL_INTERVAL_SECS", d.poll_interval.as_secs())?;
        let lookback_secs = parse_u64(&lookup, "GAINS_LOOKBACK_SECS", d.lookback.as_secs())?;
        let backfill_days = parse_u64(&lookup, "GAINS_BACKFILL_DAYS", d.backfill_days as u64)?;
        let refresh_secs = parse_u64(
            &lookup,
            "GAINS_REFRESH_INTERVAL_SECS",
            d.refresh_interval.as_secs(),
        )?;
        let timeout_secs = parse_u64(
            &lookup,
            "GAINS_REQUEST_TIMEOUT_SECS",
            d.request_timeout.as_secs(),
        )?;
        let attempts = parse_u64(
            &lookup,
            "GAINS_STORE_RETRY_ATTEMPTS",
            d.store_retry_attempts as u64,
        )?;
        let backoff_ms = parse_u64(
            &lookup,
            "GAINS_STORE_RETRY_BACKOFF_MS",
            d.store_retry_backoff.as_millis() as u64,
        )?;
        let capacity = parse_u64(&lookup, "GAINS_FEED_CAPACITY", d.feed_capacity as u64)?;

        let addr_raw = parse_string(&lookup, "GAINS_DAEMON_ADDR", &d.daemon_addr.to_string());
        let daemon_addr: SocketAddr = addr_raw
            .parse()
            .with_context(|| format!("GAINS_DAEMON_ADDR must be host:port, got '{addr_raw}'"))?;

        if poll_secs == 0 {
            bail!("GAINS_POLL_INTERVAL_SECS must be > 0");
        }
        if lookback_secs == 0 {
            bail!("GAINS_LOOKBACK_SECS must be > 0");
        }
        if refresh_secs == 0 {
            bail!("GAINS_REFRESH_INTERVAL_SECS must be > 0");
        }
        if timeout_secs == 0 {
            bail!("GAINS_REQUEST_TIMEOUT_SECS must be > 0");
        }
        if attempts == 0 {
            bail!("GAINS_STORE_RETRY_ATTEMPTS must be >= 1");
        }
        if capacity == 0 {
            bail!("GAINS_FEED_CAPACITY must be > 0");
        }

        Ok(Self {
            database_url: lookup(ENV_DATABASE_URL).filter(|v| !v.trim().is_empty()),
            poll_interval: Duration::from_secs(poll_secs),
            lookback: Duration::from_secs(lookback_secs),
            backfill_days: u32::try_from(backfill_days)
                .context("GAINS_BACKFILL_DAYS out of range")?,
            refresh_interval: Duration::from_secs(refresh_secs),
            request_timeout: Duration::from_secs(timeout_secs),
            store_retry_attempts: u32::try_from(attempts)
                .context("GAINS_STORE_RETRY_ATTEMPTS out of range")?,
            store_retry_backoff: Duration::from_millis(backoff_ms),
            feed_capacity: usize::try_from(capacity).context("GAINS_FEED_CAPACITY out of range")?,
            daemon_addr,
            broker_base_url: parse_string(&lookup, "GAINS_BROKER_BASE_URL", &d.broker_base_url),
            oauth_base_url: parse_string(&lookup, "GAINS_OAUTH_BASE_URL", &d.oauth_base_url),
            redirect_uri: parse_string(&lookup, "GAINS_REDIRECT_URI", &d.redirect_uri),
        })
    }

    /// The env override wins over the config file.
    pub fn resolve_database_url(&self, cfg: &AppConfig) -> Result<String> {
        if let Some(url) = &self.database_url {
            return Ok(url.clone());
        }
        if cfg.db_connection_string.trim().is_empty() {
            bail!("no database configured: set {ENV_DATABASE_URL} or DBConnectionString");
        }
        Ok(cfg.db_connection_string.clone())
    }

    /// SHA-256 (hex) over the canonical JSON of the non-secret settings.
    pub fn fingerprint(&self) -> Result<String> {
        // serde_json::Map is key-sorted, so this rendering is canonical.
        let v = serde_json::json!({
            "poll_interval_secs": self.poll_interval.as_secs(),
            "lookback_secs": self.lookback.as_secs(),
            "backfill_days": self.backfill_days,
            "refresh_interval_secs": self.refresh_interval.as_secs(),
            "request_timeout_secs": self.request_timeout.as_secs(),
            "store_retry_attempts": self.store_retry_attempts,
            "store_retry_backoff_ms": self.store_retry_backoff.as_millis() as u64,
            "feed_capacity": self.feed_capacity,
            "daemon_addr": self.daemon_addr.to_string(),
            "broker_base_url": self.broker_base_url,
            "oauth_base_url": self.oauth_base_url,
            "redirect_uri": self.redirect_uri,
        });
        let canonical = serde_json::to_string(&v).context("fingerprint serialize failed")?;
        Ok(sha256_hex(canonical.as_bytes()))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
