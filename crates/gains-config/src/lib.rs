//! gains-config
//!
//! Two configuration sources:
//!
//! - the **config file** (`config.json`): app credentials, DB connection
//!   string and the current OAuth token pair. The token pair is rewritten on
//!   every successful refresh, so the file is owned by a [`ConfigStore`] that
//!   saves atomically (temp file + fsync + rename).
//! - **service settings** from the environment ([`ServiceSettings`]): poll /
//!   refresh cadence, timeouts, retry policy, endpoints. Every setting has a
//!   default; malformed values are startup errors.
//!
//! `Debug` output of every secret-carrying type is redacted.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

mod settings;

pub use settings::{ServiceSettings, DEFAULT_CONFIG_PATH};

// ---------------------------------------------------------------------------
// Config file
// ---------------------------------------------------------------------------

/// Contents of `config.json`.
///
/// Key names match the file layout operators already have on disk. Missing
/// keys decode to empty strings; an empty token means "not authorized yet".
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(rename = "AppKey")]
    pub app_key: String,
    #[serde(rename = "AppSecret")]
    pub app_secret: String,
    #[serde(rename = "DBConnectionString")]
    pub db_connection_string: String,
    #[serde(rename = "BearerToken")]
    pub bearer_token: String,
    #[serde(rename = "RefreshToken")]
    pub refresh_token: String,
}

impl AppConfig {
    pub fn has_tokens(&self) -> bool {
        !self.bearer_token.is_empty() && !self.refresh_token.is_empty()
    }
}

fn redact(s: &str) -> &'static str {
    if s.is_empty() {
        "<EMPTY>"
    } else {
        "<REDACTED>"
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("app_key", &redact(&self.app_key))
            .field("app_secret", &redact(&self.app_secret))
            .field("db_connection_string", &redact(&self.db_connection_string))
            .field("bearer_token", &redact(&self.bearer_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

pub fn load_config(path: &Path) -> Result<AppConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let cfg: AppConfig = serde_json::from_str(&raw)
        .with_context(|| format!("invalid config json: {}", path.display()))?;
    Ok(cfg)
}

/// Write `cfg` to `path` atomically: a crash leaves either the old or the new
/// file, never a truncated one.
pub fn save_config_atomic(path: &Path, cfg: &AppConfig) -> Result<()> {
    let body = serde_json::to_vec_pretty(cfg).context("config serialize failed")?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config.json".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("failed to create temp config: {}", tmp.display()))?;
        f.write_all(&body)
            .with_context(|| format!("failed to write temp config: {}", tmp.display()))?;
        f.sync_all()
            .with_context(|| format!("failed to fsync temp config: {}", tmp.display()))?;
    }

    fs::rename(&tmp, path).with_context(|| {
        format!(
            "failed to replace config {} with {}",
            path.display(),
            tmp.display()
        )
    })?;
    Ok(())
}

/// Owner of the config file. Holds the last saved contents in memory.
pub struct ConfigStore {
    path: PathBuf,
    current: Mutex<AppConfig>,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cfg = load_config(&path)?;
        Ok(Self {
            path,
            current: Mutex::new(cfg),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> AppConfig {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the token pair and persist. The in-memory copy is only updated
    /// once the file has been replaced.
    pub fn update_tokens(&self, bearer_token: &str, refresh_token: &str) -> Result<()> {
        let mut guard = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = guard.clone();
        next.bearer_token = bearer_token.to_string();
        next.refresh_token = refresh_token.to_string();
        save_config_atomic(&self.path, &next)?;
        *guard = next;
        Ok(())
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
