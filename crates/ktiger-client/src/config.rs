//! Configuration loading and backend factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use ktiger_core::store::FileSessionStore;
use ktiger_core::traits::ExamBackend;
use ktiger_core::SessionConfig;

use crate::http::{HttpExamBackend, DEFAULT_BASE_URL};

/// Session tunables as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Quiet period before a typed answer is saved.
    #[serde(default = "default_debounce_ms")]
    pub answer_debounce_ms: u64,
    /// Timer ticks between position checkpoints.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every_ticks: u32,
    /// Pause between releasing one sound and loading the next.
    #[serde(default = "default_grace_ms")]
    pub audio_release_grace_ms: u64,
}

fn default_debounce_ms() -> u64 {
    2000
}
fn default_checkpoint_every() -> u32 {
    5
}
fn default_grace_ms() -> u64 {
    100
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            answer_debounce_ms: default_debounce_ms(),
            checkpoint_every_ticks: default_checkpoint_every(),
            audio_release_grace_ms: default_grace_ms(),
        }
    }
}

/// Top-level ktiger configuration.
///
/// Note: Custom Debug impl masks tokens to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct KtigerConfig {
    /// Backend API root, including any `/api` prefix.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Request timeout of the shared HTTP client.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Directory holding the in-progress record.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub session: SessionSettings,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./ktiger-data")
}

impl Default for KtigerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            access_token: None,
            refresh_token: None,
            data_dir: default_data_dir(),
            session: SessionSettings::default(),
        }
    }
}

impl std::fmt::Debug for KtigerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |t: &Option<String>| t.as_ref().map(|_| "***");
        f.debug_struct("KtigerConfig")
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .field("access_token", &mask(&self.access_token))
            .field("refresh_token", &mask(&self.refresh_token))
            .field("data_dir", &self.data_dir)
            .field("session", &self.session)
            .finish()
    }
}

impl KtigerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            answer_debounce: Duration::from_millis(self.session.answer_debounce_ms),
            checkpoint_every_ticks: self.session.checkpoint_every_ticks,
            audio_release_grace: Duration::from_millis(self.session.audio_release_grace_ms),
        }
    }

    pub fn session_store(&self) -> FileSessionStore {
        FileSessionStore::new(&self.data_dir)
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        let Some(len) = result[start..].find('}') else {
            break;
        };
        let value = std::env::var(&result[start + 2..start + len]).unwrap_or_default();
        result.replace_range(start..start + len + 1, &value);
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `ktiger.toml` in the current directory
/// 2. `~/.config/ktiger/config.toml`
///
/// Environment variable overrides: `KTIGER_BASE_URL`, `KTIGER_ACCESS_TOKEN`,
/// `KTIGER_DATA_DIR`.
pub fn load_config() -> Result<KtigerConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<KtigerConfig> {
    let config_path = match path {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => anyhow::bail!("config file not found: {}", p.display()),
        None => {
            let local = PathBuf::from("ktiger.toml");
            if local.exists() {
                Some(local)
            } else {
                global_config_path().filter(|p| p.exists())
            }
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<KtigerConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => KtigerConfig::default(),
    };

    if let Ok(url) = std::env::var("KTIGER_BASE_URL") {
        config.base_url = url;
    }
    if let Ok(token) = std::env::var("KTIGER_ACCESS_TOKEN") {
        config.access_token = Some(token);
    }
    if let Ok(dir) = std::env::var("KTIGER_DATA_DIR") {
        config.data_dir = PathBuf::from(dir);
    }

    config.base_url = resolve_env_vars(&config.base_url);
    config.access_token = resolve_token(config.access_token.as_deref());
    config.refresh_token = resolve_token(config.refresh_token.as_deref());

    Ok(config)
}

/// Resolve a token, treating one that resolves to empty as absent.
fn resolve_token(token: Option<&str>) -> Option<String> {
    token.map(resolve_env_vars).filter(|t| !t.is_empty())
}

fn global_config_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(|h| {
        PathBuf::from(h)
            .join(".config")
            .join("ktiger")
            .join("config.toml")
    })
}

/// Create the HTTP backend described by `config`.
pub fn create_backend(config: &KtigerConfig) -> Result<Arc<dyn ExamBackend>> {
    let mut backend = HttpExamBackend::new(&config.base_url, config.timeout())
        .context("failed to create HTTP backend")?;
    if let Some(token) = &config.access_token {
        backend = backend.with_access_token(token);
    }
    if let Some(token) = &config.refresh_token {
        backend = backend.with_refresh_token(token);
    }
    Ok(Arc::new(backend))
}
