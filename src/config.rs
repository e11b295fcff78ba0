//! TOML configuration.
//!
//! Every section is optional and falls back to defaults. Secrets are never
//! read from the file; they come from the environment:
//!
//! | Variable | Purpose |
//! |----------|---------|
//! | `INLABS_EMAIL` / `INLABS_PASSWORD` | Portal credentials |
//! | `REDIS_URL` | Primary storage tier (overrides `storage.redis_url`) |
//! | `EDGE_CONFIG` | Secondary tier config id (overrides `storage.edge_config_id`) |
//! | `VERCEL_TOKEN` | Secondary tier bearer token |
//! | `OPENAI_API_KEY` | Summarization provider key |
//!
//! ```toml
//! [portal]
//! base_url = "https://inlabs.in.gov.br"
//! sections = ["DO1", "DO2", "DO3"]
//! max_fallback_days = 2
//!
//! [storage]
//! redis_url = "redis://127.0.0.1:6379"
//!
//! [summarize]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::models::{Credentials, SectionCode};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub summarize: SummarizeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortalConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_sections")]
    pub sections: Vec<SectionCode>,
    #[serde(default = "default_max_fallback_days")]
    pub max_fallback_days: u32,
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            sections: default_sections(),
            max_fallback_days: default_max_fallback_days(),
            login_timeout_secs: default_login_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://inlabs.in.gov.br".to_string()
}
fn default_sections() -> Vec<SectionCode> {
    SectionCode::ALL.to_vec()
}
fn default_max_fallback_days() -> u32 {
    2
}
fn default_login_timeout_secs() -> u64 {
    30
}
fn default_download_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub edge_config_id: Option<String>,
    #[serde(default = "default_edge_config_read_url")]
    pub edge_config_read_url: String,
    #[serde(default = "default_edge_config_write_url")]
    pub edge_config_write_url: String,
    #[serde(default = "default_storage_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            edge_config_id: None,
            edge_config_read_url: default_edge_config_read_url(),
            edge_config_write_url: default_edge_config_write_url(),
            timeout_secs: default_storage_timeout_secs(),
        }
    }
}

fn default_edge_config_read_url() -> String {
    "https://edge-config.vercel.com".to_string()
}
fn default_edge_config_write_url() -> String {
    "https://api.vercel.com".to_string()
}
fn default_storage_timeout_secs() -> u64 {
    5
}

impl StorageConfig {
    /// Redis URL, with `REDIS_URL` taking precedence over the file.
    pub fn resolved_redis_url(&self) -> Option<String> {
        env_non_empty("REDIS_URL").or_else(|| self.redis_url.clone())
    }

    /// Remote config id, with `EDGE_CONFIG` taking precedence over the file.
    pub fn resolved_edge_config_id(&self) -> Option<String> {
        env_non_empty("EDGE_CONFIG").or_else(|| self.edge_config_id.clone())
    }

    pub fn edge_config_token(&self) -> Option<String> {
        env_non_empty("VERCEL_TOKEN")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizeConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_summarize_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            timeout_secs: default_summarize_timeout_secs(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_summarize_timeout_secs() -> u64 {
    30
}
fn default_max_input_chars() -> usize {
    4000
}

impl SummarizeConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Portal credentials from `INLABS_EMAIL` and `INLABS_PASSWORD`.
pub fn credentials_from_env() -> Result<Credentials> {
    let principal = env_non_empty("INLABS_EMAIL")
        .ok_or_else(|| anyhow::anyhow!("INLABS_EMAIL environment variable not set"))?;
    let secret = env_non_empty("INLABS_PASSWORD")
        .ok_or_else(|| anyhow::anyhow!("INLABS_PASSWORD environment variable not set"))?;
    Ok(Credentials::new(principal, secret))
}

/// Load configuration from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.portal.sections.is_empty() {
        bail!("portal.sections must name at least one section");
    }
    if config.portal.max_fallback_days > 30 {
        bail!("portal.max_fallback_days must be <= 30");
    }
    if config.portal.login_timeout_secs == 0 || config.portal.download_timeout_secs == 0 {
        bail!("portal timeouts must be > 0");
    }
    if config.storage.timeout_secs == 0 {
        bail!("storage.timeout_secs must be > 0");
    }

    match config.summarize.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown summarize provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}
