//! Application configuration for linksort.
//!
//! User config lives at `~/.linksort/linksort.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored in the file, only the names of the env vars
//! that hold them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{LinksortError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "linksort.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".linksort";

// ---------------------------------------------------------------------------
// Config structs (matching linksort.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Links API settings.
    #[serde(default)]
    pub api: ApiSection,

    /// Page fetching settings.
    #[serde(default)]
    pub fetch: FetchSection,

    /// Classifier settings.
    #[serde(default)]
    pub classifier: ClassifierSection,
}

/// `[api]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
    /// Base URL of the links API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Default user whose links are categorized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Name of the env var holding the authorization token for updates.
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_id: None,
            auth_token_env: default_auth_token_env(),
        }
    }
}

fn default_base_url() -> String {
    "https://curius.app/api".into()
}
fn default_auth_token_env() -> String {
    "LINKSORT_AUTH_TOKEN".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    /// Maximum number of pages requested at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Retries for a page that failed with a transient error.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff between retries, doubled on every attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_concurrency() -> u32 {
    4
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[classifier]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSection {
    /// Chat completions endpoint (OpenAI or any compatible API).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for categorization.
    #[serde(default = "default_model")]
    pub model: String,

    /// Items submitted per classifier call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Timeout for a single classifier call.
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            batch_size: default_batch_size(),
            temperature: default_temperature(),
            timeout_secs: default_classifier_timeout_secs(),
        }
    }
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4-turbo".into()
}
fn default_batch_size() -> usize {
    20
}
fn default_temperature() -> f32 {
    0.2
}
fn default_classifier_timeout_secs() -> u64 {
    120
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime links API configuration, owned by the API client.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the links API.
    pub base_url: Url,
    /// User whose links are read.
    pub user_id: String,
    /// Maximum number of concurrent page requests.
    pub concurrency: usize,
    /// Retries for transient page failures.
    pub max_retries: u32,
    /// Base retry backoff in milliseconds.
    pub retry_backoff_ms: u64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl ApiConfig {
    /// Build the runtime API config for `user_id` from the file config.
    pub fn from_app(config: &AppConfig, user_id: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(&config.api.base_url).map_err(|e| {
            LinksortError::config(format!("invalid api.base_url '{}': {e}", config.api.base_url))
        })?;

        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(LinksortError::config("user id must not be empty"));
        }

        Ok(Self {
            base_url,
            user_id,
            concurrency: config.fetch.concurrency.max(1) as usize,
            max_retries: config.fetch.max_retries,
            retry_backoff_ms: config.fetch.retry_backoff_ms,
            timeout_secs: config.fetch.timeout_secs,
        })
    }
}

/// Runtime classifier configuration.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Chat completions endpoint.
    pub endpoint: String,
    /// Model ID.
    pub model: String,
    /// Items per classifier call.
    pub batch_size: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl From<&AppConfig> for ClassifierConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            endpoint: config.classifier.endpoint.clone(),
            model: config.classifier.model.clone(),
            batch_size: config.classifier.batch_size,
            temperature: config.classifier.temperature,
            timeout_secs: config.classifier.timeout_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.linksort/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LinksortError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.linksort/linksort.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LinksortError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LinksortError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LinksortError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LinksortError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LinksortError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the classifier API key from the configured env var.
pub fn classifier_api_key(config: &AppConfig) -> Result<String> {
    read_secret(&config.classifier.api_key_env).ok_or_else(|| {
        LinksortError::config(format!(
            "classifier API key not found. Set the {} environment variable.",
            config.classifier.api_key_env
        ))
    })
}

/// Read the update authorization token from the configured env var, if set.
pub fn auth_token(config: &AppConfig) -> Option<String> {
    read_secret(&config.api.auth_token_env)
}

fn read_secret(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Some(val),
        _ => None,
    }
}
