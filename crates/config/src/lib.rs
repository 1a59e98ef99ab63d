//! Configuration loading, validation, and management for DocShelf.
//!
//! Loads configuration from `~/.docshelf/config.toml` with environment
//! variable overrides. Read once at startup, immutable thereafter.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.docshelf/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend API credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model identifier sent on every backend call
    #[serde(default = "default_model")]
    pub model: String,

    /// Context window ceiling the budget tracker admits against
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u64,

    /// Maximum number of attached files per session
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Maximum size of a single attached file, in bytes
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Context cache time-to-live, in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Ingestion settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Turn orchestration settings
    #[serde(default)]
    pub turn: TurnConfig,

    /// Backend endpoint settings
    #[serde(default)]
    pub backend: BackendConfig,
}

fn default_model() -> String {
    "gemini-3-flash-preview".into()
}
fn default_max_context_tokens() -> u64 {
    1_000_000
}
fn default_max_files() -> usize {
    50
}
fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_cache_ttl_secs() -> u64 {
    3600
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("max_context_tokens", &self.max_context_tokens)
            .field("max_files", &self.max_files)
            .field("max_file_bytes", &self.max_file_bytes)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("ingest", &self.ingest)
            .field("turn", &self.turn)
            .field("backend", &self.backend)
            .finish()
    }
}

/// File ingestion pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// How many artifacts may be converting/uploading at once
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Upload retry attempts after the first failure
    #[serde(default = "default_retry_limit")]
    pub upload_retry_limit: u32,

    /// Base delay for capped exponential upload backoff, in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub upload_backoff_base_ms: u64,

    /// Backoff cap, in milliseconds
    #[serde(default = "default_backoff_cap_ms")]
    pub upload_backoff_cap_ms: u64,
}

fn default_parallelism() -> usize {
    4
}
fn default_retry_limit() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    8000
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            upload_retry_limit: default_retry_limit(),
            upload_backoff_base_ms: default_backoff_base_ms(),
            upload_backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

/// Turn orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Maximum tool-call round trips within one turn
    #[serde(default = "default_tool_iteration_limit")]
    pub tool_iteration_limit: u32,
}

fn default_tool_iteration_limit() -> u32 {
    4
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            tool_iteration_limit: default_tool_iteration_limit(),
        }
    }
}

/// Backend endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL override (primarily for tests and proxies)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Per-request timeout, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.docshelf/config.toml).
    ///
    /// Also checks environment variables for the API key:
    /// - `DOCSHELF_API_KEY` (highest priority)
    /// - `GEMINI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        // Environment variable overrides (highest priority)
        if config.api_key.is_none() {
            config.api_key = std::env::var("DOCSHELF_API_KEY")
                .ok()
                .or_else(|| std::env::var("GEMINI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("DOCSHELF_MODEL") {
            config.model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".docshelf")
    }

    /// Cache TTL as a Duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_files == 0 {
            return Err(ConfigError::ValidationError("max_files must be > 0".into()));
        }
        if self.max_context_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_context_tokens must be > 0".into(),
            ));
        }
        if self.ingest.parallelism == 0 {
            return Err(ConfigError::ValidationError(
                "ingest.parallelism must be > 0".into(),
            ));
        }
        if self.turn.tool_iteration_limit == 0 {
            return Err(ConfigError::ValidationError(
                "turn.tool_iteration_limit must be > 0".into(),
            ));
        }
        if self.ingest.upload_backoff_cap_ms < self.ingest.upload_backoff_base_ms {
            return Err(ConfigError::ValidationError(
                "upload_backoff_cap_ms must be >= upload_backoff_base_ms".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            max_context_tokens: default_max_context_tokens(),
            max_files: default_max_files(),
            max_file_bytes: default_max_file_bytes(),
            cache_ttl_secs: default_cache_ttl_secs(),
            ingest: IngestConfig::default(),
            turn: TurnConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
