//! Configuration System
//!
//! Layered configuration for the engine, the chat-completions provider, storage
//! and logging. Sources, lowest precedence first: built-in defaults, the global
//! config file, the workspace files, then `FOLIO__SECTION__KEY` environment
//! variables.

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod paths;
mod sources;

pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolioConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tunables of the generation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrent outline requests per batch.
    pub outline_batch_size: usize,
    pub outline_batch_delay_ms: u64,
    /// Outline passes per run before giving up on outline-less chapters.
    pub outline_passes: u32,
    pub inter_unit_delay_ms: u64,
    /// Units are skipped once total words reach target × this ratio.
    pub budget_ratio: f64,
    /// Shorter generations are treated as degenerate and retried.
    pub min_content_chars: usize,
    /// Prior prose passed to the content service, in characters.
    pub context_window_chars: usize,
    pub character_history_cap: usize,
    pub duration_window: usize,
    pub recovery_hint_ttl_secs: u64,
    pub retry: RetryConfig,
    pub preview: PreviewConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            outline_batch_size: 3,
            outline_batch_delay_ms: 2_000,
            outline_passes: 3,
            inter_unit_delay_ms: 1_000,
            budget_ratio: 1.1,
            min_content_chars: 200,
            context_window_chars: 6_000,
            character_history_cap: 10,
            duration_window: 10,
            recovery_hint_ttl_secs: 24 * 60 * 60,
            retry: RetryConfig::default(),
            preview: PreviewConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn outline_batch_delay(&self) -> Duration {
        Duration::from_millis(self.outline_batch_delay_ms)
    }

    pub fn inter_unit_delay(&self) -> Duration {
        Duration::from_millis(self.inter_unit_delay_ms)
    }

    pub fn recovery_hint_ttl(&self) -> Duration {
        Duration::from_secs(self.recovery_hint_ttl_secs)
    }

    /// Engine settings with every delay zeroed; used by tests and dry runs.
    pub fn without_delays() -> Self {
        Self {
            outline_batch_delay_ms: 0,
            inter_unit_delay_ms: 0,
            retry: RetryConfig {
                base_delay_ms: 0,
                ..RetryConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.outline_batch_size == 0 {
            return Err("outline_batch_size must be at least 1".to_string());
        }
        if self.outline_passes == 0 {
            return Err("outline_passes must be at least 1".to_string());
        }
        if !(self.budget_ratio.is_finite() && self.budget_ratio > 0.0) {
            return Err(format!("budget_ratio must be positive, got {}", self.budget_ratio));
        }
        if self.character_history_cap == 0 {
            return Err("character_history_cap must be at least 1".to_string());
        }
        if self.duration_window == 0 {
            return Err("duration_window must be at least 1".to_string());
        }
        self.retry.validate()?;
        if self.preview.chunk_words == 0 {
            return Err("preview.chunk_words must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Backoff settings for content generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub rate_limit_multiplier: f64,
    pub transient_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            rate_limit_multiplier: 2.0,
            transient_multiplier: 1.5,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("retry.max_delay_ms must not be below retry.base_delay_ms".to_string());
        }
        if self.rate_limit_multiplier < 1.0 || self.transient_multiplier < 1.0 {
            return Err("retry multipliers must be at least 1.0".to_string());
        }
        Ok(())
    }
}

/// Live preview replay of finished units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub enabled: bool,
    pub chunk_words: usize,
    pub chunk_delay_ms: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chunk_words: 6,
            chunk_delay_ms: 25,
        }
    }
}

/// OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub model: String,
    /// Inline key; prefer `api_key_env`.
    pub api_key: Option<String>,
    /// Environment variable holding the key.
    pub api_key_env: Option<String>,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            request_timeout_secs: 120,
            connect_timeout_secs: 10,
            temperature: Some(0.8),
            max_tokens: None,
        }
    }
}

impl ProviderConfig {
    /// Inline key first, then the configured environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        self.api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model name cannot be empty".to_string());
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(format!("Invalid endpoint URL: {}", self.endpoint));
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be at least 1".to_string());
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(format!("temperature must be within 0.0..=2.0, got {}", temperature));
            }
        }
        Ok(())
    }
}

/// Storage location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Explicit sled directory; relative paths resolve against the workspace.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the sled directory for a workspace.
    pub fn resolve_store_path(&self, workspace_root: &Path) -> Result<PathBuf, ApiError> {
        match &self.store_path {
            Some(path) if path.is_absolute() => Ok(path.clone()),
            Some(path) => Ok(workspace_root.join(path)),
            None => Ok(paths::workspace_data_dir(workspace_root)?.join("store")),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Engine(String),
    Provider(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Engine(msg) => write!(f, "Engine: {}", msg),
            ValidationError::Provider(msg) => write!(f, "Provider: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl FolioConfig {
    /// Validate the entire configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.engine.validate() {
            errors.push(ValidationError::Engine(e));
        }
        if let Err(e) = self.provider.validate() {
            errors.push(ValidationError::Provider(e));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            errors.push(ValidationError::Logging(format!(
                "Invalid format '{}'",
                self.logging.format
            )));
        }
        if !matches!(self.logging.output.as_str(), "stdout" | "stderr" | "file") {
            errors.push(ValidationError::Logging(format!(
                "Invalid output '{}'",
                self.logging.output
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold every problem into one `ApiError`.
    pub fn ensure_valid(&self) -> Result<(), ApiError> {
        self.validate().map_err(|errors| {
            let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ApiError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                msgs.join("\n")
            ))
        })
    }
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace from all layered sources.
    pub fn load(workspace_root: &Path) -> Result<FolioConfig, ApiError> {
        let builder = Config::builder();
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let config = builder.add_source(env_source()).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load a single explicit file; environment overrides still apply.
    pub fn load_from_file(path: &Path) -> Result<FolioConfig, ApiError> {
        if !path.exists() {
            return Err(ApiError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config = Config::builder()
            .add_source(File::from(path.to_path_buf()))
            .add_source(env_source())
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("FOLIO")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
