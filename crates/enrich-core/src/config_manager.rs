use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::copy::DEFAULT_MAX_DEPTH;
use crate::retry::{RetryPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::EnrichError {
    fn from(err: ConfigError) -> Self {
        crate::EnrichError::Configuration(err.to_string())
    }
}

/// Main configuration for dataset enrichment runs
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnrichConfig {
    /// Embedding endpoint configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chat endpoint configuration for topic derivation
    #[serde(default)]
    pub chat: ChatConfig,

    /// Retry budget for every remote call
    #[serde(default)]
    pub retry: RetryConfig,

    /// Row copy settings
    #[serde(default)]
    pub copy: CopyConfig,

    /// Column names in the input rows
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible API (".../v1")
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_max_tokens")]
    pub max_tokens: usize,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_embedding_model(),
            max_tokens: default_embedding_max_tokens(),
            temperature: 0.0,
            timeout_secs: default_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_chat_model")]
    pub model: String,

    #[serde(default = "default_chat_temperature")]
    pub temperature: f32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// System message sent ahead of every topic prompt
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_chat_model(),
            temperature: default_chat_temperature(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_api_key_env(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            current_attempt: 1,
            max_attempts: self.max_attempts,
            backoff_base: self.backoff_base,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    #[serde(default = "default_copy_max_depth")]
    pub max_depth: usize,

    /// Directory for the file fallback (system temp dir when unset)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            max_depth: default_copy_max_depth(),
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default = "default_text_field")]
    pub text_field: String,

    #[serde(default = "default_embedding_field")]
    pub embedding_field: String,

    #[serde(default = "default_topic_field")]
    pub topic_field: String,

    #[serde(default = "default_cluster_id_field")]
    pub cluster_id_field: String,

    #[serde(default = "default_representative_field")]
    pub representative_field: String,

    #[serde(default = "default_members_field")]
    pub members_field: String,

    /// Upper bound on snippets per topic prompt (unbounded when unset)
    #[serde(default)]
    pub max_snippets_per_cluster: Option<usize>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            text_field: default_text_field(),
            embedding_field: default_embedding_field(),
            topic_field: default_topic_field(),
            cluster_id_field: default_cluster_id_field(),
            representative_field: default_representative_field(),
            members_field: default_members_field(),
            max_snippets_per_cluster: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "compact", "full"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_max_tokens() -> usize {
    8191
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_chat_temperature() -> f32 {
    0.2
}
fn default_timeout_secs() -> u64 {
    180
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_system_prompt() -> String {
    "You label clusters of related texts with concise topics.".to_string()
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_backoff_base() -> u64 {
    DEFAULT_BACKOFF_BASE
}
fn default_copy_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}
fn default_text_field() -> String {
    "text".to_string()
}
fn default_embedding_field() -> String {
    "embedding".to_string()
}
fn default_topic_field() -> String {
    "topic".to_string()
}
fn default_cluster_id_field() -> String {
    "cluster_id".to_string()
}
fn default_representative_field() -> String {
    "representative".to_string()
}
fn default_members_field() -> String {
    "members".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

/// Configuration manager
#[derive(Debug)]
pub struct ConfigManager {
    config: EnrichConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (.env file)
    /// 2. Config file (.enrich.toml)
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_dotenv();

        let (config, config_path) = Self::load_config_file()?;
        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        info!(
            config_file = ?config_path,
            embedding_model = %config.embedding.model,
            chat_model = %config.chat.model,
            max_attempts = config.retry.max_attempts,
            "Configuration loaded"
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Load an explicit config file, still applying env overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let config = Self::apply_env_overrides(Self::read_toml_file(path)?);
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
        })
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
            return;
        }

        if let Some(home) = dirs::home_dir() {
            let home_env = home.join(".enrich.env");
            if home_env.exists() {
                if let Err(e) = dotenv::from_path(&home_env) {
                    warn!("Failed to load .enrich.env: {}", e);
                }
            }
        }
    }

    /// Search order:
    /// 1. ./.enrich.toml
    /// 2. ~/.enrich/config.toml
    /// 3. Defaults
    fn load_config_file() -> Result<(EnrichConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".enrich.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".enrich").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        info!("No config file found, using defaults");
        Ok((EnrichConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<EnrichConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(mut config: EnrichConfig) -> EnrichConfig {
        if let Ok(endpoint) = std::env::var("ENRICH_EMBEDDING_ENDPOINT") {
            config.embedding.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("ENRICH_EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(endpoint) = std::env::var("ENRICH_CHAT_ENDPOINT") {
            config.chat.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("ENRICH_CHAT_MODEL") {
            config.chat.model = model;
        }
        if let Ok(attempts) = std::env::var("ENRICH_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                config.retry.max_attempts = n;
            }
        }
        if let Ok(depth) = std::env::var("ENRICH_COPY_MAX_DEPTH") {
            if let Ok(d) = depth.parse() {
                config.copy.max_depth = d;
            }
        }
        config
    }

    pub fn validate_config(config: &EnrichConfig) -> Result<(), ConfigError> {
        for (name, temperature) in [
            ("embedding", config.embedding.temperature),
            ("chat", config.chat.temperature),
        ] {
            if !(0.0..=1.0).contains(&temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "{} temperature {} must be within [0, 1]",
                    name, temperature
                )));
            }
        }

        if config.embedding.timeout_secs == 0 || config.chat.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        config
            .retry
            .policy()
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if config.copy.max_depth == 0 {
            return Err(ConfigError::ValidationError(
                "copy.max_depth must be at least 1".to_string(),
            ));
        }

        if config.dataset.max_snippets_per_cluster == Some(0) {
            return Err(ConfigError::ValidationError(
                "dataset.max_snippets_per_cluster must be at least 1".to_string(),
            ));
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "compact" | "full" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, compact, full",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &EnrichConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Create a default config file
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = EnrichConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}
