use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors found while validating a loaded configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the sorter service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Vision classification service configuration
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Batch execution configuration
    #[serde(default)]
    pub batch: BatchConfig,
    /// Archive output configuration
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Input locations
    #[serde(default)]
    pub input: InputConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Prometheus exporter port; no exporter when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Vision classification service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Chat completions endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Bearer token for the endpoint
    #[serde(default)]
    pub api_key: String,
    /// Model identifier sent with each request
    #[serde(default = "default_model")]
    pub model: String,
    /// Cap on reply length; replies are short code lists
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-image request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Batch execution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Maximum simultaneous classification calls
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

/// Compression applied to archive entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveCompression {
    Stored,
    #[default]
    Deflated,
}

/// Archive output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Directory archives and the run report are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Entry compression
    #[serde(default)]
    pub compression: ArchiveCompression,
    /// Append a timestamp run identifier to archive filenames
    #[serde(default)]
    pub append_run_id: bool,
}

/// Input locations for the batch binary
#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    /// Directory holding the uploaded images
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
    /// JSON file holding the caller's category selection
    #[serde(default = "default_params_file")]
    pub params_file: PathBuf,
}

// Default value functions
fn default_service_name() -> String {
    "sorter-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    100
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_concurrent_requests() -> usize {
    4
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output_zips")
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploaded_images")
}

fn default_params_file() -> PathBuf {
    PathBuf::from("selected_params.json")
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("service.name", "sorter-service")?
            .set_default("service.log_level", "info")?;

        // Conventional variable name for the vision API key
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            builder = builder.set_default("classifier.api_key", api_key)?;
        }

        let config = builder
            .add_source(config::File::with_name("config/sorter").required(false))
            .add_source(config::File::with_name("/etc/photosort/sorter").required(false))
            // SORTER__CLASSIFIER__API_KEY -> classifier.api_key
            .add_source(
                config::Environment::with_prefix("SORTER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.classifier.api_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "classifier.api_key (or OPENAI_API_KEY)".to_string(),
            ));
        }

        if self.classifier.api_url.is_empty() {
            return Err(ConfigError::MissingRequired("classifier.api_url".to_string()));
        }

        if self.classifier.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                key: "classifier.max_tokens".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.classifier.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "classifier.request_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.batch.max_concurrent_requests == 0 {
            return Err(ConfigError::InvalidValue {
                key: "batch.max_concurrent_requests".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Get the per-image classification timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier.request_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: None,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            compression: ArchiveCompression::default(),
            append_run_id: false,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            uploads_dir: default_uploads_dir(),
            params_file: default_params_file(),
        }
    }
}
