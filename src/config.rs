use std::path::{Path, PathBuf};

use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::audience::{BatchLimits, ADD_BATCH_CEILING, REMOVE_BATCH_CEILING};
use crate::models::Segment;
use crate::segmenter::InvalidDatePolicy;
use crate::validation::InputValidator;

/// Suffix appended to audience names when running in debug mode
pub const DEBUG_AUDIENCE_SUFFIX: &str = " test";

/// Application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub source: SourceConfig,
    pub audience: AudienceConfig,
    pub segmenter: SegmenterConfig,
    pub report: ReportConfig,
    /// Use the testing account and suffixed audience names
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

/// Where export files are picked up
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Directory the FTP drop is synced or mounted to
    pub drop_dir: String,
    /// File name keyword for the first load
    pub initial_keyword: String,
    /// File name keyword for ongoing runs
    pub incremental_keyword: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudienceConfig {
    pub api_base_url: String,
    pub access_token: String,
    pub account_id: String,
    pub testing_account_id: String,
    pub current_name: String,
    pub lapsed_name: String,
    pub extra_lapsed_name: String,
    pub add_batch_size: usize,
    pub remove_batch_size: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    pub invalid_date_policy: InvalidDatePolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Write each run's lists here when set
    pub output_directory: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "data/customers.db".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            format: "text".to_string(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            drop_dir: "./drop".to_string(),
            initial_keyword: "vendor".to_string(),
            incremental_keyword: "_".to_string(),
        }
    }
}

impl Default for AudienceConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://graph.facebook.com/v19.0".to_string(),
            access_token: String::new(),
            account_id: String::new(),
            testing_account_id: String::new(),
            current_name: "Current Customers".to_string(),
            lapsed_name: "Lapsed Customers".to_string(),
            extra_lapsed_name: "Extra Lapsed Customers".to_string(),
            add_batch_size: ADD_BATCH_CEILING,
            remove_batch_size: REMOVE_BATCH_CEILING,
            request_timeout_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    ///
    /// Defaults, then `config/default`, `config/local`, the explicit file (if
    /// any), then `AUDIENCE_*` environment variables (`__` between sections).
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            // Start with default values
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("AUDIENCE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(anyhow::anyhow!("database.path must not be empty"));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        // Validate source config
        if self.source.initial_keyword.is_empty() || self.source.incremental_keyword.is_empty() {
            return Err(anyhow::anyhow!("source keywords must not be empty"));
        }

        // Validate audience config
        for name in [&self.audience.current_name, &self.audience.lapsed_name, &self.audience.extra_lapsed_name] {
            InputValidator::validate_audience_name(name)?;
        }
        if self.audience.current_name == self.audience.lapsed_name
            || self.audience.current_name == self.audience.extra_lapsed_name
            || self.audience.lapsed_name == self.audience.extra_lapsed_name
        {
            return Err(anyhow::anyhow!("audience names must be distinct"));
        }

        if self.audience.add_batch_size == 0 || self.audience.add_batch_size > ADD_BATCH_CEILING {
            return Err(anyhow::anyhow!("add_batch_size must be between 1 and {}", ADD_BATCH_CEILING));
        }
        if self.audience.remove_batch_size == 0 || self.audience.remove_batch_size > REMOVE_BATCH_CEILING {
            return Err(anyhow::anyhow!("remove_batch_size must be between 1 and {}", REMOVE_BATCH_CEILING));
        }
        if self.audience.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("request_timeout_secs must be greater than 0"));
        }

        Ok(())
    }

    /// Check the credentials needed to talk to the audience service
    pub fn validate_credentials(&self) -> Result<()> {
        if self.audience.access_token.trim().is_empty() {
            return Err(anyhow::anyhow!("audience.access_token is not set"));
        }
        if self.account_id().trim().is_empty() {
            return Err(anyhow::anyhow!(
                "{} is not set",
                if self.debug { "audience.testing_account_id" } else { "audience.account_id" }
            ));
        }
        Ok(())
    }

    /// Ad account to operate on
    #[must_use]
    pub fn account_id(&self) -> &str {
        if self.debug {
            &self.audience.testing_account_id
        } else {
            &self.audience.account_id
        }
    }

    /// Audience name for a segment, suffixed in debug mode
    #[must_use]
    pub fn audience_name(&self, segment: Segment) -> String {
        let base = match segment {
            Segment::Current => &self.audience.current_name,
            Segment::Lapsed => &self.audience.lapsed_name,
            Segment::ExtraLapsed => &self.audience.extra_lapsed_name,
        };
        if self.debug {
            format!("{base}{DEBUG_AUDIENCE_SUFFIX}")
        } else {
            base.clone()
        }
    }

    /// Batch ceilings for the sync adapter
    #[must_use]
    pub const fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            add: self.audience.add_batch_size,
            remove: self.audience.remove_batch_size,
        }
    }

    /// Database file path
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database.path)
    }

    /// Get log level from environment or config
    #[must_use]
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}
