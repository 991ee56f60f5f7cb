//! Configuration system for vfsprobe
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation of table and transport sizing

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete probe configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// General settings
    pub probe: ProbeSettings,

    /// Process filter
    pub filter: FilterSettings,

    /// Context table sizing
    pub table: TableSettings,

    /// Event transport sizing
    pub transport: TransportSettings,

    /// Collection tagging
    pub collection: CollectionSettings,

    /// Export settings
    pub export: ExportSettings,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Process filter settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Only trace this process id (0 = all processes)
    pub target_pid: u32,
}

/// Context table settings (applies to each instrument)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSettings {
    /// Maximum in-flight operations per instrument
    pub capacity: usize,

    /// Lock shards; must be a power of two
    pub shards: usize,
}

/// Default table capacity (matches the kernel's default hash map size)
pub const DEFAULT_TABLE_CAPACITY: usize = 10240;

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_TABLE_CAPACITY,
            shards: 64,
        }
    }
}

/// Event transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Events buffered between the handlers and the consumer
    pub capacity: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            capacity: crate::transport::DEFAULT_TRANSPORT_CAPACITY,
        }
    }
}

/// Collection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionSettings {
    /// Identifier stamped on every collected row
    pub id: String,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
        }
    }
}

/// Export settings container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// JSONL file output
    pub jsonl: JsonlExportConfig,
}

/// JSONL export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonlExportConfig {
    /// Enable JSONL export
    pub enabled: bool,

    /// Output file path
    pub path: String,

    /// Append to existing file
    pub append: bool,

    /// Flush after each event
    pub flush_each: bool,
}

impl Default for JsonlExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/var/lib/vfsprobe/events.jsonl".to_string(),
            append: true,
            flush_each: false,
        }
    }
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. VFSPROBE_CONFIG environment variable
    /// 3. ~/.config/vfsprobe/config.toml
    /// 4. /etc/vfsprobe/config.toml
    /// 5. Default values
    ///
    /// An explicit CLI path must exist and validate; it never falls back.
    pub fn load(&self) -> ConfigResult<ProbeConfig> {
        if let Some(path) = &self.cli_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.clone()));
            }
        }
        let config_path = self.find_config_file();

        let mut config = if let Some(path) = config_path {
            info!("Loading configuration from: {}", path.display());
            Self::load_from_file(&path)?
        } else {
            debug!("No config file found, using defaults");
            ProbeConfig::default()
        };

        Self::apply_env_overrides(&mut config);
        Self::validate(&config)?;

        Ok(config)
    }

    /// Find the config file to use
    pub fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("VFSPROBE_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("VFSPROBE_CONFIG path does not exist: {}", env_path);
        }

        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        let path = PathBuf::from("/etc/vfsprobe/config.toml");
        if path.exists() {
            return Some(path);
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> ConfigResult<ProbeConfig> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: ProbeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(config: &mut ProbeConfig) {
        Self::apply_overrides(config, |key| std::env::var(key).ok());
    }

    fn apply_overrides(config: &mut ProbeConfig, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("VFSPROBE_LOG_LEVEL") {
            config.probe.log_level = val;
        }

        if let Some(val) = var("VFSPROBE_TARGET_PID") {
            match val.parse() {
                Ok(pid) => config.filter.target_pid = pid,
                Err(_) => warn!("Ignoring invalid VFSPROBE_TARGET_PID: {}", val),
            }
        }

        if let Some(val) = var("VFSPROBE_TABLE_CAPACITY") {
            if let Ok(capacity) = val.parse() {
                config.table.capacity = capacity;
            }
        }
        if let Some(val) = var("VFSPROBE_TRANSPORT_CAPACITY") {
            if let Ok(capacity) = val.parse() {
                config.transport.capacity = capacity;
            }
        }

        if let Some(val) = var("VFSPROBE_COLLECTION_ID") {
            config.collection.id = val;
        }

        if let Some(val) = var("VFSPROBE_JSONL_PATH") {
            config.export.jsonl.path = val;
            config.export.jsonl.enabled = true;
        }
        if let Some(val) = var("VFSPROBE_JSONL_ENABLED") {
            config.export.jsonl.enabled = val.parse().unwrap_or(config.export.jsonl.enabled);
        }
    }

    /// Validate configuration
    pub fn validate(config: &ProbeConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.probe.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.probe.log_level, valid_levels
            )));
        }

        if config.table.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "Table capacity cannot be 0".to_string(),
            ));
        }

        let shards = config.table.shards;
        if shards == 0 || !shards.is_power_of_two() || shards > config.table.capacity {
            return Err(ConfigError::ValidationError(format!(
                "Table shards must be a power of two between 1 and capacity ({}), got {}",
                config.table.capacity, shards
            )));
        }

        if config.transport.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "Transport capacity cannot be 0".to_string(),
            ));
        }

        if config.collection.id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Collection id cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a file
    pub fn save(&self, config: &ProbeConfig, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| {
            ConfigError::ValidationError(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("vfsprobe").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper module for platform-specific directories
mod dirs {
    use std::path::PathBuf;

    /// Get the user's config directory
    pub fn config_dir() -> Option<PathBuf> {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}
