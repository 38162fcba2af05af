use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::filter::FilterRule;
use crate::hash::HashAlgorithm;
use crate::remote::MODRINTH_API_URL;

/// Main configuration structure for resources-updater
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Working root; every resource directory must live below it
    #[serde(default = "default_working_directory")]
    pub working_directory: String,

    /// Run synchronization at all
    #[serde(default = "default_true")]
    pub enable: bool,

    /// Run once more, then persist `enable: false`
    #[serde(default)]
    pub disable_after_next_time: bool,

    /// Ask for confirmation before synchronizing
    #[serde(default = "default_true")]
    pub ask: bool,

    /// Run handlers concurrently, one worker per handler
    #[serde(default)]
    pub concurrent: bool,

    /// Per-request network timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Handlers in execution order, keyed by handler identifier
    #[serde(
        default = "default_handlers",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    pub handlers: Vec<HandlerConfig>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

/// Per-handler settings, tagged by the handler identifier
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HandlerConfig {
    Modrinth(ModrinthConfig),
}

impl HandlerConfig {
    pub fn identifier(&self) -> &'static str {
        match self {
            HandlerConfig::Modrinth(_) => "modrinth",
        }
    }
}

/// Modrinth handler settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ModrinthConfig {
    /// API base URL
    #[serde(default = "default_modrinth_api_url")]
    pub api_url: String,

    /// Digest algorithm for local hashing and the lookup
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,

    /// Restrict updates to these game versions
    #[serde(default)]
    pub game_versions: Option<Vec<String>>,

    /// Resource groups in processing order
    #[serde(default = "default_resources")]
    pub resources: Vec<ResourceGroup>,
}

/// One directory synchronized as a unit
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ResourceGroup {
    /// Directory relative to the working root
    pub directory: String,

    /// Archive directory relative to the working root (defaults to the root)
    #[serde(default)]
    pub archive_dir: Option<String>,

    /// Exact names to consider, when present
    #[serde(default)]
    pub whitelist: Option<Vec<String>>,

    /// Exact names to never touch
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Name pattern, anchored at the start; defaults to jar archives
    #[serde(default = "default_pattern")]
    pub pattern: Option<String>,

    /// Loader / platform selectors sent with the lookup
    #[serde(default = "default_loaders")]
    pub loaders: Vec<String>,
}

impl ResourceGroup {
    /// A group for `directory` with default filter and selectors
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            archive_dir: None,
            whitelist: None,
            blacklist: Vec::new(),
            pattern: default_pattern(),
            loaders: default_loaders(),
        }
    }

    pub fn filter_rule(&self) -> FilterRule {
        FilterRule {
            whitelist: self.whitelist.clone(),
            blacklist: self.blacklist.clone(),
            pattern: self.pattern.clone(),
        }
    }
}

// Default value functions
fn default_working_directory() -> String {
    "./server".to_string()
}
fn default_true() -> bool {
    true
}
fn default_timeout() -> f64 {
    10.0
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_modrinth_api_url() -> String {
    MODRINTH_API_URL.to_string()
}
fn default_pattern() -> Option<String> {
    Some(r"^.*\.jar$".to_string())
}
fn default_loaders() -> Vec<String> {
    vec!["fabric".to_string()]
}
fn default_resources() -> Vec<ResourceGroup> {
    vec![ResourceGroup::new("mods")]
}
fn default_handlers() -> Vec<HandlerConfig> {
    vec![HandlerConfig::Modrinth(ModrinthConfig::default())]
}

// Default implementations
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            color: default_true(),
        }
    }
}

impl Default for ModrinthConfig {
    fn default() -> Self {
        Self {
            api_url: default_modrinth_api_url(),
            hash_algorithm: HashAlgorithm::default(),
            game_versions: None,
            resources: default_resources(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("resources-updater").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.working_directory = shellexpand::full(&self.working_directory)
            .context("Failed to expand working_directory path")?
            .into_owned();

        Ok(())
    }

    /// Reject values that cannot drive a sync run
    pub fn validate(&self) -> Result<()> {
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            bail!("timeout must be a positive number of seconds, got {}", self.timeout);
        }

        for handler in &self.handlers {
            let HandlerConfig::Modrinth(modrinth) = handler;
            if let Some(group) = modrinth.resources.iter().find(|g| g.directory.trim().is_empty()) {
                bail!(
                    "handler '{}' has a resource group without a directory (loaders: {:?})",
                    handler.identifier(),
                    group.loaders
                );
            }
        }

        Ok(())
    }

    /// Network timeout applied to every request
    pub fn timeout_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout).unwrap_or(Duration::from_secs(10))
    }

    pub fn working_root(&self) -> PathBuf {
        PathBuf::from(&self.working_directory)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            working_directory: default_working_directory(),
            enable: default_true(),
            disable_after_next_time: false,
            ask: default_true(),
            concurrent: false,
            timeout: default_timeout(),
            logging: LoggingConfig::default(),
            handlers: default_handlers(),
        }
    }
}
