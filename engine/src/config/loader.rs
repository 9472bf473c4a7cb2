use crate::config::error::{ConfigError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Marker detection settings
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Active spec resolution settings
    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// Marker detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Directory name that marks a root as spec-workflow enabled
    #[serde(default = "default_marker_dir")]
    pub marker_dir: String,

    /// Debounce window for live marker watchers, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

/// Active spec resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Directory under a workspace root holding one directory per spec
    #[serde(default = "default_specs_dir")]
    pub specs_dir: String,

    /// File that must exist for a spec to count
    #[serde(default = "default_primary_document")]
    pub primary_document: String,

    /// Environment variable that pins the active spec
    #[serde(default = "default_override_var")]
    pub override_var: String,

    /// Override poll interval in milliseconds; zero or less disables polling
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: i64,

    /// Attach to git for branch-based resolution
    #[serde(default = "default_true")]
    pub vcs_enabled: bool,
}

// Default value functions
fn default_marker_dir() -> String {
    crate::DEFAULT_MARKER_DIR.to_string()
}
fn default_debounce_ms() -> u64 {
    200
}
fn default_specs_dir() -> String {
    crate::DEFAULT_SPECS_DIR.to_string()
}
fn default_primary_document() -> String {
    crate::DEFAULT_PRIMARY_DOCUMENT.to_string()
}
fn default_override_var() -> String {
    crate::DEFAULT_OVERRIDE_VAR.to_string()
}
fn default_poll_interval_ms() -> i64 {
    crate::DEFAULT_POLL_INTERVAL_MS
}
fn default_true() -> bool {
    true
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            marker_dir: default_marker_dir(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            specs_dir: default_specs_dir(),
            primary_document: default_primary_document(),
            override_var: default_override_var(),
            poll_interval_ms: default_poll_interval_ms(),
            vcs_enabled: default_true(),
        }
    }
}

impl PresenceConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl ResolverConfig {
    /// Poll interval, or `None` when polling is disabled.
    pub fn poll_interval(&self) -> Option<Duration> {
        u64::try_from(self.poll_interval_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

impl WatchConfig {
    /// Reject values the engines cannot use.
    pub fn validate(&self) -> Result<()> {
        require_single_component("presence.marker_dir", &self.presence.marker_dir)?;
        require_single_component("resolver.specs_dir", &self.resolver.specs_dir)?;
        require_single_component("resolver.primary_document", &self.resolver.primary_document)?;
        if self.resolver.override_var.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "resolver.override_var must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn require_single_component(field: &str, value: &str) -> Result<()> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ConfigError::ValidationError(format!(
            "{field} must be a single path component, got {value:?}"
        ))),
    }
}

/// Configuration loader with layered merging support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_source: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Create a new ConfigLoader
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_source: None,
        }
    }

    /// Set the configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Read environment overrides from `vars` instead of the process environment
    pub fn with_env_source(mut self, vars: HashMap<String, String>) -> Self {
        self.env_source = Some(vars);
        self
    }

    /// Load configuration with layered merging:
    /// 1. Start with defaults (from Default implementations)
    /// 2. Merge config file if provided
    /// 3. Override with environment variables (SPECWATCH_ prefix)
    pub fn load(&self) -> Result<WatchConfig> {
        let mut builder = Config::builder();

        // Layer 1: Defaults (serialize defaults to JSON and load as base)
        let defaults_json = serde_json::to_string(&WatchConfig::default())?;
        builder = builder.add_source(File::from_str(&defaults_json, config::FileFormat::Json));

        // Layer 2: Config file (if provided)
        if let Some(ref path) = self.config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_ref()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        // Layer 3: Environment variables (SPECWATCH_ prefix, double underscore for nesting)
        // Example: SPECWATCH_RESOLVER__POLL_INTERVAL_MS=0
        builder = builder.add_source(
            Environment::with_prefix("SPECWATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(self.env_source.clone()),
        );

        let config = builder.build()?;
        let watch_config: WatchConfig = config.try_deserialize()?;
        watch_config.validate()?;

        tracing::debug!(
            file = ?self.config_path,
            marker_dir = %watch_config.presence.marker_dir,
            poll_interval_ms = watch_config.resolver.poll_interval_ms,
            "Configuration loaded"
        );
        Ok(watch_config)
    }

    /// Locate the default config file in standard locations:
    /// 1. Current directory: ./specwatch.toml
    /// 2. XDG config: ~/.config/specwatch/config.toml
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./specwatch.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("specwatch").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<WatchConfig> {
        let loader = match Self::find_config_file() {
            Some(config_path) => ConfigLoader::new().with_file(config_path),
            None => ConfigLoader::new(),
        };

        loader.load()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
