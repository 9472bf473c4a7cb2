/// Configuration module for specwatch
///
/// Implements layered configuration with the 12-factor app pattern:
/// 1. Defaults (from code)
/// 2. Config file (specwatch.toml)
/// 3. Environment variables (SPECWATCH_* prefix)
///
/// # Example
///
/// ```no_run
/// use specwatch_engine::config::ConfigLoader;
///
/// // Load from default locations
/// let config = ConfigLoader::load_default().expect("Failed to load config");
///
/// // Or load from specific file
/// let config = ConfigLoader::new()
///     .with_file("./my-specwatch.toml")
///     .load()
///     .expect("Failed to load config");
/// ```
pub mod error;
pub mod loader;

// Re-export main types
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, PresenceConfig, ResolverConfig, WatchConfig};
