//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::path::PathBuf;

/// Directory used when none is configured, relative to the working directory.
pub const DEFAULT_DIRECTORY: &str = "cached";

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the manifest and the artifact files
    pub directory: PathBuf,
    /// Whether results are persisted to the file tier at all
    pub enable_file_cache: bool,
    /// Extension appended to artifact names when an operation sets none
    pub default_extension: Option<String>,
    /// Treat unreadable artifacts of existing manifest entries as misses
    pub tolerate_missing_artifacts: bool,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MEMOCACHE_DIR` - Cache directory (default: `cached`)
    /// - `MEMOCACHE_FILE_CACHE` - Enable the file tier (default: true)
    /// - `MEMOCACHE_DEFAULT_EXTENSION` - Default artifact extension (default: none)
    /// - `MEMOCACHE_TOLERATE_MISSING` - Recompute on unreadable artifacts (default: false)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a Config from an arbitrary variable lookup.
    ///
    /// Absent or unparseable values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            directory: lookup("MEMOCACHE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.directory),
            enable_file_cache: lookup("MEMOCACHE_FILE_CACHE")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.enable_file_cache),
            default_extension: lookup("MEMOCACHE_DEFAULT_EXTENSION")
                .filter(|v| !v.is_empty())
                .or(defaults.default_extension),
            tolerate_missing_artifacts: lookup("MEMOCACHE_TOLERATE_MISSING")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.tolerate_missing_artifacts),
        }
    }

    /// Default configuration rooted at `directory`.
    pub fn in_dir(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Configuration with the file tier disabled.
    pub fn memory_only() -> Self {
        Self {
            enable_file_cache: false,
            ..Self::default()
        }
    }

    pub fn with_default_extension(mut self, extension: impl Into<String>) -> Self {
        self.default_extension = Some(extension.into());
        self
    }

    pub fn with_tolerate_missing_artifacts(mut self, tolerate: bool) -> Self {
        self.tolerate_missing_artifacts = tolerate;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            enable_file_cache: true,
            default_extension: None,
            tolerate_missing_artifacts: false,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.directory, PathBuf::from("cached"));
        assert!(config.enable_file_cache);
        assert!(config.default_extension.is_none());
        assert!(!config.tolerate_missing_artifacts);
    }

    #[test]
    fn test_config_from_lookup_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_from_lookup_values() {
        let config = Config::from_lookup(lookup_from(&[
            ("MEMOCACHE_DIR", "/var/cache/memo"),
            ("MEMOCACHE_FILE_CACHE", "off"),
            ("MEMOCACHE_DEFAULT_EXTENSION", ".json"),
            ("MEMOCACHE_TOLERATE_MISSING", "yes"),
        ]));
        assert_eq!(config.directory, PathBuf::from("/var/cache/memo"));
        assert!(!config.enable_file_cache);
        assert_eq!(config.default_extension.as_deref(), Some(".json"));
        assert!(config.tolerate_missing_artifacts);
    }

    #[test]
    fn test_config_unparseable_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("MEMOCACHE_DIR", "   "),
            ("MEMOCACHE_FILE_CACHE", "maybe"),
            ("MEMOCACHE_DEFAULT_EXTENSION", ""),
        ]));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_builders() {
        let config = Config::in_dir("/tmp/memo")
            .with_default_extension(".txt")
            .with_tolerate_missing_artifacts(true);
        assert_eq!(config.directory, PathBuf::from("/tmp/memo"));
        assert_eq!(config.default_extension.as_deref(), Some(".txt"));
        assert!(config.tolerate_missing_artifacts);
        assert!(!Config::memory_only().enable_file_cache);
    }
}
