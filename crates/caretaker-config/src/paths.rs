//! Path management configuration.
//!
//! Controls where Caretaker keeps its audit database, captured command output,
//! and where an alternative capability catalog is read from.
//!
//! # Configuration
//!
//! ```toml
//! [paths]
//! data_dir = "~/.local/share/caretaker"
//! catalog = "/opt/caretaker/capabilities.json"
//! ```
//!
//! # Environment Variables
//!
//! - `CARETAKER_DATA_DIR` - Override the data directory for all persisted state

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "CARETAKER_DATA_DIR";

/// Path management configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Base directory for persisted state.
    /// Default: platform data dir joined with `caretaker`.
    ///
    /// Can be overridden by the `CARETAKER_DATA_DIR` environment variable.
    pub data_dir: Option<PathBuf>,

    /// Capability catalog file. When unset the embedded catalog is used.
    pub catalog: Option<PathBuf>,
}

impl PathConfig {
    /// Get the effective data directory, checking the environment first.
    ///
    /// Resolution order:
    /// 1. `CARETAKER_DATA_DIR` environment variable
    /// 2. Configured `data_dir` value
    /// 3. Default: `<platform data dir>/caretaker`
    pub fn effective_data_dir(&self) -> PathBuf {
        self.data_dir_from(std::env::var(DATA_DIR_ENV).ok())
    }

    fn data_dir_from(&self, env_value: Option<String>) -> PathBuf {
        if let Some(dir) = env_value.filter(|d| !d.is_empty()) {
            return PathBuf::from(dir);
        }

        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("caretaker")
        })
    }

    /// Default location of the audit database.
    pub fn audit_db_path(&self) -> PathBuf {
        self.effective_data_dir().join("audit.db")
    }

    /// Default directory for captured command output.
    pub fn output_dir(&self) -> PathBuf {
        self.effective_data_dir().join("output")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_config_defaults() {
        let config = PathConfig::default();
        assert!(config.data_dir.is_none());
        assert!(config.catalog.is_none());
    }

    #[test]
    fn test_env_overrides_configured_dir() {
        let config = PathConfig {
            data_dir: Some(PathBuf::from("/srv/caretaker")),
            catalog: None,
        };
        assert_eq!(
            config.data_dir_from(Some("/tmp/override".to_string())),
            PathBuf::from("/tmp/override")
        );
        assert_eq!(config.data_dir_from(None), PathBuf::from("/srv/caretaker"));
    }

    #[test]
    fn test_empty_env_is_ignored() {
        let config = PathConfig {
            data_dir: Some(PathBuf::from("/srv/caretaker")),
            catalog: None,
        };
        assert_eq!(
            config.data_dir_from(Some(String::new())),
            PathBuf::from("/srv/caretaker")
        );
    }

    #[test]
    fn test_default_dir_ends_with_app_name() {
        let config = PathConfig::default();
        assert!(config.data_dir_from(None).ends_with("caretaker"));
    }

    #[test]
    fn test_parse_paths_section() {
        let config: PathConfig = toml::from_str(
            r#"
data_dir = "/var/lib/caretaker"
catalog = "/etc/caretaker/capabilities.json"
"#,
        )
        .unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/caretaker")));
        assert_eq!(
            config.catalog,
            Some(PathBuf::from("/etc/caretaker/capabilities.json"))
        );
    }
}
