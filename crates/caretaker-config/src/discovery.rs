//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `~/.config/caretaker/config.toml` (XDG user config)
//! 2. `./caretaker.toml` (project-local)
//! 3. CLI arguments (handled externally)

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::{CaretakerConfig, ConfigError, Result};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "caretaker.toml";

/// Default config filename within XDG config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for XDG directory resolution.
const APP_NAME: &str = "caretaker";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "CARETAKER_CONFIG_DIR";

/// Which layer a config file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    User,
    Project,
}

/// What happened when a layer was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LayerState {
    Applied,
    Absent,
    Rejected(String),
}

/// One config file considered during discovery.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigLayer {
    pub kind: LayerKind,
    pub path: PathBuf,
    pub state: LayerState,
}

/// Merged configuration plus the trail of layers that produced it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: CaretakerConfig,
    /// Lowest precedence first.
    pub layers: Vec<ConfigLayer>,
    /// Rejected layers and settings that parse but cannot work.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of the layers that were merged.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.layers
            .iter()
            .filter(|l| l.state == LayerState::Applied)
            .map(|l| l.path.as_path())
            .collect()
    }
}

/// Discover and merge the user and project layers.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], with the user config directory pinned.
///
/// `config_dir` wins over `CARETAKER_CONFIG_DIR` and the platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let user_path = config_dir
        .map(|dir| dir.join(USER_CONFIG_FILE))
        .or_else(xdg_config_path);
    let project_path = project_dir.map_or_else(
        || PathBuf::from(PROJECT_CONFIG_FILE),
        |dir| dir.join(PROJECT_CONFIG_FILE),
    );

    let candidates = user_path
        .map(|p| (LayerKind::User, p))
        .into_iter()
        .chain([(LayerKind::Project, project_path)]);

    let mut loaded = LoadedConfig {
        config: CaretakerConfig::new(),
        layers: Vec::new(),
        warnings: Vec::new(),
    };
    for (kind, path) in candidates {
        let state = apply_layer(&mut loaded.config, &path);
        if let LayerState::Rejected(reason) = &state {
            tracing::warn!(path = %path.display(), %reason, "Ignoring config layer");
            loaded
                .warnings
                .push(format!("Failed to load {}: {reason}", path.display()));
        }
        loaded.layers.push(ConfigLayer { kind, path, state });
    }

    check_limits(&loaded.config, &mut loaded.warnings);
    Ok(loaded)
}

/// Parse one file, without discovery or merging.
pub fn load_config_file(path: &Path) -> Result<CaretakerConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    CaretakerConfig::from_toml(&contents)
}

/// Write `config` as TOML, creating parent directories.
pub fn save_config(config: &CaretakerConfig, path: &Path) -> Result<()> {
    let write_err = |at: &Path, source| ConfigError::WriteFile {
        path: at.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
    }
    std::fs::write(path, config.to_toml()?).map_err(|e| write_err(path, e))
}

/// User config file: `<config dir>/config.toml`.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// `CARETAKER_CONFIG_DIR` if set, else the platform config dir
/// (`~/.config/caretaker` on Linux, `~/Library/Application Support/caretaker`
/// on macOS).
pub fn xdg_config_dir() -> Option<PathBuf> {
    std::env::var_os(CONFIG_DIR_ENV)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|d| d.join(APP_NAME)))
}

fn apply_layer(config: &mut CaretakerConfig, path: &Path) -> LayerState {
    if !path.is_file() {
        return LayerState::Absent;
    }
    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            LayerState::Applied
        }
        Err(e) => LayerState::Rejected(e.to_string()),
    }
}

/// Flag settings that load fine but would make the core unusable.
fn check_limits(config: &CaretakerConfig, warnings: &mut Vec<String>) {
    if config.workflow().max_steps == 0 {
        warnings.push("[workflow] max_steps = 0 rejects every plan".to_string());
    }
    if config.executor().default_timeout_secs == 0 {
        warnings.push(
            "[executor] default_timeout_secs = 0; capabilities without a timeout will fail immediately"
                .to_string(),
        );
    }
    if semver_like(&config.helper().required_version).is_none() {
        warnings.push(format!(
            "[helper] required_version '{}' is not a semantic version",
            config.helper().required_version
        ));
    }
}

/// Cheap `MAJOR.MINOR.PATCH` shape check; full parsing lives with the helper.
fn semver_like(version: &str) -> Option<(u64, u64, u64)> {
    let core = version.split(['-', '+']).next()?;
    let mut parts = core.split('.').map(|p| p.parse::<u64>().ok());
    let major = parts.next()??;
    let minor = parts.next()??;
    let patch = parts.next()??;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_xdg_config_path_shape() {
        if let Some(p) = xdg_config_path() {
            assert!(p.ends_with("config.toml"));
        }
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[workflow]\nmax_steps = 6\n").unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.workflow().max_steps, 6);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let err = load_config_file(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_no_files() {
        let dir = TempDir::new().unwrap();
        let empty_config_dir = TempDir::new().unwrap();
        let loaded =
            load_config_with_options(Some(dir.path()), Some(empty_config_dir.path())).unwrap();
        assert!(loaded.config.workflow.is_none());
        assert!(loaded.loaded_from().is_empty());
        assert!(loaded.warnings.is_empty());
        assert!(loaded.layers.iter().all(|l| l.state == LayerState::Absent));
    }

    #[test]
    fn test_project_layer_overrides_user_layer() {
        let user_dir = TempDir::new().unwrap();
        let project_dir = TempDir::new().unwrap();
        fs::write(
            user_dir.path().join("config.toml"),
            "[workflow]\nmax_steps = 3\n\n[executor]\ndefault_timeout_secs = 12\n",
        )
        .unwrap();
        fs::write(
            project_dir.path().join("caretaker.toml"),
            "[workflow]\nmax_steps = 8\n",
        )
        .unwrap();

        let loaded =
            load_config_with_options(Some(project_dir.path()), Some(user_dir.path())).unwrap();
        assert_eq!(loaded.config.workflow().max_steps, 8);
        assert_eq!(loaded.config.executor().default_timeout_secs, 12);
        assert_eq!(loaded.loaded_from().len(), 2);
    }

    #[test]
    fn test_malformed_config_warns_but_continues() {
        let dir = TempDir::new().unwrap();
        let empty_config_dir = TempDir::new().unwrap();
        fs::write(dir.path().join("caretaker.toml"), "not valid toml {{{{").unwrap();

        let loaded =
            load_config_with_options(Some(dir.path()), Some(empty_config_dir.path())).unwrap();
        assert!(loaded.warnings[0].contains("Failed to load"));
        let project = &loaded.layers[1];
        assert_eq!(project.kind, LayerKind::Project);
        assert!(matches!(project.state, LayerState::Rejected(_)));
    }

    #[test]
    fn test_zero_max_steps_warns() {
        let dir = TempDir::new().unwrap();
        let empty_config_dir = TempDir::new().unwrap();
        fs::write(dir.path().join("caretaker.toml"), "[workflow]\nmax_steps = 0\n").unwrap();

        let loaded =
            load_config_with_options(Some(dir.path()), Some(empty_config_dir.path())).unwrap();
        assert!(loaded.warnings.iter().any(|w| w.contains("max_steps")));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = CaretakerConfig::new();
        config.workflow = Some(crate::WorkflowConfig { max_steps: 5 });
        save_config(&config, &path).unwrap();

        let reloaded = load_config_file(&path).unwrap();
        assert_eq!(reloaded.workflow().max_steps, 5);
    }

    #[test]
    fn test_semver_like() {
        assert_eq!(semver_like("1.2.3"), Some((1, 2, 3)));
        assert_eq!(semver_like("1.2.3-beta.1"), Some((1, 2, 3)));
        assert_eq!(semver_like("1.2"), None);
        assert_eq!(semver_like("one.two.three"), None);
    }
}
