//! Configuration system for Caretaker.
//!
//! Provides TOML-based configuration with:
//! - Executor limits (default timeout, captured output cap)
//! - Helper identity (service name, socket, required version, caller policy)
//! - Audit storage locations
//! - Workflow limits and known automation targets
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod paths;
pub mod types;

pub use discovery::{
    load_config, load_config_file, load_config_with_options, save_config, xdg_config_dir,
    xdg_config_path, ConfigLayer, LayerKind, LayerState, LoadedConfig,
};
pub use error::{ConfigError, Result};
pub use paths::PathConfig;
pub use types::*;
