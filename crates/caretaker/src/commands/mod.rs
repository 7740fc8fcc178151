//! CLI command handlers.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use caretaker_config::LoadedConfig;
use console::Style;

pub mod audit;
pub mod capabilities;
pub mod config;
pub mod helper;
pub mod permissions;
pub mod preflight;
pub mod run;
pub mod workflow;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Catalog file given on the command line.
    pub catalog: Option<PathBuf>,
    /// User config directory given on the command line.
    pub config_dir: Option<PathBuf>,
}

impl Context {
    /// Discover and merge config layers, printing any warnings in verbose mode.
    pub fn load_config(&self) -> Result<LoadedConfig> {
        let loaded = caretaker_config::load_config_with_options(None, self.config_dir.as_deref())
            .context("failed to load configuration")?;
        if self.verbose && !self.json_output {
            let yellow = Style::new().yellow();
            for warning in &loaded.warnings {
                eprintln!("{} {}", yellow.apply_to("warning:"), warning);
            }
        }
        Ok(loaded)
    }

    /// Print a value as pretty JSON.
    pub fn print_json<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Truncate to `max` characters with an ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly ten", 11), "exactly ten");
        assert_eq!(truncate("a longer sentence", 10), "a longe...");
    }
}
