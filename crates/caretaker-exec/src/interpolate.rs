//! Argument interpolation into command templates.

use std::collections::HashMap;
use std::path::PathBuf;

use caretaker_catalog::{Capability, CommandTemplate};
use serde::{Deserialize, Serialize};

use crate::error::{ExecError, Result};

/// A fully resolved argv, ready to spawn or send to the helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl ResolvedCommand {
    /// `program arg1 arg2`, for display only.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Substitute `arguments` into the capability's command template.
///
/// Every supplied name must be declared by the capability, every value
/// must match that argument's pattern, and every placeholder in the
/// template must be supplied.
pub fn interpolate(
    capability: &Capability,
    arguments: &HashMap<String, String>,
) -> Result<ResolvedCommand> {
    let mut supplied: Vec<&String> = arguments.keys().collect();
    supplied.sort();
    if let Some(name) = supplied
        .into_iter()
        .find(|name| !capability.arguments.contains(name))
    {
        return Err(ExecError::UnexpectedArgument {
            capability: capability.id.clone(),
            name: name.clone(),
        });
    }

    // Sorted so the first rejected name is stable across runs.
    let mut values: Vec<(&String, &String)> = arguments.iter().collect();
    values.sort();
    if let Some((name, value)) = values
        .into_iter()
        .find(|(name, value)| !capability.accepts_argument(name, value))
    {
        return Err(ExecError::RejectedArgument {
            capability: capability.id.clone(),
            name: name.clone(),
            value: value.clone(),
        });
    }

    let template = CommandTemplate::parse(&capability.command)?;
    let (program, args) = template
        .render(arguments)
        .map_err(|name| ExecError::MissingArgument {
            capability: capability.id.clone(),
            name,
        })?;

    Ok(ResolvedCommand {
        program,
        args,
        working_dir: capability.working_directory.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::tests::capability;
    use caretaker_catalog::{CapabilityCatalog, PrivilegeLevel};

    fn kill() -> Capability {
        let mut cap = capability("process.terminate", PrivilegeLevel::User);
        cap.command = "kill -TERM {pid}".into();
        cap.arguments = vec!["pid".into()];
        cap.argument_patterns = [("pid".to_string(), "[1-9][0-9]{0,9}".to_string())].into();
        cap
    }

    fn close_tabs() -> Capability {
        CapabilityCatalog::embedded()
            .capability("browser.safari.close_domain")
            .cloned()
            .unwrap()
    }

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_interpolates_placeholders() {
        let resolved = interpolate(&kill(), &args(&[("pid", "4242")])).unwrap();
        assert_eq!(resolved.program, "kill");
        assert_eq!(resolved.args, vec!["-TERM", "4242"]);
        assert_eq!(resolved.display(), "kill -TERM 4242");
    }

    #[test]
    fn test_rejects_values_outside_pattern() {
        for pid in ["-1", "0", "1; rm -rf /", "42\n", ""] {
            assert!(
                matches!(
                    interpolate(&kill(), &args(&[("pid", pid)])),
                    Err(ExecError::RejectedArgument { ref name, .. }) if name == "pid"
                ),
                "pid {pid:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_applescript_argument_cannot_escape_string() {
        let injected = "x\")\ndo shell script \"touch /tmp/owned\"\n--";
        assert!(matches!(
            interpolate(&close_tabs(), &args(&[("domain", injected)])),
            Err(ExecError::RejectedArgument { .. })
        ));

        let resolved = interpolate(&close_tabs(), &args(&[("domain", "example.com")])).unwrap();
        assert_eq!(resolved.program, "osascript");
        assert_eq!(resolved.args.last().map(String::as_str), Some("example.com"));
        assert!(resolved.args.iter().all(|a| a == "example.com" || !a.contains("example.com")));
    }

    #[test]
    fn test_cache_directory_must_be_below_caches() {
        let catalog = CapabilityCatalog::embedded();
        let clear = catalog.capability("cache.clear_user").unwrap();
        for directory in [
            "/",
            "/Users/me",
            "/Users/me/Library/Caches",
            "/Users/me/Library/Caches/../..",
            "/Users/../Library/Caches/x",
        ] {
            assert!(
                interpolate(clear, &args(&[("directory", directory)])).is_err(),
                "{directory} should be rejected"
            );
        }
        let ok = args(&[("directory", "/Users/me/Library/Caches/com.example.app")]);
        assert!(interpolate(clear, &ok).is_ok());
    }

    #[test]
    fn test_missing_argument() {
        assert!(matches!(
            interpolate(&kill(), &HashMap::new()),
            Err(ExecError::MissingArgument { name, .. }) if name == "pid"
        ));
    }

    #[test]
    fn test_unexpected_argument() {
        assert!(matches!(
            interpolate(&kill(), &args(&[("pid", "1"), ("signal", "9")])),
            Err(ExecError::UnexpectedArgument { name, .. }) if name == "signal"
        ));
    }
}
