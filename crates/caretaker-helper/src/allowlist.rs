//! Programs the helper is willing to run as root.
//!
//! This list is compiled into the helper and is deliberately unrelated to
//! the app's capability catalog: a tampered catalog cannot widen it.

use std::collections::BTreeSet;
use std::path::{Component, Path};

/// Absolute paths the installed helper may execute.
pub const BUILTIN_PROGRAMS: &[&str] = &[
    "/usr/bin/dscacheutil",
    "/usr/bin/killall",
    "/usr/bin/mdutil",
    "/usr/bin/tmutil",
    "/usr/sbin/purge",
    "/usr/sbin/periodic",
    "/usr/sbin/diskutil",
    "/usr/bin/log",
    "/usr/bin/systemctl",
    "/usr/bin/journalctl",
    "/usr/bin/resolvectl",
];

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The program path is relative.
    NotAbsolute(String),
    /// The path contains `.` or `..` components.
    NotNormalized(String),
    /// The program is not on the list.
    NotListed(String),
    /// The program or an argument contains a NUL byte.
    NulByte,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAbsolute(p) => write!(f, "program '{p}' is not an absolute path"),
            Self::NotNormalized(p) => write!(f, "program '{p}' is not a normalized path"),
            Self::NotListed(p) => write!(f, "program '{p}' is not allowlisted"),
            Self::NulByte => f.write_str("request contains a NUL byte"),
        }
    }
}

/// Exact-match set of permitted programs.
#[derive(Debug, Clone)]
pub struct Allowlist {
    programs: BTreeSet<String>,
}

impl Allowlist {
    /// The list compiled into this helper.
    pub fn builtin() -> Self {
        Self::new(BUILTIN_PROGRAMS.iter().copied())
    }

    /// A custom list; used by tests and development builds.
    pub fn new<I, S>(programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            programs: programs.into_iter().map(Into::into).collect(),
        }
    }

    /// Permitted programs, sorted.
    pub fn programs(&self) -> impl Iterator<Item = &str> {
        self.programs.iter().map(String::as_str)
    }

    /// Check a program and its arguments.
    pub fn check(&self, program: &str, args: &[String]) -> Result<(), Violation> {
        if program.contains('\0') || args.iter().any(|a| a.contains('\0')) {
            return Err(Violation::NulByte);
        }
        let path = Path::new(program);
        if !path.is_absolute() {
            return Err(Violation::NotAbsolute(program.to_string()));
        }
        if path
            .components()
            .any(|c| matches!(c, Component::CurDir | Component::ParentDir))
        {
            return Err(Violation::NotNormalized(program.to_string()));
        }
        if !self.programs.contains(program) {
            return Err(Violation::NotListed(program.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_accepts_listed_program() {
        let list = Allowlist::builtin();
        assert!(list.check("/usr/sbin/purge", &[]).is_ok());
        assert!(
            list.check("/usr/bin/killall", &["-HUP".into(), "mDNSResponder".into()])
                .is_ok()
        );
    }

    #[test]
    fn test_rejects_unlisted_and_relative() {
        let list = Allowlist::builtin();
        assert_eq!(
            list.check("/bin/sh", &[]),
            Err(Violation::NotListed("/bin/sh".into()))
        );
        assert_eq!(
            list.check("purge", &[]),
            Err(Violation::NotAbsolute("purge".into()))
        );
    }

    #[test]
    fn test_rejects_traversal() {
        let list = Allowlist::new(["/usr/sbin/purge"]);
        assert!(matches!(
            list.check("/usr/sbin/../sbin/purge", &[]),
            Err(Violation::NotNormalized(_))
        ));
    }

    #[test]
    fn test_rejects_nul_in_args() {
        let list = Allowlist::builtin();
        assert_eq!(
            list.check("/usr/sbin/purge", &["a\0b".into()]),
            Err(Violation::NulByte)
        );
    }

    #[test]
    fn test_no_shells_in_builtin() {
        for program in Allowlist::builtin().programs() {
            assert!(!program.ends_with("/sh") && !program.ends_with("bash"));
        }
    }
}
