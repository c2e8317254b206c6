//! Launch specification: program, arguments and environment.

use subproc_common::{ProcessError, ProcessResult};
use std::path::PathBuf;
use tokio::process::Command;

/// What to run. Immutable once handed to a [`ProcessHandle`](crate::ProcessHandle).
///
/// The child always inherits the full parent environment; `env` entries
/// (`KEY=VALUE`) are applied on top in order, so a later entry for the same
/// key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub working_directory: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append one `KEY=VALUE` entry.
    pub fn env_entry(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn env_entries<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.extend(entries.into_iter().map(Into::into));
        self
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Reject specs that can never launch.
    pub fn validate(&self) -> ProcessResult<()> {
        if self.program.is_empty() {
            return Err(ProcessError::configuration(
                "validation",
                "Program name cannot be empty",
            ));
        }

        for entry in &self.env {
            if parse_env_entry(entry).is_none() {
                return Err(ProcessError::configuration(
                    &self.program,
                    format!("Environment entry must have the form KEY=VALUE: {:?}", entry),
                ));
            }
        }

        Ok(())
    }

    /// Build a fresh launch descriptor. Streams are left at their defaults.
    pub fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        for (key, value) in self.env.iter().filter_map(|entry| parse_env_entry(entry)) {
            cmd.env(key, value);
        }

        if let Some(ref dir) = self.working_directory {
            cmd.current_dir(dir);
        }

        cmd
    }
}

/// Split `KEY=VALUE` at the first `=`. The key must be non-empty.
pub fn parse_env_entry(entry: &str) -> Option<(&str, &str)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Some((key, value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_entry() {
        assert_eq!(parse_env_entry("FOO=bar"), Some(("FOO", "bar")));
        assert_eq!(parse_env_entry("FOO="), Some(("FOO", "")));
        assert_eq!(parse_env_entry("URL=a=b"), Some(("URL", "a=b")));
        assert_eq!(parse_env_entry("=bar"), None);
        assert_eq!(parse_env_entry("FOO"), None);
    }

    #[test]
    fn test_validate() {
        assert!(LaunchSpec::new("sleep").arg("1").validate().is_ok());
        assert!(LaunchSpec::new("").validate().is_err());

        let err = LaunchSpec::new("sleep")
            .env_entry("NOT_AN_ENTRY")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ProcessError::Configuration { .. }));
    }

    #[test]
    fn test_builder_keeps_order() {
        let spec = LaunchSpec::new("printenv")
            .args(["A", "B"])
            .env_entries(["A=1", "A=2"])
            .working_directory("/tmp");

        assert_eq!(spec.args, vec!["A", "B"]);
        assert_eq!(spec.env, vec!["A=1", "A=2"]);
        assert_eq!(spec.working_directory, Some(PathBuf::from("/tmp")));
    }
}
