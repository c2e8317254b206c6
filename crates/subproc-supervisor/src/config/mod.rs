//! YAML configuration for one supervised process.
//!
//! ```yaml
//! process:
//!   program: /usr/bin/worker
//!   args: ["--port", "8080"]
//!   env: ["RUST_LOG=info"]
//!   working_directory: /srv/worker
//!   stdout_file: /var/log/worker.out
//! restart:
//!   mode: on_failure
//!   initial_delay: 100ms
//!   backoff_multiplier: 2.0
//!   max_delay: 5s
//!   max_restarts: 10
//! ```

pub mod validation;

use crate::policy::RestartPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use subproc_process::{DescriptorSpec, InputSource, LaunchSpec, OutputTarget};

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub process: ProcessConfig,
    #[serde(default)]
    pub restart: RestartConfig,
}

/// What to launch and where its streams go
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// `KEY=VALUE` entries applied on top of the inherited environment
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_file: Option<PathBuf>,
}

/// How the process is kept alive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartMode {
    /// Run once
    Never,
    /// Supervise: restart on abnormal exit until stopped
    #[default]
    OnFailure,
    /// Retry inside `wait` until the process exits with code zero
    UntilClean,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartConfig {
    #[serde(default)]
    pub mode: RestartMode,
    #[serde(flatten)]
    pub policy: RestartPolicy,
}

impl SupervisorConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: SupervisorConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

impl ProcessConfig {
    pub fn launch_spec(&self) -> LaunchSpec {
        let mut spec = LaunchSpec::new(&self.program)
            .args(self.args.iter().cloned())
            .env_entries(self.env.iter().cloned());
        if let Some(ref dir) = self.working_directory {
            spec = spec.working_directory(dir);
        }
        spec
    }

    /// Streams without a configured file are inherited.
    pub fn descriptors(&self) -> DescriptorSpec {
        let mut descriptors = DescriptorSpec::new();
        if let Some(ref path) = self.stdin_file {
            descriptors = descriptors.stdin(InputSource::File(path.clone()));
        }
        if let Some(ref path) = self.stdout_file {
            descriptors = descriptors.stdout(OutputTarget::File(path.clone()));
        }
        if let Some(ref path) = self.stderr_file {
            descriptors = descriptors.stderr(OutputTarget::File(path.clone()));
        }
        descriptors
    }
}

// Durations are written as "250ms", "5s" or "2m"
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        // "ms" before "s"
        if let Some(num_str) = s.strip_suffix("ms") {
            let millis: u64 = num_str.trim().parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_millis(millis))
        } else if let Some(num_str) = s.strip_suffix('s') {
            let secs: u64 = num_str.trim().parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(secs))
        } else if let Some(num_str) = s.strip_suffix('m') {
            let mins: u64 = num_str.trim().parse().map_err(|_| format!("Invalid duration: {}", s))?;
            let secs = mins
                .checked_mul(60)
                .ok_or_else(|| format!("Duration too large: {}", s))?;
            Ok(Duration::from_secs(secs))
        } else {
            Err(format!("Duration must end with 's', 'ms', or 'm': {}", s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_load_full_config() {
        let yaml = r#"
process:
  program: /bin/sh
  args: ["-c", "exit 1"]
  env: ["A=1", "A=2"]
  working_directory: /tmp
  stdout_file: /tmp/out.log
restart:
  mode: until_clean
  initial_delay: 250ms
  backoff_multiplier: 1.5
  max_delay: 1m
  max_restarts: 4
"#;
        let config = SupervisorConfig::load_from_string(yaml).unwrap();

        assert_eq!(config.process.program, "/bin/sh");
        assert_eq!(config.process.args, vec!["-c", "exit 1"]);
        assert_eq!(config.restart.mode, RestartMode::UntilClean);
        assert_eq!(config.restart.policy.initial_delay, Duration::from_millis(250));
        assert_eq!(config.restart.policy.backoff_multiplier, 1.5);
        assert_eq!(config.restart.policy.max_delay, Duration::from_secs(60));
        assert_eq!(config.restart.policy.max_restarts, Some(4));

        let spec = config.process.launch_spec();
        assert_eq!(spec.env, vec!["A=1", "A=2"]);
        assert_eq!(spec.working_directory, Some(PathBuf::from("/tmp")));

        let descriptors = config.process.descriptors();
        assert!(matches!(descriptors.stdout, Some(OutputTarget::File(_))));
        assert!(descriptors.stdin.is_none());
        assert!(descriptors.stderr.is_none());
    }

    #[test]
    fn test_defaults() {
        let config = SupervisorConfig::load_from_string("process:\n  program: worker\n").unwrap();

        assert_eq!(config.restart.mode, RestartMode::OnFailure);
        assert_eq!(config.restart.policy, RestartPolicy::default());
        assert!(config.process.args.is_empty());
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let err = SupervisorConfig::load_from_string("process: [").unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML configuration"));
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        let yaml = "process:\n  program: worker\nrestart:\n  initial_delay: soon\n";
        assert!(SupervisorConfig::load_from_string(yaml).is_err());
    }

    #[test]
    fn test_parse_duration() {
        use duration_serde::parse_duration;

        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("xs").is_err());
    }

    #[test]
    fn test_oversized_minutes_are_rejected() {
        use duration_serde::parse_duration;

        let err = parse_duration("18446744073709551615m").unwrap_err();
        assert!(err.contains("too large"));
        assert!(parse_duration("307445734561825860m").is_ok());

        let yaml = "process:\n  program: worker\nrestart:\n  initial_delay: 18446744073709551615m\n";
        assert!(SupervisorConfig::load_from_string(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subproc.yaml");
        std::fs::write(&path, "process:\n  program: worker\nrestart:\n  mode: never\n").unwrap();

        let config = SupervisorConfig::load_from_file(&path).unwrap();
        assert_eq!(config.restart.mode, RestartMode::Never);

        let err = SupervisorConfig::load_from_file(dir.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_policy_serializes_round_durations() {
        let yaml = serde_yaml::to_string(&RestartConfig::default()).unwrap();
        assert!(yaml.contains("initial_delay: 100ms"));
        assert!(yaml.contains("max_delay: 5s"));
        assert!(yaml.contains("mode: on_failure"));
    }
}
