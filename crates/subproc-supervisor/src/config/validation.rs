use super::*;
use anyhow::{anyhow, Result};
use subproc_process::parse_env_entry;

/// Validate the complete configuration
pub fn validate_config(config: &SupervisorConfig) -> Result<()> {
    validate_process_config(&config.process)?;
    validate_restart_policy(&config.restart.policy)?;
    Ok(())
}

fn validate_process_config(process: &ProcessConfig) -> Result<()> {
    if process.program.trim().is_empty() {
        return Err(anyhow!("Program cannot be empty"));
    }

    for entry in &process.env {
        if parse_env_entry(entry).is_none() {
            return Err(anyhow!("Environment entry must have the form KEY=VALUE: {:?}", entry));
        }
    }

    if let Some(ref dir) = process.working_directory {
        if dir.as_os_str().is_empty() {
            return Err(anyhow!("Working directory cannot be empty when specified"));
        }
    }

    Ok(())
}

fn validate_restart_policy(policy: &RestartPolicy) -> Result<()> {
    if !policy.backoff_multiplier.is_finite() || policy.backoff_multiplier < 1.0 {
        return Err(anyhow!(
            "Backoff multiplier must be a finite number >= 1.0, got: {}",
            policy.backoff_multiplier
        ));
    }

    if policy.max_delay < policy.initial_delay {
        return Err(anyhow!(
            "Max delay ({:?}) must not be shorter than the initial delay ({:?})",
            policy.max_delay,
            policy.initial_delay
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(program: &str) -> SupervisorConfig {
        SupervisorConfig {
            process: ProcessConfig {
                program: program.to_string(),
                ..Default::default()
            },
            restart: RestartConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&config("worker")).is_ok());
    }

    #[test]
    fn test_empty_program() {
        let err = validate_config(&config("  ")).unwrap_err();
        assert!(err.to_string().contains("Program cannot be empty"));
    }

    #[test]
    fn test_malformed_env_entry() {
        let mut cfg = config("worker");
        cfg.process.env = vec!["GOOD=1".to_string(), "=nokey".to_string()];
        assert!(validate_config(&cfg).is_err());

        cfg.process.env = vec!["EMPTY=".to_string()];
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_shrinking_backoff_rejected() {
        let mut cfg = config("worker");
        cfg.restart.policy.backoff_multiplier = 0.5;
        assert!(validate_config(&cfg).is_err());

        cfg.restart.policy.backoff_multiplier = f64::NAN;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_max_delay_below_initial_rejected() {
        let mut cfg = config("worker");
        cfg.restart.policy.initial_delay = Duration::from_secs(10);
        cfg.restart.policy.max_delay = Duration::from_secs(1);

        let err = validate_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("Max delay"));
    }
}
