use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use subproc_common::ProcessError;
use subproc_process::{ProcessControl, ProcessHandle};
use subproc_supervisor::{
    ProcessConfig, RestartConfig, RestartMode, RestartUntilClean, Supervisor, SupervisorConfig,
    SupervisorOptions,
};

/// Run one command under supervision.
///
/// SIGINT, SIGTERM and SIGHUP are relayed to the child. A second SIGINT or
/// SIGTERM stops the child for good.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Restart mode (overrides config)
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Extra environment entry for the child, may be repeated
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Give up after this many restarts (overrides config)
    #[arg(long)]
    max_restarts: Option<u32>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Program and arguments (overrides config)
    #[arg(last = true, value_name = "PROGRAM")]
    command: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Never,
    OnFailure,
    UntilClean,
}

impl From<ModeArg> for RestartMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Never => RestartMode::Never,
            ModeArg::OnFailure => RestartMode::OnFailure,
            ModeArg::UntilClean => RestartMode::UntilClean,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    initialize_logging(args.debug);

    match run(args).await {
        Ok(code) => ExitCode::from((code & 0xff) as u8),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn initialize_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Merge the config file (if any) with command-line overrides
fn build_config(args: &Args) -> Result<SupervisorConfig> {
    let mut config = match args.config {
        Some(ref path) => SupervisorConfig::load_from_file(path)?,
        None => SupervisorConfig {
            process: ProcessConfig::default(),
            restart: RestartConfig::default(),
        },
    };

    if let Some((program, rest)) = args.command.split_first() {
        config.process.program = program.clone();
        config.process.args = rest.to_vec();
    }
    config.process.env.extend(args.env.iter().cloned());
    if let Some(mode) = args.mode {
        config.restart.mode = mode.into();
    }
    if let Some(max) = args.max_restarts {
        config.restart.policy.max_restarts = Some(max);
    }

    config
        .validate()
        .context("Invalid configuration (pass a config file or `-- PROGRAM [ARGS]`)")?;
    Ok(config)
}

/// Returns the exit code to mirror
async fn run(args: Args) -> Result<i32> {
    let config = build_config(&args)?;
    let program = config.process.program.clone();

    info!("Starting {} (mode: {:?})", program, config.restart.mode);

    let handle = ProcessHandle::new(config.process.launch_spec(), config.process.descriptors())?;
    let policy = config.restart.policy.clone();

    let process: Arc<dyn ProcessControl> = match config.restart.mode {
        RestartMode::Never => {
            handle
                .start(None)
                .await
                .with_context(|| format!("Failed to start {}", program))?;
            Arc::new(handle)
        }
        RestartMode::OnFailure => {
            let (errors_tx, errors_rx) = tokio::sync::mpsc::channel(16);
            tokio::spawn(log_restart_errors(errors_rx));

            let options = SupervisorOptions::new().policy(policy).errors(errors_tx);
            let supervisor = Supervisor::new(handle, options)
                .await
                .with_context(|| format!("Failed to start {}", program))?;
            Arc::new(supervisor)
        }
        RestartMode::UntilClean => {
            let decorator = RestartUntilClean::new(handle).with_policy(policy);
            decorator
                .start(None)
                .await
                .with_context(|| format!("Failed to start {}", program))?;
            Arc::new(decorator)
        }
    };

    let relay = {
        let process = Arc::clone(&process);
        tokio::spawn(async move {
            if let Err(e) = relay_signals(process).await {
                warn!("Signal relay disabled: {:#}", e);
            }
        })
    };

    let result = process.wait().await;
    relay.abort();

    match result {
        Ok(()) => {
            info!("{} exited cleanly", program);
            Ok(0)
        }
        Err(e) if e.is_launch_failure() => {
            Err(anyhow::Error::new(e).context("Restart could not launch the program"))
        }
        Err(e) => {
            warn!("{} finished: {}", program, e);
            Ok(e.exit_cause().map_or(1, |cause| cause.as_exit_code()))
        }
    }
}

async fn log_restart_errors(mut errors: tokio::sync::mpsc::Receiver<ProcessError>) {
    while let Some(e) = errors.recv().await {
        warn!("{}", e);
    }
}

#[cfg(unix)]
async fn relay_signals(process: Arc<dyn ProcessControl>) -> Result<()> {
    use subproc_common::Signal;
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

    let mut interrupted = false;
    loop {
        let sig = tokio::select! {
            _ = sigint.recv() => Signal::INT,
            _ = sigterm.recv() => Signal::TERM,
            _ = sighup.recv() => Signal::HUP,
        };

        if sig != Signal::HUP {
            if interrupted {
                info!("Received {} again, stopping {}", sig, process.id());
                process.stop().await;
                continue;
            }
            interrupted = true;
        }

        info!("Relaying {} to {}", sig, process.id());
        if let Err(e) = process.signal(sig).await {
            warn!("{}", e);
        }
    }
}

#[cfg(not(unix))]
async fn relay_signals(process: Arc<dyn ProcessControl>) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to create Ctrl+C handler")?;
    info!("Received Ctrl+C signal, stopping {}", process.id());
    process.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_command_after_separator() {
        let args = parse(&["subproc-run", "-e", "A=1", "--mode", "until-clean", "--", "sh", "-c", "exit 1"]);
        let config = build_config(&args).unwrap();

        assert_eq!(config.process.program, "sh");
        assert_eq!(config.process.args, vec!["-c", "exit 1"]);
        assert_eq!(config.process.env, vec!["A=1"]);
        assert_eq!(config.restart.mode, RestartMode::UntilClean);
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let args = parse(&["subproc-run", "--max-restarts", "2"]);
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn test_command_line_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subproc.yaml");
        std::fs::write(
            &path,
            "process:\n  program: worker\n  env: [\"A=1\"]\nrestart:\n  mode: never\n  max_restarts: 9\n",
        )
        .unwrap();

        let config_arg = path.to_string_lossy().into_owned();
        let args = parse(&["subproc-run", "-c", &config_arg, "-e", "A=2", "--max-restarts", "1"]);
        let config = build_config(&args).unwrap();

        assert_eq!(config.process.program, "worker");
        assert_eq!(config.process.env, vec!["A=1", "A=2"]);
        assert_eq!(config.restart.mode, RestartMode::Never);
        assert_eq!(config.restart.policy.max_restarts, Some(1));
    }

    #[test]
    fn test_malformed_env_rejected() {
        let args = parse(&["subproc-run", "-e", "NOPE", "--", "true"]);
        assert!(build_config(&args).is_err());
    }
}
