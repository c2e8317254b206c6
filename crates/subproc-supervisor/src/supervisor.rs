//! Supervisor - restarts a wrapped process whenever it exits abnormally
//!
//! One monitoring task per supervision round waits on the wrapped process
//! and restarts it in place. A deliberate stop is a cancelled stop token;
//! the token check and the restart both happen under the restart gate, and
//! `stop` takes the same gate, so no launch can follow a stop.

use crate::policy::{backoff, RestartPolicy};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use subproc_common::{ProcessError, ProcessResult, Signal};
use subproc_process::{CaptureBuffer, ProcessControl};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Construction options for a [`Supervisor`]
#[derive(Debug, Clone, Default)]
pub struct SupervisorOptions {
    pub policy: RestartPolicy,
    /// Receives a `RestartFailed` for every restart that could not launch.
    /// Sends never block; errors are dropped when the channel is full.
    pub errors: Option<mpsc::Sender<ProcessError>>,
    /// Cancelling this token stops supervision like `stop` does
    pub cancel: Option<CancellationToken>,
}

impl SupervisorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn errors(mut self, errors: mpsc::Sender<ProcessError>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

struct Shared<P> {
    id: String,
    inner: P,
    policy: RestartPolicy,
    errors: Option<mpsc::Sender<ProcessError>>,
    cancel: CancellationToken,
    /// Stop flag of the current supervision round
    stop_token: Mutex<CancellationToken>,
    gate: tokio::sync::Mutex<()>,
    restarts: AtomicU32,
    /// `None` while a supervision round is active
    outcome: watch::Sender<Option<ProcessResult<()>>>,
}

impl<P> Shared<P> {
    fn report(&self, err: ProcessError) {
        let Some(ref errors) = self.errors else {
            return;
        };
        if let Err(e) = errors.try_send(err) {
            debug!("Restart error for {} not delivered: {}", self.id, e);
        }
    }
}

/// Keeps a wrapped process running until it exits cleanly or is stopped.
///
/// The wrapped process is started when the supervisor is built.
pub struct Supervisor<P: ProcessControl + 'static> {
    shared: Arc<Shared<P>>,
}

impl<P: ProcessControl + 'static> Supervisor<P> {
    /// Start `inner` and begin supervising it.
    ///
    /// Fails if the initial start fails; nothing is supervised then.
    pub async fn new(inner: P, options: SupervisorOptions) -> ProcessResult<Self> {
        let id = inner.id().to_string();
        let cancel = options.cancel.unwrap_or_default();
        let stop = cancel.child_token();

        inner.start(Some(stop.clone())).await?;

        let (outcome, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            id,
            inner,
            policy: options.policy,
            errors: options.errors,
            cancel,
            stop_token: Mutex::new(stop.clone()),
            gate: tokio::sync::Mutex::new(()),
            restarts: AtomicU32::new(0),
            outcome,
        });

        info!("Supervising process {}", shared.id);
        tokio::spawn(supervise(Arc::clone(&shared), stop));

        Ok(Self { shared })
    }

    pub fn inner(&self) -> &P {
        &self.shared.inner
    }

    /// Restart attempts made over the supervisor's lifetime, including
    /// attempts whose launch failed
    pub fn restarts(&self) -> u32 {
        self.shared.restarts.load(Ordering::SeqCst)
    }

    pub fn is_supervising(&self) -> bool {
        self.shared.outcome.borrow().is_none()
    }
}

impl<P: ProcessControl + 'static> Drop for Supervisor<P> {
    fn drop(&mut self) {
        self.shared.stop_token.lock().cancel();
    }
}

#[async_trait]
impl<P: ProcessControl + 'static> ProcessControl for Supervisor<P> {
    fn id(&self) -> &str {
        &self.shared.id
    }

    /// Begin a new supervision round once the previous one has ended.
    ///
    /// While a round is active the process is already running, so a caller
    /// token is adopted instead: cancelling it stops the current round. This
    /// lets a supervisor be wrapped by another supervisor or a
    /// [`RestartUntilClean`](crate::RestartUntilClean). Without a token an
    /// active round is an `InvalidState` error.
    async fn start(&self, cancel: Option<CancellationToken>) -> ProcessResult<()> {
        let shared = &self.shared;
        let _gate = shared.gate.lock().await;

        let active = shared.outcome.borrow().is_none();
        if active {
            let Some(token) = cancel else {
                return Err(ProcessError::invalid_state(
                    &shared.id,
                    "finished supervision",
                    "supervising",
                ));
            };

            debug!("Process {} is already supervised, adopting cancellation", shared.id);
            let stop = shared.stop_token.lock().clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => stop.cancel(),
                    _ = stop.cancelled() => {}
                }
            });
            return Ok(());
        }

        let stop = cancel.unwrap_or_else(|| shared.cancel.clone()).child_token();
        shared.inner.start(Some(stop.clone())).await?;

        *shared.stop_token.lock() = stop.clone();
        shared.outcome.send_replace(None);

        info!("Supervising process {} (new round)", shared.id);
        tokio::spawn(supervise(Arc::clone(shared), stop));
        Ok(())
    }

    /// Outcome of the current supervision round: `Ok` once the process
    /// exits cleanly, otherwise the last error seen when supervision ended.
    async fn wait(&self) -> ProcessResult<()> {
        let mut outcome = self.shared.outcome.subscribe();
        let result = outcome
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone())
            .unwrap_or(None);

        result.unwrap_or_else(|| {
            Err(ProcessError::invalid_state(
                &self.shared.id,
                "supervision outcome",
                "monitor gone",
            ))
        })
    }

    async fn stop(&self) {
        let shared = &self.shared;
        let _gate = shared.gate.lock().await;

        info!("Stopping supervised process {}", shared.id);
        shared.stop_token.lock().cancel();
        shared.inner.stop().await;
    }

    async fn signal(&self, signal: Signal) -> ProcessResult<()> {
        self.shared.inner.signal(signal).await
    }

    fn stdout(&self) -> Option<CaptureBuffer> {
        self.shared.inner.stdout()
    }

    fn stderr(&self) -> Option<CaptureBuffer> {
        self.shared.inner.stderr()
    }
}

/// Monitoring task for one supervision round
async fn supervise<P: ProcessControl + 'static>(shared: Arc<Shared<P>>, stop: CancellationToken) {
    let id = shared.id.clone();
    debug!("Monitor started for process {}", id);

    // Restart budget of this round; `restarts` keeps the lifetime count
    let mut attempt: u32 = 0;

    let outcome = 'supervision: loop {
        let mut last = match shared.inner.wait().await {
            Ok(()) => {
                info!("Process {} exited cleanly, supervision finished", id);
                break Ok(());
            }
            Err(e) => e,
        };

        // Retry until a replacement is running
        loop {
            if stop.is_cancelled() {
                info!("Process {} was stopped, not restarting", id);
                break 'supervision Err(last);
            }

            attempt += 1;
            if !shared.policy.allows(attempt) {
                let max = shared.policy.max_restarts.unwrap_or(0);
                error!("Process {} exceeded maximum restart attempts ({})", id, max);
                break 'supervision Err(ProcessError::restart_limit_exceeded(&id, max, last));
            }

            let delay = shared.policy.delay_for(attempt);
            warn!("Process {} failed ({}), restarting in {:?} (attempt {})", id, last, delay, attempt);
            if !backoff(delay, &stop).await {
                info!("Process {} was stopped during backoff, not restarting", id);
                break 'supervision Err(last);
            }

            let started = {
                let _gate = shared.gate.lock().await;
                if stop.is_cancelled() {
                    info!("Process {} was stopped, not restarting", id);
                    break 'supervision Err(last);
                }
                shared.restarts.fetch_add(1, Ordering::SeqCst);
                shared.inner.start(Some(stop.clone())).await
            };

            match started {
                Ok(()) => {
                    info!("Process {} restarted (attempt {})", id, attempt);
                    break;
                }
                Err(e) => {
                    warn!("Failed to restart process {}: {}", id, e);
                    let err = ProcessError::restart_failed(&id, attempt, e);
                    shared.report(err.clone());
                    last = err;
                }
            }
        }
    };

    shared.outcome.send_replace(Some(outcome));
    debug!("Monitor completed for process {}", id);
}
