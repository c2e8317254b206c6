//! Restart-until-clean decorator
//!
//! `wait` keeps relaunching the wrapped process until one run exits with
//! code zero. Signal deaths count as failures. `stop` breaks the loop.

use crate::policy::{backoff, RestartPolicy};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use subproc_common::{ProcessError, ProcessResult, Signal};
use subproc_process::{CaptureBuffer, ProcessControl};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct RestartUntilClean<P> {
    id: String,
    inner: P,
    policy: RestartPolicy,
    cancel: CancellationToken,
    stop_token: Mutex<CancellationToken>,
    gate: tokio::sync::Mutex<()>,
    restarts: AtomicU32,
}

impl<P: ProcessControl> RestartUntilClean<P> {
    pub fn new(inner: P) -> Self {
        let cancel = CancellationToken::new();
        Self {
            id: inner.id().to_string(),
            inner,
            policy: RestartPolicy::default(),
            stop_token: Mutex::new(cancel.child_token()),
            cancel,
            gate: tokio::sync::Mutex::new(()),
            restarts: AtomicU32::new(0),
        }
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Default token for `start(None)`
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.stop_token = Mutex::new(cancel.child_token());
        self.cancel = cancel;
        self
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Relaunches performed over the decorator's lifetime
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<P: ProcessControl> ProcessControl for RestartUntilClean<P> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self, cancel: Option<CancellationToken>) -> ProcessResult<()> {
        let _gate = self.gate.lock().await;

        let stop = cancel.unwrap_or_else(|| self.cancel.clone()).child_token();
        *self.stop_token.lock() = stop.clone();
        self.inner.start(Some(stop)).await
    }

    async fn wait(&self) -> ProcessResult<()> {
        let stop = self.stop_token.lock().clone();
        let mut attempt: u32 = 0;

        loop {
            let mut last = match self.inner.wait().await {
                Ok(()) => {
                    if attempt > 0 {
                        info!("Process {} exited cleanly after {} restarts", self.id, attempt);
                    }
                    return Ok(());
                }
                // Not an exit status: nothing to retry
                Err(e) if e.exit_cause().is_none() => return Err(e),
                Err(e) => e,
            };

            loop {
                if stop.is_cancelled() {
                    debug!("Process {} was stopped, not retrying", self.id);
                    return Err(last);
                }

                attempt += 1;
                if !self.policy.allows(attempt) {
                    let max = self.policy.max_restarts.unwrap_or(0);
                    warn!("Process {} did not exit cleanly within {} restarts", self.id, max);
                    return Err(ProcessError::restart_limit_exceeded(&self.id, max, last));
                }

                let delay = self.policy.delay_for(attempt);
                warn!("Process {} exited uncleanly ({}), retrying in {:?}", self.id, last, delay);
                if !backoff(delay, &stop).await {
                    return Err(last);
                }

                let started = {
                    let _gate = self.gate.lock().await;
                    if stop.is_cancelled() {
                        return Err(last);
                    }
                    self.restarts.fetch_add(1, Ordering::SeqCst);
                    self.inner.start(Some(stop.clone())).await
                };

                match started {
                    Ok(()) => break,
                    Err(e) => {
                        warn!("Failed to relaunch process {}: {}", self.id, e);
                        last = ProcessError::restart_failed(&self.id, attempt, e);
                    }
                }
            }
        }
    }

    async fn stop(&self) {
        let _gate = self.gate.lock().await;

        info!("Stopping process {}", self.id);
        self.stop_token.lock().cancel();
        self.inner.stop().await;
    }

    async fn signal(&self, signal: Signal) -> ProcessResult<()> {
        self.inner.signal(signal).await
    }

    fn stdout(&self) -> Option<CaptureBuffer> {
        self.inner.stdout()
    }

    fn stderr(&self) -> Option<CaptureBuffer> {
        self.inner.stderr()
    }
}
