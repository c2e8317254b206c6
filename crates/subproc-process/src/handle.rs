//! ProcessHandle - owns one OS process launch at a time
//!
//! Every launch gets an exit monitor task that owns the `Child`. The monitor
//! reaps the process even if the handle is dropped, and it is the only place
//! that signals the PID, so a signal can never reach a reaped (and possibly
//! reused) PID. The handle talks to it over a request channel and learns the
//! exit status through a `watch` channel.
//!
//! Handle state sits behind a short-lived lock that is never held across an
//! `.await`; `wait` suspends on its own clone of the exit channel.

use crate::control::ProcessControl;
use crate::descriptors::{CaptureBuffer, DescriptorSpec, LaunchIo};
use crate::launch::LaunchSpec;
use crate::signal;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use subproc_common::{ExitCause, ProcessError, ProcessResult, Signal, StreamKind};
use subproc_process_state::{ProcessState, ProcessStateMachine, StateTransition};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Map an OS exit status to the cause reported by `wait`.
pub fn exit_cause(status: &ExitStatus) -> ExitCause {
    if let Some(code) = status.code() {
        return ExitCause::Code(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return ExitCause::Signal(sig);
        }
    }

    ExitCause::Unknown
}

enum LaunchRequest {
    Kill,
    Signal {
        signal: Signal,
        resp: oneshot::Sender<ProcessResult<()>>,
    },
}

#[derive(Debug, Clone, Copy)]
struct ExitRecord {
    /// `None` if the OS wait itself failed
    status: Option<ExitStatus>,
    cancelled: bool,
}

impl ExitRecord {
    fn outcome(&self, id: &str) -> ProcessResult<()> {
        match self.status {
            Some(status) if status.success() => Ok(()),
            Some(status) => Err(ProcessError::wait_failed(id, exit_cause(&status))),
            None => Err(ProcessError::wait_failed(id, ExitCause::Unknown)),
        }
    }

    fn describe(&self) -> String {
        match self.status {
            Some(status) if status.success() => "exited successfully".to_string(),
            Some(status) => exit_cause(&status).to_string(),
            None => ExitCause::Unknown.to_string(),
        }
    }
}

/// One spawned OS process as seen from the handle
struct Launch {
    pid: u32,
    requests: mpsc::UnboundedSender<LaunchRequest>,
    exit: watch::Receiver<Option<ExitRecord>>,
    cancel: CancellationToken,
    stdout_pipe: Option<Arc<tokio::sync::Mutex<ChildStdout>>>,
    stderr_pipe: Option<Arc<tokio::sync::Mutex<ChildStderr>>>,
    /// Exit has been folded into the state machine
    observed: bool,
}

impl Launch {
    fn exit_record(&self) -> Option<ExitRecord> {
        *self.exit.borrow()
    }

    fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }
}

struct Inner {
    state: ProcessStateMachine,
    launch: Option<Launch>,
}

/// Handle to a child process that can be started, waited on, signalled and
/// restarted in place.
///
/// At most one OS process is alive per handle. Lifecycle calls are expected
/// from a single logical owner; concurrent `start` calls are rejected rather
/// than raced.
pub struct ProcessHandle {
    id: String,
    spec: LaunchSpec,
    descriptors: DescriptorSpec,
    cancel: CancellationToken,
    inner: Mutex<Inner>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}

impl ProcessHandle {
    /// Create a handle. Nothing is launched until `start`.
    pub fn new(spec: LaunchSpec, descriptors: DescriptorSpec) -> ProcessResult<Self> {
        spec.validate()?;
        let id = spec.program.clone();

        Ok(Self {
            inner: Mutex::new(Inner {
                state: ProcessStateMachine::new(&id),
                launch: None,
            }),
            id,
            spec,
            descriptors,
            cancel: CancellationToken::new(),
        })
    }

    /// Name used in logs and errors (defaults to the program name)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self.inner.get_mut().state = ProcessStateMachine::new(&self.id);
        self
    }

    /// Token used by `start(None)`; cancelling it kills the running launch.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    pub fn descriptors(&self) -> &DescriptorSpec {
        &self.descriptors
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().state.current_state()
    }

    /// Number of successful launches so far
    pub fn launches(&self) -> u64 {
        self.inner.lock().state.launches()
    }

    /// Recorded lifecycle transitions, oldest first (bounded)
    pub fn state_history(&self) -> Vec<StateTransition> {
        self.inner.lock().state.state_history().to_vec()
    }

    /// PID of the current launch while it has not exited
    pub fn pid(&self) -> Option<u32> {
        let inner = self.inner.lock();
        inner
            .launch
            .as_ref()
            .filter(|launch| !launch.has_exited())
            .map(|launch| launch.pid)
    }

    /// Fold an exited-but-unobserved launch into the state machine.
    fn settle(id: &str, inner: &mut Inner) {
        let Some(launch) = inner.launch.as_mut() else {
            return;
        };
        if launch.observed {
            return;
        }
        let Some(record) = launch.exit_record() else {
            return;
        };
        launch.observed = true;

        if inner.state.current_state() == ProcessState::Running {
            let result = if record.cancelled {
                inner.state.transition_to_killed("launch cancelled")
            } else {
                inner.state.transition_to_exited(record.describe())
            };
            if let Err(e) = result {
                warn!("Failed to record exit of {}: {}", id, e);
            }
        }
    }

    /// Launch the process.
    ///
    /// Fails with `InvalidState` if the previous launch is still running and
    /// was not stopped. A stopped or cancelled launch is reaped first.
    pub async fn start(&self, cancel: Option<CancellationToken>) -> ProcessResult<()> {
        let cancel = cancel.unwrap_or_else(|| self.cancel.clone());
        if cancel.is_cancelled() {
            return Err(ProcessError::start_failed(
                &self.id,
                &io::Error::new(io::ErrorKind::Interrupted, "launch cancelled before start"),
            ));
        }

        let pending = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            Self::settle(&self.id, inner);
            match inner.launch {
                Some(ref launch)
                    if !launch.has_exited()
                        && (inner.state.current_state() == ProcessState::Killed
                            || launch.cancel.is_cancelled()) =>
                {
                    Some(launch.exit.clone())
                }
                _ => None,
            }
        };
        if let Some(mut exit) = pending {
            debug!("Waiting for killed instance of {} to be reaped", self.id);
            let _ = exit.wait_for(Option::is_some).await.map(|record| *record);
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        Self::settle(&self.id, inner);
        if let Some(ref launch) = inner.launch {
            if !launch.has_exited() {
                return Err(ProcessError::invalid_state(
                    &self.id,
                    "exited, killed or unstarted process",
                    format!("running (PID: {})", launch.pid),
                ));
            }
        }

        info!("Spawning process: {}", self.id);

        let mut cmd = self.spec.build_command();
        self.descriptors.bind(&mut cmd, &self.id)?;

        let mut child = cmd.spawn().map_err(|e| {
            warn!("Failed to spawn {}: {}", self.id, e);
            ProcessError::start_failed(&self.id, &e)
        })?;
        let pid = child.id().unwrap_or(0);

        let LaunchIo {
            pumps,
            feeders,
            stdout_pipe,
            stderr_pipe,
        } = self.descriptors.attach(&mut child, &self.id);

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let monitor = ExitMonitor {
            id: self.id.clone(),
            pid,
            child,
            requests: requests_rx,
            cancel: cancel.clone(),
            pumps,
            feeders,
            exit_tx,
        };
        tokio::spawn(monitor.run());

        inner.state.transition_to_running()?;
        inner.launch = Some(Launch {
            pid,
            requests: requests_tx,
            exit: exit_rx,
            cancel,
            stdout_pipe: stdout_pipe.map(|pipe| Arc::new(tokio::sync::Mutex::new(pipe))),
            stderr_pipe: stderr_pipe.map(|pipe| Arc::new(tokio::sync::Mutex::new(pipe))),
            observed: false,
        });

        info!("Process spawned successfully: {} (PID: {})", self.id, pid);
        Ok(())
    }

    /// Suspend until the current launch exits and its captured output has
    /// been drained into the capture buffers.
    ///
    /// Draining ends when every writer of a captured pipe has closed it. A
    /// background descendant that inherited the pipe (`sh -c 'sleep 60 &'`)
    /// therefore delays the exit report, and any restart waiting on it,
    /// until that descendant exits. Kill requests are not served in that
    /// window since the child itself is already reaped.
    pub async fn wait(&self) -> ProcessResult<()> {
        let mut exit = {
            let inner = self.inner.lock();
            match inner.launch {
                Some(ref launch) => launch.exit.clone(),
                None => {
                    return Err(ProcessError::invalid_state(
                        &self.id,
                        "started process",
                        inner.state.current_state().to_string(),
                    ))
                }
            }
        };

        let record = exit
            .wait_for(Option::is_some)
            .await
            .map(|record| *record)
            .unwrap_or(None);

        let Some(record) = record else {
            return Err(ProcessError::Io {
                id: self.id.clone(),
                reason: "exit monitor ended without reporting an exit status".to_string(),
            });
        };

        Self::settle(&self.id, &mut self.inner.lock());
        record.outcome(&self.id)
    }

    /// Kill the current launch. Fire-and-forget: nothing is reported if the
    /// process has already exited.
    pub async fn stop(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        match inner.launch {
            Some(ref launch) if !launch.has_exited() => {
                info!("Killing process {} (PID: {})", self.id, launch.pid);
                if launch.requests.send(LaunchRequest::Kill).is_err() {
                    debug!("Exit monitor for {} already finished", self.id);
                }
                if let Err(e) = inner.state.transition_to_killed("stop requested") {
                    debug!("Stop of {} not recorded: {}", self.id, e);
                }
            }
            _ => debug!("Stop requested for {} but no process is running", self.id),
        }
    }

    /// Relay `signal` to the current launch.
    pub async fn signal(&self, signal: Signal) -> ProcessResult<()> {
        let resp = {
            let inner = self.inner.lock();
            let launch = inner
                .launch
                .as_ref()
                .ok_or_else(|| ProcessError::signal_failed(&self.id, signal, "process not started"))?;
            if launch.has_exited() {
                return Err(ProcessError::signal_failed(&self.id, signal, "process already exited"));
            }

            let (tx, rx) = oneshot::channel();
            launch
                .requests
                .send(LaunchRequest::Signal { signal, resp: tx })
                .map_err(|_| ProcessError::signal_failed(&self.id, signal, "process already exited"))?;
            rx
        };

        let result = resp.await.unwrap_or_else(|_| {
            Err(ProcessError::signal_failed(&self.id, signal, "process already exited"))
        });

        if result.is_ok() {
            debug!("Delivered {} to {}", signal, self.id);
            if signal.is_kill() {
                let mut inner = self.inner.lock();
                if inner.state.current_state() == ProcessState::Running {
                    if let Err(e) = inner.state.transition_to_killed("SIGKILL delivered") {
                        debug!("SIGKILL of {} not recorded: {}", self.id, e);
                    }
                }
            }
        }

        result
    }

    pub fn stdout(&self) -> Option<CaptureBuffer> {
        self.descriptors.capture_buffer(StreamKind::Stdout)
    }

    pub fn stderr(&self) -> Option<CaptureBuffer> {
        self.descriptors.capture_buffer(StreamKind::Stderr)
    }

    /// Pull mode: one read from the live stdout pipe of the current launch.
    ///
    /// Requires stdout to be bound to `OutputTarget::Pipe`. Returns `Ok(0)`
    /// once the pipe reaches end of file.
    pub async fn read_stdout(&self, buf: &mut [u8]) -> ProcessResult<usize> {
        self.descriptors.ensure_pullable(&self.id, StreamKind::Stdout)?;
        let pipe = {
            let inner = self.inner.lock();
            inner
                .launch
                .as_ref()
                .and_then(|launch| launch.stdout_pipe.clone())
                .ok_or_else(|| {
                    ProcessError::invalid_state(&self.id, "started process", inner.state.current_state().to_string())
                })?
        };

        let mut pipe = pipe.lock().await;
        pipe.read(buf).await.map_err(|e| ProcessError::io(&self.id, &e))
    }

    /// Pull mode: one read from the live stderr pipe of the current launch.
    pub async fn read_stderr(&self, buf: &mut [u8]) -> ProcessResult<usize> {
        self.descriptors.ensure_pullable(&self.id, StreamKind::Stderr)?;
        let pipe = {
            let inner = self.inner.lock();
            inner
                .launch
                .as_ref()
                .and_then(|launch| launch.stderr_pipe.clone())
                .ok_or_else(|| {
                    ProcessError::invalid_state(&self.id, "started process", inner.state.current_state().to_string())
                })?
        };

        let mut pipe = pipe.lock().await;
        pipe.read(buf).await.map_err(|e| ProcessError::io(&self.id, &e))
    }
}

#[async_trait]
impl ProcessControl for ProcessHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self, cancel: Option<CancellationToken>) -> ProcessResult<()> {
        ProcessHandle::start(self, cancel).await
    }

    async fn wait(&self) -> ProcessResult<()> {
        ProcessHandle::wait(self).await
    }

    async fn stop(&self) {
        ProcessHandle::stop(self).await
    }

    async fn signal(&self, signal: Signal) -> ProcessResult<()> {
        ProcessHandle::signal(self, signal).await
    }

    fn stdout(&self) -> Option<CaptureBuffer> {
        ProcessHandle::stdout(self)
    }

    fn stderr(&self) -> Option<CaptureBuffer> {
        ProcessHandle::stderr(self)
    }
}

/// Owns the `Child` of one launch until it is reaped
struct ExitMonitor {
    id: String,
    pid: u32,
    child: Child,
    requests: mpsc::UnboundedReceiver<LaunchRequest>,
    cancel: CancellationToken,
    pumps: Vec<JoinHandle<()>>,
    feeders: Vec<JoinHandle<()>>,
    exit_tx: watch::Sender<Option<ExitRecord>>,
}

impl ExitMonitor {
    async fn run(mut self) {
        debug!("Exit monitor started for process {} (PID: {})", self.id, self.pid);

        let mut cancelled = false;
        let mut requests_open = true;

        let status = loop {
            tokio::select! {
                status = self.child.wait() => break status,
                _ = self.cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    info!("Launch of {} cancelled, killing PID {}", self.id, self.pid);
                    self.kill();
                }
                request = self.requests.recv(), if requests_open => match request {
                    Some(LaunchRequest::Kill) => self.kill(),
                    Some(LaunchRequest::Signal { signal, resp }) => {
                        let _ = resp.send(self.deliver(signal));
                    }
                    None => requests_open = false,
                },
            }
        };

        for feeder in self.feeders.drain(..) {
            feeder.abort();
        }
        for pump in self.pumps.drain(..) {
            if let Err(e) = pump.await {
                warn!("Output capture task for {} failed: {}", self.id, e);
            }
        }

        let status = match status {
            Ok(status) => {
                if status.success() {
                    info!("Process {} (PID: {}) exited successfully", self.id, self.pid);
                } else {
                    warn!("Process {} (PID: {}) exited: {}", self.id, self.pid, exit_cause(&status));
                }
                Some(status)
            }
            Err(e) => {
                error!("Failed to wait for process {} (PID: {}): {}", self.id, self.pid, e);
                None
            }
        };

        let _ = self.exit_tx.send(Some(ExitRecord { status, cancelled }));
        debug!("Exit monitor completed for process {} (PID: {})", self.id, self.pid);
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("Kill of {} (PID: {}) not delivered: {}", self.id, self.pid, e);
        }
    }

    fn deliver(&mut self, signal: Signal) -> ProcessResult<()> {
        match self.child.try_wait() {
            Ok(Some(_)) => Err(ProcessError::signal_failed(&self.id, signal, "process already exited")),
            _ => signal::deliver(self.pid, signal)
                .map_err(|reason| ProcessError::signal_failed(&self.id, signal, reason)),
        }
    }
}
