//! ProcessControl trait - the capability every wrapper builds on
//!
//! [`ProcessHandle`](crate::ProcessHandle) implements it directly; the
//! supervisor and the restart-until-clean decorator implement it by
//! delegating to whatever they wrap, so wrappers nest in any order.
//!
//! Methods take `&self`: implementations synchronize internally so a
//! monitoring task and the owning caller can share one instance.

use crate::descriptors::CaptureBuffer;
use async_trait::async_trait;
use subproc_common::{ProcessResult, Signal};
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Identifier used in logs and errors
    fn id(&self) -> &str;

    /// Launch the process.
    ///
    /// Cancelling `cancel` (or the implementation's default token when
    /// `None`) kills the launched process and counts as a deliberate stop.
    async fn start(&self, cancel: Option<CancellationToken>) -> ProcessResult<()>;

    /// Suspend until the current launch terminates.
    ///
    /// `Ok(())` on a clean exit, `WaitFailed` on a non-zero exit code or
    /// signal death.
    async fn wait(&self) -> ProcessResult<()>;

    /// Kill the current launch immediately. Never fails; stopping an
    /// exited process is a no-op.
    async fn stop(&self);

    /// Relay an OS signal to the current launch
    async fn signal(&self, signal: Signal) -> ProcessResult<()>;

    /// Capture buffer for stdout, if stdout is captured
    fn stdout(&self) -> Option<CaptureBuffer>;

    /// Capture buffer for stderr, if stderr is captured
    fn stderr(&self) -> Option<CaptureBuffer>;
}
