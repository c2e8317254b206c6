//! Descriptor binding: stdin/stdout/stderr overrides for a launch.
//!
//! A [`DescriptorSpec`] is captured when a handle is built and applied to
//! every launch. Any stream left as `None` keeps the launch descriptor's
//! default (inherited from the parent).
//!
//! Output bound to [`OutputTarget::Capture`] is copied into a shared
//! [`CaptureBuffer`] that is never reset between launches, so it holds the
//! output history of every run in order.

use subproc_common::{ProcessError, ProcessResult, StreamKind};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const PUMP_CHUNK_SIZE: usize = 8192;

/// Shared in-memory sink for a captured output stream.
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything captured so far.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    /// Readable stream over a snapshot of the captured bytes.
    pub fn reader(&self) -> Cursor<Vec<u8>> {
        Cursor::new(self.contents())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub(crate) fn append(&self, bytes: &[u8]) {
        self.inner.lock().extend_from_slice(bytes);
    }
}

/// Where a child's stdin comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Null,
    Inherit,
    /// Written to a fresh pipe at every launch, then closed.
    Bytes(Vec<u8>),
    /// Opened read-only at every launch.
    File(PathBuf),
}

/// Where a child's stdout or stderr goes.
#[derive(Debug, Clone)]
pub enum OutputTarget {
    Null,
    Inherit,
    /// Copied into a shared buffer, readable through `stdout()`/`stderr()`.
    Capture(CaptureBuffer),
    /// Appended to a file, created if missing.
    File(PathBuf),
    /// Left as a live pipe for pull-mode reads (`read_stdout`/`read_stderr`).
    Pipe,
}

/// Stream overrides for every launch of a handle.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSpec {
    pub stdin: Option<InputSource>,
    pub stdout: Option<OutputTarget>,
    pub stderr: Option<OutputTarget>,
}

/// Per-launch stream plumbing produced by [`DescriptorSpec::attach`].
#[derive(Debug, Default)]
pub struct LaunchIo {
    /// Capture pumps; they finish once the child closes its end.
    pub pumps: Vec<JoinHandle<()>>,
    /// Stdin feeders; aborted once the child has exited.
    pub feeders: Vec<JoinHandle<()>>,
    pub stdout_pipe: Option<ChildStdout>,
    pub stderr_pipe: Option<ChildStderr>,
}

impl DescriptorSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture both stdout and stderr into fresh buffers.
    pub fn captured() -> Self {
        Self {
            stdin: None,
            stdout: Some(OutputTarget::Capture(CaptureBuffer::new())),
            stderr: Some(OutputTarget::Capture(CaptureBuffer::new())),
        }
    }

    pub fn stdin(mut self, source: InputSource) -> Self {
        self.stdin = Some(source);
        self
    }

    pub fn stdout(mut self, target: OutputTarget) -> Self {
        self.stdout = Some(target);
        self
    }

    pub fn stderr(mut self, target: OutputTarget) -> Self {
        self.stderr = Some(target);
        self
    }

    pub fn output_target(&self, stream: StreamKind) -> Option<&OutputTarget> {
        match stream {
            StreamKind::Stdout => self.stdout.as_ref(),
            StreamKind::Stderr => self.stderr.as_ref(),
            StreamKind::Stdin => None,
        }
    }

    /// Buffer bound to `stream`, if that stream is captured.
    pub fn capture_buffer(&self, stream: StreamKind) -> Option<CaptureBuffer> {
        match self.output_target(stream) {
            Some(OutputTarget::Capture(buffer)) => Some(buffer.clone()),
            _ => None,
        }
    }

    /// Check that `stream` may be pull-read.
    pub fn ensure_pullable(&self, id: &str, stream: StreamKind) -> ProcessResult<()> {
        match self.output_target(stream) {
            Some(OutputTarget::Pipe) => Ok(()),
            Some(OutputTarget::Capture(_)) => Err(ProcessError::mode_conflict(id, stream)),
            _ => Err(ProcessError::not_capturable(id, stream)),
        }
    }

    /// Apply the overrides to a launch descriptor that has not been spawned.
    ///
    /// Files are opened here, so a missing input file fails the launch.
    pub fn bind(&self, cmd: &mut Command, id: &str) -> ProcessResult<()> {
        if let Some(ref source) = self.stdin {
            cmd.stdin(input_stdio(source).map_err(|e| ProcessError::start_failed(id, &e))?);
        }
        if let Some(ref target) = self.stdout {
            cmd.stdout(output_stdio(target).map_err(|e| ProcessError::start_failed(id, &e))?);
        }
        if let Some(ref target) = self.stderr {
            cmd.stderr(output_stdio(target).map_err(|e| ProcessError::start_failed(id, &e))?);
        }
        Ok(())
    }

    /// Take the piped ends out of a freshly spawned child and wire them up.
    pub fn attach(&self, child: &mut Child, id: &str) -> LaunchIo {
        let mut io = LaunchIo::default();

        if let Some(InputSource::Bytes(ref bytes)) = self.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let bytes = bytes.clone();
                let id = id.to_string();
                io.feeders.push(tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(&bytes).await {
                        debug!("Stdin feed for {} ended early: {}", id, e);
                    }
                    let _ = stdin.shutdown().await;
                }));
            }
        }

        match self.stdout {
            Some(OutputTarget::Capture(ref buffer)) => {
                if let Some(stdout) = child.stdout.take() {
                    io.pumps.push(spawn_pump(stdout, buffer.clone(), id, StreamKind::Stdout));
                }
            }
            Some(OutputTarget::Pipe) => io.stdout_pipe = child.stdout.take(),
            _ => {}
        }

        match self.stderr {
            Some(OutputTarget::Capture(ref buffer)) => {
                if let Some(stderr) = child.stderr.take() {
                    io.pumps.push(spawn_pump(stderr, buffer.clone(), id, StreamKind::Stderr));
                }
            }
            Some(OutputTarget::Pipe) => io.stderr_pipe = child.stderr.take(),
            _ => {}
        }

        io
    }
}

fn input_stdio(source: &InputSource) -> std::io::Result<Stdio> {
    Ok(match source {
        InputSource::Null => Stdio::null(),
        InputSource::Inherit => Stdio::inherit(),
        InputSource::Bytes(_) => Stdio::piped(),
        InputSource::File(path) => Stdio::from(File::open(path)?),
    })
}

fn output_stdio(target: &OutputTarget) -> std::io::Result<Stdio> {
    Ok(match target {
        OutputTarget::Null => Stdio::null(),
        OutputTarget::Inherit => Stdio::inherit(),
        OutputTarget::Capture(_) | OutputTarget::Pipe => Stdio::piped(),
        OutputTarget::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Stdio::from(file)
        }
    })
}

fn spawn_pump<R>(mut stream: R, buffer: CaptureBuffer, id: &str, kind: StreamKind) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let id = id.to_string();
    tokio::spawn(async move {
        let mut chunk = [0u8; PUMP_CHUNK_SIZE];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buffer.append(&chunk[..n]),
                Err(e) => {
                    warn!("Failed to read {} of {}: {}", kind, id, e);
                    break;
                }
            }
        }
        debug!("Capture of {} for {} finished", kind, id);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_capture_buffer_is_shared() {
        let buffer = CaptureBuffer::new();
        let clone = buffer.clone();

        clone.append(b"Hello, ");
        buffer.append(b"stdout!");

        assert_eq!(buffer.to_string_lossy(), "Hello, stdout!");
        assert_eq!(clone.len(), 14);

        let mut text = String::new();
        std::io::Read::read_to_string(&mut buffer.reader(), &mut text).unwrap();
        assert_eq!(text, "Hello, stdout!");
    }

    #[test]
    fn test_capture_buffer_lookup() {
        let spec = DescriptorSpec::new()
            .stdout(OutputTarget::Capture(CaptureBuffer::new()))
            .stderr(OutputTarget::Inherit);

        assert!(spec.capture_buffer(StreamKind::Stdout).is_some());
        assert!(spec.capture_buffer(StreamKind::Stderr).is_none());
        assert!(spec.capture_buffer(StreamKind::Stdin).is_none());
        assert!(DescriptorSpec::new().capture_buffer(StreamKind::Stdout).is_none());
    }

    #[test]
    fn test_ensure_pullable() {
        let spec = DescriptorSpec::new()
            .stdout(OutputTarget::Pipe)
            .stderr(OutputTarget::Capture(CaptureBuffer::new()));

        assert!(spec.ensure_pullable("p", StreamKind::Stdout).is_ok());
        assert!(matches!(
            spec.ensure_pullable("p", StreamKind::Stderr),
            Err(ProcessError::ModeConflict { .. })
        ));
        assert!(matches!(
            DescriptorSpec::new().ensure_pullable("p", StreamKind::Stdout),
            Err(ProcessError::NotCapturable { .. })
        ));
    }

    #[test]
    fn test_bind_missing_input_file_fails_launch() {
        let dir = tempfile::tempdir().unwrap();
        let spec = DescriptorSpec::new().stdin(InputSource::File(dir.path().join("missing")));
        let mut cmd = Command::new("cat");

        let err = spec.bind(&mut cmd, "cat").unwrap_err();
        assert!(matches!(
            err,
            ProcessError::StartFailed { kind: std::io::ErrorKind::NotFound, .. }
        ));
    }

    #[test]
    fn test_bind_creates_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let spec = DescriptorSpec::new().stdout(OutputTarget::File(path.clone()));
        let mut cmd = Command::new("true");

        spec.bind(&mut cmd, "true").unwrap();
        assert!(path.exists());
    }
}
