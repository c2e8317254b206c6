//! Launching and controlling a single child process.
//!
//! This crate provides:
//! - [`LaunchSpec`]: program, arguments, environment and working directory
//! - [`DescriptorSpec`]: stdin/stdout/stderr overrides, including capture
//! - [`ProcessHandle`]: start, wait, stop, signal and restart in place
//! - [`ProcessControl`]: the trait every wrapper around a handle implements

pub mod control;
pub mod descriptors;
pub mod handle;
pub mod launch;
pub mod signal;

pub use control::ProcessControl;
pub use descriptors::{CaptureBuffer, DescriptorSpec, InputSource, OutputTarget};
pub use handle::{exit_cause, ProcessHandle};
pub use launch::{parse_env_entry, LaunchSpec};
pub use signal::{deliver, process_exists};

pub use subproc_common::{ExitCause, ProcessError, ProcessResult, Signal, StreamKind};
pub use subproc_process_state::{ProcessState, StateTransition};
