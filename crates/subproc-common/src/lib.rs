//! # subproc-common
//!
//! Error taxonomy and value types shared by the subproc crates.

pub mod errors;
pub mod types;

pub use errors::{ProcessError, ProcessResult};
pub use types::{ExitCause, Signal, StreamKind};
