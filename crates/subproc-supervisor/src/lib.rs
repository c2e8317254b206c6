//! Supervision wrappers for a single child process.
//!
//! - [`Supervisor`] restarts the wrapped process in a background task
//!   whenever it exits abnormally, until it exits cleanly or is stopped.
//! - [`RestartUntilClean`] retries inside `wait` until a clean exit.
//!
//! Both implement [`ProcessControl`](subproc_process::ProcessControl) and
//! can wrap a [`ProcessHandle`](subproc_process::ProcessHandle) or each other.

pub mod config;
pub mod policy;
pub mod restart_until_clean;
pub mod supervisor;

pub use config::{ProcessConfig, RestartConfig, RestartMode, SupervisorConfig};
pub use policy::RestartPolicy;
pub use restart_until_clean::RestartUntilClean;
pub use supervisor::{Supervisor, SupervisorOptions};
