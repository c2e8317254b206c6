//! OS signal delivery and process existence checks.
//!
//! Only POSIX hosts can relay arbitrary signals; elsewhere every delivery
//! fails and callers surface it as a signal failure.

use subproc_common::Signal;

/// Deliver `signal` to `pid`. The error string is the OS-reported reason.
pub fn deliver(pid: u32, signal: Signal) -> Result<(), String> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal as NixSignal};
        use nix::unistd::Pid;

        let nix_signal = NixSignal::try_from(signal.as_raw())
            .map_err(|e| format!("unsupported signal {}: {}", signal.as_raw(), e))?;

        kill(Pid::from_raw(pid as i32), nix_signal).map_err(|e| e.to_string())
    }

    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
        Err("signals are not supported on this platform".to_string())
    }
}

/// Check if a process with the given PID exists.
///
/// On Unix this is `kill(pid, 0)`: no signal is sent. A zombie that has not
/// been reaped still counts as existing.
pub fn process_exists(pid: u32) -> Result<bool, String> {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), None) {
            Ok(_) => Ok(true),
            Err(nix::errno::Errno::ESRCH) => Ok(false),
            // Exists but belongs to someone else
            Err(nix::errno::Errno::EPERM) => Ok(true),
            Err(e) => Err(format!("Failed to check process: {}", e)),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Err("process checks are not supported on this platform".to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_exists() {
        assert!(process_exists(std::process::id()).unwrap());
    }

    #[test]
    fn test_signal_zero_free_pid() {
        // PIDs are capped well below this on Linux
        assert!(!process_exists(9_999_999).unwrap());
    }

    #[test]
    fn test_deliver_to_missing_process_fails() {
        let err = deliver(9_999_999, Signal::TERM).unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn test_deliver_rejects_unknown_signal() {
        let err = deliver(std::process::id(), Signal::from_raw(9999)).unwrap_err();
        assert!(err.contains("unsupported signal"));
    }
}
