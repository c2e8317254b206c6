//! Value types shared by the subproc crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An OS-native signal number.
///
/// Only the numbers that are identical on every POSIX host get named
/// constants; any other value can be passed through `from_raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signal(i32);

impl Signal {
    pub const HUP: Signal = Signal(1);
    pub const INT: Signal = Signal(2);
    pub const QUIT: Signal = Signal(3);
    pub const KILL: Signal = Signal(9);
    pub const TERM: Signal = Signal(15);

    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> i32 {
        self.0
    }

    /// Whether delivering this signal terminates the process unconditionally.
    pub fn is_kill(&self) -> bool {
        *self == Self::KILL
    }

    fn name(&self) -> Option<&'static str> {
        match *self {
            Self::HUP => Some("SIGHUP"),
            Self::INT => Some("SIGINT"),
            Self::QUIT => Some("SIGQUIT"),
            Self::KILL => Some("SIGKILL"),
            Self::TERM => Some("SIGTERM"),
            _ => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "signal {}", self.0),
        }
    }
}

impl FromStr for Signal {
    type Err = String;

    /// Accepts `INT`, `SIGINT` or a raw number such as `2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(raw) = s.parse::<i32>() {
            if raw <= 0 {
                return Err(format!("Invalid signal number: {}", s));
            }
            return Ok(Self(raw));
        }

        let upper = s.to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        match name {
            "HUP" => Ok(Self::HUP),
            "INT" => Ok(Self::INT),
            "QUIT" => Ok(Self::QUIT),
            "KILL" => Ok(Self::KILL),
            "TERM" => Ok(Self::TERM),
            _ => Err(format!("Unknown signal: {}", s)),
        }
    }
}

/// Why a process did not exit cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCause {
    /// Non-zero exit code.
    Code(i32),
    /// Terminated by a signal (unix only).
    Signal(i32),
    /// The OS reported neither a code nor a signal.
    Unknown,
}

impl ExitCause {
    /// Exit code to mirror when re-raising this outcome from a parent process.
    pub fn as_exit_code(&self) -> i32 {
        match self {
            ExitCause::Code(code) => *code,
            ExitCause::Signal(sig) => 128 + sig,
            ExitCause::Unknown => 1,
        }
    }
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCause::Code(code) => write!(f, "exit code {}", code),
            ExitCause::Signal(sig) => write!(f, "terminated by {}", Signal::from_raw(*sig)),
            ExitCause::Unknown => write!(f, "unknown exit status"),
        }
    }
}

/// One of the three standard streams of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdin => write!(f, "stdin"),
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}
