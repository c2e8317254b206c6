use subproc_common::{ProcessError, ProcessResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_HISTORY: usize = 100;

/// Lifecycle state of one process handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// No OS process has been launched yet
    Unstarted,
    /// An OS process is alive (or exited but not yet observed by `wait`)
    Running,
    /// The last launch exited on its own and `wait` observed it
    Exited,
    /// The last launch was killed deliberately (stop, SIGKILL or cancellation)
    Killed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Unstarted => write!(f, "unstarted"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Exited => write!(f, "exited"),
            ProcessState::Killed => write!(f, "killed"),
        }
    }
}

/// Represents a state transition with timestamp and optional reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: ProcessState,
    pub to_state: ProcessState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// State machine guarding the `Unstarted → Running → {Exited | Killed}` lifecycle
#[derive(Debug, Clone)]
pub struct ProcessStateMachine {
    process_id: String,
    current_state: ProcessState,
    previous_state: Option<ProcessState>,
    state_history: Vec<StateTransition>,
    launches: u64,
}

impl ProcessStateMachine {
    pub fn new(process_id: &str) -> Self {
        Self {
            process_id: process_id.to_string(),
            current_state: ProcessState::Unstarted,
            previous_state: None,
            state_history: Vec::new(),
            launches: 0,
        }
    }

    pub fn current_state(&self) -> ProcessState {
        self.current_state
    }

    /// Most recent transitions, oldest first (bounded)
    pub fn state_history(&self) -> &[StateTransition] {
        &self.state_history
    }

    /// Number of successful launches over the lifetime of the handle
    pub fn launches(&self) -> u64 {
        self.launches
    }

    pub fn is_valid_transition(&self, target_state: ProcessState) -> bool {
        match (self.current_state, target_state) {
            (ProcessState::Unstarted, ProcessState::Running) => true,

            (ProcessState::Running, ProcessState::Exited) => true,
            (ProcessState::Running, ProcessState::Killed) => true,

            // Restart in place
            (ProcessState::Exited, ProcessState::Running) => true,
            (ProcessState::Killed, ProcessState::Running) => true,

            // Running -> Running is a second launch over a live process
            (ProcessState::Running, ProcessState::Running) => false,
            (state, target) if state == target => true,

            _ => false,
        }
    }

    pub fn transition_to(&mut self, target_state: ProcessState, reason: Option<String>) -> ProcessResult<()> {
        if !self.is_valid_transition(target_state) {
            return Err(ProcessError::invalid_state(
                &self.process_id,
                format!("transition to {}", target_state),
                self.current_state.to_string(),
            ));
        }

        if self.current_state == target_state {
            return Ok(());
        }

        self.state_history.push(StateTransition {
            from_state: self.current_state,
            to_state: target_state,
            timestamp: Utc::now(),
            reason,
        });
        if self.state_history.len() > MAX_HISTORY {
            self.state_history.remove(0);
        }

        self.previous_state = Some(self.current_state);
        self.current_state = target_state;
        if target_state == ProcessState::Running {
            self.launches += 1;
        }

        tracing::debug!(
            "Process {} transitioned from {} to {}",
            self.process_id,
            self.previous_state.unwrap_or(ProcessState::Unstarted),
            self.current_state
        );

        Ok(())
    }

    pub fn transition_to_running(&mut self) -> ProcessResult<()> {
        self.transition_to(ProcessState::Running, Some("Process launched".to_string()))
    }

    pub fn transition_to_exited(&mut self, reason: String) -> ProcessResult<()> {
        self.transition_to(ProcessState::Exited, Some(reason))
    }

    pub fn transition_to_killed(&mut self, reason: &str) -> ProcessResult<()> {
        self.transition_to(ProcessState::Killed, Some(reason.to_string()))
    }
}
