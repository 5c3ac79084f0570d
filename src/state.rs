//! Adapter lifecycle state machine.
//!
//! One `StateMachine` per adapter, mutated only under the adapter's control
//! lock. Transition methods check the precondition state and install the
//! postcondition in one step; a transition attempted from the wrong state is
//! a host-contract violation and trips a debug assertion rather than an
//! error path.

use std::fmt;

/// Adapter lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Initializing,
    Paused,
    Pausing,
    Restarting,
    Running,
    Halted,
    Shutdown,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdapterState::Initializing => "initializing",
            AdapterState::Paused => "paused",
            AdapterState::Pausing => "pausing",
            AdapterState::Restarting => "restarting",
            AdapterState::Running => "running",
            AdapterState::Halted => "halted",
            AdapterState::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Outcome of the data-path admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Ready,
    MediaDisconnected,
    LowPower,
    ResetInProgress,
    Paused,
    InvalidState,
}

impl Admission {
    pub fn is_ready(&self) -> bool {
        matches!(self, Admission::Ready)
    }

    /// Map a non-ready admission outcome to its status code.
    pub fn into_error(self) -> crate::error::TapError {
        use crate::error::TapError;
        match self {
            Admission::Ready => unreachable!("ready admission has no error"),
            Admission::MediaDisconnected => TapError::MediaDisconnected,
            Admission::LowPower => TapError::LowPower,
            Admission::ResetInProgress => TapError::ResetInProgress,
            Admission::Paused => TapError::AdapterPaused,
            Admission::InvalidState => TapError::InvalidState,
        }
    }
}

/// Centralized transition table for the adapter lifecycle.
#[derive(Debug)]
pub struct StateMachine {
    state: AdapterState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: AdapterState::Initializing,
        }
    }

    pub fn current(&self) -> AdapterState {
        self.state
    }

    fn advance(&mut self, from: &[AdapterState], to: AdapterState) {
        debug_assert!(
            from.contains(&self.state),
            "illegal transition {} -> {}",
            self.state,
            to
        );
        self.state = to;
    }

    /// Creation succeeded.
    pub fn complete_initialization(&mut self) {
        self.advance(&[AdapterState::Initializing], AdapterState::Paused);
    }

    /// Creation failed after partial allocation; the adapter is unusable.
    pub fn fail_initialization(&mut self) {
        self.advance(&[AdapterState::Initializing], AdapterState::Halted);
    }

    pub fn begin_restart(&mut self) {
        self.advance(&[AdapterState::Paused], AdapterState::Restarting);
    }

    pub fn complete_restart(&mut self) {
        self.advance(&[AdapterState::Restarting], AdapterState::Running);
    }

    /// Pause may interrupt a restart in progress.
    pub fn begin_pause(&mut self) {
        self.advance(
            &[AdapterState::Running, AdapterState::Restarting],
            AdapterState::Pausing,
        );
    }

    pub fn complete_pause(&mut self) {
        self.advance(&[AdapterState::Pausing], AdapterState::Paused);
    }

    /// Terminal. Legal from any state; idempotent.
    pub fn halt(&mut self) {
        self.state = AdapterState::Halted;
    }

    /// System shutdown notification. No resource release happens here; the
    /// machine only records that the adapter must not come back.
    pub fn shutdown(&mut self) {
        self.state = AdapterState::Shutdown;
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.state, AdapterState::Halted | AdapterState::Shutdown)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
