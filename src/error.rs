//! Error types for the adapter engine.
//!
//! Every failure the data or control path can report maps to one variant so
//! callers on either side (host stack or user-mode) can tell transient
//! conditions apart from caller bugs. Logic errors inside the engine itself
//! (reference underflow, double teardown) are asserts, not error values.

use thiserror::Error;

/// Adapter error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TapError {
    #[error("media disconnected")]
    MediaDisconnected,

    #[error("adapter in low power state")]
    LowPower,

    #[error("reset in progress")]
    ResetInProgress,

    /// The adapter is pausing or paused. Retryable once restarted, and
    /// distinct from `InvalidState` so user-mode can tell "temporarily
    /// unavailable" from "permanently closed".
    #[error("adapter paused")]
    AdapterPaused,

    /// The adapter is halted, shut down or still initializing.
    #[error("adapter not in a usable state")]
    InvalidState,

    #[error("device endpoint not open")]
    DeviceNotOpen,

    /// Backpressure: the pending-request queue is at capacity.
    #[error("too many requests in flight")]
    Busy,

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("buffer too small: need at least {required} bytes")]
    BufferTooSmall { required: usize },

    #[error("frame length {len} below minimum {min}")]
    FrameTooShort { len: usize, min: usize },

    #[error("frame length {len} above maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Reports the size a successful set would need, in bytes.
    #[error("multicast list full: at most {max} entries ({required} bytes)")]
    MulticastListFull { max: usize, required: usize },

    #[error("operation not supported")]
    NotSupported,
}

impl TapError {
    /// Numeric status code for FFI-ish consumers and logs.
    pub fn to_code(&self) -> u32 {
        match self {
            TapError::MediaDisconnected => 1,
            TapError::LowPower => 2,
            TapError::ResetInProgress => 3,
            TapError::AdapterPaused => 4,
            TapError::InvalidState => 5,
            TapError::DeviceNotOpen => 6,
            TapError::Busy => 7,
            TapError::Cancelled => 8,
            TapError::InvalidParameter(_) => 100,
            TapError::BufferTooSmall { .. } => 101,
            TapError::FrameTooShort { .. } => 102,
            TapError::FrameTooLarge { .. } => 103,
            TapError::MulticastListFull { .. } => 104,
            TapError::NotSupported => 105,
        }
    }

    /// True for conditions that may clear once adapter state changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TapError::MediaDisconnected
                | TapError::LowPower
                | TapError::ResetInProgress
                | TapError::AdapterPaused
                | TapError::Busy
        )
    }
}

/// Result type alias for adapter operations.
pub type TapResult<T> = Result<T, TapError>;
