//! Custom error types for the stage controller.
//!
//! `StageError` is the single error type crossing the public boundary of the
//! crate. Its variants fall into three groups:
//!
//! - **Validation** (`ZeroDelta`, `StepTooLarge`, `OutOfRange`, `InvalidIndex`,
//!   `InvalidLabel`, `UnknownMetric`, `SequenceRunning`, `InvalidSequence`,
//!   `NotOperable`, `InvalidReport`): the request was rejected and no state
//!   was touched.
//! - **Hardware** (`Connection`, `Movement`): produced at the adapter boundary.
//!   These never escape a public operation; `PositionState` converts them into
//!   a degradation to simulation mode and a status message.
//! - **Ambient** (`Config`, `Io`, `Serialization`, `ActorUnavailable`):
//!   configuration loading, metadata persistence, and actor plumbing.

use crate::core::{Axis, ConnectionState};
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, StageError>;

/// Errors returned by stage controller operations.
#[derive(Error, Debug)]
pub enum StageError {
    /// Requested delta is below the position tolerance.
    #[error("Move on axis {axis} rejected: delta {delta} is below tolerance")]
    ZeroDelta {
        /// Axis of the rejected move.
        axis: Axis,
        /// Requested delta in microns.
        delta: f64,
    },

    /// Requested delta exceeds the hardware maximum step.
    #[error("Move on axis {axis} rejected: |{delta}| exceeds maximum step {max_step}")]
    StepTooLarge {
        /// Axis of the rejected move.
        axis: Axis,
        /// Requested delta in microns.
        delta: f64,
        /// Configured limit in microns.
        max_step: f64,
    },

    /// Target lies outside the configured travel range.
    #[error("Target {target} on axis {axis} is outside [{min}, {max}]")]
    OutOfRange {
        /// Axis of the rejected move.
        axis: Axis,
        /// Requested absolute position.
        target: f64,
        /// Lower travel limit.
        min: f64,
        /// Upper travel limit.
        max: f64,
    },

    /// 1-based bookmark index outside `1..=count`.
    #[error("Bookmark index {index} is out of range (1..={count})")]
    InvalidIndex {
        /// Requested index.
        index: usize,
        /// Bookmarks currently stored.
        count: usize,
    },

    /// Label is empty, too long, or has a disallowed character.
    #[error("Invalid bookmark label: {0}")]
    InvalidLabel(String),

    /// Metric name is unknown or the kind is not registered.
    #[error("Unknown or unregistered metric: {0}")]
    UnknownMetric(String),

    /// Operation refused while a sweep runs.
    #[error("An auto-step sequence is already running")]
    SequenceRunning,

    /// Sweep parameters failed validation.
    #[error("Invalid auto-step parameters: {0}")]
    InvalidSequence(String),

    /// Moves are refused in this connection state.
    #[error("Stage is not operable in state {0:?}")]
    NotOperable(ConnectionState),

    /// Joystick report has the wrong shape.
    #[error("Invalid joystick report: {0}")]
    InvalidReport(String),

    /// Adapter failed to connect.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Adapter failed to move or read back.
    #[error("Movement error: {0}")]
    Movement(String),

    /// Settings failed to load or validate.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Metadata file access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata record could not be parsed or written.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The actor task has stopped.
    #[error("Controller actor is no longer running")]
    ActorUnavailable,
}

impl StageError {
    /// True for rejections that left all state untouched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StageError::ZeroDelta { .. }
                | StageError::StepTooLarge { .. }
                | StageError::OutOfRange { .. }
                | StageError::InvalidIndex { .. }
                | StageError::InvalidLabel(_)
                | StageError::UnknownMetric(_)
                | StageError::SequenceRunning
                | StageError::InvalidSequence(_)
                | StageError::NotOperable(_)
                | StageError::InvalidReport(_)
        )
    }
}
