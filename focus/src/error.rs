//! Focus run error types

use microstage_motor::MotorError;
use thiserror::Error;

/// Errors surfaced by a focus run. Every variant ends the background worker
/// in a terminal state; nothing here crosses into the frame producer.
#[derive(Debug, Error)]
pub enum FocusError {
    #[error("motor communication failed: {0}")]
    Motor(#[from] MotorError),

    #[error("focus run cancelled")]
    Cancelled,

    #[error("no frame available from the camera")]
    NoFrame,

    #[error("a focus run is already active")]
    AlreadyRunning,

    #[error("bracket search gave up: {0}")]
    BracketFailed(String),
}

/// Degenerate inputs detected before a peak-interpolation formula is applied.
///
/// These are recoverable: the orchestrator falls back to the best sampled
/// position instead of propagating a NaN or infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FitError {
    #[error("scores must be strictly positive for a gaussian fit")]
    NonPositiveScore,

    #[error("degenerate samples: {0}")]
    Degenerate(&'static str),
}
