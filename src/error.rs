//! Error types for the analysis and choreography pipeline

use thiserror::Error;

use crate::choreography::PatternKind;

/// Errors raised by the library.
///
/// Degenerate audio (silence, too few onsets, empty timelines) never produces an
/// error; those cases resolve to fallback values. What remains are configuration
/// mistakes and I/O.
#[derive(Debug, Error)]
pub enum ChoreoError {
    /// Transform size is not a power of two (or is smaller than 2)
    #[error("FFT size must be a power of 2, got {0}")]
    InvalidTransformSize(usize),

    /// Sample rate of zero or too low for the configured frame rate
    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    /// A tuning value that makes an analysis stage meaningless
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No pattern registered for the requested kind
    #[error("unknown pattern type: {0:?}")]
    UnknownPattern(PatternKind),

    /// A rule with this id is already registered
    #[error("rule already registered: {0}")]
    DuplicateRule(String),

    /// The pattern collaborator reported a failure
    #[error("pattern {pattern:?} failed: {reason}")]
    PatternFailed { pattern: PatternKind, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("WAV decoding error: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, ChoreoError>;

/// Reject a tuning value that must be a finite number above zero.
pub(crate) fn ensure_positive(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ChoreoError::InvalidConfig(format!(
            "{name} must be positive, got {value}"
        )))
    }
}
