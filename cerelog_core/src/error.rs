/*!
Common error types for the Cerelog core library.
*/

use thiserror::Error;

/// Common result type used throughout the core library
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error type for operations that can legitimately fail.
///
/// Malformed frames met while scanning a stream are not errors; the decoder
/// recovers from them internally and only counts them.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Wire-level frame errors from explicit parsing or encoding
    #[error("Frame error: {0}")]
    Frame(#[from] crate::frame::FrameError),

    /// Calibration parameters out of range
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    /// Unknown output unit name
    #[error("Unknown output scale: {0}")]
    UnknownScale(String),
}

impl CoreError {
    /// Create a new invalid calibration error
    pub fn invalid_calibration(msg: impl Into<String>) -> Self {
        Self::InvalidCalibration(msg.into())
    }

    /// Create a new unknown scale error
    pub fn unknown_scale(name: impl Into<String>) -> Self {
        Self::UnknownScale(name.into())
    }
}
