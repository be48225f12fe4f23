//
// Error types
//
// Everything below the command-line driver reports failures through
// PactError. The driver itself wraps these in anyhow.
//

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PactError {
    #[error("unsupported {kind} '{value}'")]
    UnsupportedMode { kind: &'static str, value: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{what} has the wrong shape: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },

    #[error("image I/O failed: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, PactError>;

// Like anyhow's ensure!, but producing PactError::InvalidInput.
macro_rules! ensure_input {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::pact_error::PactError::InvalidInput(format!($($arg)+)));
        }
    };
}
