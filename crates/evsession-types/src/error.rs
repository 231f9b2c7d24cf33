//! Record codec errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("record buffer holds {got} bytes, expected a multiple of {expected}")]
    Truncated { got: usize, expected: usize },

    #[error("failed to encode record: {0}")]
    Encode(String),

    #[error("failed to decode record: {0}")]
    Decode(String),
}
