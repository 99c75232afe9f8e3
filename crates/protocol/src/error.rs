//! Protocol error types

use thiserror::Error;

/// Framing and parsing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Report buffer is shorter than the fixed frame
    #[error("Report too short: needed {needed} bytes, got {actual}")]
    ReportTooShort { needed: usize, actual: usize },

    /// Valid-sample count would overlap the timer bytes
    #[error("Sample count {count} out of range (max: {max})")]
    SampleCountOutOfRange { count: usize, max: usize },

    /// Sample value cannot be represented as a triple
    #[error("Sample {0} out of encodable range")]
    SampleOutOfRange(i32),

    /// Malformed "VID:PID" signature
    #[error("Invalid device signature: {0}")]
    InvalidSignature(String),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
