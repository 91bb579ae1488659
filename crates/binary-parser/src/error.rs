//! Error types for Mach-O parsing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic number: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u32, actual: u32 },

    #[error("Truncated data: expected {expected} bytes, got {actual}")]
    TruncatedData { expected: usize, actual: usize },

    #[error("Malformed load command #{index}: {reason}")]
    MalformedLoadCommand { index: u32, reason: String },

    #[error("Record decode error: {0}")]
    Scroll(#[from] scroll::Error),

    #[error("Re-exported symbol {symbol} needs a dependent resolver")]
    MissingDependentResolver { symbol: String },

    #[error("Ordinal {ordinal} out of range for {symbol} ({count} dependents)")]
    OrdinalOutOfRange { ordinal: u64, symbol: String, count: u32 },
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

impl ParseError {
    pub fn truncated(expected: usize, actual: usize) -> Self {
        Self::TruncatedData { expected, actual }
    }

    pub fn malformed_command(index: u32, reason: impl Into<String>) -> Self {
        Self::MalformedLoadCommand {
            index,
            reason: reason.into(),
        }
    }
}
