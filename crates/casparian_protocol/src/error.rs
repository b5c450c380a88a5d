//! Protocol error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid opcode: {0}")]
    InvalidOpCode(u8),

    #[error("protocol version mismatch: expected 0x{expected:02x}, got 0x{got:02x}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("header too short: expected {expected} bytes, got {got}")]
    HeaderTooShort { expected: usize, got: usize },

    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("expected {expected} frames, got {got}")]
    InvalidFrameCount { expected: usize, got: usize },

    #[error("payload length mismatch: header says {expected} bytes, got {got}")]
    PayloadLengthMismatch { expected: usize, got: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload encoding error: {0}")]
    Json(#[from] serde_json::Error),
}
