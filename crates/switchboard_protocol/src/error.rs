//! Error types for protocol decoding and the worker spawn environment.

use thiserror::Error;

/// Errors produced while decoding a protocol frame or a worker environment.
///
/// Decode errors are expected under normal operation (forward-compatible
/// opcodes, truncated frames) and are never fatal to the receiver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty protocol frame")]
    Empty,
    #[error("Unknown opcode: {0:?}")]
    UnknownOpcode(char),
    #[error("Opcode {opcode:?} is missing field {index}")]
    MissingField { opcode: char, index: usize },
    #[error("Invalid environment variable {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}
