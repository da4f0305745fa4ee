//! Error types for the worker process.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("Invalid trusted proxy range: {0}")]
    InvalidProxyRange(String),
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Connection registry is no longer running")]
    RegistryClosed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
