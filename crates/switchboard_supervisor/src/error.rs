//! Error types for the worker supervisor.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to launch worker: {0}")]
    Launch(String),
    #[error("Worker {0} is no longer running")]
    WorkerGone(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
