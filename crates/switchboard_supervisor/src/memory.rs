//! In-memory workers.
//!
//! [`MemoryLauncher`] launches nothing: every "worker" is a [`MemoryWorker`]
//! handed to the caller, who plays the worker side of the protocol by hand.
//! Useful for driving a [`crate::Supervisor`] without processes or sockets.

use crate::error::SupervisorError;
use crate::exit::WorkerExit;
use crate::launcher::{WorkerLauncher, WorkerProcess};
use std::sync::atomic::{AtomicU32, Ordering};
use switchboard_protocol::{WorkerEnv, WorkerMessage};
use tokio::sync::{mpsc, oneshot};

pub struct MemoryLauncher {
    launched: mpsc::UnboundedSender<MemoryWorker>,
    next_pid: AtomicU32,
}

impl MemoryLauncher {
    /// Returns the launcher and the stream of workers it launches. Once the
    /// stream is dropped every launch fails.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryWorker>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let launcher = Self {
            launched: tx,
            next_pid: AtomicU32::new(1000),
        };
        (launcher, rx)
    }
}

impl WorkerLauncher for MemoryLauncher {
    fn launch(&self, env: &WorkerEnv) -> Result<WorkerProcess, SupervisorError> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (terminate_tx, terminate_rx) = mpsc::unbounded_channel();

        let worker = MemoryWorker {
            env: env.clone(),
            pid,
            upstream: Some(inbound_tx),
            downstream: outbound_rx,
            exit: Some(exit_tx),
            terminate: terminate_rx,
        };
        self.launched
            .send(worker)
            .map_err(|_| SupervisorError::Launch("nobody is receiving launched workers".to_string()))?;

        Ok(WorkerProcess {
            pid: Some(pid),
            outbound: outbound_tx,
            inbound: inbound_rx,
            exit: exit_rx,
            terminate: terminate_tx,
        })
    }
}

/// The worker side of an in-memory worker.
pub struct MemoryWorker {
    pub env: WorkerEnv,
    pub pid: u32,
    upstream: Option<mpsc::UnboundedSender<String>>,
    downstream: mpsc::UnboundedReceiver<String>,
    exit: Option<oneshot::Sender<WorkerExit>>,
    terminate: mpsc::UnboundedReceiver<()>,
}

impl MemoryWorker {
    pub fn id(&self) -> u32 {
        self.env.worker_id
    }

    /// Sends a message to the controller.
    pub fn send(&self, message: WorkerMessage) {
        if let Some(upstream) = &self.upstream {
            let _ = upstream.send(message.encode());
        }
    }

    /// Next message the controller sent, or `None` once it disconnected.
    pub async fn recv(&mut self) -> Option<String> {
        self.downstream.recv().await
    }

    /// A message the controller already sent, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.downstream.try_recv().ok()
    }

    /// Whether termination was requested since the last call.
    pub fn terminate_requested(&mut self) -> bool {
        self.terminate.try_recv().is_ok()
    }

    /// Ends the worker with `status`. Dropping a worker without calling this
    /// reports an unknown exit status, which counts as a crash.
    pub fn exit(&mut self, status: WorkerExit) {
        self.upstream.take();
        if let Some(exit) = self.exit.take() {
            let _ = exit.send(status);
        }
    }
}
