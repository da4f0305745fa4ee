//! The supervisor's handle on one worker.

use crate::error::SupervisorError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

pub type WorkerId = u32;

pub struct WorkerHandle {
    id: WorkerId,
    pid: Option<u32>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    terminate: mpsc::UnboundedSender<()>,
    exited: AtomicBool,
}

impl WorkerHandle {
    pub fn new(
        id: WorkerId,
        pid: Option<u32>,
        outbound: mpsc::UnboundedSender<String>,
        terminate: mpsc::UnboundedSender<()>,
    ) -> Self {
        Self {
            id,
            pid,
            outbound: Mutex::new(Some(outbound)),
            terminate,
            exited: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queues a message for the worker. Once the control channel is
    /// disconnected this does nothing.
    pub fn send(&self, message: String) {
        let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        match outbound.as_ref() {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => trace!(worker_id = self.id, "Dropping message for disconnected worker"),
        }
    }

    /// Drops the control channel. Every later `send` is a no-op.
    pub fn disconnect(&self) {
        self.outbound.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn is_connected(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Asks the worker process to terminate.
    pub fn terminate(&self) -> Result<(), SupervisorError> {
        self.terminate
            .send(())
            .map_err(|_| SupervisorError::WorkerGone(self.id))
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_exited(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_after_disconnect_is_noop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (terminate, _terminate_rx) = mpsc::unbounded_channel();
        let handle = WorkerHandle::new(1, Some(100), tx, terminate);

        handle.send(">1\nhello".to_string());
        handle.disconnect();
        handle.send(">1\nlost".to_string());
        handle.disconnect();

        assert!(!handle.is_connected());
        assert_eq!(rx.try_recv().unwrap(), ">1\nhello");
        // The only sender is gone, so the queue is closed after the first message.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_terminate_after_exit_reports_gone() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (terminate, terminate_rx) = mpsc::unbounded_channel();
        let handle = WorkerHandle::new(4, None, tx, terminate);
        assert!(handle.terminate().is_ok());
        drop(terminate_rx);
        assert!(matches!(handle.terminate(), Err(SupervisorError::WorkerGone(4))));
    }
}
