//! The worker pool and its routing surface.
//!
//! [`Supervisor`] owns the set of worker processes and the controller's view
//! of which connection lives on which worker. It is the only writer of both
//! maps. Routing calls may race a worker's death; every send to a worker that
//! is gone is silently dropped.
//!
//! Each worker gets a monitor task that forwards the worker's `*`, `!` and
//! `<` messages as [`ControllerEvent`]s and, once the process ends, runs exit
//! reconciliation:
//!
//! 1. classify the exit ([`ExitKind`]);
//! 2. drop the worker entry unless it crashed, crashed entries are kept for
//!    inspection and a crash report is recorded;
//! 3. disconnect the control channel so later sends are no-ops;
//! 4. synthesize a disconnect event for every connection attributed to it;
//! 5. spawn a replacement so the pool never shrinks.

use crate::error::SupervisorError;
use crate::exit::{ExitKind, WorkerExit};
use crate::launcher::{WorkerLauncher, WorkerProcess};
use crate::settings::{ListenOptions, NetworkSettings};
use crate::worker::{WorkerHandle, WorkerId};
use dashmap::DashMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};
use switchboard_protocol::{ControllerMessage, SocketId, Subchannel, WorkerEnv, WorkerMessage};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, info, warn};

/// Connection events delivered to the controller's application logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Connect {
        worker_id: WorkerId,
        socket_id: SocketId,
        remote_ip: String,
        protocol: String,
    },
    Disconnect {
        worker_id: WorkerId,
        socket_id: SocketId,
    },
    Receive {
        worker_id: WorkerId,
        socket_id: SocketId,
        message: String,
    },
}

/// Postmortem record of an abnormal worker exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub worker_id: WorkerId,
    pub pid: Option<u32>,
    pub exit: WorkerExit,
    pub lost_connections: usize,
    pub at: SystemTime,
}

pub struct Supervisor {
    launcher: Box<dyn WorkerLauncher>,
    settings: RwLock<NetworkSettings>,
    config_path: Option<PathBuf>,
    workers: DashMap<WorkerId, Arc<WorkerHandle>>,
    connections: DashMap<WorkerId, HashSet<SocketId>>,
    crash_reports: Mutex<Vec<CrashReport>>,
    next_worker_id: AtomicU32,
    events: mpsc::UnboundedSender<ControllerEvent>,
    shutting_down: AtomicBool,
    worker_exited: Notify,
}

impl Supervisor {
    /// Creates a supervisor with no workers.
    ///
    /// # Arguments
    ///
    /// * `launcher` - How worker processes are started
    /// * `settings` - Stored network configuration, refined by `listen`
    /// * `config_path` - Config file passed on to workers, if any
    ///
    /// # Returns
    ///
    /// The supervisor and the stream of connection events it produces.
    pub fn new(
        launcher: impl WorkerLauncher + 'static,
        settings: NetworkSettings,
        config_path: Option<PathBuf>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(Self {
            launcher: Box::new(launcher),
            settings: RwLock::new(settings),
            config_path,
            workers: DashMap::new(),
            connections: DashMap::new(),
            crash_reports: Mutex::new(Vec::new()),
            next_worker_id: AtomicU32::new(1),
            events,
            shutting_down: AtomicBool::new(false),
            worker_exited: Notify::new(),
        });
        (supervisor, events_rx)
    }

    /// Resolves the listen configuration from the process environment and
    /// starts the pool. Returns the number of workers started.
    pub fn listen(self: &Arc<Self>, options: ListenOptions) -> Result<usize, SupervisorError> {
        self.listen_with_env(options, |name| std::env::var(name).ok())
    }

    /// Like [`Supervisor::listen`], reading the cloud environment through
    /// `lookup`.
    pub fn listen_with_env<F>(self: &Arc<Self>, options: ListenOptions, lookup: F) -> Result<usize, SupervisorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let count = {
            let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
            let count = settings.resolve(options, lookup);
            info!(
                "📡 Listening on {}:{} with {} worker(s)",
                settings.bind_address, settings.port, count
            );
            count
        };
        for _ in 0..count {
            self.spawn_worker()?;
        }
        Ok(count)
    }

    /// Starts one worker with the current network settings.
    pub fn spawn_worker(self: &Arc<Self>) -> Result<WorkerId, SupervisorError> {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let env = {
            let settings = self.settings.read().unwrap_or_else(|e| e.into_inner());
            WorkerEnv {
                worker_id,
                port: settings.port,
                bind_address: settings.bind_address.clone(),
                no_tls: !settings.tls,
                config_path: self.config_path.clone(),
            }
        };

        let WorkerProcess {
            pid,
            outbound,
            inbound,
            exit,
            terminate,
        } = self.launcher.launch(&env)?;
        let handle = Arc::new(WorkerHandle::new(worker_id, pid, outbound, terminate));
        self.workers.insert(worker_id, handle.clone());
        tokio::spawn(Arc::clone(self).monitor(handle, inbound, exit));

        info!(worker_id, pid = ?pid, "🚀 Worker {} started", worker_id);
        Ok(worker_id)
    }

    /// Disconnects every connection of a worker and terminates it.
    ///
    /// Returns the number of connections that were disconnected. Safe to call
    /// for a worker that is already gone.
    pub fn kill_worker(&self, worker_id: WorkerId) -> usize {
        let count = self.drop_connections(worker_id);
        match self.workers.get(&worker_id).map(|entry| entry.value().clone()) {
            Some(handle) => {
                if let Err(e) = handle.terminate() {
                    debug!(worker_id, "Terminate ignored: {}", e);
                }
            }
            None => debug!(worker_id, "Kill requested for unknown worker"),
        }
        info!(worker_id, "{} connections were lost", count);
        count
    }

    /// Kills the worker running as OS process `pid`. Returns `None` if no
    /// tracked worker has that pid.
    pub fn kill_pid(&self, pid: u32) -> Option<usize> {
        let worker_id = self
            .workers
            .iter()
            .find(|entry| entry.value().pid() == Some(pid))
            .map(|entry| *entry.key())?;
        Some(self.kill_worker(worker_id))
    }

    /// `>`: deliver a message to one connection.
    pub fn socket_send(&self, worker_id: WorkerId, socket_id: &str, message: &str) {
        self.send_to(
            worker_id,
            ControllerMessage::Send {
                socket_id: socket_id.to_string(),
                message: message.to_string(),
            },
        );
    }

    /// `!`: ask the worker to destroy a connection.
    pub fn socket_disconnect(&self, worker_id: WorkerId, socket_id: &str) {
        self.send_to(
            worker_id,
            ControllerMessage::Destroy {
                socket_id: socket_id.to_string(),
            },
        );
    }

    /// `#` to every worker.
    pub fn channel_broadcast(&self, channel_id: &str, message: &str) {
        self.send_to_all(ControllerMessage::Broadcast {
            channel_id: channel_id.to_string(),
            message: message.to_string(),
        });
    }

    /// `#` to one worker.
    pub fn channel_send(&self, worker_id: WorkerId, channel_id: &str, message: &str) {
        self.send_to(
            worker_id,
            ControllerMessage::Broadcast {
                channel_id: channel_id.to_string(),
                message: message.to_string(),
            },
        );
    }

    pub fn channel_add(&self, worker_id: WorkerId, channel_id: &str, socket_id: &str) {
        self.send_to(
            worker_id,
            ControllerMessage::Join {
                channel_id: channel_id.to_string(),
                socket_id: socket_id.to_string(),
            },
        );
    }

    pub fn channel_remove(&self, worker_id: WorkerId, channel_id: &str, socket_id: &str) {
        self.send_to(
            worker_id,
            ControllerMessage::Leave {
                channel_id: channel_id.to_string(),
                socket_id: socket_id.to_string(),
            },
        );
    }

    /// `:` to every worker.
    pub fn subchannel_broadcast(&self, channel_id: &str, message: &str) {
        self.send_to_all(ControllerMessage::SubchannelBroadcast {
            channel_id: channel_id.to_string(),
            message: message.to_string(),
        });
    }

    pub fn subchannel_move(&self, worker_id: WorkerId, channel_id: &str, subchannel: Subchannel, socket_id: &str) {
        self.send_to(
            worker_id,
            ControllerMessage::Move {
                channel_id: channel_id.to_string(),
                subchannel,
                socket_id: socket_id.to_string(),
            },
        );
    }

    /// `$`: run a worker debug command (`stats`, `sweep`).
    pub fn eval(&self, worker_id: WorkerId, command: &str) {
        self.send_to(
            worker_id,
            ControllerMessage::Debug {
                command: command.to_string(),
            },
        );
    }

    /// Ids of all tracked workers, crashed ones included, in ascending order.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.workers.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of workers whose process has not exited.
    pub fn live_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|entry| !entry.value().has_exited())
            .count()
    }

    pub fn worker(&self, worker_id: WorkerId) -> Option<Arc<WorkerHandle>> {
        self.workers.get(&worker_id).map(|entry| entry.value().clone())
    }

    /// Connections the controller currently attributes to a worker.
    pub fn connection_count(&self, worker_id: WorkerId) -> usize {
        self.connections
            .get(&worker_id)
            .map(|sockets| sockets.len())
            .unwrap_or(0)
    }

    pub fn crash_reports(&self) -> Vec<CrashReport> {
        self.crash_reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn network_settings(&self) -> NetworkSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Stops the pool: no more respawns, every control channel is closed so
    /// workers exit on their own, and workers still running after `grace`
    /// are terminated.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        for entry in self.workers.iter() {
            entry.value().disconnect();
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.worker_exited.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.live_workers() == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        let remaining = self.live_workers();
        if remaining > 0 {
            warn!("{} worker(s) still running after {:?}, terminating", remaining, grace);
            for entry in self.workers.iter() {
                if !entry.value().has_exited() {
                    let _ = entry.value().terminate();
                }
            }
        }
        info!("✅ Worker pool stopped");
    }

    fn send_to(&self, worker_id: WorkerId, message: ControllerMessage) {
        if let Some(handle) = self.worker(worker_id) {
            handle.send(message.encode());
        }
    }

    fn send_to_all(&self, message: ControllerMessage) {
        let encoded = message.encode();
        for entry in self.workers.iter() {
            entry.value().send(encoded.clone());
        }
    }

    fn emit(&self, event: ControllerEvent) {
        if self.events.send(event).is_err() {
            debug!("Controller event dropped, nobody is listening");
        }
    }

    /// Removes a worker's connection attribution and reports each connection
    /// as disconnected. Returns the number of connections dropped.
    fn drop_connections(&self, worker_id: WorkerId) -> usize {
        let Some((_, sockets)) = self.connections.remove(&worker_id) else {
            return 0;
        };
        let count = sockets.len();
        for socket_id in sockets {
            self.emit(ControllerEvent::Disconnect { worker_id, socket_id });
        }
        count
    }

    async fn monitor(
        self: Arc<Self>,
        handle: Arc<WorkerHandle>,
        mut inbound: mpsc::UnboundedReceiver<String>,
        mut exit: oneshot::Receiver<WorkerExit>,
    ) {
        let worker_id = handle.id();
        let mut inbound_open = true;
        let status = loop {
            tokio::select! {
                biased;
                frame = inbound.recv(), if inbound_open => match frame {
                    Some(frame) => self.handle_frame(worker_id, &frame),
                    None => inbound_open = false,
                },
                status = &mut exit => break status.unwrap_or_default(),
            }
        };
        while let Ok(frame) = inbound.try_recv() {
            self.handle_frame(worker_id, &frame);
        }
        self.handle_exit(&handle, status);
    }

    fn handle_frame(&self, worker_id: WorkerId, frame: &str) {
        let message = match WorkerMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                debug!(worker_id, "Ignoring worker frame: {}", e);
                return;
            }
        };
        match message {
            WorkerMessage::Connect {
                socket_id,
                remote_ip,
                protocol,
            } => {
                self.connections
                    .entry(worker_id)
                    .or_default()
                    .insert(socket_id.clone());
                self.emit(ControllerEvent::Connect {
                    worker_id,
                    socket_id,
                    remote_ip,
                    protocol,
                });
            }
            WorkerMessage::Disconnect { socket_id } => {
                let attributed = self
                    .connections
                    .get_mut(&worker_id)
                    .is_some_and(|mut sockets| sockets.remove(&socket_id));
                // Already reported by kill_worker or never announced.
                if attributed {
                    self.emit(ControllerEvent::Disconnect { worker_id, socket_id });
                }
            }
            WorkerMessage::Receive { socket_id, message } => {
                self.emit(ControllerEvent::Receive {
                    worker_id,
                    socket_id,
                    message,
                });
            }
        }
    }

    fn handle_exit(self: &Arc<Self>, handle: &WorkerHandle, status: WorkerExit) {
        let worker_id = handle.id();
        let kind = status.kind();
        match kind {
            ExitKind::Killed => info!(worker_id, "Worker {} was forcibly killed with {}", worker_id, status),
            ExitKind::Clean => info!(worker_id, "Worker {} exited voluntarily", worker_id),
            ExitKind::Crashed => error!(
                target: "crashlog",
                worker_id,
                pid = ?handle.pid(),
                "Worker {} abnormally exited with {}",
                worker_id,
                status
            ),
        }

        if kind != ExitKind::Crashed {
            self.workers.remove(&worker_id);
        }
        handle.disconnect();
        handle.mark_exited();

        let lost = self.drop_connections(worker_id);
        if lost > 0 {
            info!(worker_id, "{} connections were lost", lost);
        }
        if kind == ExitKind::Crashed {
            self.crash_reports
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(CrashReport {
                    worker_id,
                    pid: handle.pid(),
                    exit: status,
                    lost_connections: lost,
                    at: SystemTime::now(),
                });
        }
        self.worker_exited.notify_waiters();

        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.spawn_worker() {
            error!(target: "crashlog", "Failed to spawn a replacement for worker {}: {}", worker_id, e);
        }
    }
}
