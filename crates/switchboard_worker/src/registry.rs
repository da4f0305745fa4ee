//! Per-worker connection registry.
//!
//! The registry owns every live socket of this worker process, the channel
//! memberships of those sockets and their subchannel labels. It is driven by a
//! single task ([`Registry::run`]) that applies [`RegistryCommand`]s one at a
//! time, so handlers always run to completion without interleaving and the
//! maps need no locking.
//!
//! Invariants:
//!
//! * a channel exists exactly while it has at least one member;
//! * a destroyed or closed socket appears in no channel and no subchannel map;
//! * a subchannel map never stores the default label.

use crate::debug::DebugCommand;
use crate::ipc::Upstream;
use crate::socket::{SocketRef, STREAMING_PROTOCOL};
use crate::split::SplitVariants;
use std::collections::HashMap;
use switchboard_protocol::{ChannelId, ControllerMessage, SocketId, Subchannel, WorkerMessage};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Work items for the registry task.
pub enum RegistryCommand {
    /// A decoded message from the controller.
    Controller(ControllerMessage),
    /// A transport accepted a connection; replies with the assigned id.
    Accept {
        socket: SocketRef,
        remote_ip: String,
        reply: oneshot::Sender<SocketId>,
    },
    /// A transport reported that a connection closed.
    Closed { socket_id: SocketId },
    /// Periodic ghost-connection sweep.
    SweepGhosts,
    /// The controller went away: destroy everything and stop.
    Shutdown,
}

/// Snapshot of registry sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub sockets: usize,
    pub channels: usize,
    pub subchannel_maps: usize,
}

pub struct Registry {
    sockets: HashMap<SocketId, SocketRef>,
    channels: HashMap<ChannelId, HashMap<SocketId, SocketRef>>,
    subchannels: HashMap<ChannelId, HashMap<SocketId, Subchannel>>,
    socket_counter: u64,
    upstream: Upstream,
}

impl Registry {
    pub fn new(upstream: Upstream) -> Self {
        Self {
            sockets: HashMap::new(),
            channels: HashMap::new(),
            subchannels: HashMap::new(),
            socket_counter: 0,
            upstream,
        }
    }

    /// Applies commands until shutdown is requested or every sender is gone.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<RegistryCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                RegistryCommand::Controller(message) => self.handle(message),
                RegistryCommand::Accept {
                    socket,
                    remote_ip,
                    reply,
                } => {
                    let socket_id = self.accept(socket, &remote_ip);
                    if reply.send(socket_id.clone()).is_err() {
                        // The connection task died before learning its id.
                        self.close(&socket_id);
                    }
                }
                RegistryCommand::Closed { socket_id } => self.close(&socket_id),
                RegistryCommand::SweepGhosts => {
                    self.sweep_ghosts();
                }
                RegistryCommand::Shutdown => break,
            }
        }
        self.shutdown();
    }

    /// Dispatches one controller message.
    pub fn handle(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::Destroy { socket_id } => self.destroy(&socket_id),
            ControllerMessage::Send { socket_id, message } => self.send(&socket_id, &message),
            ControllerMessage::Broadcast {
                channel_id,
                message,
            } => self.broadcast(&channel_id, &message),
            ControllerMessage::Join {
                channel_id,
                socket_id,
            } => self.join(&channel_id, &socket_id),
            ControllerMessage::Leave {
                channel_id,
                socket_id,
            } => self.leave(&channel_id, &socket_id),
            ControllerMessage::Move {
                channel_id,
                subchannel,
                socket_id,
            } => self.move_subchannel(&channel_id, subchannel, &socket_id),
            ControllerMessage::SubchannelBroadcast {
                channel_id,
                message,
            } => self.subchannel_broadcast(&channel_id, &message),
            ControllerMessage::Debug { command } => self.run_debug(&command),
        }
    }

    /// Registers a freshly accepted socket and announces it to the controller.
    pub fn accept(&mut self, socket: SocketRef, remote_ip: &str) -> SocketId {
        self.socket_counter += 1;
        let socket_id = self.socket_counter.to_string();
        let protocol = socket.protocol().to_string();
        self.sockets.insert(socket_id.clone(), socket);

        self.upstream.send(WorkerMessage::Connect {
            socket_id: socket_id.clone(),
            remote_ip: remote_ip.to_string(),
            protocol,
        });
        socket_id
    }

    /// Transport close event: tell the controller and forget the socket.
    pub fn close(&mut self, socket_id: &str) {
        self.upstream.send(WorkerMessage::Disconnect {
            socket_id: socket_id.to_string(),
        });
        self.sockets.remove(socket_id);
        self.purge_memberships(socket_id);
    }

    /// `!`: destroy a connection on the controller's request.
    pub fn destroy(&mut self, socket_id: &str) {
        let Some(socket) = self.sockets.remove(socket_id) else {
            trace!(socket_id, "destroy for unknown socket");
            return;
        };
        socket.destroy();
        self.purge_memberships(socket_id);
    }

    /// `>`: deliver to one connection.
    pub fn send(&self, socket_id: &str, message: &str) {
        if let Some(socket) = self.sockets.get(socket_id) {
            socket.write(message);
        }
    }

    /// `#`: deliver verbatim to every current member.
    pub fn broadcast(&self, channel_id: &str, message: &str) {
        let Some(members) = self.channels.get(channel_id) else {
            return;
        };
        for socket in members.values() {
            socket.write(message);
        }
    }

    /// `+`: add a known socket to a channel, creating the channel if needed.
    pub fn join(&mut self, channel_id: &str, socket_id: &str) {
        let Some(socket) = self.sockets.get(socket_id) else {
            trace!(socket_id, channel_id, "join for unknown socket");
            return;
        };
        self.channels
            .entry(channel_id.to_string())
            .or_default()
            .insert(socket_id.to_string(), socket.clone());
    }

    /// `-`: remove a socket from a channel and drop its subchannel label,
    /// deleting the channel once empty.
    pub fn leave(&mut self, channel_id: &str, socket_id: &str) {
        self.clear_label(channel_id, socket_id);

        let Some(members) = self.channels.get_mut(channel_id) else {
            return;
        };
        members.remove(socket_id);
        if members.is_empty() {
            self.channels.remove(channel_id);
            self.subchannels.remove(channel_id);
        }
    }

    /// `.`: set a socket's subchannel label; the default label clears it.
    pub fn move_subchannel(&mut self, channel_id: &str, subchannel: Subchannel, socket_id: &str) {
        if subchannel.is_default() {
            self.clear_label(channel_id, socket_id);
            return;
        }
        if !self.sockets.contains_key(socket_id) {
            trace!(socket_id, channel_id, "subchannel move for unknown socket");
            return;
        }
        self.subchannels
            .entry(channel_id.to_string())
            .or_default()
            .insert(socket_id.to_string(), subchannel);
    }

    fn clear_label(&mut self, channel_id: &str, socket_id: &str) {
        if let Some(labels) = self.subchannels.get_mut(channel_id) {
            labels.remove(socket_id);
            if labels.is_empty() {
                self.subchannels.remove(channel_id);
            }
        }
    }

    /// `:`: deliver each member the variant for its subchannel label.
    pub fn subchannel_broadcast(&self, channel_id: &str, message: &str) {
        let Some(members) = self.channels.get(channel_id) else {
            return;
        };
        let labels = self.subchannels.get(channel_id);
        let mut variants = SplitVariants::new(message);

        for (socket_id, socket) in members {
            let label = labels
                .and_then(|labels| labels.get(socket_id))
                .copied()
                .unwrap_or_default();
            socket.write(variants.get(label));
        }
    }

    /// Expires stalled receive sessions of streaming connections. The
    /// transport's close event then tears the socket down through
    /// [`Registry::close`]. Returns the number of ghosts found.
    pub fn sweep_ghosts(&self) -> usize {
        let mut ghosts = 0;
        for (socket_id, socket) in &self.sockets {
            if socket.protocol() == STREAMING_PROTOCOL && socket.expire_stalled_receive() {
                warn!(socket_id = %socket_id, "Found a ghost connection with protocol {}", STREAMING_PROTOCOL);
                ghosts += 1;
            }
        }
        if ghosts > 0 {
            info!("Ghost sweep expired {} connection(s)", ghosts);
        }
        ghosts
    }

    /// `$`: run a debug command from the fixed command set.
    pub fn run_debug(&self, command: &str) {
        match DebugCommand::parse(command) {
            Some(DebugCommand::Stats) => {
                let stats = self.stats();
                info!(
                    sockets = stats.sockets,
                    channels = stats.channels,
                    subchannel_maps = stats.subchannel_maps,
                    "Registry stats"
                );
            }
            Some(DebugCommand::Sweep) => {
                self.sweep_ghosts();
            }
            None => debug!("Ignoring unknown debug command: {:?}", command),
        }
    }

    /// Destroys every socket and clears all state.
    pub fn shutdown(&mut self) {
        let count = self.sockets.len();
        for socket in self.sockets.values() {
            socket.destroy();
        }
        self.sockets.clear();
        self.channels.clear();
        self.subchannels.clear();
        info!("Registry shut down, {} connection(s) destroyed", count);
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            sockets: self.sockets.len(),
            channels: self.channels.len(),
            subchannel_maps: self.subchannels.len(),
        }
    }

    pub fn contains_socket(&self, socket_id: &str) -> bool {
        self.sockets.contains_key(socket_id)
    }

    pub fn has_channel(&self, channel_id: &str) -> bool {
        self.channels.contains_key(channel_id)
    }

    pub fn is_member(&self, channel_id: &str, socket_id: &str) -> bool {
        self.channels
            .get(channel_id)
            .is_some_and(|members| members.contains_key(socket_id))
    }

    /// The label a member currently receives broadcasts for.
    pub fn subchannel_of(&self, channel_id: &str, socket_id: &str) -> Subchannel {
        self.subchannels
            .get(channel_id)
            .and_then(|labels| labels.get(socket_id))
            .copied()
            .unwrap_or_default()
    }

    /// Whether any subchannel map mentions `socket_id`.
    pub fn has_subchannel_entry(&self, socket_id: &str) -> bool {
        self.subchannels
            .values()
            .any(|labels| labels.contains_key(socket_id))
    }

    pub fn has_subchannel_map(&self, channel_id: &str) -> bool {
        self.subchannels.contains_key(channel_id)
    }

    fn purge_memberships(&mut self, socket_id: &str) {
        let mut emptied = Vec::new();
        for (channel_id, members) in self.channels.iter_mut() {
            if members.remove(socket_id).is_some() && members.is_empty() {
                emptied.push(channel_id.clone());
            }
        }
        for channel_id in emptied {
            self.channels.remove(&channel_id);
            self.subchannels.remove(&channel_id);
        }
        self.subchannels.retain(|_, labels| {
            labels.remove(socket_id);
            !labels.is_empty()
        });
    }
}
