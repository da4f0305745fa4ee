//! Reference controller.
//!
//! Application logic lives outside this crate. `Lobby` is the smallest
//! controller that exercises the supervisor end to end: every new connection
//! joins the `lobby` channel and every admitted client message is relayed to
//! the whole channel.

use std::sync::Arc;
use switchboard_supervisor::{ControllerEvent, Supervisor};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const LOBBY_CHANNEL: &str = "lobby";

pub struct Lobby {
    supervisor: Arc<Supervisor>,
}

impl Lobby {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }

    pub fn handle(&self, event: ControllerEvent) {
        match event {
            ControllerEvent::Connect {
                worker_id,
                socket_id,
                remote_ip,
                protocol,
            } => {
                info!(worker_id, socket_id = %socket_id, "👋 Connection from {} over {}", remote_ip, protocol);
                self.supervisor.channel_add(worker_id, LOBBY_CHANNEL, &socket_id);
            }
            ControllerEvent::Disconnect { worker_id, socket_id } => {
                info!(worker_id, socket_id = %socket_id, "👋 Connection closed");
            }
            ControllerEvent::Receive {
                worker_id,
                socket_id,
                message,
            } => {
                debug!(worker_id, socket_id = %socket_id, "Relaying {} bytes", message.len());
                self.supervisor.channel_broadcast(LOBBY_CHANNEL, &message);
            }
        }
    }

    /// Handles events until the supervisor is dropped.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<ControllerEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
    }
}
