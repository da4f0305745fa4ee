//! The worker's end of the control pipe.

use crate::registry::RegistryCommand;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use switchboard_protocol::{framing, ControllerMessage, WorkerMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

/// Fire-and-forget sender of worker → controller messages.
///
/// Cloned into every connection task. Sends after the controller has gone
/// away are silently dropped.
#[derive(Clone, Debug)]
pub struct Upstream {
    tx: mpsc::UnboundedSender<String>,
}

impl Upstream {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, message: WorkerMessage) {
        let _ = self.tx.send(message.encode());
    }
}

/// Writes queued upstream messages to the controller, one frame each.
pub async fn write_frames<W>(output: W, mut messages: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    let mut frames = FramedWrite::new(output, framing::codec());
    while let Some(message) = messages.recv().await {
        if let Err(e) = frames.send(Bytes::from(message)).await {
            warn!("Control pipe write failed: {}", e);
            break;
        }
    }
}

/// Reads controller frames and hands decoded messages to the registry.
///
/// Returns when the controller closes the pipe, which is the signal for the
/// worker to shut down.
pub async fn read_frames<R>(input: R, commands: mpsc::UnboundedSender<RegistryCommand>)
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(input, framing::codec());
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Control pipe read failed: {}", e);
                break;
            }
        };
        let Ok(text) = std::str::from_utf8(&frame) else {
            debug!("Dropping non UTF-8 control frame ({} bytes)", frame.len());
            continue;
        };
        match ControllerMessage::decode(text) {
            Ok(message) => {
                if commands.send(RegistryCommand::Controller(message)).is_err() {
                    break;
                }
            }
            Err(e) => debug!("Ignoring control frame: {}", e),
        }
    }
}
