//! WebSocket transport adapter.
//!
//! Each accepted TCP stream is upgraded to a WebSocket and split into a
//! writer task, fed by the registry through [`WebSocketClient`], and a reader
//! loop that filters inbound text and forwards it upstream.

use crate::admission::{admit, preview, Admission};
use crate::error::WorkerError;
use crate::ipc::Upstream;
use crate::proxy::{resolve_client_ip, ProxyTrust};
use crate::registry::RegistryCommand;
use crate::socket::ClientSocket;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use switchboard_protocol::WorkerMessage;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, trace, warn};

pub const WEBSOCKET_PROTOCOL: &str = "websocket";

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Everything a connection task needs from the worker.
pub struct ConnectionContext {
    pub commands: mpsc::UnboundedSender<RegistryCommand>,
    pub upstream: Upstream,
    pub trust: Arc<dyn ProxyTrust>,
    pub max_message_bytes: usize,
}

enum Outbound {
    Text(String),
    Close,
}

/// Registry-side handle of a WebSocket connection.
pub struct WebSocketClient {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ClientSocket for WebSocketClient {
    fn protocol(&self) -> &str {
        WEBSOCKET_PROTOCOL
    }

    fn write(&self, message: &str) {
        let _ = self.outbound.send(Outbound::Text(message.to_string()));
    }

    fn destroy(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Serves one client connection until either side closes it.
///
/// The registry is told about the connection once the handshake succeeds and
/// about its end exactly once, however the connection ends.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ConnectionContext>,
) -> Result<(), WorkerError> {
    let mut forwarded_for = None;
    let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| {
        forwarded_for = request
            .headers()
            .get(FORWARDED_FOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Ok::<Response, ErrorResponse>(response)
    })
    .await?;

    let remote_ip = resolve_client_ip(&peer.ip().to_string(), forwarded_for.as_deref(), ctx.trust.as_ref());
    let (sink, mut incoming) = ws_stream.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let client = Arc::new(WebSocketClient {
        outbound: outbound_tx,
    });

    let (reply, assigned) = oneshot::channel();
    ctx.commands
        .send(RegistryCommand::Accept {
            socket: client,
            remote_ip: remote_ip.clone(),
            reply,
        })
        .map_err(|_| WorkerError::RegistryClosed)?;
    let socket_id = assigned.await.map_err(|_| WorkerError::RegistryClosed)?;
    debug!(socket_id = %socket_id, "Connection from {} ({})", remote_ip, peer);

    let mut writer = tokio::spawn(write_outbound(sink, outbound_rx));

    loop {
        tokio::select! {
            frame = incoming.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let text = text.as_str();
                    match admit(text, ctx.max_message_bytes) {
                        Admission::Accept => ctx.upstream.send(WorkerMessage::Receive {
                            socket_id: socket_id.clone(),
                            message: text.to_string(),
                        }),
                        Admission::Oversized => warn!(
                            socket_id = %socket_id,
                            "Dropping client message {} bytes long: {}",
                            text.len(),
                            preview(text)
                        ),
                        rejected => trace!(socket_id = %socket_id, "Dropping client message: {:?}", rejected),
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!(socket_id = %socket_id, "Dropping binary frame ({} bytes)", data.len());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(socket_id = %socket_id, "WebSocket error: {}", e);
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    writer.abort();
    let _ = ctx.commands.send(RegistryCommand::Closed {
        socket_id: socket_id.clone(),
    });
    debug!(socket_id = %socket_id, "Connection closed");
    Ok(())
}

async fn write_outbound(mut sink: WsSink, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Text(text) => {
                if sink.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::MAX_MESSAGE_BYTES;
    use crate::registry::Registry;
    use switchboard_protocol::ControllerMessage;
    use tokio::net::TcpListener;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;

    struct Harness {
        addr: SocketAddr,
        commands: mpsc::UnboundedSender<RegistryCommand>,
        upstream_rx: mpsc::UnboundedReceiver<String>,
    }

    async fn start() -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (upstream, upstream_rx) = Upstream::channel();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        tokio::spawn(Registry::new(upstream.clone()).run(commands_rx));

        let ctx = Arc::new(ConnectionContext {
            commands: commands.clone(),
            upstream,
            trust: Arc::new(|ip: &str| ip == "127.0.0.1"),
            max_message_bytes: MAX_MESSAGE_BYTES,
        });
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, peer, ctx.clone()));
            }
        });

        Harness {
            addr,
            commands,
            upstream_rx,
        }
    }

    #[test]
    fn test_websocket_client_is_never_a_ghost() {
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
        let client = WebSocketClient { outbound };

        assert_ne!(client.protocol(), crate::socket::STREAMING_PROTOCOL);
        assert!(!client.expire_stalled_receive());
        assert!(outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connection_lifecycle() {
        let mut harness = start().await;
        let mut request = format!("ws://{}", harness.addr).into_client_request().unwrap();
        request
            .headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 127.0.0.1"));
        let (mut client, _) = connect_async(request).await.unwrap();

        assert_eq!(harness.upstream_rx.recv().await.unwrap(), "*1\n1.2.3.4\nwebsocket");

        client.send(Message::text("{\"legacy\":true}")).await.unwrap();
        client.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
        client.send(Message::text("|/join lobby")).await.unwrap();
        assert_eq!(harness.upstream_rx.recv().await.unwrap(), "<1\n|/join lobby");

        harness
            .commands
            .send(RegistryCommand::Controller(ControllerMessage::Send {
                socket_id: "1".into(),
                message: "|init|chat".into(),
            }))
            .unwrap();
        match client.next().await {
            Some(Ok(Message::Text(text))) => assert_eq!(text.as_str(), "|init|chat"),
            other => panic!("unexpected frame: {:?}", other),
        }

        harness
            .commands
            .send(RegistryCommand::Controller(ControllerMessage::Destroy {
                socket_id: "1".into(),
            }))
            .unwrap();
        assert_eq!(harness.upstream_rx.recv().await.unwrap(), "!1");
    }

    #[tokio::test]
    async fn test_client_close_reports_disconnect() {
        let mut harness = start().await;
        let (mut client, _) = connect_async(format!("ws://{}", harness.addr)).await.unwrap();
        assert_eq!(harness.upstream_rx.recv().await.unwrap(), "*1\n127.0.0.1\nwebsocket");

        client.close(None).await.unwrap();
        assert_eq!(harness.upstream_rx.recv().await.unwrap(), "!1");
    }
}
