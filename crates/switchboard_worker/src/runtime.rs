//! Worker process main loop.

use crate::admission::MAX_MESSAGE_BYTES;
use crate::error::WorkerError;
use crate::ipc::{read_frames, write_frames, Upstream};
use crate::listener::{bind_shared_listener, resolve_bind_address};
use crate::proxy::TrustedProxies;
use crate::registry::{Registry, RegistryCommand};
use crate::sweeper::{spawn_ghost_sweeper, GHOST_SWEEP_INTERVAL};
use crate::transport::{handle_connection, ConnectionContext};
use std::sync::Arc;
use std::time::Duration;
use switchboard_protocol::WorkerEnv;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Worker tunables that do not travel through the launch environment.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub max_message_bytes: usize,
    pub ghost_sweep_interval: Duration,
    pub trusted_proxies: TrustedProxies,
    /// Port of the encrypted listener, if one is configured.
    pub tls_port: Option<u16>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_message_bytes: MAX_MESSAGE_BYTES,
            ghost_sweep_interval: GHOST_SWEEP_INTERVAL,
            trusted_proxies: TrustedProxies::default(),
            tls_port: None,
        }
    }
}

/// Runs a worker over the process's stdin and stdout.
pub async fn run_worker(env: WorkerEnv, settings: WorkerSettings) -> Result<(), WorkerError> {
    run_worker_with_io(env, settings, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Binds the shared listener described by `env` and serves it.
pub async fn run_worker_with_io<R, W>(
    env: WorkerEnv,
    settings: WorkerSettings,
    input: R,
    output: W,
) -> Result<(), WorkerError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    if let Some(tls_port) = settings.tls_port {
        if !env.no_tls {
            warn!("Encrypted listener on port {} is not supported, serving plain connections only", tls_port);
        }
    }

    let addr = resolve_bind_address(&env.bind_address, env.port)?;
    let listener = bind_shared_listener(addr)?;
    info!("👷 Worker {} listening on {}", env.worker_id, addr);

    serve(env.worker_id, listener, settings, input, output).await
}

/// Serves client connections until the controller closes the control pipe.
///
/// # Returns
///
/// `Ok(())` after a controller disconnect, or the error that stopped the
/// accept loop.
pub async fn serve<R, W>(
    worker_id: u32,
    listener: TcpListener,
    settings: WorkerSettings,
    input: R,
    output: W,
) -> Result<(), WorkerError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (upstream, upstream_rx) = Upstream::channel();
    let writer = tokio::spawn(write_frames(output, upstream_rx));

    let (commands, commands_rx) = mpsc::unbounded_channel();
    let registry = tokio::spawn(Registry::new(upstream.clone()).run(commands_rx));
    let sweeper = spawn_ghost_sweeper(settings.ghost_sweep_interval, commands.clone());

    let ctx = Arc::new(ConnectionContext {
        commands: commands.clone(),
        upstream,
        trust: Arc::new(settings.trusted_proxies),
        max_message_bytes: settings.max_message_bytes,
    });

    let result = tokio::select! {
        _ = read_frames(input, commands.clone()) => {
            info!("🔌 Controller disconnected, shutting down worker {}", worker_id);
            Ok(())
        }
        result = accept_loop(listener, ctx) => result,
    };

    sweeper.abort();
    let _ = commands.send(RegistryCommand::Shutdown);
    if registry.await.is_err() {
        warn!("Registry task ended abnormally");
    }
    writer.abort();
    result
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ConnectionContext>) -> Result<(), WorkerError> {
    loop {
        let (stream, peer) = listener.accept().await.map_err(|e| {
            error!("Failed to accept connection: {}", e);
            WorkerError::Network(format!("Accept failed: {e}"))
        })?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, ctx).await {
                debug!("Connection from {} failed: {}", peer, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use switchboard_protocol::framing;
    use tokio::io::duplex;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[tokio::test]
    async fn test_worker_relays_and_stops_on_controller_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (to_worker, worker_input) = duplex(64 * 1024);
        let (worker_output, from_worker) = duplex(64 * 1024);
        let worker = tokio::spawn(serve(1, listener, WorkerSettings::default(), worker_input, worker_output));

        let mut controller_tx = FramedWrite::new(to_worker, framing::codec());
        let mut controller_rx = FramedRead::new(from_worker, framing::codec());

        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        let frame = controller_rx.next().await.unwrap().unwrap();
        assert_eq!(&frame[..], b"*1\n127.0.0.1\nwebsocket");

        controller_tx.send(Bytes::from_static(b"+lobby\n1")).await.unwrap();
        controller_tx.send(Bytes::from_static(b"#lobby\n|hello")).await.unwrap();
        match client.next().await {
            Some(Ok(Message::Text(text))) => assert_eq!(text.as_str(), "|hello"),
            other => panic!("unexpected frame: {:?}", other),
        }

        drop(controller_tx);
        worker.await.unwrap().unwrap();

        // Shutdown destroys every client connection.
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    }
}
