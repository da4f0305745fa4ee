//! The transport-facing side of a client connection.
//!
//! The registry never touches a transport directly. Every accepted connection
//! is wrapped in something implementing [`ClientSocket`], which is all the
//! registry, broadcast engine and ghost sweeper need.

use std::sync::Arc;

/// Protocol name of the long-polling streaming transport, the only one that
/// can end up as a ghost connection.
///
/// The WebSocket adapter in [`crate::transport`] never reports this name, so
/// with it alone every sweep finds nothing. A streaming transport plugs into
/// the sweeper by reporting this protocol and overriding
/// [`ClientSocket::expire_stalled_receive`].
pub const STREAMING_PROTOCOL: &str = "xhr-streaming";

/// A live client connection as seen by the worker registry.
///
/// Writes and destroys are fire-and-forget: implementations queue the work
/// and return immediately, and must tolerate being called after the
/// underlying transport has already gone away.
pub trait ClientSocket: Send + Sync {
    /// Negotiated transport protocol name (e.g. `websocket`).
    fn protocol(&self) -> &str;

    /// Queues a message for delivery, verbatim.
    fn write(&self, message: &str);

    /// Closes the transport. The transport's close event still fires
    /// afterwards and goes through the normal teardown path.
    fn destroy(&self);

    /// Force-closes a receive session that stopped forwarding data without
    /// signalling closure. Returns `true` if such a session was expired.
    ///
    /// Only streaming transports have receive sessions; everything else keeps
    /// the default.
    fn expire_stalled_receive(&self) -> bool {
        false
    }
}

/// Shared, non-owning-in-spirit handle to a socket. The registry's socket map
/// is the one that decides the socket's lifetime; channel maps hold clones.
pub type SocketRef = Arc<dyn ClientSocket>;
