//! Shared listening socket.
//!
//! Every worker binds the same address. With `SO_REUSEPORT` the kernel
//! spreads incoming connections across the worker processes, which is how the
//! listening port ends up shared without a master-side accept loop.

use crate::error::WorkerError;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Parses `bind_address` and `port` into a socket address.
pub fn resolve_bind_address(bind_address: &str, port: u16) -> Result<SocketAddr, WorkerError> {
    let ip = bind_address
        .parse::<std::net::IpAddr>()
        .map_err(|_| WorkerError::InvalidBindAddress(bind_address.to_string()))?;
    Ok(SocketAddr::new(ip, port))
}

/// Binds a non-blocking listener that other worker processes can bind too.
///
/// # Arguments
///
/// * `addr` - Address every worker listens on
///
/// # Returns
///
/// A tokio listener, or `WorkerError::Network` if any socket step fails.
pub fn bind_shared_listener(addr: SocketAddr) -> Result<TcpListener, WorkerError> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| WorkerError::Network(format!("Socket creation failed: {e}")))?;
    socket.set_reuse_address(true).ok();
    enable_reuse_port(&socket);

    socket
        .bind(&addr.into())
        .map_err(|e| WorkerError::Network(format!("Bind failed on {addr}: {e}")))?;
    socket
        .listen(1024)
        .map_err(|e| WorkerError::Network(format!("Listen failed: {e}")))?;

    let std_listener: StdTcpListener = socket.into();
    std_listener
        .set_nonblocking(true)
        .map_err(|e| WorkerError::Network(format!("Non-blocking mode failed: {e}")))?;

    TcpListener::from_std(std_listener)
        .map_err(|e| WorkerError::Network(format!("Tokio listener creation failed: {e}")))
}

#[cfg(unix)]
fn enable_reuse_port(socket: &Socket) {
    use std::os::fd::AsRawFd;

    let optval: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of_val(&optval) as libc::socklen_t,
        )
    };
    if ret != 0 {
        warn!("Failed to set SO_REUSEPORT: {}", std::io::Error::last_os_error());
    } else {
        debug!("SO_REUSEPORT enabled");
    }
}

#[cfg(not(unix))]
fn enable_reuse_port(_socket: &Socket) {
    warn!("SO_REUSEPORT is not supported on this platform, workers cannot share a port");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_bind_address() {
        let addr = resolve_bind_address("127.0.0.1", 8000).unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:8000");
        assert!(matches!(
            resolve_bind_address("localhost", 8000),
            Err(WorkerError::InvalidBindAddress(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_two_listeners_share_a_port() {
        let first = bind_shared_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        let second = bind_shared_listener(addr).unwrap();
        assert_eq!(second.local_addr().unwrap(), addr);
    }
}
