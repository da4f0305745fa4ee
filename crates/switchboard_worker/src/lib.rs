//! # Switchboard Worker
//!
//! The socket worker process. A worker owns a share of the client
//! connections: it accepts them on the shared listening port, announces them
//! to the controller, forwards their messages upstream and executes the
//! controller's delivery instructions.
//!
//! ## Layout
//!
//! * [`registry`] - sockets, channels and subchannels, driven by one task
//! * [`split`] - per-subchannel specialization of split broadcasts
//! * [`transport`] - the WebSocket adapter
//! * [`admission`] and [`proxy`] - inbound filtering and client addressing
//! * [`ipc`] - framing of the control pipe on stdin and stdout
//! * [`runtime`] - wiring all of the above into a running worker
//!
//! Stdout carries the control pipe, so workers must log to stderr.

pub mod admission;
pub mod debug;
pub mod error;
pub mod ipc;
pub mod listener;
pub mod proxy;
pub mod registry;
pub mod runtime;
pub mod socket;
pub mod split;
pub mod sweeper;
pub mod transport;

pub use error::WorkerError;
pub use proxy::{resolve_client_ip, ProxyTrust, TrustedProxies};
pub use registry::{Registry, RegistryCommand, RegistryStats};
pub use runtime::{run_worker, run_worker_with_io, serve, WorkerSettings};
pub use socket::{ClientSocket, SocketRef};
