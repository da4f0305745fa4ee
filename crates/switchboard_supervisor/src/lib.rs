//! # Switchboard Supervisor
//!
//! Controller-side management of the socket worker pool.
//!
//! The controller never talks to client connections directly. It starts a
//! pool of workers with [`Supervisor::listen`], receives their connection
//! events as [`ControllerEvent`]s and routes messages back through the
//! encoder methods of [`Supervisor`] (`socket_send`, `channel_broadcast`,
//! `subchannel_move` and friends), addressed by worker id and socket id.
//!
//! Workers that exit are reconciled and replaced automatically; see
//! [`supervisor`] for the exit state machine.

pub mod error;
pub mod exit;
pub mod launcher;
pub mod memory;
pub mod settings;
pub mod supervisor;
pub mod worker;

pub use error::SupervisorError;
pub use exit::{ExitKind, WorkerExit};
pub use launcher::{ProcessLauncher, WorkerLauncher, WorkerProcess};
pub use memory::{MemoryLauncher, MemoryWorker};
pub use settings::{ListenOptions, NetworkSettings};
pub use supervisor::{ControllerEvent, CrashReport, Supervisor};
pub use worker::{WorkerHandle, WorkerId};
