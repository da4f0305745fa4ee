//! # Switchboard Protocol
//!
//! The line-oriented opcode protocol spoken between the controller process and
//! its socket worker processes.
//!
//! Every message is a single string. The first character is the opcode and the
//! rest of the string is a list of fields joined by `\n`. Only the first
//! `arity - 1` newlines are structural: the final field of every message is an
//! opaque payload and may itself contain newlines.
//!
//! ## Opcodes
//!
//! | Opcode | Direction | Fields |
//! |---|---|---|
//! | `*` | worker → controller | socketid, remoteip, protocol |
//! | `!` | both | socketid |
//! | `<` | worker → controller | socketid, message |
//! | `>` | controller → worker | socketid, message |
//! | `#` | controller → worker | channelid, message |
//! | `+` | controller → worker | channelid, socketid |
//! | `-` | controller → worker | channelid, socketid |
//! | `.` | controller → worker | channelid, subchannelid, socketid |
//! | `:` | controller → worker | channelid, message |
//! | `$` | controller → worker | debug command |
//!
//! Each direction has its own message type ([`WorkerMessage`] and
//! [`ControllerMessage`]), so a decoder never has to guess which side produced
//! a frame. Unknown opcodes decode to [`ProtocolError::UnknownOpcode`], which
//! receivers are expected to drop silently.
//!
//! This crate also carries the process-environment contract used when the
//! controller launches a worker (see [`WorkerEnv`]) and the pipe framing both
//! sides share (see [`framing`]).

pub mod env;
pub mod error;
pub mod framing;
pub mod message;
pub mod subchannel;

pub use env::WorkerEnv;
pub use error::ProtocolError;
pub use message::{opcode, ChannelId, ControllerMessage, SocketId, WorkerMessage};
pub use subchannel::Subchannel;
