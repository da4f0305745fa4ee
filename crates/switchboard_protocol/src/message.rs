//! Protocol message types and their wire encoding.

use crate::error::ProtocolError;
use crate::subchannel::Subchannel;

/// Worker-local identifier of a client connection.
///
/// Socket ids are stringified counters assigned by the worker that accepted
/// the connection. They are only unique together with the worker id.
pub type SocketId = String;

/// Controller-assigned name of a channel. Opaque to the worker.
pub type ChannelId = String;

/// Opcode characters.
pub mod opcode {
    pub const CONNECT: char = '*';
    pub const DISCONNECT: char = '!';
    pub const RECEIVE: char = '<';
    pub const SEND: char = '>';
    pub const BROADCAST: char = '#';
    pub const JOIN: char = '+';
    pub const LEAVE: char = '-';
    pub const MOVE: char = '.';
    pub const SUBCHANNEL_BROADCAST: char = ':';
    pub const DEBUG: char = '$';
}

/// Messages a worker sends to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    /// `*socketid\nremoteip\nprotocol`: a connection was accepted.
    Connect {
        socket_id: SocketId,
        remote_ip: String,
        protocol: String,
    },
    /// `!socketid`: a connection closed.
    Disconnect { socket_id: SocketId },
    /// `<socketid\nmessage`: a client sent a message.
    Receive { socket_id: SocketId, message: String },
}

/// Messages the controller sends to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerMessage {
    /// `!socketid`: force-destroy a connection.
    Destroy { socket_id: SocketId },
    /// `>socketid\nmessage`: deliver to one connection.
    Send { socket_id: SocketId, message: String },
    /// `#channelid\nmessage`: deliver verbatim to every channel member.
    Broadcast { channel_id: ChannelId, message: String },
    /// `+channelid\nsocketid`: add a connection to a channel.
    Join { channel_id: ChannelId, socket_id: SocketId },
    /// `-channelid\nsocketid`: remove a connection from a channel.
    Leave { channel_id: ChannelId, socket_id: SocketId },
    /// `.channelid\nsubchannelid\nsocketid`: set or clear a subchannel label.
    Move {
        channel_id: ChannelId,
        subchannel: Subchannel,
        socket_id: SocketId,
    },
    /// `:channelid\nmessage`: subchannel-aware broadcast.
    SubchannelBroadcast { channel_id: ChannelId, message: String },
    /// `$command`: debug command, interpreted by the worker's fixed command set.
    Debug { command: String },
}

/// Splits a frame into its opcode and the remaining body.
fn split_opcode(raw: &str) -> Result<(char, &str), ProtocolError> {
    let opcode = raw.chars().next().ok_or(ProtocolError::Empty)?;
    Ok((opcode, &raw[opcode.len_utf8()..]))
}

/// Extracts exactly `N` fields from a body. Only the first `N - 1` newlines
/// are treated as separators; the last field keeps any newlines it contains.
fn fields<const N: usize>(opcode: char, body: &str) -> Result<[&str; N], ProtocolError> {
    let mut parts = body.splitn(N, '\n');
    let mut out = [""; N];
    for (index, slot) in out.iter_mut().enumerate() {
        *slot = parts
            .next()
            .ok_or(ProtocolError::MissingField { opcode, index })?;
    }
    Ok(out)
}

impl WorkerMessage {
    pub fn encode(&self) -> String {
        match self {
            WorkerMessage::Connect {
                socket_id,
                remote_ip,
                protocol,
            } => format!("{}{socket_id}\n{remote_ip}\n{protocol}", opcode::CONNECT),
            WorkerMessage::Disconnect { socket_id } => {
                format!("{}{socket_id}", opcode::DISCONNECT)
            }
            WorkerMessage::Receive { socket_id, message } => {
                format!("{}{socket_id}\n{message}", opcode::RECEIVE)
            }
        }
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let (op, body) = split_opcode(raw)?;
        match op {
            opcode::CONNECT => {
                let [socket_id, remote_ip, protocol] = fields::<3>(op, body)?;
                Ok(WorkerMessage::Connect {
                    socket_id: socket_id.to_owned(),
                    remote_ip: remote_ip.to_owned(),
                    protocol: protocol.to_owned(),
                })
            }
            opcode::DISCONNECT => Ok(WorkerMessage::Disconnect {
                socket_id: body.to_owned(),
            }),
            opcode::RECEIVE => {
                let [socket_id, message] = fields::<2>(op, body)?;
                Ok(WorkerMessage::Receive {
                    socket_id: socket_id.to_owned(),
                    message: message.to_owned(),
                })
            }
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }

    pub fn socket_id(&self) -> &str {
        match self {
            WorkerMessage::Connect { socket_id, .. }
            | WorkerMessage::Disconnect { socket_id }
            | WorkerMessage::Receive { socket_id, .. } => socket_id,
        }
    }
}

impl ControllerMessage {
    pub fn encode(&self) -> String {
        match self {
            ControllerMessage::Destroy { socket_id } => {
                format!("{}{socket_id}", opcode::DISCONNECT)
            }
            ControllerMessage::Send { socket_id, message } => {
                format!("{}{socket_id}\n{message}", opcode::SEND)
            }
            ControllerMessage::Broadcast {
                channel_id,
                message,
            } => format!("{}{channel_id}\n{message}", opcode::BROADCAST),
            ControllerMessage::Join {
                channel_id,
                socket_id,
            } => format!("{}{channel_id}\n{socket_id}", opcode::JOIN),
            ControllerMessage::Leave {
                channel_id,
                socket_id,
            } => format!("{}{channel_id}\n{socket_id}", opcode::LEAVE),
            ControllerMessage::Move {
                channel_id,
                subchannel,
                socket_id,
            } => format!("{}{channel_id}\n{subchannel}\n{socket_id}", opcode::MOVE),
            ControllerMessage::SubchannelBroadcast {
                channel_id,
                message,
            } => format!("{}{channel_id}\n{message}", opcode::SUBCHANNEL_BROADCAST),
            ControllerMessage::Debug { command } => format!("{}{command}", opcode::DEBUG),
        }
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let (op, body) = split_opcode(raw)?;
        match op {
            opcode::DISCONNECT => Ok(ControllerMessage::Destroy {
                socket_id: body.to_owned(),
            }),
            opcode::SEND => {
                let [socket_id, message] = fields::<2>(op, body)?;
                Ok(ControllerMessage::Send {
                    socket_id: socket_id.to_owned(),
                    message: message.to_owned(),
                })
            }
            opcode::BROADCAST => {
                let [channel_id, message] = fields::<2>(op, body)?;
                Ok(ControllerMessage::Broadcast {
                    channel_id: channel_id.to_owned(),
                    message: message.to_owned(),
                })
            }
            opcode::JOIN => {
                let [channel_id, socket_id] = fields::<2>(op, body)?;
                Ok(ControllerMessage::Join {
                    channel_id: channel_id.to_owned(),
                    socket_id: socket_id.to_owned(),
                })
            }
            opcode::LEAVE => {
                let [channel_id, socket_id] = fields::<2>(op, body)?;
                Ok(ControllerMessage::Leave {
                    channel_id: channel_id.to_owned(),
                    socket_id: socket_id.to_owned(),
                })
            }
            opcode::MOVE => {
                let [channel_id, label, socket_id] = fields::<3>(op, body)?;
                Ok(ControllerMessage::Move {
                    channel_id: channel_id.to_owned(),
                    subchannel: Subchannel::from_label(label),
                    socket_id: socket_id.to_owned(),
                })
            }
            opcode::SUBCHANNEL_BROADCAST => {
                let [channel_id, message] = fields::<2>(op, body)?;
                Ok(ControllerMessage::SubchannelBroadcast {
                    channel_id: channel_id.to_owned(),
                    message: message.to_owned(),
                })
            }
            opcode::DEBUG => Ok(ControllerMessage::Debug {
                command: body.to_owned(),
            }),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}
