//! Debug commands carried by the `$` opcode.
//!
//! The worker interprets a fixed command set instead of evaluating code.
//! Only the controller can produce `$` frames; client input is never decoded
//! as a controller message.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCommand {
    /// Log socket, channel and subchannel counts.
    Stats,
    /// Run the ghost-connection sweep now.
    Sweep,
}

impl DebugCommand {
    pub fn parse(command: &str) -> Option<Self> {
        match command.trim() {
            "stats" => Some(DebugCommand::Stats),
            "sweep" => Some(DebugCommand::Sweep),
            _ => None,
        }
    }
}
