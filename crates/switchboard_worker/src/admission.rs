//! Inbound client message admission.
//!
//! Client frames are filtered before they are forwarded to the controller.
//! Anything dropped here is considered probe or malformed traffic, not an
//! error: the connection stays open.

/// Largest inbound client message forwarded to the controller, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 100 * 1024;

/// How much of an oversized message is echoed into the log.
const PREVIEW_CHARS: usize = 160;

/// Verdict for one inbound client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Empty,
    Oversized,
    /// Legacy JSON framing (leading `{`).
    Legacy,
    /// No `|` delimiter, or the delimiter is the last character.
    Malformed,
}

impl Admission {
    pub fn is_accepted(self) -> bool {
        self == Admission::Accept
    }
}

pub fn admit(message: &str, max_bytes: usize) -> Admission {
    if message.is_empty() {
        return Admission::Empty;
    }
    if message.len() > max_bytes {
        return Admission::Oversized;
    }
    if message.starts_with('{') {
        return Admission::Legacy;
    }
    match message.find('|') {
        Some(pipe) if pipe + 1 < message.len() => Admission::Accept,
        _ => Admission::Malformed,
    }
}

/// A log-safe prefix of a message.
pub fn preview(message: &str) -> &str {
    match message.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => &message[..end],
        None => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_rules() {
        assert_eq!(admit("", MAX_MESSAGE_BYTES), Admission::Empty);
        assert_eq!(admit(&"a".repeat(200 * 1024), MAX_MESSAGE_BYTES), Admission::Oversized);
        assert_eq!(admit("{foo}", MAX_MESSAGE_BYTES), Admission::Legacy);
        assert_eq!(admit("nofence", MAX_MESSAGE_BYTES), Admission::Malformed);
        assert_eq!(admit("|", MAX_MESSAGE_BYTES), Admission::Malformed);
        assert_eq!(admit("a|b", MAX_MESSAGE_BYTES), Admission::Accept);
    }

    #[test]
    fn test_first_pipe_decides() {
        // Only the first delimiter is checked.
        assert_eq!(admit("lobby|", MAX_MESSAGE_BYTES), Admission::Malformed);
        assert_eq!(admit("|/join lobby", MAX_MESSAGE_BYTES), Admission::Accept);
        assert_eq!(admit("a||", MAX_MESSAGE_BYTES), Admission::Accept);
    }

    #[test]
    fn test_limit_is_inclusive() {
        let mut message = "|".to_string();
        message.push_str(&"x".repeat(MAX_MESSAGE_BYTES - 1));
        assert_eq!(admit(&message, MAX_MESSAGE_BYTES), Admission::Accept);
        message.push('x');
        assert_eq!(admit(&message, MAX_MESSAGE_BYTES), Admission::Oversized);
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let long = "é".repeat(500);
        assert_eq!(preview(&long).chars().count(), 160);
        assert_eq!(preview("short"), "short");
    }
}
