//! Frame boundaries for protocol messages on a process pipe.
//!
//! Each protocol string travels as one length-delimited frame, so payload
//! newlines never need escaping. The frame body is exactly the encoded message.

use tokio_util::codec::LengthDelimitedCodec;

/// Largest frame either side will accept. Channel broadcasts carry whole
/// battle logs, so this is well above the client-facing message limit.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}
