//! Subchannel broadcast engine.
//!
//! A split message embeds per-subchannel alternatives behind a marker line:
//!
//! ```text
//! |move|p1a: Knight|Slash
//! |split|
//! |-damage|p2a: Golem|60/100
//! |-damage|p2a: Golem|148/247
//! |-damage|p2a: Golem|60/100
//! |turn|2
//! ```
//!
//! The three lines after `|split|` are the alternatives for labels `0`, `1`
//! and `2`. Delivering to label `L` replaces the marker line and all three
//! alternatives with alternative `L` alone.

use std::borrow::Cow;
use switchboard_protocol::Subchannel;

const SPLIT_MARKER: &str = "\n|split|\n";

/// Returns the variant of `message` that a member labelled `label` receives.
///
/// Messages without a split marker are returned untouched. When at least one
/// split block was rewritten, doubled newlines left behind by empty
/// alternatives are collapsed across the whole message.
pub fn specialize(message: &str, label: Subchannel) -> Cow<'_, str> {
    if !message.contains(SPLIT_MARKER) {
        return Cow::Borrowed(message);
    }

    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    let mut rewritten = false;

    while let Some(pos) = rest.find(SPLIT_MARKER) {
        let block = &rest[pos + SPLIT_MARKER.len()..];
        match split_block(block) {
            Some((alternatives, consumed)) => {
                out.push_str(&rest[..pos]);
                out.push('\n');
                out.push_str(alternatives[label.index()]);
                rest = &block[consumed..];
                rewritten = true;
            }
            None => {
                // Incomplete block: not a split, keep scanning past this newline.
                out.push_str(&rest[..=pos]);
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);

    if rewritten {
        Cow::Owned(out.replace("\n\n", "\n"))
    } else {
        Cow::Owned(out)
    }
}

/// Reads the three alternative lines at the start of `block`.
///
/// The first two lines must be newline-terminated; the last one runs to the
/// next newline (which is left in place) or to the end of the message.
/// Returns the alternatives and the number of bytes they span.
fn split_block(block: &str) -> Option<([&str; 3], usize)> {
    let mut alternatives = [""; 3];
    let mut offset = 0;

    for (index, slot) in alternatives.iter_mut().enumerate() {
        let remaining = &block[offset..];
        let line_end = remaining.find('\n');
        if index < 2 {
            let end = line_end?;
            *slot = &remaining[..end];
            offset += end + 1;
        } else {
            let end = line_end.unwrap_or(remaining.len());
            *slot = &remaining[..end];
            offset += end;
        }
    }

    Some((alternatives, offset))
}

/// Per-broadcast cache of the specialized variants.
///
/// Each label's variant is computed the first time a member with that label
/// is served and reused for every other member, so a broadcast costs at most
/// three rewrites whatever the channel size.
pub struct SplitVariants<'a> {
    message: &'a str,
    variants: [Option<Cow<'a, str>>; 3],
}

impl<'a> SplitVariants<'a> {
    pub fn new(message: &'a str) -> Self {
        Self {
            message,
            variants: [None, None, None],
        }
    }

    pub fn get(&mut self, label: Subchannel) -> &str {
        let message = self.message;
        self.variants[label.index()].get_or_insert_with(|| specialize(message, label))
    }

    /// Number of variants materialized so far.
    pub fn computed(&self) -> usize {
        self.variants.iter().filter(|v| v.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "A\n|split|\nZero\nOne\nTwo";

    #[test]
    fn test_each_label_gets_its_alternative() {
        assert_eq!(specialize(RAW, Subchannel::Default), "A\nZero");
        assert_eq!(specialize(RAW, Subchannel::One), "A\nOne");
        assert_eq!(specialize(RAW, Subchannel::Two), "A\nTwo");
    }

    #[test]
    fn test_unset_label_matches_default() {
        assert_eq!(
            specialize(RAW, Subchannel::default()),
            specialize(RAW, Subchannel::Default)
        );
    }

    #[test]
    fn test_no_marker_is_untouched() {
        let raw = "|c|user|hello\n\n|raw|<b>x</b>";
        let result = specialize(raw, Subchannel::Two);
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, raw);
    }

    #[test]
    fn test_trailing_content_is_kept() {
        let raw = "|move|a\n|split|\nsecret\npublic-one\npublic-two\n|turn|2";
        assert_eq!(specialize(raw, Subchannel::Default), "|move|a\nsecret\n|turn|2");
        assert_eq!(specialize(raw, Subchannel::Two), "|move|a\npublic-two\n|turn|2");
    }

    #[test]
    fn test_empty_alternative_collapses_newline() {
        let raw = "A\n|split|\n\nOne\nTwo\nB";
        assert_eq!(specialize(raw, Subchannel::Default), "A\nB");
        assert_eq!(specialize(raw, Subchannel::One), "A\nOne\nB");
    }

    #[test]
    fn test_multiple_blocks() {
        let raw = "A\n|split|\na0\na1\na2\n|split|\nb0\nb1\nb2\nC";
        assert_eq!(specialize(raw, Subchannel::One), "A\na1\nb1\nC");
        assert_eq!(specialize(raw, Subchannel::Two), "A\na2\nb2\nC");
    }

    #[test]
    fn test_incomplete_block_is_left_alone() {
        let raw = "A\n|split|\nonly-one";
        assert_eq!(specialize(raw, Subchannel::One), raw);
    }

    #[test]
    fn test_variants_are_cached() {
        let mut variants = SplitVariants::new(RAW);
        assert_eq!(variants.computed(), 0);
        for _ in 0..50 {
            assert_eq!(variants.get(Subchannel::One), "A\nOne");
        }
        assert_eq!(variants.computed(), 1);
        assert_eq!(variants.get(Subchannel::Default), "A\nZero");
        assert_eq!(variants.get(Subchannel::Two), "A\nTwo");
        assert_eq!(variants.computed(), 3);
    }
}
