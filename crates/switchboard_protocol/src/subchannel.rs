//! Subchannel labels.

use std::fmt;

/// Per-socket label within a channel, selecting which variant of a split
/// broadcast the socket receives.
///
/// On the wire labels are the strings `"0"`, `"1"` and `"2"`. Any label other
/// than `"1"` or `"2"` is read as the default label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Subchannel {
    #[default]
    Default,
    One,
    Two,
}

impl Subchannel {
    /// All labels, ordered by their position in a split block.
    pub const ALL: [Subchannel; 3] = [Subchannel::Default, Subchannel::One, Subchannel::Two];

    pub fn from_label(label: &str) -> Self {
        match label {
            "1" => Subchannel::One,
            "2" => Subchannel::Two,
            _ => Subchannel::Default,
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            Subchannel::Default => "0",
            Subchannel::One => "1",
            Subchannel::Two => "2",
        }
    }

    /// Position of this label's alternative line inside a split block.
    pub fn index(self) -> usize {
        match self {
            Subchannel::Default => 0,
            Subchannel::One => 1,
            Subchannel::Two => 2,
        }
    }

    pub fn is_default(self) -> bool {
        self == Subchannel::Default
    }
}

impl fmt::Display for Subchannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}
