use std::fmt;

/// Maps an identity (node `host:port` or a key) to its 128-bit ring position.
///
/// The MD5 digest is read as an unsigned big-endian integer, so the textual
/// hex form of the position is the hex digest itself minus leading zeros.
pub fn hash(id: &str) -> u128 {
    u128::from_be_bytes(md5::compute(id.as_bytes()).0)
}

/// Circular membership test over the inclusive interval `[start, end]`.
///
/// When `start > end` the interval wraps past the top of the ring.
pub fn in_range(h: u128, start: u128, end: u128) -> bool {
    if start <= end {
        start <= h && h <= end
    } else {
        h >= start || h <= end
    }
}

/// An inclusive, possibly wrapping slice of the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyRange {
    pub start: u128,
    pub end: u128,
}

impl KeyRange {
    pub fn new(start: u128, end: u128) -> Self {
        Self { start, end }
    }

    /// The whole circle.
    pub fn full() -> Self {
        Self {
            start: 0,
            end: u128::MAX,
        }
    }

    pub fn contains(&self, h: u128) -> bool {
        in_range(h, self.start, self.end)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.contains(hash(key))
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x},{:x}", self.start, self.end)
    }
}
