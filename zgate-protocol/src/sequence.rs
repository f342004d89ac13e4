//! Control Packet Sequence Numbers
//!
//! Control packets carry a 16-bit sequence number that wraps around. The
//! counter is seeded with a random non-zero value and advances by one for
//! every control packet sent.

use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;

/// Control packet sequence number with 16-bit wraparound semantics
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct ControlSeq(u16);

impl ControlSeq {
    /// Create a sequence number from its raw value
    #[inline]
    pub const fn new(value: u16) -> Self {
        ControlSeq(value)
    }

    /// Draw a random non-zero initial sequence number
    ///
    /// Falls back to 1 if the system random source is unavailable.
    pub fn random() -> Self {
        let rng = SystemRandom::new();
        let mut buf = [0u8; 2];
        for _ in 0..4 {
            if rng.fill(&mut buf).is_err() {
                break;
            }
            let value = u16::from_be_bytes(buf);
            if value != 0 {
                return ControlSeq(value);
            }
        }
        ControlSeq(1)
    }

    /// Get the raw sequence number value
    #[inline]
    pub fn as_raw(self) -> u16 {
        self.0
    }

    /// Increment the sequence number by 1
    #[inline]
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Get the next sequence number
    #[inline]
    pub fn next(self) -> Self {
        ControlSeq(self.0.wrapping_add(1))
    }

    /// Return the current value and advance the counter
    #[inline]
    pub fn take_next(&mut self) -> Self {
        let current = *self;
        self.increment();
        current
    }

    /// Signed distance from this sequence number to another
    ///
    /// Positive values mean `other` is ahead of `self`.
    pub fn distance_to(self, other: ControlSeq) -> i16 {
        other.0.wrapping_sub(self.0) as i16
    }

    /// Check if this sequence number is before another (accounting for wraparound)
    #[inline]
    pub fn lt(self, other: ControlSeq) -> bool {
        self.distance_to(other) > 0
    }
}

impl fmt::Debug for ControlSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ControlSeq({})", self.0)
    }
}

impl fmt::Display for ControlSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for ControlSeq {
    fn from(value: u16) -> Self {
        ControlSeq(value)
    }
}
