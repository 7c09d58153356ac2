//! Wraparound-ordered 16-bit sequence numbers.
//!
//! Both packet sequences and message ids live in the same numbering space:
//! a 16-bit counter compared with wraparound ("sequence-greater-than")
//! semantics rather than plain integer ordering, so a connection can run
//! forever without the counters ever "running out".

use core::cmp::Ordering;
use core::fmt;
use core::ops::{Add, Sub};

/// A 16-bit sequence number compared with wraparound semantics.
///
/// `a > b` iff `(a - b) as i16 > 0`, which is equivalent to the classic
/// `(a > b && a - b <= 32768) || (a < b && b - a > 32768)` formulation.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Seq(pub u16);

impl Seq {
    /// The zero sequence number.
    pub const ZERO: Self = Self(0);

    /// Creates a sequence number from a raw value.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Signed wraparound distance `self - rhs`.
    ///
    /// Positive means `self` is sequence-greater-than `rhs`.
    #[must_use]
    pub fn dist_to(self, rhs: Self) -> i16 {
        (self.0 as i16).wrapping_sub(rhs.0 as i16)
    }

    /// Returns the next sequence number, wrapping on overflow.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Debug for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for Seq {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Seq {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist_to(*other).cmp(&0)
    }
}

impl Add<u16> for Seq {
    type Output = Self;

    fn add(self, rhs: u16) -> Self {
        Self(self.0.wrapping_add(rhs))
    }
}

impl Sub<u16> for Seq {
    type Output = Self;

    fn sub(self, rhs: u16) -> Self {
        Self(self.0.wrapping_sub(rhs))
    }
}

impl Sub for Seq {
    type Output = i16;

    fn sub(self, rhs: Self) -> i16 {
        self.dist_to(rhs)
    }
}

impl From<u16> for Seq {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<Seq> for u16 {
    fn from(value: Seq) -> Self {
        value.0
    }
}

/// Returns true iff `a` is sequence-greater-than `b`.
#[must_use]
pub fn seq_greater_than(a: Seq, b: Seq) -> bool {
    a.dist_to(b) > 0
}
