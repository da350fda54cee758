//! Simulated-time unit: one tick is 100 ns.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// A count of 100 ns simulation ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Ticks(pub u64);

impl Ticks {
    pub const ZERO: Ticks = Ticks(0);

    /// Ticks elapsed by one executed micro-op (16 ticks = 1.6 us).
    pub const PER_MICRO_OP: Ticks = Ticks(16);

    #[must_use]
    pub fn from_ns(ns: u64) -> Self {
        Ticks(ns / 100)
    }

    #[must_use]
    pub fn as_ns(self) -> u64 {
        self.0 * 100
    }

    #[must_use]
    pub fn saturating_sub(self, rhs: Ticks) -> Ticks {
        Ticks(self.0.saturating_sub(rhs.0))
    }
}

impl Add for Ticks {
    type Output = Ticks;
    fn add(self, rhs: Ticks) -> Ticks {
        Ticks(self.0 + rhs.0)
    }
}

impl AddAssign for Ticks {
    fn add_assign(&mut self, rhs: Ticks) {
        self.0 += rhs.0;
    }
}

impl Sub for Ticks {
    type Output = Ticks;
    fn sub(self, rhs: Ticks) -> Ticks {
        Ticks(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}t", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_ns_truncates_to_100ns_units() {
        assert_eq!(Ticks::from_ns(250), Ticks(2));
        assert_eq!(Ticks::from_ns(400_000_000), Ticks(4_000_000));
    }

    #[test]
    fn saturating_sub_never_underflows() {
        assert_eq!(Ticks(3).saturating_sub(Ticks(10)), Ticks(0));
    }
}
