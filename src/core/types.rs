//! Shared identifier and deadline types

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::accuracy::as_end_time;

/// A point in simulated time that may be unbounded
///
/// `Never` sorts after every finite deadline.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Deadline {
    At(Decimal),
    #[default]
    Never,
}

impl Deadline {
    pub fn at(time: Decimal) -> Self {
        Deadline::At(time)
    }

    /// Finite value, if any
    pub fn time(&self) -> Option<Decimal> {
        match self {
            Deadline::At(t) => Some(*t),
            Deadline::Never => None,
        }
    }

    /// End-time form of the deadline. Unbounded deadlines are unchanged.
    pub fn as_end_time(&self) -> Self {
        match self {
            Deadline::At(t) => Deadline::At(as_end_time(*t)),
            Deadline::Never => Deadline::Never,
        }
    }

    /// True if `time` is at or before this deadline
    pub fn admits(&self, time: Decimal) -> bool {
        match self {
            Deadline::At(t) => time <= *t,
            Deadline::Never => true,
        }
    }

    /// True if this deadline lies strictly before `time`
    pub fn has_elapsed(&self, time: Decimal) -> bool {
        !self.admits(time)
    }
}

impl From<Decimal> for Deadline {
    fn from(time: Decimal) -> Self {
        Deadline::At(time)
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deadline::At(t) => write!(f, "{}", t),
            Deadline::Never => write!(f, "inf"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_sorts_after_finite() {
        let finite = Deadline::At(Decimal::from(1_000_000));
        assert!(finite < Deadline::Never);
        assert!(Deadline::At(Decimal::ONE) < finite);
    }

    #[test]
    fn test_deadline_admits() {
        let d = Deadline::At(Decimal::from(5));
        assert!(d.admits(Decimal::from(5)));
        assert!(!d.admits(Decimal::from(6)));
        assert!(Deadline::Never.admits(Decimal::MAX));
        assert!(d.has_elapsed(Decimal::from(6)));
    }

    #[test]
    fn test_unbounded_end_time_is_identity() {
        assert_eq!(Deadline::Never.as_end_time(), Deadline::Never);
        assert_eq!(
            Deadline::At(Decimal::from(3)).as_end_time().time(),
            Some(Decimal::new(29995, 4))
        );
    }
}
