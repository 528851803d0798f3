//! Global transaction identifiers
//!
//! A GTID names one committed operation in the replica set's oplog. It is a
//! `(primary, seq)` pair: `primary` is bumped every time a new primary takes
//! over, `seq` counts operations written under that primary. Ordering is
//! lexicographic, so every pair of GTIDs is comparable.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Globally, totally ordered identifier of a committed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Gtid {
    /// Primary term that generated the operation
    pub primary: u64,
    /// Sequence number within the term
    pub seq: u64,
}

impl Gtid {
    /// The identifier that precedes every committed operation (empty oplog)
    pub const ZERO: Gtid = Gtid { primary: 0, seq: 0 };

    /// Create a GTID
    pub const fn new(primary: u64, seq: u64) -> Self {
        Self { primary, seq }
    }

    /// Whether this is the empty-oplog identifier
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

/// Three-way comparison of two GTIDs.
pub fn compare(a: &Gtid, b: &Gtid) -> Ordering {
    a.cmp(b)
}

impl fmt::Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.primary, self.seq)
    }
}

impl FromStr for Gtid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (primary, seq) = s
            .split_once(':')
            .ok_or_else(|| Error::invalid_record(format!("GTID '{}' is not primary:seq", s)))?;
        let primary = primary
            .trim()
            .parse::<u64>()
            .map_err(|e| Error::invalid_record(format!("GTID '{}': bad primary: {}", s, e)))?;
        let seq = seq
            .trim()
            .parse::<u64>()
            .map_err(|e| Error::invalid_record(format!("GTID '{}': bad seq: {}", s, e)))?;
        Ok(Self { primary, seq })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_primary_dominates_seq() {
        assert_eq!(
            compare(&Gtid::new(1, 900), &Gtid::new(2, 1)),
            Ordering::Less
        );
        assert_eq!(compare(&Gtid::new(3, 7), &Gtid::new(3, 7)), Ordering::Equal);
        assert_eq!(
            compare(&Gtid::new(3, 8), &Gtid::new(3, 7)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_zero() {
        assert!(Gtid::ZERO.is_zero());
        assert!(Gtid::default().is_zero());
        assert!(Gtid::ZERO < Gtid::new(0, 1));
    }

    #[test]
    fn test_parse_and_display() {
        let gtid: Gtid = "4:1021".parse().unwrap();
        assert_eq!(gtid, Gtid::new(4, 1021));
        assert_eq!(gtid.to_string(), "4:1021");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("41021".parse::<Gtid>().is_err());
        assert!("x:1".parse::<Gtid>().is_err());
        assert!("1:-2".parse::<Gtid>().is_err());
    }

    proptest! {
        #[test]
        fn prop_compare_is_antisymmetric(a in any::<(u64, u64)>(), b in any::<(u64, u64)>()) {
            let a = Gtid::new(a.0, a.1);
            let b = Gtid::new(b.0, b.1);
            prop_assert_eq!(compare(&a, &b), compare(&b, &a).reverse());
        }

        #[test]
        fn prop_compare_is_transitive(
            a in any::<(u8, u8)>(),
            b in any::<(u8, u8)>(),
            c in any::<(u8, u8)>(),
        ) {
            let a = Gtid::new(a.0 as u64, a.1 as u64);
            let b = Gtid::new(b.0 as u64, b.1 as u64);
            let c = Gtid::new(c.0 as u64, c.1 as u64);
            if compare(&a, &b) != Ordering::Greater && compare(&b, &c) != Ordering::Greater {
                prop_assert_ne!(compare(&a, &c), Ordering::Greater);
            }
        }
    }
}
