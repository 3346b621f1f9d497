use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// A PostgreSQL log sequence number: a pair of 32-bit hex integers, `"HHHH/HHHH"`.
///
/// Total order is lexicographic on `(high, low)`. `Lsn::ZERO` ("0/0") is the
/// sentinel meaning "before any data" and is what a cold-started state store
/// reports as the confirmed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn {
    high: u32,
    low: u32,
}

// Serialized as the `"HHHH/HHHH"` wire form rather than the `{high, low}`
// struct shape, matching how LSNs appear in stored/transmitted change data.
impl Serialize for Lsn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.format())
    }
}

impl<'de> Deserialize<'de> for Lsn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Lsn::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl Lsn {
    pub const ZERO: Lsn = Lsn { high: 0, low: 0 };

    pub fn new(high: u32, low: u32) -> Self {
        Self { high, low }
    }

    /// Parse `"HHHH/HHHH"` into an `Lsn`. Fails with `MalformedLsn` unless the
    /// input matches `^[0-9a-fA-F]+/[0-9a-fA-F]+$`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| Error::MalformedLsn(s.to_string()))?;
        if hi.is_empty() || lo.is_empty() {
            return Err(Error::MalformedLsn(s.to_string()));
        }
        let high = u32::from_str_radix(hi, 16).map_err(|_| Error::MalformedLsn(s.to_string()))?;
        let low = u32::from_str_radix(lo, 16).map_err(|_| Error::MalformedLsn(s.to_string()))?;
        Ok(Lsn { high, low })
    }

    pub fn format(&self) -> String {
        format!("{:X}/{:X}", self.high, self.low)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

impl FromStr for Lsn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Lsn::parse(s)
    }
}

impl Default for Lsn {
    fn default() -> Self {
        Lsn::ZERO
    }
}

/// `-1 | 0 | 1`, matching the distilled contract's `compareLSN`. Exists
/// alongside `Ord` for call sites that want the explicit three-way form.
pub fn compare_lsn(a: &Lsn, b: &Lsn) -> i32 {
    match a.cmp(b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_lsn() {
        let lsn = Lsn::parse("0/10A").unwrap();
        assert_eq!(lsn, Lsn::new(0, 0x10A));
    }

    #[test]
    fn rejects_malformed_lsn() {
        assert!(Lsn::parse("not-an-lsn").is_err());
        assert!(Lsn::parse("0/").is_err());
        assert!(Lsn::parse("/0").is_err());
        assert!(Lsn::parse("zz/zz").is_err()); // 'z' is not a hex digit
        assert!(Lsn::parse("ff/ff").is_ok());
        assert!(Lsn::parse("zg/0").is_err());
    }

    #[test]
    fn zero_is_sentinel() {
        assert_eq!(Lsn::parse("0/0").unwrap(), Lsn::ZERO);
    }

    #[test]
    fn roundtrips_through_format() {
        for s in ["0/0", "0/10A", "FFFFFFFF/FFFFFFFF", "1/0"] {
            let lsn = Lsn::parse(s).unwrap();
            let reparsed = Lsn::parse(&lsn.format()).unwrap();
            assert_eq!(lsn, reparsed);
        }
    }

    #[test]
    fn orders_lexicographically_on_high_then_low() {
        assert!(Lsn::new(0, 100) < Lsn::new(0, 200));
        assert!(Lsn::new(0, 200) < Lsn::new(1, 0));
        assert!(Lsn::new(1, 0) > Lsn::new(0, 0xFFFFFFFF));
        assert_eq!(compare_lsn(&Lsn::new(5, 5), &Lsn::new(5, 5)), 0);
        assert_eq!(compare_lsn(&Lsn::new(5, 4), &Lsn::new(5, 5)), -1);
        assert_eq!(compare_lsn(&Lsn::new(5, 6), &Lsn::new(5, 5)), 1);
    }
}
