// Spending clause algebra for bitcoin covenant contracts
// by LNP/BP Association (https://lnp-bp.org)
// Written in 2022-2023 by
//     Dr. Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the Apache-2.0 License
// along with this software.
// If not, see <https://opensource.org/licenses/Apache-2.0>.

//! Relative and absolute time locks used by clauses and transaction templates

use core::cmp::Ordering;
use core::fmt::{self, Display, Formatter};
use core::num::ParseIntError;
use core::str::FromStr;

pub const SEQ_NO_MAX_VALUE: u32 = 0xFFFFFFFF;
pub const SEQ_NO_CSV_DISABLE_MASK: u32 = 0x80000000;
pub const SEQ_NO_CSV_TYPE_MASK: u32 = 0x00400000;
pub const SEQ_NO_CSV_VALUE_MASK: u32 = 0x0000FFFF;
pub const LOCKTIME_THRESHOLD: u32 = 500000000;

#[derive(Debug, Clone, PartialEq, Eq, From, Display)]
#[display(doc_comments)]
pub enum ParseError {
    /// invalid number in time lock descriptor
    #[from]
    InvalidNumber(ParseIntError),

    /// block height `{0}` is too large for time lock
    InvalidHeight(u32),

    /// timestamp `{0}` is too small for time lock
    InvalidTimestamp(u32),

    /// time lock descriptor `{0}` is not recognized
    InvalidDescriptor(String),
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::InvalidNumber(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors combining two time locks which must be applied to the same
/// transaction.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum LockMergeError {
    /// absolute time locks {0} and {1} can't be combined since one of them is
    /// height-based and the other is time-based
    IncompatibleLockTime(LockTime, LockTime),

    /// relative time locks {0} and {1} can't be combined since one of them
    /// counts blocks and the other counts 512-second intervals
    IncompatibleSequence(RelativeLock, RelativeLock),
}

/// Relative time lock (`OP_CHECKSEQUENCEVERIFY`), measured either in blocks
/// or in 512-second intervals.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "lowercase")
)]
pub enum RelativeLock {
    /// Describes number of blocks for the timelock
    #[display("height({0})")]
    Height(u16),

    /// Describes number of 512-second intervals for the timelock
    #[display("time({0})")]
    Time(u16),
}

impl RelativeLock {
    /// Constructs relative time lock from a `nSeq` consensus value. Returns
    /// `None` if the value has relative time locks disabled.
    pub fn from_sequence(seq: u32) -> Option<Self> {
        if seq & SEQ_NO_CSV_DISABLE_MASK != 0 {
            None
        } else if seq & SEQ_NO_CSV_TYPE_MASK != 0 {
            Some(RelativeLock::Time((seq & SEQ_NO_CSV_VALUE_MASK) as u16))
        } else {
            Some(RelativeLock::Height((seq & SEQ_NO_CSV_VALUE_MASK) as u16))
        }
    }

    /// Encodes the lock as a `nSeq` value, which is also the number pushed
    /// before `OP_CHECKSEQUENCEVERIFY`.
    #[inline]
    pub fn to_sequence(self) -> u32 {
        match self {
            RelativeLock::Height(blocks) => blocks as u32,
            RelativeLock::Time(intervals) => intervals as u32 | SEQ_NO_CSV_TYPE_MASK,
        }
    }

    #[inline]
    pub fn is_height_based(self) -> bool { matches!(self, RelativeLock::Height(_)) }

    /// Checks whether an input with the given `nSeq` in a transaction of the
    /// given version matures this lock.
    pub fn is_satisfied_by(self, sequence: u32, tx_version: i32) -> bool {
        if tx_version < 2 {
            return false;
        }
        match (RelativeLock::from_sequence(sequence), self) {
            (Some(RelativeLock::Height(have)), RelativeLock::Height(need)) => have >= need,
            (Some(RelativeLock::Time(have)), RelativeLock::Time(need)) => have >= need,
            _ => false,
        }
    }

    /// Combines two locks applied to the same input, keeping the longer one.
    pub fn merge(self, other: RelativeLock) -> Result<RelativeLock, LockMergeError> {
        match (self, other) {
            (RelativeLock::Height(a), RelativeLock::Height(b)) => Ok(RelativeLock::Height(a.max(b))),
            (RelativeLock::Time(a), RelativeLock::Time(b)) => Ok(RelativeLock::Time(a.max(b))),
            _ => Err(LockMergeError::IncompatibleSequence(self, other)),
        }
    }
}

impl FromStr for RelativeLock {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_lowercase();
        if s.starts_with("height(") && s.ends_with(')') {
            let no = s[7..].trim_end_matches(')').parse()?;
            Ok(RelativeLock::Height(no))
        } else if s.starts_with("time(") && s.ends_with(')') {
            let no = s[5..].trim_end_matches(')').parse()?;
            Ok(RelativeLock::Time(no))
        } else {
            Err(ParseError::InvalidDescriptor(s))
        }
    }
}

/// Value for a transaction `nTimeLock` field, which can be either a timestamp
/// (>=500000000) or a block height (<500000000).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, From, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct LockTime(#[from] u32);

impl PartialOrd for LockTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.is_height_based() != other.is_height_based() {
            None
        } else {
            Some(self.0.cmp(&other.0))
        }
    }
}

impl From<LockTime> for u32 {
    fn from(lock_time: LockTime) -> Self { lock_time.into_consensus() }
}

impl LockTime {
    /// Create zero time lock
    #[inline]
    pub fn anytime() -> Self { Self(0) }

    /// Creates absolute time lock with the given block height.
    ///
    /// Block height must be strictly less than `0x1DCD6500`, otherwise
    /// `None` is returned.
    #[inline]
    pub fn from_height(height: u32) -> Option<Self> {
        if height < LOCKTIME_THRESHOLD {
            Some(Self(height))
        } else {
            None
        }
    }

    /// Creates absolute time lock with the given UNIX timestamp value.
    ///
    /// Timestamp value must be greater or equal to `0x1DCD6500`, otherwise
    /// `None` is returned.
    #[inline]
    pub fn from_unix_timestamp(timestamp: u32) -> Option<Self> {
        if timestamp < LOCKTIME_THRESHOLD {
            None
        } else {
            Some(Self(timestamp))
        }
    }

    /// Constructs timelock from a bitcoin consensus 32-bit timelock value.
    #[inline]
    pub fn from_consensus(value: u32) -> Self { Self(value) }

    #[inline]
    pub fn is_height_based(self) -> bool { self.0 < LOCKTIME_THRESHOLD }

    #[inline]
    pub fn is_time_based(self) -> bool { !self.is_height_based() }

    #[inline]
    pub fn is_anytime(self) -> bool { self.0 == 0 }

    #[inline]
    pub fn into_consensus(self) -> u32 { self.0 }

    /// Checks whether a transaction with the given `nLockTime` and the given
    /// `nSeq` of the spending input matures this lock.
    pub fn is_satisfied_by(self, tx_lock_time: u32, sequence: u32) -> bool {
        let tx_lock_time = LockTime(tx_lock_time);
        sequence != SEQ_NO_MAX_VALUE &&
            matches!(
                self.partial_cmp(&tx_lock_time),
                Some(Ordering::Less) | Some(Ordering::Equal)
            )
    }

    /// Combines two locks applied to the same transaction, keeping the later
    /// one. A zero lock time is compatible with any other lock.
    pub fn merge(self, other: LockTime) -> Result<LockTime, LockMergeError> {
        if self.is_anytime() {
            return Ok(other);
        }
        if other.is_anytime() {
            return Ok(self);
        }
        match self.partial_cmp(&other) {
            Some(Ordering::Less) => Ok(other),
            Some(_) => Ok(self),
            None => Err(LockMergeError::IncompatibleLockTime(self, other)),
        }
    }
}

impl Display for LockTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_height_based() {
            f.write_str("height(")?;
        } else {
            f.write_str("time(")?;
        }
        Display::fmt(&self.0, f)?;
        f.write_str(")")
    }
}

impl FromStr for LockTime {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_lowercase();
        if s == "0" || s == "none" {
            Ok(LockTime::anytime())
        } else if s.starts_with("height(") && s.ends_with(')') {
            let no = s[7..].trim_end_matches(')').parse()?;
            LockTime::from_height(no).ok_or(ParseError::InvalidHeight(no))
        } else if s.starts_with("time(") && s.ends_with(')') {
            let no = s[5..].trim_end_matches(')').parse()?;
            LockTime::from_unix_timestamp(no).ok_or(ParseError::InvalidTimestamp(no))
        } else {
            Err(ParseError::InvalidDescriptor(s))
        }
    }
}

/// Time lock which a transaction template may carry: either on the spending
/// input `nSeq` or on the transaction `nLockTime`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, From)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "lowercase")
)]
pub enum TimeSpec {
    #[from]
    #[display("older({0})")]
    Relative(RelativeLock),

    #[from]
    #[display("after({0})")]
    Absolute(LockTime),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn relative_sequence_encoding() {
        assert_eq!(RelativeLock::Height(144).to_sequence(), 144);
        assert_eq!(RelativeLock::Time(10).to_sequence(), 10 | SEQ_NO_CSV_TYPE_MASK);
        assert_eq!(RelativeLock::from_sequence(10 | SEQ_NO_CSV_TYPE_MASK), Some(RelativeLock::Time(10)));
        assert_eq!(RelativeLock::from_sequence(SEQ_NO_MAX_VALUE), None);
    }

    #[test]
    fn relative_satisfaction() {
        let lock = RelativeLock::Height(10);
        assert!(lock.is_satisfied_by(10, 2));
        assert!(lock.is_satisfied_by(11, 2));
        assert!(!lock.is_satisfied_by(9, 2));
        assert!(!lock.is_satisfied_by(10, 1));
        assert!(!lock.is_satisfied_by(10 | SEQ_NO_CSV_TYPE_MASK, 2));
        assert!(!lock.is_satisfied_by(SEQ_NO_MAX_VALUE, 2));
    }

    #[test]
    fn absolute_satisfaction() {
        let lock = LockTime::from_height(100).unwrap();
        assert!(lock.is_satisfied_by(100, 0));
        assert!(!lock.is_satisfied_by(99, 0));
        assert!(!lock.is_satisfied_by(100, SEQ_NO_MAX_VALUE));
        assert!(!lock.is_satisfied_by(LOCKTIME_THRESHOLD + 1, 0));
    }

    #[test]
    fn merging() {
        let h1 = LockTime::from_height(10).unwrap();
        let h2 = LockTime::from_height(20).unwrap();
        let t = LockTime::from_unix_timestamp(LOCKTIME_THRESHOLD + 5).unwrap();
        assert_eq!(h1.merge(h2), Ok(h2));
        assert_eq!(LockTime::anytime().merge(t), Ok(t));
        assert_eq!(h1.merge(t), Err(LockMergeError::IncompatibleLockTime(h1, t)));

        let r1 = RelativeLock::Height(5);
        let r2 = RelativeLock::Time(5);
        assert_eq!(r1.merge(RelativeLock::Height(7)), Ok(RelativeLock::Height(7)));
        assert_eq!(r1.merge(r2), Err(LockMergeError::IncompatibleSequence(r1, r2)));
    }

    #[test]
    fn parsing() {
        assert_eq!("height(100)".parse::<LockTime>(), Ok(LockTime::from_height(100).unwrap()));
        assert_eq!("time(500000001)".parse::<LockTime>(), Ok(LockTime::from_consensus(500000001)));
        assert_eq!("time(10)".parse::<LockTime>(), Err(ParseError::InvalidTimestamp(10)));
        assert_eq!("time(3)".parse::<RelativeLock>(), Ok(RelativeLock::Time(3)));
    }
}
