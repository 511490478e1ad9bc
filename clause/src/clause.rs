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

//! Boolean algebra over atomic spending conditions.

use std::fmt::{self, Display, Formatter};

use bitcoin::PublicKey;

use crate::eval::SpendContext;
use crate::hlc::HashLock;
use crate::locks::{LockTime, RelativeLock};
use crate::LowerError;

/// Boolean expression over atomic spending conditions.
///
/// Clauses are plain finite trees; they carry no script-level decisions,
/// which are taken by [`crate::lower`].
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "snake_case")
)]
pub enum Clause {
    /// Signature by the given key
    Signature(PublicKey),

    /// Transaction `nLockTime` must reach the given height or time
    AbsoluteTimelock(LockTime),

    /// Spending input must be at least as old as the given interval
    RelativeTimelock(RelativeLock),

    /// Preimage of the given hash must be revealed
    HashPreimage(HashLock),

    /// At least `k` out of the given clauses must be satisfied
    Threshold(usize, Vec<Clause>),

    /// Both clauses must be satisfied
    And(Box<Clause>, Box<Clause>),

    /// Either of the clauses must be satisfied
    Or(Box<Clause>, Box<Clause>),
}

impl Clause {
    #[inline]
    pub fn signature(key: PublicKey) -> Clause { Clause::Signature(key) }

    #[inline]
    pub fn after(lock_time: LockTime) -> Clause { Clause::AbsoluteTimelock(lock_time) }

    #[inline]
    pub fn older(lock: RelativeLock) -> Clause { Clause::RelativeTimelock(lock) }

    #[inline]
    pub fn preimage(lock: HashLock) -> Clause { Clause::HashPreimage(lock) }

    #[inline]
    pub fn and_of(a: Clause, b: Clause) -> Clause { Clause::And(Box::new(a), Box::new(b)) }

    #[inline]
    pub fn or_of(a: Clause, b: Clause) -> Clause { Clause::Or(Box::new(a), Box::new(b)) }

    /// Constructs `k`-of-`n` threshold, checking that `1 <= k <= n`.
    pub fn threshold(k: usize, clauses: impl IntoIterator<Item = Clause>) -> Result<Clause, LowerError> {
        let clauses = clauses.into_iter().collect::<Vec<_>>();
        let n = clauses.len();
        if k == 0 || k > n {
            return Err(LowerError::InvalidThreshold { k, n });
        }
        Ok(Clause::Threshold(k, clauses))
    }

    /// Conjunction of all given clauses; `None` if there are no clauses.
    pub fn all_of(clauses: impl IntoIterator<Item = Clause>) -> Option<Clause> {
        clauses.into_iter().reduce(Clause::and_of)
    }

    /// Disjunction of all given clauses; `None` if there are no clauses.
    pub fn any_of(clauses: impl IntoIterator<Item = Clause>) -> Option<Clause> {
        clauses.into_iter().reduce(Clause::or_of)
    }

    /// Checks threshold invariants over the whole tree.
    pub fn validate(&self) -> Result<(), LowerError> {
        match self {
            Clause::Threshold(k, clauses) => {
                let n = clauses.len();
                if *k == 0 || *k > n {
                    return Err(LowerError::InvalidThreshold { k: *k, n });
                }
                clauses.iter().try_for_each(Clause::validate)
            }
            Clause::And(a, b) | Clause::Or(a, b) => {
                a.validate()?;
                b.validate()
            }
            _ => Ok(()),
        }
    }

    /// Detects whether the clause consists of signature checks only.
    pub fn is_signature_only(&self) -> bool {
        match self {
            Clause::Signature(_) => true,
            Clause::Threshold(_, clauses) => clauses.iter().all(Clause::is_signature_only),
            Clause::And(a, b) | Clause::Or(a, b) => a.is_signature_only() && b.is_signature_only(),
            _ => false,
        }
    }

    /// Evaluates the boolean expression directly against the spending
    /// context, without any script involved.
    pub fn is_satisfied(&self, ctx: &SpendContext) -> bool {
        match self {
            Clause::Signature(key) => ctx.signers.contains(key),
            Clause::AbsoluteTimelock(lock_time) => {
                lock_time.is_satisfied_by(ctx.lock_time, ctx.sequence)
            }
            Clause::RelativeTimelock(lock) => lock.is_satisfied_by(ctx.sequence, ctx.tx_version),
            Clause::HashPreimage(lock) => ctx.preimages.contains_key(lock),
            Clause::Threshold(k, clauses) => {
                clauses.iter().filter(|clause| clause.is_satisfied(ctx)).count() >= *k
            }
            Clause::And(a, b) => a.is_satisfied(ctx) && b.is_satisfied(ctx),
            Clause::Or(a, b) => a.is_satisfied(ctx) || b.is_satisfied(ctx),
        }
    }

    /// Iterates over all signing keys mentioned by the clause.
    pub fn keys(&self) -> Vec<PublicKey> {
        let mut keys = vec![];
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys(&self, keys: &mut Vec<PublicKey>) {
        match self {
            Clause::Signature(key) => keys.push(*key),
            Clause::Threshold(_, clauses) => {
                clauses.iter().for_each(|clause| clause.collect_keys(keys))
            }
            Clause::And(a, b) | Clause::Or(a, b) => {
                a.collect_keys(keys);
                b.collect_keys(keys);
            }
            _ => {}
        }
    }
}

impl Display for Clause {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Signature(key) => write!(f, "pk({})", key),
            Clause::AbsoluteTimelock(lock_time) => write!(f, "after({})", lock_time),
            Clause::RelativeTimelock(lock) => write!(f, "older({})", lock),
            Clause::HashPreimage(lock) => write!(f, "sha256({})", lock),
            Clause::Threshold(k, clauses) => {
                write!(f, "thresh({}", k)?;
                for clause in clauses {
                    write!(f, ",{}", clause)?;
                }
                f.write_str(")")
            }
            Clause::And(a, b) => write!(f, "and({},{})", a, b),
            Clause::Or(a, b) => write!(f, "or({},{})", a, b),
        }
    }
}

#[cfg(test)]
mod test {
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    use super::*;

    pub(crate) fn key(no: u8) -> PublicKey {
        let secp = Secp256k1::signing_only();
        let sk = SecretKey::from_slice(&[no; 32]).unwrap();
        PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk))
    }

    #[test]
    fn threshold_bounds() {
        let sigs = || vec![Clause::signature(key(1)), Clause::signature(key(2))];
        assert_eq!(Clause::threshold(0, sigs()), Err(LowerError::InvalidThreshold { k: 0, n: 2 }));
        assert_eq!(Clause::threshold(3, sigs()), Err(LowerError::InvalidThreshold { k: 3, n: 2 }));
        assert!(Clause::threshold(2, sigs()).is_ok());
        assert_eq!(
            Clause::Threshold(0, sigs()).validate(),
            Err(LowerError::InvalidThreshold { k: 0, n: 2 })
        );
    }

    #[test]
    fn direct_evaluation() {
        let escrow = Clause::and_of(
            Clause::signature(key(3)),
            Clause::or_of(Clause::signature(key(1)), Clause::signature(key(2))),
        );
        let mut ctx = SpendContext::default();
        assert!(!escrow.is_satisfied(&ctx));
        ctx.signers.insert(key(3));
        assert!(!escrow.is_satisfied(&ctx));
        ctx.signers.insert(key(2));
        assert!(escrow.is_satisfied(&ctx));
        assert!(escrow.is_signature_only());
        assert_eq!(escrow.keys(), vec![key(3), key(1), key(2)]);
    }

    #[test]
    fn combinators() {
        assert_eq!(Clause::all_of(vec![]), None);
        let all = Clause::all_of((1..=3).map(key).map(Clause::signature)).unwrap();
        assert_eq!(
            all,
            Clause::and_of(
                Clause::and_of(Clause::signature(key(1)), Clause::signature(key(2))),
                Clause::signature(key(3))
            )
        );
        let timelocked =
            Clause::or_of(Clause::signature(key(1)), Clause::older(RelativeLock::Height(144)));
        assert!(!timelocked.is_signature_only());
        assert_eq!(timelocked.to_string(), format!("or(pk({}),older(height(144)))", key(1)));
    }
}
