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

//! Conversion of clauses into miniscript concrete policies.

use amplify::Wrapper;
use bitcoin::{PackedLockTime, PublicKey, Sequence};
use miniscript::policy::Concrete;

use crate::Clause;

impl Clause {
    /// Represents the clause as a miniscript concrete policy, which may be
    /// used to compile it with the miniscript policy compiler instead of
    /// [`crate::lower`].
    pub fn to_policy(&self) -> Concrete<PublicKey> {
        match self {
            Clause::Signature(key) => Concrete::Key(*key),
            Clause::AbsoluteTimelock(lock_time) => {
                Concrete::After(PackedLockTime(lock_time.into_consensus()))
            }
            Clause::RelativeTimelock(lock) => Concrete::Older(Sequence(lock.to_sequence())),
            Clause::HashPreimage(lock) => Concrete::Sha256(*lock.as_inner()),
            Clause::Threshold(k, clauses) => {
                Concrete::Threshold(*k, clauses.iter().map(Clause::to_policy).collect())
            }
            Clause::And(a, b) => Concrete::And(vec![a.to_policy(), b.to_policy()]),
            Clause::Or(a, b) => Concrete::Or(vec![(1, a.to_policy()), (1, b.to_policy())]),
        }
    }
}

#[cfg(test)]
mod test {
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    use super::*;
    use crate::locks::RelativeLock;

    fn key(no: u8) -> PublicKey {
        let secp = Secp256k1::signing_only();
        let sk = SecretKey::from_slice(&[no; 32]).unwrap();
        PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk))
    }

    #[test]
    fn policy_text() {
        let clause = Clause::or_of(
            Clause::signature(key(1)),
            Clause::and_of(Clause::signature(key(2)), Clause::older(RelativeLock::Height(144))),
        );
        assert_eq!(
            clause.to_policy().to_string(),
            format!("or(pk({}),and(pk({}),older(144)))", key(1), key(2))
        );
    }
}
