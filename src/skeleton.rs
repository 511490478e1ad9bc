// Compiler of bitcoin covenant contracts into CTV transaction graphs
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

//! Transaction skeletons filled by template path builders.

use std::sync::Arc;

use bitcoin::{Amount, Script};
use bitcoin_clause::{Clause, LockMergeError, LockTime, RelativeLock, TimeSpec};

use crate::model::ContractInstance;

/// Source of the `scriptPubkey` of a template output.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ScriptSource {
    /// P2WSH of the lowered clause
    Clause(Clause),

    /// P2WSH of the committing script of the nested contract
    Contract(Arc<ContractInstance>),

    /// Opaque `scriptPubkey` provided as is
    PubkeyScript(Script),
}

impl From<Clause> for ScriptSource {
    fn from(clause: Clause) -> Self { ScriptSource::Clause(clause) }
}

impl From<Arc<ContractInstance>> for ScriptSource {
    fn from(instance: Arc<ContractInstance>) -> Self { ScriptSource::Contract(instance) }
}

impl From<Script> for ScriptSource {
    fn from(script: Script) -> Self { ScriptSource::PubkeyScript(script) }
}

/// Output of a [`TemplateSkeleton`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SkeletonOutput {
    pub amount: Amount,
    pub source: ScriptSource,
}

/// Transaction under construction by a template path builder: ordered
/// outputs, the fee and time locks.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct TemplateSkeleton {
    outputs: Vec<SkeletonOutput>,
    fee: Option<Amount>,
    lock_time: LockTime,
    relative_lock: Option<RelativeLock>,
}

impl TemplateSkeleton {
    #[inline]
    pub fn new() -> TemplateSkeleton { default!() }

    /// Appends output; returns its index.
    pub fn add_output(&mut self, amount: Amount, source: impl Into<ScriptSource>) -> usize {
        self.outputs.push(SkeletonOutput {
            amount,
            source: source.into(),
        });
        self.outputs.len() - 1
    }

    /// Sets fee paid by the transaction. Without it the minimal fee of the
    /// fee policy is used.
    pub fn set_fee(&mut self, fee: Amount) -> &mut Self {
        self.fee = Some(fee);
        self
    }

    /// Applies absolute time lock; combined with the already applied one.
    pub fn set_lock_time(&mut self, lock_time: LockTime) -> Result<&mut Self, LockMergeError> {
        self.lock_time = self.lock_time.merge(lock_time)?;
        Ok(self)
    }

    /// Applies relative time lock to the spending input; combined with the
    /// already applied one.
    pub fn set_sequence(&mut self, lock: RelativeLock) -> Result<&mut Self, LockMergeError> {
        self.relative_lock = Some(match self.relative_lock {
            Some(prev) => prev.merge(lock)?,
            None => lock,
        });
        Ok(self)
    }

    /// Applies either kind of time lock.
    pub fn set_timelock(&mut self, spec: TimeSpec) -> Result<&mut Self, LockMergeError> {
        match spec {
            TimeSpec::Relative(lock) => self.set_sequence(lock),
            TimeSpec::Absolute(lock_time) => self.set_lock_time(lock_time),
        }
    }

    #[inline]
    pub fn outputs(&self) -> &[SkeletonOutput] { &self.outputs }

    #[inline]
    pub fn fee(&self) -> Option<Amount> { self.fee }

    #[inline]
    pub fn lock_time(&self) -> LockTime { self.lock_time }

    #[inline]
    pub fn relative_lock(&self) -> Option<RelativeLock> { self.relative_lock }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timelocks() {
        let mut skeleton = TemplateSkeleton::new();
        skeleton
            .set_timelock(TimeSpec::Relative(RelativeLock::Height(6)))
            .unwrap()
            .set_sequence(RelativeLock::Height(3))
            .unwrap();
        assert_eq!(skeleton.relative_lock(), Some(RelativeLock::Height(6)));
        assert_eq!(
            skeleton.set_sequence(RelativeLock::Time(2)).unwrap_err(),
            LockMergeError::IncompatibleSequence(RelativeLock::Height(6), RelativeLock::Time(2))
        );

        let height = LockTime::from_height(700_000).unwrap();
        let time = LockTime::from_unix_timestamp(1_700_000_000).unwrap();
        skeleton.set_lock_time(height).unwrap();
        assert_eq!(
            skeleton.set_lock_time(time).unwrap_err(),
            LockMergeError::IncompatibleLockTime(height, time)
        );
        assert_eq!(skeleton.lock_time(), height);
    }

    #[test]
    fn outputs() {
        let mut skeleton = TemplateSkeleton::new();
        assert_eq!(skeleton.add_output(Amount::from_sat(10), Script::new()), 0);
        assert_eq!(skeleton.add_output(Amount::from_sat(20), Script::new()), 1);
        assert_eq!(skeleton.fee(), None);
        skeleton.set_fee(Amount::from_sat(1));
        assert_eq!(skeleton.fee(), Some(Amount::from_sat(1)));
        assert_eq!(skeleton.outputs()[1].amount, Amount::from_sat(20));
    }
}
