// CTV transaction templates
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

use bitcoin::{
    Amount, OutPoint, PackedLockTime, Script, Sequence, Transaction, TxIn, TxOut, Witness,
};
use bitcoin_clause::locks::SEQ_NO_MAX_VALUE;
use bitcoin_clause::{LockMergeError, LockTime, RelativeLock};

use crate::CtvHash;

/// Version of template transactions; relative time locks require version 2.
pub const TEMPLATE_TX_VERSION: i32 = 2;

/// Sequence number which enables `nLockTime` without enabling relative time
/// locks or replacement signalling.
pub const SEQ_NO_LOCKTIME_ENABLED: u32 = SEQ_NO_MAX_VALUE - 1;

/// Fully specified transaction committed to with `OP_CHECKTEMPLATEVERIFY`,
/// lacking only the outpoints it spends and the witnesses.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct TransactionTemplate {
    version: i32,
    lock_time: LockTime,
    sequences: Vec<u32>,
    outputs: Vec<TxOut>,
    input_index: u32,
}

impl TransactionTemplate {
    /// Constructs single-input template with final sequence and no lock time.
    pub fn with(outputs: impl IntoIterator<Item = TxOut>) -> TransactionTemplate {
        TransactionTemplate {
            version: TEMPLATE_TX_VERSION,
            lock_time: LockTime::anytime(),
            sequences: vec![SEQ_NO_MAX_VALUE],
            outputs: outputs.into_iter().collect(),
            input_index: 0,
        }
    }

    /// Applies absolute time lock, combining it with the already applied one.
    /// Since `nLockTime` is ignored when all inputs are final, a final
    /// sequence of the spending input is changed to
    /// [`SEQ_NO_LOCKTIME_ENABLED`].
    pub fn set_lock_time(&mut self, lock_time: LockTime) -> Result<LockTime, LockMergeError> {
        self.lock_time = self.lock_time.merge(lock_time)?;
        if !self.lock_time.is_anytime() && self.sequence() == SEQ_NO_MAX_VALUE {
            self.sequences[self.input_index as usize] = SEQ_NO_LOCKTIME_ENABLED;
        }
        Ok(self.lock_time)
    }

    /// Applies relative time lock to the spending input, combining it with
    /// the already applied one.
    pub fn set_relative_lock(&mut self, lock: RelativeLock) -> Result<RelativeLock, LockMergeError> {
        let lock = match RelativeLock::from_sequence(self.sequence()) {
            Some(prev) => prev.merge(lock)?,
            None => lock,
        };
        self.sequences[self.input_index as usize] = lock.to_sequence();
        Ok(lock)
    }

    #[inline]
    pub fn version(&self) -> i32 { self.version }

    #[inline]
    pub fn lock_time(&self) -> LockTime { self.lock_time }

    /// Sequence of the input spending the covenant.
    #[inline]
    pub fn sequence(&self) -> u32 { self.sequences[self.input_index as usize] }

    #[inline]
    pub fn sequences(&self) -> &[u32] { &self.sequences }

    #[inline]
    pub fn outputs(&self) -> &[TxOut] { &self.outputs }

    #[inline]
    pub fn input_index(&self) -> u32 { self.input_index }

    /// Relative time lock enforced by the template, if any.
    #[inline]
    pub fn relative_lock(&self) -> Option<RelativeLock> { RelativeLock::from_sequence(self.sequence()) }

    /// Sum of all output values; `None` on overflow.
    pub fn output_value(&self) -> Option<Amount> {
        self.outputs
            .iter()
            .try_fold(Amount::ZERO, |sum, output| sum.checked_add(Amount::from_sat(output.value)))
    }

    /// Unsigned transaction with null previous outpoints.
    #[inline]
    pub fn to_transaction(&self) -> Transaction { self.bind(OutPoint::null()) }

    /// Unsigned transaction spending the given outpoint at the covenant
    /// input. Binding does not change the template hash.
    pub fn bind(&self, outpoint: OutPoint) -> Transaction {
        Transaction {
            version: self.version,
            lock_time: PackedLockTime(self.lock_time.into_consensus()),
            input: self
                .sequences
                .iter()
                .enumerate()
                .map(|(index, sequence)| TxIn {
                    previous_output: if index == self.input_index as usize {
                        outpoint
                    } else {
                        OutPoint::null()
                    },
                    script_sig: Script::new(),
                    sequence: Sequence(*sequence),
                    witness: Witness::new(),
                })
                .collect(),
            output: self.outputs.clone(),
        }
    }

    /// BIP-119 default template hash.
    #[inline]
    pub fn ctv_hash(&self) -> CtvHash {
        CtvHash::from_transaction(&self.to_transaction(), self.input_index)
    }
}
