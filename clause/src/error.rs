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

use crate::locks::LockMergeError;

/// Reasons for a clause being rejected as too complex for script lowering.
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error
)]
#[display(doc_comments)]
pub enum Complexity {
    /// {k}-of-{n} threshold expands into {combinations} spending branches,
    /// which is above the limit of {limit}, while its conditions can't be
    /// checked with a native threshold construction (only signatures and hash
    /// locks can)
    MixedThreshold {
        /// Required number of satisfied conditions
        k: usize,
        /// Total number of conditions
        n: usize,
        /// Number of k-of-n combinations (saturated at `u64::MAX`)
        combinations: u64,
        /// Configured combination limit
        limit: usize,
    },

    /// clause expands into more than {0} alternative spending branches
    TooManyBranches(usize),
}

/// Errors lowering a clause into script.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum LowerError {
    /// threshold requires {k} of {n} conditions; the number of required
    /// conditions must be non-zero and must not exceed the number of
    /// conditions
    InvalidThreshold {
        /// Required number of satisfied conditions
        k: usize,
        /// Total number of conditions
        n: usize,
    },

    /// clause is too complex to be lowered into script: {0}
    #[from]
    ClauseTooComplex(Complexity),

    /// spending branch is unsatisfiable: {0}
    #[from]
    UnsatisfiableBranch(LockMergeError),
}
