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

use bitcoin::Amount;
use bitcoin_clause::LoweringConfig;

/// Default maximal fee a template transaction may pay, in satoshis.
pub const DEFAULT_MAX_FEE_SAT: u64 = 100_000;

/// Default maximal depth of contract nesting.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Range of fees template transactions are allowed to pay.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct FeePolicy {
    /// Minimal fee; also the fee of templates not specifying it explicitly
    #[cfg_attr(feature = "serde", serde(with = "bitcoin::util::amount::serde::as_sat"))]
    pub min_fee: Amount,

    /// Maximal fee
    #[cfg_attr(feature = "serde", serde(with = "bitcoin::util::amount::serde::as_sat"))]
    pub max_fee: Amount,
}

impl Default for FeePolicy {
    fn default() -> Self {
        FeePolicy {
            min_fee: Amount::ZERO,
            max_fee: Amount::from_sat(DEFAULT_MAX_FEE_SAT),
        }
    }
}

impl FeePolicy {
    /// Policy requiring templates to pay exactly the given fee.
    #[inline]
    pub fn exact(fee: Amount) -> FeePolicy {
        FeePolicy {
            min_fee: fee,
            max_fee: fee,
        }
    }

    #[inline]
    pub fn allows(&self, fee: Amount) -> bool { fee >= self.min_fee && fee <= self.max_fee }
}

/// Configuration of a [`crate::Compiler`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", default)
)]
pub struct CompilerConfig {
    pub fee_policy: FeePolicy,
    pub lowering: LoweringConfig,
    /// Contract trees nested deeper than this are rejected as
    /// non-terminating
    pub max_depth: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            fee_policy: default!(),
            lowering: default!(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}
