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

// Coding conventions
#![recursion_limit = "256"]
#![warn(dead_code, unused_imports)]

//! Transaction templates committed to with BIP-119
//! `OP_CHECKTEMPLATEVERIFY` and computation of their hashes.

#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

mod ctv;
mod template;

pub use ctv::{hash_outputs, hash_script_sigs, hash_sequences, CtvHash, OP_CHECKTEMPLATEVERIFY};
pub use template::{TransactionTemplate, SEQ_NO_LOCKTIME_ENABLED, TEMPLATE_TX_VERSION};
