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

//! Boolean spending clauses over signatures, time locks and hash locks, and
//! their deterministic lowering into bitcoin script.

// Coding conventions
#![recursion_limit = "256"]
#![warn(dead_code, unused_imports)]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate log;
#[cfg(feature = "miniscript")]
extern crate miniscript_crate as miniscript;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

mod clause;
mod error;
pub mod eval;
pub mod hlc;
pub mod locks;
pub mod lower;
#[cfg(feature = "miniscript")]
mod policy;

pub use clause::Clause;
pub use error::{Complexity, LowerError};
pub use eval::{EvalError, SpendContext};
pub use hlc::{HashLock, HashPreimage};
pub use locks::{LockMergeError, LockTime, RelativeLock, TimeSpec};
pub use lower::{lower, Branch, CompiledScript, Condition, LoweringConfig};
