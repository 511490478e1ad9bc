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

//! Compiler of declarative multi-transaction bitcoin contracts into graphs of
//! transaction templates committed to with BIP-119
//! `OP_CHECKTEMPLATEVERIFY`, together with the scripts authorizing each of
//! their spending paths.

// Coding conventions
#![recursion_limit = "256"]
#![warn(dead_code, unused_imports)]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate log;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

pub extern crate bitcoin_clause as clause;
pub extern crate ctv_templates as templates;

pub mod compiled;
mod compiler;
pub mod config;
pub mod conservation;
mod error;
pub mod location;
pub mod model;
pub mod skeleton;
pub mod zoo;

pub use compiled::{CompiledAuthPath, CompiledContract, CompiledTemplate, SpendPath};
pub use compiler::Compiler;
pub use config::{CompilerConfig, FeePolicy};
pub use error::{CompileErrors, Diagnostic, Error};
pub use location::{Fragment, Location};
pub use model::{
    ContractDefinition, ContractInstance, ContractKey, FieldType, Fields, TemplatePath, Value,
};
pub use skeleton::{ScriptSource, TemplateSkeleton};
