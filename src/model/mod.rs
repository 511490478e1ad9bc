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

//! Declarative contract model: definitions, their paths and instances.

mod definition;
mod field;
mod instance;

pub use definition::{
    AuthBuilder, AuthPath, ContractDefinition, DefinitionBuilder, PathCondition, SkeletonBuilder,
    TemplatePath,
};
pub use field::{FieldType, Fields, Value};
pub use instance::{ContractInstance, ContractKey};
