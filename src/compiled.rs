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

//! Compiled contract artifacts.

use std::sync::Arc;

use bitcoin::blockdata::opcodes::all::OP_VERIFY;
use bitcoin::blockdata::script::{Builder, Script};
use bitcoin::Amount;
use bitcoin_clause::eval::{self, EvalError, SpendContext};
use bitcoin_clause::lower::{append, branch_selector, emit_alternatives};
use bitcoin_clause::CompiledScript;
use ctv_templates::{CtvHash, TransactionTemplate};

use crate::model::ContractKey;
use crate::Error;

/// Lowered authorization path.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CompiledAuthPath {
    pub name: String,
    pub script: CompiledScript,
    /// Whether the path is a spending branch of its own; guards are not
    pub is_terminal: bool,
}

/// Transaction template of a template path with its CTV hash.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CompiledTemplate {
    pub name: String,
    pub template: TransactionTemplate,
    pub ctv_hash: CtvHash,
    pub fee: Amount,
    /// Names of guard paths which must be satisfied together with the
    /// template commitment
    pub guards: Vec<String>,
    /// Compiled nested contracts per output; `None` for outputs with clause
    /// or opaque scripts
    pub nested: Vec<Option<Arc<CompiledContract>>>,
}

impl CompiledTemplate {
    /// Funding required by the template: outputs plus fee.
    pub fn required_funding(&self) -> Option<Amount> {
        self.template.output_value()?.checked_add(self.fee)
    }
}

/// Spending branch of a contract committing script.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
pub enum SpendPath {
    /// Terminal authorization path with the given index
    #[display("auth#{0}")]
    Auth(usize),

    /// Template path with the given index
    #[display("template#{0}")]
    Template(usize),
}

/// Compiled form of a contract instance.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CompiledContract {
    key: ContractKey,
    name: String,
    auth_paths: Vec<CompiledAuthPath>,
    templates: Vec<CompiledTemplate>,
    required_funding: Option<Amount>,
    committing_script: Script,
    branches: Vec<SpendPath>,
}

impl CompiledContract {
    /// Assembles contract from its compiled paths, constructing the
    /// committing script: alternatives of all terminal authorization scripts
    /// followed by `[<guard> OP_VERIFY]* <hash> OP_CHECKTEMPLATEVERIFY` for
    /// each template.
    pub(crate) fn assemble(
        key: ContractKey,
        name: impl ToString,
        auth_paths: Vec<CompiledAuthPath>,
        templates: Vec<CompiledTemplate>,
        required_funding: Option<Amount>,
    ) -> Result<CompiledContract, Error> {
        let mut branches = vec![];
        let mut scripts = vec![];
        for (index, path) in auth_paths.iter().enumerate() {
            if path.is_terminal {
                branches.push(SpendPath::Auth(index));
                scripts.push(path.script.script().clone());
            }
        }
        for (index, template) in templates.iter().enumerate() {
            let mut builder = Builder::new();
            for guard in &template.guards {
                let guard = auth_paths
                    .iter()
                    .find(|path| &path.name == guard)
                    .ok_or_else(|| Error::UnknownGuard(guard.clone()))?;
                builder = append(builder, guard.script.script()).push_opcode(OP_VERIFY);
            }
            builder = append(builder, &template.ctv_hash.commitment_script());
            branches.push(SpendPath::Template(index));
            scripts.push(builder.into_script());
        }
        if scripts.is_empty() {
            return Err(Error::EmptyContract);
        }
        let committing_script = emit_alternatives(Builder::new(), &scripts).into_script();

        Ok(CompiledContract {
            key,
            name: name.to_string(),
            auth_paths,
            templates,
            required_funding,
            committing_script,
            branches,
        })
    }

    #[inline]
    pub fn key(&self) -> ContractKey { self.key }

    #[inline]
    pub fn name(&self) -> &str { &self.name }

    /// Lowered authorization paths, in declaration order.
    #[inline]
    pub fn auth_paths(&self) -> &[CompiledAuthPath] { &self.auth_paths }

    /// Templates, in declaration order of template paths.
    #[inline]
    pub fn templates(&self) -> &[CompiledTemplate] { &self.templates }

    /// Amount the contract must be funded with; `None` if the contract has
    /// no template paths and accepts any amount.
    #[inline]
    pub fn required_funding(&self) -> Option<Amount> { self.required_funding }

    /// Script committing to all spending branches of the contract.
    #[inline]
    pub fn committing_script(&self) -> &Script { &self.committing_script }

    /// P2WSH `scriptPubkey` of the contract.
    #[inline]
    pub fn script_pubkey(&self) -> Script { Script::new_v0_p2wsh(&self.committing_script.wscript_hash()) }

    /// Spending branches of the committing script, in script order.
    #[inline]
    pub fn branches(&self) -> &[SpendPath] { &self.branches }

    /// Compiled contracts nested directly into the templates of this one.
    pub fn nested(&self) -> impl Iterator<Item = &Arc<CompiledContract>> {
        self.templates
            .iter()
            .flat_map(|template| template.nested.iter().flatten())
    }

    /// Builds witness stack (bottom to top, without the witness script)
    /// spending the committing script through the given branch. Returns
    /// `None` if the branch does not exist or the context does not satisfy
    /// it. Template branches additionally require `ctx.template_hash` to be
    /// set for the witness to pass evaluation.
    pub fn satisfy(&self, path: SpendPath, ctx: &SpendContext) -> Option<Vec<Vec<u8>>> {
        let position = self.branches.iter().position(|branch| *branch == path)?;
        let mut witness = match path {
            SpendPath::Auth(index) => self.auth_paths.get(index)?.script.satisfy(ctx)?.1,
            SpendPath::Template(index) => {
                let template = self.templates.get(index)?;
                let mut witness = vec![];
                for guard in template.guards.iter().rev() {
                    let guard = self.auth_paths.iter().find(|path| &path.name == guard)?;
                    witness.extend(guard.script.satisfy(ctx)?.1);
                }
                witness
            }
        };
        witness.extend(branch_selector(position, self.branches.len()));
        Some(witness)
    }

    /// Dry-runs the committing script with the given witness.
    #[inline]
    pub fn evaluate(&self, witness: &[Vec<u8>], ctx: &SpendContext) -> Result<(), EvalError> {
        eval::execute(&self.committing_script, witness, ctx)
    }
}
