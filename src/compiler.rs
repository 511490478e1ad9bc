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

//! Compilation orchestrator.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bitcoin::{Amount, TxOut};
use bitcoin_clause::{lower, Clause};
use ctv_templates::TransactionTemplate;
use dashmap::DashMap;
use rayon::prelude::*;

use crate::compiled::{CompiledAuthPath, CompiledContract, CompiledTemplate};
use crate::config::CompilerConfig;
use crate::conservation;
use crate::location::Location;
use crate::model::{ContractInstance, ContractKey};
use crate::skeleton::{ScriptSource, TemplateSkeleton};
use crate::{CompileErrors, Diagnostic, Error};

/// Compiler of contract instances, memoizing compiled contracts by their
/// content keys.
///
/// The cache is shared between all compilations performed by the compiler,
/// including concurrent ones. Only fully compiled contracts get into the
/// cache; for each key exactly one result is installed and returned to all
/// callers.
#[derive(Debug, Default)]
pub struct Compiler {
    config: CompilerConfig,
    cache: DashMap<ContractKey, Arc<CompiledContract>>,
}

impl Compiler {
    #[inline]
    pub fn new() -> Compiler { default!() }

    #[inline]
    pub fn with(config: CompilerConfig) -> Compiler {
        Compiler {
            config,
            cache: empty!(),
        }
    }

    #[inline]
    pub fn config(&self) -> &CompilerConfig { &self.config }

    /// Returns previously compiled contract.
    #[inline]
    pub fn cached(&self, key: ContractKey) -> Option<Arc<CompiledContract>> {
        self.cache.get(&key).map(|entry| entry.value().clone())
    }

    /// Number of compiled contracts in the cache.
    #[inline]
    pub fn cache_len(&self) -> usize { self.cache.len() }

    /// Compiles contract instance together with all nested instances.
    ///
    /// Nested contracts are compiled depth-first using an explicit work
    /// stack. An instance embedding itself, directly or indirectly, or a
    /// contract tree deeper than [`CompilerConfig::max_depth`] is rejected
    /// with [`Error::NonTerminatingContract`]. Errors of all paths and of
    /// all nested contracts are collected.
    pub fn compile(
        &self,
        instance: &Arc<ContractInstance>,
    ) -> Result<Arc<CompiledContract>, CompileErrors> {
        let root = instance.key();
        if let Some(compiled) = self.cached(root) {
            trace!("Contract {} {} is already compiled", instance.name(), root);
            return Ok(compiled);
        }
        debug!("Compiling contract {} {}", instance.name(), root);

        let mut run = Run {
            compiler: self,
            failed: empty!(),
            expanded: empty!(),
        };
        let mut stack = vec![Frame::Pending(instance.clone())];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Pending(instance) => {
                    let key = instance.key();
                    if self.cache.contains_key(&key) || run.failed.contains_key(&key) {
                        continue;
                    }
                    run.expanded.insert(key);
                    let (expansion, children) = run.expand(instance);
                    trace!(
                        "Contract {} {} depends on {} contract(s) to be compiled",
                        expansion.instance.name(),
                        key,
                        children.len()
                    );
                    stack.push(Frame::Expanded(expansion));
                    stack.extend(children.into_iter().rev().map(Frame::Pending));
                }
                Frame::Expanded(expansion) => {
                    let key = expansion.instance.key();
                    run.expanded.remove(&key);
                    match run.finalize(expansion) {
                        Ok(compiled) => {
                            self.install(compiled);
                        }
                        Err(diagnostics) => {
                            run.failed.insert(key, diagnostics);
                        }
                    }
                }
            }
        }

        match self.cached(root) {
            Some(compiled) => Ok(compiled),
            None => {
                let diagnostics = run.failed.remove(&root).unwrap_or_default();
                warn!(
                    "Compilation of contract {} {} failed with {} error(s)",
                    instance.name(),
                    root,
                    diagnostics.len()
                );
                Err(diagnostics.into())
            }
        }
    }

    /// Compiles independent contract instances in parallel, sharing the
    /// cache between them.
    pub fn compile_many(
        &self,
        instances: &[Arc<ContractInstance>],
    ) -> Vec<Result<Arc<CompiledContract>, CompileErrors>> {
        instances
            .par_iter()
            .map(|instance| self.compile(instance))
            .collect()
    }

    /// Compiles contract instance and checks that funding it with the
    /// `available` amount conserves value on all of its template paths
    /// within the fee policy.
    pub fn verify(
        &self,
        instance: &Arc<ContractInstance>,
        available: Amount,
    ) -> Result<Arc<CompiledContract>, CompileErrors> {
        let compiled = self.compile(instance)?;
        conservation::verify(&compiled, available, &self.config.fee_policy)?;
        Ok(compiled)
    }

    fn install(&self, compiled: CompiledContract) -> Arc<CompiledContract> {
        let key = compiled.key();
        let installed = self
            .cache
            .entry(key)
            .or_insert_with(|| Arc::new(compiled))
            .value()
            .clone();
        debug!("Contract {} {} compiled", installed.name(), key);
        installed
    }
}

enum Frame {
    /// Instance waiting for its paths to be built
    Pending(Arc<ContractInstance>),

    /// Instance with built paths, waiting for nested contracts to compile
    Expanded(Expansion),
}

struct Expansion {
    instance: Arc<ContractInstance>,
    clauses: Vec<Result<Clause, Error>>,
    /// Skeletons of template paths, `None` for the paths disabled by their
    /// conditions
    skeletons: Vec<Result<Option<TemplateSkeleton>, Error>>,
    /// `(path, output)` pairs embedding contracts which never terminate
    non_terminating: HashSet<(usize, usize)>,
}

struct Run<'compiler> {
    compiler: &'compiler Compiler,
    failed: HashMap<ContractKey, Vec<Diagnostic>>,
    /// Instances being compiled: the current one and all its ancestors
    expanded: HashSet<ContractKey>,
}

impl<'compiler> Run<'compiler> {
    /// Runs path builders of the instance and collects nested instances
    /// which must be compiled before it.
    fn expand(&self, instance: Arc<ContractInstance>) -> (Expansion, Vec<Arc<ContractInstance>>) {
        let definition = instance.definition();
        let fields = instance.fields();

        let clauses = definition
            .auth_paths()
            .iter()
            .map(|path| path.build(fields))
            .collect::<Vec<_>>();
        let skeletons = definition
            .template_paths()
            .iter()
            .map(|path| {
                if !path.is_enabled(fields)? {
                    return Ok(None);
                }
                let mut skeleton = TemplateSkeleton::new();
                path.build(fields, &mut skeleton).map(|_| Some(skeleton))
            })
            .collect::<Vec<_>>();

        let too_deep = self.expanded.len() >= self.compiler.config.max_depth;
        let mut non_terminating = HashSet::new();
        let mut seen = HashSet::new();
        let mut children = vec![];
        for (path_no, skeleton) in skeletons.iter().enumerate() {
            let Ok(Some(skeleton)) = skeleton else { continue };
            for (output_no, output) in skeleton.outputs().iter().enumerate() {
                let ScriptSource::Contract(child) = &output.source else { continue };
                let key = child.key();
                if too_deep || self.expanded.contains(&key) {
                    non_terminating.insert((path_no, output_no));
                } else if !self.compiler.cache.contains_key(&key) &&
                    !self.failed.contains_key(&key) &&
                    seen.insert(key)
                {
                    children.push(child.clone());
                }
            }
        }

        let expansion = Expansion {
            instance,
            clauses,
            skeletons,
            non_terminating,
        };
        (expansion, children)
    }

    /// Compiles all paths of an expanded instance whose nested contracts are
    /// already processed.
    fn finalize(&self, expansion: Expansion) -> Result<CompiledContract, Vec<Diagnostic>> {
        let Expansion {
            instance,
            clauses,
            skeletons,
            non_terminating,
        } = expansion;
        let definition = instance.definition();
        let lowering = &self.compiler.config.lowering;
        let location = Location::contract(instance.name());
        let mut diagnostics = vec![];

        let mut auth_paths = vec![];
        for (path, clause) in definition.auth_paths().iter().zip(clauses) {
            match clause.and_then(|clause| lower(&clause, lowering).map_err(Error::from)) {
                Ok(script) => auth_paths.push(CompiledAuthPath {
                    name: path.name().to_owned(),
                    script,
                    is_terminal: path.is_terminal(),
                }),
                Err(err) => diagnostics.push(Diagnostic::new(location.path(path.name()), err)),
            }
        }

        let mut templates = vec![];
        let mut fundings = vec![];
        for (path_no, (path, skeleton)) in definition.template_paths().iter().zip(skeletons).enumerate() {
            let path_location = location.path(path.name());
            for guard in path.guards() {
                if definition.auth_path(guard).is_none() {
                    diagnostics.push(Diagnostic::new(
                        path_location.clone(),
                        Error::UnknownGuard(guard.clone()),
                    ));
                }
            }
            let skeleton = match skeleton {
                Ok(Some(skeleton)) => skeleton,
                Ok(None) => {
                    trace!("Template path {} is disabled", path_location);
                    continue;
                }
                Err(err) => {
                    diagnostics.push(Diagnostic::new(path_location, err));
                    continue;
                }
            };
            let outputs = (0..skeleton.outputs().len())
                .map(|output_no| non_terminating.contains(&(path_no, output_no)));
            match self.build_template(&path_location, path.name(), path.guards(), &skeleton, outputs) {
                Ok((template, funding)) => {
                    templates.push(template);
                    fundings.push(funding);
                }
                Err(errors) => diagnostics.extend(errors),
            }
        }

        for (index, err) in conservation::check_agreement(&fundings) {
            diagnostics.push(Diagnostic::new(location.path(&templates[index].name), err));
        }

        if !diagnostics.is_empty() {
            return Err(diagnostics);
        }

        CompiledContract::assemble(
            instance.key(),
            instance.name(),
            auth_paths,
            templates,
            fundings.first().copied(),
        )
        .map_err(|err| vec![Diagnostic::new(location, err)])
    }

    /// Resolves output scripts of the skeleton and builds the transaction
    /// template, checking conservation of value. Returns the template with
    /// the funding it requires.
    fn build_template(
        &self,
        location: &Location,
        name: &str,
        guards: &[String],
        skeleton: &TemplateSkeleton,
        non_terminating: impl Iterator<Item = bool>,
    ) -> Result<(CompiledTemplate, Amount), Vec<Diagnostic>> {
        if skeleton.outputs().is_empty() {
            return Err(vec![Diagnostic::new(location.clone(), Error::EmptyTemplate)]);
        }

        let config = &self.compiler.config;
        let mut diagnostics = vec![];
        let mut txouts = vec![];
        let mut nested = vec![];
        for ((output_no, output), non_terminating) in
            skeleton.outputs().iter().enumerate().zip(non_terminating)
        {
            let output_location = location.output(output_no);
            let script_pubkey = match &output.source {
                ScriptSource::PubkeyScript(script) => {
                    nested.push(None);
                    script.clone()
                }
                ScriptSource::Clause(clause) => match lower(clause, &config.lowering) {
                    Ok(script) => {
                        nested.push(None);
                        script.to_p2wsh()
                    }
                    Err(err) => {
                        diagnostics.push(Diagnostic::new(output_location, err));
                        continue;
                    }
                },
                ScriptSource::Contract(child) if non_terminating => {
                    diagnostics.push(Diagnostic::new(
                        output_location,
                        Error::NonTerminatingContract(child.name().to_owned()),
                    ));
                    continue;
                }
                ScriptSource::Contract(child) => {
                    if let Some(compiled) = self.compiler.cached(child.key()) {
                        if let Err(err) =
                            conservation::check_nested(output.amount, compiled.required_funding())
                        {
                            diagnostics.push(Diagnostic::new(output_location, err));
                            continue;
                        }
                        let script_pubkey = compiled.script_pubkey();
                        nested.push(Some(compiled));
                        script_pubkey
                    } else {
                        let failed = self.failed.get(&child.key());
                        match failed {
                            Some(errors) => diagnostics.extend(
                                errors.iter().map(|diagnostic| diagnostic.nested_under(&output_location)),
                            ),
                            None => diagnostics.push(Diagnostic::new(
                                output_location,
                                Error::NonTerminatingContract(child.name().to_owned()),
                            )),
                        }
                        continue;
                    }
                }
            };
            txouts.push(TxOut {
                value: output.amount.to_sat(),
                script_pubkey,
            });
        }
        if !diagnostics.is_empty() {
            return Err(diagnostics);
        }

        let at_path = |err: Error| vec![Diagnostic::new(location.clone(), err)];
        let fee = skeleton.fee().unwrap_or(config.fee_policy.min_fee);
        let funding = conservation::template_funding(
            skeleton.outputs().iter().map(|output| output.amount),
            fee,
            &config.fee_policy,
        )
        .map_err(at_path)?;

        let mut template = TransactionTemplate::with(txouts);
        template
            .set_lock_time(skeleton.lock_time())
            .map_err(|err| at_path(err.into()))?;
        if let Some(lock) = skeleton.relative_lock() {
            template
                .set_relative_lock(lock)
                .map_err(|err| at_path(err.into()))?;
        }
        let ctv_hash = template.ctv_hash();
        trace!("Template {} has CTV hash {}", location, ctv_hash);

        Ok((
            CompiledTemplate {
                name: name.to_owned(),
                template,
                ctv_hash,
                fee,
                guards: guards.to_vec(),
                nested,
            },
            funding,
        ))
    }
}
