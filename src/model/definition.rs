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

use std::collections::BTreeSet;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin_clause::{Clause, TimeSpec};

use super::field::encode_bytes;
use super::{ContractInstance, FieldType, Fields, Value};
use crate::skeleton::TemplateSkeleton;
use crate::Error;

/// Function producing authorization clause from the contract fields.
pub type AuthBuilder = Box<dyn Fn(&Fields) -> Result<Clause, Error> + Send + Sync>;

/// Function filling transaction skeleton from the contract fields.
pub type SkeletonBuilder =
    Box<dyn Fn(&Fields, &mut TemplateSkeleton) -> Result<(), Error> + Send + Sync>;

/// Predicate deciding whether a template path is compiled for the given
/// fields.
pub type PathCondition = Box<dyn Fn(&Fields) -> Result<bool, Error> + Send + Sync>;

static NEXT_DEFINITION_ID: AtomicU64 = AtomicU64::new(0);

/// Spending path requiring authorization only.
pub struct AuthPath {
    name: String,
    terminal: bool,
    builder: AuthBuilder,
}

impl Debug for AuthPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthPath")
            .field("name", &self.name)
            .field("terminal", &self.terminal)
            .finish()
    }
}

impl AuthPath {
    #[inline]
    pub fn name(&self) -> &str { &self.name }

    /// Terminal paths are spending branches on their own; non-terminal
    /// (guard) paths only restrict template paths.
    #[inline]
    pub fn is_terminal(&self) -> bool { self.terminal }

    #[inline]
    pub fn build(&self, fields: &Fields) -> Result<Clause, Error> { (self.builder)(fields) }
}

/// Spending path mandating a specific next transaction.
pub struct TemplatePath {
    name: String,
    timelock: Option<TimeSpec>,
    guards: Vec<String>,
    conditions: Vec<PathCondition>,
    builder: SkeletonBuilder,
}

impl Debug for TemplatePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplatePath")
            .field("name", &self.name)
            .field("timelock", &self.timelock)
            .field("guards", &self.guards)
            .field("conditions", &self.conditions.len())
            .finish()
    }
}

impl TemplatePath {
    /// Declares template path with the given skeleton builder.
    pub fn new(
        name: impl ToString,
        builder: impl Fn(&Fields, &mut TemplateSkeleton) -> Result<(), Error> + Send + Sync + 'static,
    ) -> TemplatePath {
        TemplatePath {
            name: name.to_string(),
            timelock: None,
            guards: vec![],
            conditions: vec![],
            builder: Box::new(builder),
        }
    }

    /// Requires the transaction to be time locked.
    pub fn timelock(mut self, spec: impl Into<TimeSpec>) -> TemplatePath {
        self.timelock = Some(spec.into());
        self
    }

    /// Requires the guard authorization path to be satisfied together with
    /// the template commitment.
    pub fn guarded_by(mut self, guard: impl ToString) -> TemplatePath {
        self.guards.push(guard.to_string());
        self
    }

    /// Compiles the path only for fields satisfying the predicate. With
    /// several predicates all of them must hold; a disabled path is not a
    /// spending branch of the contract.
    pub fn enabled_if(
        mut self,
        condition: impl Fn(&Fields) -> Result<bool, Error> + Send + Sync + 'static,
    ) -> TemplatePath {
        self.conditions.push(Box::new(condition));
        self
    }

    #[inline]
    pub fn name(&self) -> &str { &self.name }

    /// Evaluates path conditions.
    pub fn is_enabled(&self, fields: &Fields) -> Result<bool, Error> {
        for condition in &self.conditions {
            if !condition(fields)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    #[inline]
    pub fn declared_timelock(&self) -> Option<TimeSpec> { self.timelock }

    #[inline]
    pub fn guards(&self) -> &[String] { &self.guards }

    /// Builds transaction skeleton, applying the declared time lock first.
    pub fn build(&self, fields: &Fields, skeleton: &mut TemplateSkeleton) -> Result<(), Error> {
        if let Some(spec) = self.timelock {
            skeleton.set_timelock(spec)?;
        }
        (self.builder)(fields, skeleton)
    }
}

/// Named contract schema: ordered fields, authorization and template paths.
///
/// Builders are opaque, so each registration is a distinct definition, even
/// if its declarations repeat those of another one. Definitions meant to be
/// memoized across instances must be registered once and shared.
#[derive(Debug)]
pub struct ContractDefinition {
    id: u64,
    name: String,
    fields: Vec<(String, FieldType)>,
    auth_paths: Vec<AuthPath>,
    template_paths: Vec<TemplatePath>,
    fingerprint: sha256::Hash,
    duplicate: Option<String>,
}

impl ContractDefinition {
    /// Starts registration of a new contract definition.
    #[inline]
    pub fn with(name: impl ToString) -> DefinitionBuilder {
        DefinitionBuilder {
            name: name.to_string(),
            fields: vec![],
            auth_paths: vec![],
            template_paths: vec![],
        }
    }

    /// Registration number, unique within the process.
    #[inline]
    pub fn id(&self) -> u64 { self.id }

    #[inline]
    pub fn name(&self) -> &str { &self.name }

    #[inline]
    pub fn fields(&self) -> &[(String, FieldType)] { &self.fields }

    #[inline]
    pub fn auth_paths(&self) -> &[AuthPath] { &self.auth_paths }

    #[inline]
    pub fn template_paths(&self) -> &[TemplatePath] { &self.template_paths }

    /// Commitment to the declarations of the definition.
    #[inline]
    pub fn fingerprint(&self) -> sha256::Hash { self.fingerprint }

    /// Returns guard or terminal authorization path by its name.
    pub fn auth_path(&self, name: &str) -> Option<&AuthPath> {
        self.auth_paths.iter().find(|path| path.name == name)
    }

    /// Binds field values to the definition, checking them against the
    /// declarations.
    pub fn instantiate<N: ToString>(
        self: &Arc<Self>,
        values: impl IntoIterator<Item = (N, Value)>,
    ) -> Result<Arc<ContractInstance>, Error> {
        if let Some(name) = &self.duplicate {
            return Err(Error::DuplicateDeclaration(name.clone()));
        }
        let mut bound = bmap! {};
        for (name, value) in values {
            let name = name.to_string();
            if bound.contains_key(&name) {
                return Err(Error::DuplicateDeclaration(name));
            }
            let (_, ty) = self
                .fields
                .iter()
                .find(|(field, _)| *field == name)
                .ok_or_else(|| Error::UnknownField(name.clone()))?;
            value.type_check(ty, &name)?;
            bound.insert(name, value);
        }
        if let Some((name, _)) = self.fields.iter().find(|(name, _)| !bound.contains_key(name)) {
            return Err(Error::MissingField(name.clone()));
        }
        Ok(Arc::new(ContractInstance::new(self.clone(), Fields::with(bound))))
    }
}

/// Registration API for [`ContractDefinition`].
pub struct DefinitionBuilder {
    name: String,
    fields: Vec<(String, FieldType)>,
    auth_paths: Vec<AuthPath>,
    template_paths: Vec<TemplatePath>,
}

impl DefinitionBuilder {
    pub fn field(mut self, name: impl ToString, ty: FieldType) -> Self {
        self.fields.push((name.to_string(), ty));
        self
    }

    /// Adds terminal authorization path.
    pub fn auth_path(
        mut self,
        name: impl ToString,
        builder: impl Fn(&Fields) -> Result<Clause, Error> + Send + Sync + 'static,
    ) -> Self {
        self.auth_paths.push(AuthPath {
            name: name.to_string(),
            terminal: true,
            builder: Box::new(builder),
        });
        self
    }

    /// Adds guard: authorization path which can't be used to spend on its
    /// own and may only restrict template paths.
    pub fn guard(
        mut self,
        name: impl ToString,
        builder: impl Fn(&Fields) -> Result<Clause, Error> + Send + Sync + 'static,
    ) -> Self {
        self.auth_paths.push(AuthPath {
            name: name.to_string(),
            terminal: false,
            builder: Box::new(builder),
        });
        self
    }

    pub fn template(mut self, path: TemplatePath) -> Self {
        self.template_paths.push(path);
        self
    }

    pub fn finish(self) -> Arc<ContractDefinition> {
        let mut engine = sha256::Hash::engine();
        encode_bytes(&mut engine, self.name.as_bytes());
        engine.input(&(self.fields.len() as u32).to_le_bytes());
        for (name, ty) in &self.fields {
            encode_bytes(&mut engine, name.as_bytes());
            encode_bytes(&mut engine, ty.to_string().as_bytes());
        }
        engine.input(&(self.auth_paths.len() as u32).to_le_bytes());
        for path in &self.auth_paths {
            encode_bytes(&mut engine, path.name.as_bytes());
            engine.input(&[path.terminal as u8]);
        }
        engine.input(&(self.template_paths.len() as u32).to_le_bytes());
        for path in &self.template_paths {
            encode_bytes(&mut engine, path.name.as_bytes());
            let timelock = path.timelock.map(|spec| spec.to_string()).unwrap_or_default();
            encode_bytes(&mut engine, timelock.as_bytes());
            engine.input(&(path.guards.len() as u32).to_le_bytes());
            for guard in &path.guards {
                encode_bytes(&mut engine, guard.as_bytes());
            }
            engine.input(&(path.conditions.len() as u32).to_le_bytes());
        }

        let mut fields = BTreeSet::new();
        let mut paths = BTreeSet::new();
        let duplicate = self
            .fields
            .iter()
            .map(|(name, _)| name)
            .find(|name| !fields.insert(*name))
            .or_else(|| {
                self.auth_paths
                    .iter()
                    .map(|path| &path.name)
                    .chain(self.template_paths.iter().map(|path| &path.name))
                    .find(|name| !paths.insert(*name))
            })
            .cloned();

        Arc::new(ContractDefinition {
            id: NEXT_DEFINITION_ID.fetch_add(1, Ordering::Relaxed),
            name: self.name,
            fields: self.fields,
            auth_paths: self.auth_paths,
            template_paths: self.template_paths,
            fingerprint: sha256::Hash::from_engine(engine),
            duplicate,
        })
    }
}
