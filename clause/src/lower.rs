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

//! Lowering of clauses into bitcoin script.
//!
//! Lowering is done in two steps. First, the clause is normalized into a
//! disjunction of spending [`Branch`]es, each being a conjunction of
//! [`Condition`]s:
//! - signature-only thresholds, conjunctions and disjunctions are flattened
//!   into a single `OP_CHECKMULTISIG`;
//! - other conjunctions are multiplied out, disjunctions become separate
//!   branches;
//! - mixed thresholds are expanded into all k-of-n combinations when their
//!   number is within [`LoweringConfig::max_threshold_combinations`], and
//!   otherwise into a native `OP_ADD`-based threshold check, which is
//!   possible only for signatures and hash locks.
//!
//! Second, each branch is emitted as a sequence of verifying checks ending
//! with a single boolean check, and branches are nested into an
//! `OP_IF`/`OP_ELSE` chain selected by the witness.
//!
//! The result is fully determined by the clause value and the configuration:
//! keys inside multisigs, conditions inside branches and branches themselves
//! are put into a canonical order.

use std::fmt::{self, Display, Formatter};

use bitcoin::blockdata::opcodes::all::*;
use bitcoin::blockdata::script::{Builder, Script};
use bitcoin::PublicKey;

use crate::eval::{self, EvalError, SpendContext};
use crate::hlc::{HashLock, PREIMAGE_LEN};
use crate::locks::{LockTime, RelativeLock};
use crate::{Clause, Complexity, LowerError};

/// Default limit for the number of k-of-n combinations a mixed threshold may
/// expand into.
pub const DEFAULT_MAX_THRESHOLD_COMBINATIONS: usize = 32;
/// Default limit for the number of spending branches in a single script.
pub const DEFAULT_MAX_BRANCHES: usize = 64;
/// Consensus limit on the number of keys in `OP_CHECKMULTISIG`.
pub const MAX_MULTISIG_KEYS: usize = 20;

/// Limits applied during clause lowering.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", default)
)]
pub struct LoweringConfig {
    /// Maximal number of k-of-n combinations into which a threshold over
    /// mixed conditions is expanded. Above it a native threshold check is
    /// emitted, if possible.
    pub max_threshold_combinations: usize,

    /// Maximal number of alternative spending branches in one script.
    pub max_branches: usize,

    /// Maximal number of keys flattened into a single `OP_CHECKMULTISIG`.
    pub max_multisig_keys: usize,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        LoweringConfig {
            max_threshold_combinations: DEFAULT_MAX_THRESHOLD_COMBINATIONS,
            max_branches: DEFAULT_MAX_BRANCHES,
            max_multisig_keys: MAX_MULTISIG_KEYS,
        }
    }
}

/// Atomic check inside a spending branch.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Condition {
    /// Single signature check
    Key(PublicKey),

    /// Native k-of-n `OP_CHECKMULTISIG`; keys are in lexicographic order
    Multi(usize, Vec<PublicKey>),

    /// `OP_CHECKLOCKTIMEVERIFY`
    After(LockTime),

    /// `OP_CHECKSEQUENCEVERIFY`
    Older(RelativeLock),

    /// SHA256 preimage check
    Preimage(HashLock),

    /// Native threshold summing results of signature and hash checks
    Thresh(usize, Vec<Condition>),
}

impl Condition {
    fn rank(&self) -> u8 {
        match self {
            Condition::After(_) => 0,
            Condition::Older(_) => 1,
            Condition::Preimage(_) => 2,
            Condition::Multi(..) => 3,
            Condition::Key(_) => 4,
            Condition::Thresh(..) => 5,
        }
    }

    /// Time locks do not leave a boolean on the stack.
    #[inline]
    pub fn is_timelock(&self) -> bool {
        matches!(self, Condition::After(_) | Condition::Older(_))
    }

    fn sort_key(&self) -> (u8, Vec<u8>) {
        (self.rank(), self.emit(Builder::new(), false).into_script().into_bytes())
    }

    fn emit(&self, builder: Builder, verify: bool) -> Builder {
        match self {
            Condition::Key(key) => builder.push_key(key).push_opcode(if verify {
                OP_CHECKSIGVERIFY
            } else {
                OP_CHECKSIG
            }),
            Condition::Multi(k, keys) => keys
                .iter()
                .fold(builder.push_int(*k as i64), |builder, key| builder.push_key(key))
                .push_int(keys.len() as i64)
                .push_opcode(if verify {
                    OP_CHECKMULTISIGVERIFY
                } else {
                    OP_CHECKMULTISIG
                }),
            Condition::After(lock_time) => builder
                .push_int(lock_time.into_consensus() as i64)
                .push_opcode(OP_CLTV)
                .push_opcode(OP_DROP),
            Condition::Older(lock) => builder
                .push_int(lock.to_sequence() as i64)
                .push_opcode(OP_CSV)
                .push_opcode(OP_DROP),
            Condition::Preimage(lock) => builder
                .push_opcode(OP_SIZE)
                .push_int(PREIMAGE_LEN as i64)
                .push_opcode(OP_EQUALVERIFY)
                .push_opcode(OP_SHA256)
                .push_slice(&lock.to_byte_array())
                .push_opcode(if verify { OP_EQUALVERIFY } else { OP_EQUAL }),
            Condition::Thresh(k, subs) => {
                let mut builder = builder;
                for (index, sub) in subs.iter().enumerate() {
                    if index > 0 {
                        builder = sub.emit(builder.push_opcode(OP_SWAP), false).push_opcode(OP_ADD);
                    } else {
                        builder = sub.emit(builder, false);
                    }
                }
                builder
                    .push_int(*k as i64)
                    .push_opcode(if verify { OP_EQUALVERIFY } else { OP_EQUAL })
            }
        }
    }

    /// Witness elements consumed by the condition, bottom to top. Conditions
    /// which can't be satisfied within the context receive dissatisfying
    /// placeholders, so the witness always has the right shape.
    fn witness(&self, ctx: &SpendContext) -> Vec<Vec<u8>> {
        match self {
            Condition::Key(key) => vec![ctx.signature(key).unwrap_or_default()],
            Condition::Multi(k, keys) => {
                let mut sigs = keys
                    .iter()
                    .filter_map(|key| ctx.signature(key))
                    .take(*k)
                    .collect::<Vec<_>>();
                sigs.resize(*k, vec![]);
                let mut witness = vec![vec![]];
                witness.extend(sigs);
                witness
            }
            Condition::After(_) | Condition::Older(_) => vec![],
            Condition::Preimage(lock) => vec![ctx
                .preimage(lock)
                .map(|preimage| preimage.to_byte_array().to_vec())
                .unwrap_or_else(|| vec![0u8; PREIMAGE_LEN])],
            Condition::Thresh(k, subs) => {
                let mut satisfied = 0usize;
                let mut witness = subs
                    .iter()
                    .map(|sub| {
                        let satisfiable = match sub {
                            Condition::Key(key) => ctx.signers.contains(key),
                            Condition::Preimage(lock) => ctx.preimages.contains_key(lock),
                            _ => false,
                        };
                        if satisfiable && satisfied < *k {
                            satisfied += 1;
                            sub.witness(ctx)
                        } else {
                            sub.dissatisfaction()
                        }
                    })
                    .collect::<Vec<_>>();
                // first sub-condition consumes the top of the stack
                witness.reverse();
                witness.into_iter().flatten().collect()
            }
        }
    }

    fn dissatisfaction(&self) -> Vec<Vec<u8>> {
        match self {
            Condition::Preimage(_) => vec![vec![0u8; PREIMAGE_LEN]],
            _ => vec![vec![]],
        }
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Key(key) => write!(f, "pk({})", key),
            Condition::Multi(k, keys) => {
                write!(f, "multi({}", k)?;
                for key in keys {
                    write!(f, ",{}", key)?;
                }
                f.write_str(")")
            }
            Condition::After(lock_time) => write!(f, "after({})", lock_time),
            Condition::Older(lock) => write!(f, "older({})", lock),
            Condition::Preimage(lock) => write!(f, "sha256({})", lock),
            Condition::Thresh(k, subs) => {
                write!(f, "thresh({}", k)?;
                for sub in subs {
                    write!(f, ",{}", sub)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Conjunction of conditions forming one spending branch of a script.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Branch(Vec<Condition>);

impl Branch {
    #[inline]
    pub fn conditions(&self) -> &[Condition] { &self.0 }

    /// Combines two conjunctions, merging time locks of the same kind and
    /// putting conditions into canonical order.
    fn join(&self, other: &Branch) -> Result<Branch, LowerError> {
        let mut after: Option<LockTime> = None;
        let mut older: Option<RelativeLock> = None;
        let mut conditions = Vec::with_capacity(self.0.len() + other.0.len());
        for condition in self.0.iter().chain(&other.0) {
            match condition {
                Condition::After(lock_time) => {
                    after = Some(match after {
                        Some(prev) => prev.merge(*lock_time)?,
                        None => *lock_time,
                    })
                }
                Condition::Older(lock) => {
                    older = Some(match older {
                        Some(prev) => prev.merge(*lock)?,
                        None => *lock,
                    })
                }
                condition if !conditions.contains(condition) => conditions.push(condition.clone()),
                _ => {}
            }
        }
        conditions.extend(after.map(Condition::After));
        conditions.extend(older.map(Condition::Older));
        conditions.sort_by_cached_key(Condition::sort_key);
        Ok(Branch(conditions))
    }

    fn emit(&self, builder: Builder) -> Builder {
        let checks = self.0.iter().filter(|condition| !condition.is_timelock()).count();
        let mut builder = builder;
        let mut emitted = 0usize;
        for condition in &self.0 {
            if condition.is_timelock() {
                builder = condition.emit(builder, true);
            } else {
                emitted += 1;
                builder = condition.emit(builder, emitted < checks);
            }
        }
        if checks == 0 {
            builder = builder.push_int(1);
        }
        builder
    }

    fn witness(&self, ctx: &SpendContext) -> Vec<Vec<u8>> {
        self.0
            .iter()
            .rev()
            .flat_map(|condition| condition.witness(ctx))
            .collect()
    }
}

impl Display for Branch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut iter = self.0.iter();
        if let Some(first) = iter.next() {
            Display::fmt(first, f)?;
        }
        for condition in iter {
            f.write_str(" && ")?;
            Display::fmt(condition, f)?;
        }
        Ok(())
    }
}

/// Branch-selecting witness elements (bottom to top) for the branch `index`
/// out of `count` branches nested into an `OP_IF`/`OP_ELSE` chain.
pub fn branch_selector(index: usize, count: usize) -> Vec<Vec<u8>> {
    if count <= 1 {
        return vec![];
    }
    let mut decisions = vec![vec![]; index.min(count - 1)];
    if index < count - 1 {
        decisions.push(vec![1]);
    }
    // first decision is consumed by the outermost `OP_IF` and must be on top
    decisions.reverse();
    decisions
}

/// Emits alternatives into a nested `OP_IF`/`OP_ELSE` chain.
pub fn emit_alternatives<'a>(
    builder: Builder,
    alternatives: impl IntoIterator<Item = &'a Script>,
) -> Builder {
    let alternatives = alternatives.into_iter().collect::<Vec<_>>();
    let count = alternatives.len();
    let mut builder = builder;
    for (index, script) in alternatives.into_iter().enumerate() {
        if index + 1 < count {
            builder = builder.push_opcode(OP_IF);
        }
        builder = append(builder, script);
        if index + 1 < count {
            builder = builder.push_opcode(OP_ELSE);
        }
    }
    for _ in 1..count {
        builder = builder.push_opcode(OP_ENDIF);
    }
    builder
}

/// Appends raw script to the builder.
pub fn append(builder: Builder, script: &Script) -> Builder {
    let mut bytes = builder.into_script().into_bytes();
    bytes.extend_from_slice(script.as_bytes());
    Builder::from(bytes)
}

/// Result of clause lowering: the script and its spending branches.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CompiledScript {
    script: Script,
    branches: Vec<Branch>,
}

impl Display for CompiledScript {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            Display::fmt(&self.script, f)
        } else {
            let mut iter = self.branches.iter();
            if let Some(first) = iter.next() {
                Display::fmt(first, f)?;
            }
            for branch in iter {
                f.write_str(" || ")?;
                Display::fmt(branch, f)?;
            }
            Ok(())
        }
    }
}

impl CompiledScript {
    #[inline]
    pub fn script(&self) -> &Script { &self.script }

    #[inline]
    pub fn into_script(self) -> Script { self.script }

    #[inline]
    pub fn branches(&self) -> &[Branch] { &self.branches }

    #[inline]
    pub fn branch_count(&self) -> usize { self.branches.len() }

    /// P2WSH `scriptPubkey` committing to this script.
    #[inline]
    pub fn to_p2wsh(&self) -> Script { Script::new_v0_p2wsh(&self.script.wscript_hash()) }

    /// Builds the witness stack (bottom to top, without the witness script
    /// itself) spending through the given branch. Returns `None` if there is
    /// no such branch. Unsatisfiable conditions receive placeholders; use
    /// [`CompiledScript::satisfy`] to get a witness which actually passes.
    pub fn branch_witness(&self, index: usize, ctx: &SpendContext) -> Option<Vec<Vec<u8>>> {
        let branch = self.branches.get(index)?;
        let mut witness = branch.witness(ctx);
        witness.extend(branch_selector(index, self.branches.len()));
        Some(witness)
    }

    /// Finds the first branch spendable within the context and returns its
    /// witness stack.
    pub fn satisfy(&self, ctx: &SpendContext) -> Option<(usize, Vec<Vec<u8>>)> {
        (0..self.branches.len()).find_map(|index| {
            let witness = self.branch_witness(index, ctx)?;
            self.evaluate(&witness, ctx).ok().map(|_| (index, witness))
        })
    }

    /// Dry-runs the script with the given witness.
    #[inline]
    pub fn evaluate(&self, witness: &[Vec<u8>], ctx: &SpendContext) -> Result<(), EvalError> {
        eval::execute(&self.script, witness, ctx)
    }
}

/// Lowers clause into script.
pub fn lower(clause: &Clause, config: &LoweringConfig) -> Result<CompiledScript, LowerError> {
    clause.validate()?;
    let mut branches = Lowering { config }.normalize(clause)?;
    branches.sort_by_cached_key(|branch| branch.emit(Builder::new()).into_script().into_bytes());
    branches.dedup();

    let scripts = branches
        .iter()
        .map(|branch| branch.emit(Builder::new()).into_script())
        .collect::<Vec<_>>();
    let script = emit_alternatives(Builder::new(), &scripts).into_script();
    debug!("Clause {} lowered into {} spending branch(es)", clause, branches.len());
    trace!("Lowered script: {}", script);

    Ok(CompiledScript { script, branches })
}

struct Lowering<'config> {
    config: &'config LoweringConfig,
}

impl<'config> Lowering<'config> {
    fn normalize(&self, clause: &Clause) -> Result<Vec<Branch>, LowerError> {
        if let Some(condition) = self.flatten_multisig(clause) {
            return Ok(vec![Branch(vec![condition])]);
        }
        match clause {
            Clause::Signature(key) => Ok(vec![Branch(vec![Condition::Key(*key)])]),
            Clause::AbsoluteTimelock(lock_time) => Ok(vec![Branch(vec![Condition::After(*lock_time)])]),
            Clause::RelativeTimelock(lock) => Ok(vec![Branch(vec![Condition::Older(*lock)])]),
            Clause::HashPreimage(lock) => Ok(vec![Branch(vec![Condition::Preimage(*lock)])]),
            Clause::And(a, b) => self.product(&self.normalize(a)?, &self.normalize(b)?),
            Clause::Or(a, b) => {
                let mut branches = self.normalize(a)?;
                branches.extend(self.normalize(b)?);
                self.check_branches(branches.len())?;
                Ok(branches)
            }
            Clause::Threshold(k, clauses) => self.threshold(*k, clauses),
        }
    }

    fn threshold(&self, k: usize, clauses: &[Clause]) -> Result<Vec<Branch>, LowerError> {
        let n = clauses.len();
        let combinations = binomial(n as u64, k as u64);
        if combinations <= self.config.max_threshold_combinations as u64 {
            let normalized = clauses
                .iter()
                .map(|clause| self.normalize(clause))
                .collect::<Result<Vec<_>, _>>()?;
            let mut branches = vec![];
            for selection in Combinations::new(n, k) {
                let mut acc = vec![Branch::default()];
                for index in selection {
                    acc = self.product(&acc, &normalized[index])?;
                }
                branches.extend(acc);
                self.check_branches(branches.len())?;
            }
            return Ok(branches);
        }

        let subs = clauses
            .iter()
            .map(|clause| match clause {
                Clause::Signature(key) => Some(Condition::Key(*key)),
                Clause::HashPreimage(lock) => Some(Condition::Preimage(*lock)),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .ok_or(Complexity::MixedThreshold {
                k,
                n,
                combinations,
                limit: self.config.max_threshold_combinations,
            })?;
        Ok(vec![Branch(vec![Condition::Thresh(k, subs)])])
    }

    fn product(&self, left: &[Branch], right: &[Branch]) -> Result<Vec<Branch>, LowerError> {
        self.check_branches(left.len().saturating_mul(right.len()))?;
        let mut branches = Vec::with_capacity(left.len() * right.len());
        for a in left {
            for b in right {
                branches.push(a.join(b)?);
            }
        }
        Ok(branches)
    }

    fn check_branches(&self, count: usize) -> Result<(), LowerError> {
        if count > self.config.max_branches {
            return Err(Complexity::TooManyBranches(self.config.max_branches).into());
        }
        Ok(())
    }

    /// Detects signature-only thresholds, conjunctions and disjunctions
    /// which can be checked by a single `OP_CHECKMULTISIG`.
    fn flatten_multisig(&self, clause: &Clause) -> Option<Condition> {
        let (k, mut keys) = match clause {
            Clause::Threshold(k, clauses) => {
                let keys = clauses
                    .iter()
                    .map(|clause| match clause {
                        Clause::Signature(key) => Some(*key),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()?;
                (*k, keys)
            }
            Clause::And(..) => {
                let keys = chain_keys(clause, true)?;
                (keys.len(), keys)
            }
            Clause::Or(..) => (1, chain_keys(clause, false)?),
            _ => return None,
        };
        let n = keys.len();
        if k == 0 || k > n || n > self.config.max_multisig_keys.min(MAX_MULTISIG_KEYS) {
            return None;
        }
        keys.sort_by_key(|key| key.to_bytes());
        if keys.windows(2).any(|pair| pair[0] == pair[1]) {
            return None;
        }
        if n == 1 {
            return Some(Condition::Key(keys[0]));
        }
        Some(Condition::Multi(k, keys))
    }
}

/// Collects signature keys from a homogeneous chain of conjunctions
/// (`conjunction = true`) or disjunctions.
fn chain_keys(clause: &Clause, conjunction: bool) -> Option<Vec<PublicKey>> {
    let mut keys = vec![];
    let mut pending = vec![clause];
    while let Some(clause) = pending.pop() {
        match (clause, conjunction) {
            (Clause::Signature(key), _) => keys.push(*key),
            (Clause::And(a, b), true) | (Clause::Or(a, b), false) => {
                pending.push(b);
                pending.push(a);
            }
            _ => return None,
        }
    }
    Some(keys)
}

fn binomial(n: u64, k: u64) -> u64 {
    let k = k.min(n - k.min(n));
    let mut acc = 1u64;
    for i in 0..k {
        acc = match acc.checked_mul(n - i) {
            Some(value) => value / (i + 1),
            None => return u64::MAX,
        };
    }
    acc
}

/// Iterator over k-element index selections out of `0..n` in lexicographic
/// order.
struct Combinations {
    n: usize,
    indexes: Vec<usize>,
    done: bool,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        Combinations {
            n,
            indexes: (0..k).collect(),
            done: k > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = self.indexes.clone();
        let k = self.indexes.len();
        let mut pos = k;
        loop {
            if pos == 0 {
                self.done = true;
                break;
            }
            pos -= 1;
            if self.indexes[pos] < self.n - k + pos {
                self.indexes[pos] += 1;
                for next in pos + 1..k {
                    self.indexes[next] = self.indexes[next - 1] + 1;
                }
                break;
            }
        }
        Some(current)
    }
}

#[cfg(test)]
mod test {
    use bitcoin::hashes::{sha256, Hash};
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    use super::*;
    use crate::hlc::HashPreimage;

    fn key(no: u8) -> PublicKey {
        let secp = Secp256k1::signing_only();
        let sk = SecretKey::from_slice(&[no; 32]).unwrap();
        PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk))
    }

    fn sig(no: u8) -> Clause { Clause::signature(key(no)) }

    fn preimage(no: u8) -> HashPreimage { HashPreimage::from([no; 32]) }

    fn compile(clause: &Clause) -> CompiledScript {
        lower(clause, &LoweringConfig::default()).unwrap()
    }

    /// All spending contexts built from subsets of the given signers,
    /// preimages and the given lock time / sequence variants.
    fn contexts(keys: &[PublicKey], preimages: &[HashPreimage], times: &[(u32, u32)]) -> Vec<SpendContext> {
        let items = keys.len() + preimages.len();
        let mut contexts = vec![];
        for mask in 0u32..(1 << items) {
            for (lock_time, sequence) in times {
                let mut ctx = SpendContext {
                    lock_time: *lock_time,
                    sequence: *sequence,
                    ..default!()
                };
                for (index, key) in keys.iter().enumerate() {
                    if mask & (1 << index) != 0 {
                        ctx.signers.insert(*key);
                    }
                }
                for (index, preimage) in preimages.iter().enumerate() {
                    if mask & (1 << (keys.len() + index)) != 0 {
                        ctx = ctx.with_preimage(*preimage);
                    }
                }
                contexts.push(ctx);
            }
        }
        contexts
    }

    /// Checks that the script can be spent exactly in those contexts which
    /// satisfy the clause.
    fn check_equivalence(clause: &Clause, contexts: &[SpendContext]) {
        let compiled = compile(clause);
        for ctx in contexts {
            let expected = clause.is_satisfied(ctx);
            let spendable = (0..compiled.branch_count()).any(|index| {
                let witness = compiled.branch_witness(index, ctx).unwrap();
                compiled.evaluate(&witness, ctx).is_ok()
            });
            assert_eq!(spendable, expected, "clause {} in context {:?}", clause, ctx);
            assert_eq!(compiled.satisfy(ctx).is_some(), expected);
        }
    }

    #[test]
    fn single_signature() {
        let compiled = compile(&sig(1));
        assert_eq!(compiled.branch_count(), 1);
        assert_eq!(
            compiled.script(),
            &Builder::new()
                .push_key(&key(1))
                .push_opcode(OP_CHECKSIG)
                .into_script()
        );
        check_equivalence(&sig(1), &contexts(&[key(1), key(2)], &[], &[(0, u32::MAX)]));
    }

    #[test]
    fn multisig_flattening() {
        let two_of_three = Clause::threshold(2, vec![sig(3), sig(1), sig(2)]).unwrap();
        let compiled = compile(&two_of_three);
        assert_eq!(compiled.branch_count(), 1);
        let mut keys = vec![key(1), key(2), key(3)];
        keys.sort_by_key(|key| key.to_bytes());
        assert_eq!(compiled.branches()[0].conditions(), &[Condition::Multi(2, keys.clone())]);
        check_equivalence(&two_of_three, &contexts(&keys, &[], &[(0, u32::MAX)]));

        let both = Clause::and_of(sig(1), Clause::and_of(sig(2), sig(3)));
        assert_eq!(compile(&both).branches()[0].conditions(), &[Condition::Multi(3, keys.clone())]);
        check_equivalence(&both, &contexts(&keys, &[], &[(0, u32::MAX)]));

        let either = Clause::or_of(sig(1), Clause::or_of(sig(2), sig(3)));
        assert_eq!(compile(&either).branches()[0].conditions(), &[Condition::Multi(1, keys.clone())]);
        check_equivalence(&either, &contexts(&keys, &[], &[(0, u32::MAX)]));
    }

    #[test]
    fn multisig_key_limit() {
        let config = LoweringConfig {
            max_multisig_keys: 100,
            ..default!()
        };
        let all = Clause::all_of((1..=21).map(sig)).unwrap();
        let compiled = lower(&all, &config).unwrap();
        assert!(!compiled.branches()[0]
            .conditions()
            .iter()
            .any(|condition| matches!(condition, Condition::Multi(_, keys) if keys.len() > MAX_MULTISIG_KEYS)));

        let ctx = (1..=21).fold(SpendContext::default(), |ctx, no| ctx.with_signer(key(no)));
        let (_, witness) = compiled.satisfy(&ctx).unwrap();
        assert_eq!(compiled.evaluate(&witness, &ctx), Ok(()));
    }

    #[test]
    fn escrow_branches() {
        // escrow and (alice or bob)
        let clause = Clause::and_of(sig(3), Clause::or_of(sig(1), sig(2)));
        let compiled = compile(&clause);
        assert_eq!(compiled.branch_count(), 1);
        assert!(matches!(compiled.branches()[0].conditions(), [Condition::Multi(1, _), Condition::Key(_)]));
        check_equivalence(&clause, &contexts(&[key(1), key(2), key(3)], &[], &[(0, u32::MAX)]));

        // escrow and (alice or older(10))
        let clause = Clause::and_of(sig(3), Clause::or_of(sig(1), Clause::older(RelativeLock::Height(10))));
        assert_eq!(compile(&clause).branch_count(), 2);
        check_equivalence(&clause, &contexts(&[key(1), key(3)], &[], &[(0, u32::MAX), (0, 10)]));
    }

    #[test]
    fn timelocks() {
        let after = LockTime::from_height(500).unwrap();
        let clause = Clause::or_of(
            Clause::and_of(sig(1), sig(2)),
            Clause::and_of(sig(1), Clause::older(RelativeLock::Height(144))),
        );
        let times = [(0, u32::MAX), (0, 143), (0, 144)];
        check_equivalence(&clause, &contexts(&[key(1), key(2)], &[], &times));

        let clause = Clause::and_of(Clause::after(after), Clause::older(RelativeLock::Height(10)));
        let compiled = compile(&clause);
        assert_eq!(
            compiled.script(),
            &Builder::new()
                .push_int(500)
                .push_opcode(OP_CLTV)
                .push_opcode(OP_DROP)
                .push_int(10)
                .push_opcode(OP_CSV)
                .push_opcode(OP_DROP)
                .push_int(1)
                .into_script()
        );
        let times = [(499, 10), (500, 9), (500, 10), (500, u32::MAX), (LOCKTIME, 10)];
        check_equivalence(&clause, &contexts(&[], &[], &times));
    }

    const LOCKTIME: u32 = 600_000_000;

    #[test]
    fn timelock_merging() {
        let clause = Clause::and_of(
            Clause::after(LockTime::from_height(10).unwrap()),
            Clause::after(LockTime::from_height(20).unwrap()),
        );
        assert_eq!(
            compile(&clause).branches()[0].conditions(),
            &[Condition::After(LockTime::from_height(20).unwrap())]
        );

        let clause = Clause::and_of(
            Clause::after(LockTime::from_height(10).unwrap()),
            Clause::after(LockTime::from_unix_timestamp(LOCKTIME).unwrap()),
        );
        assert!(matches!(
            lower(&clause, &LoweringConfig::default()),
            Err(LowerError::UnsatisfiableBranch(_))
        ));
    }

    #[test]
    fn hash_locks() {
        let lock = preimage(9).hash_lock();
        assert_eq!(lock.to_byte_array(), sha256::Hash::hash(&[9u8; 32]).into_inner());
        let clause = Clause::or_of(
            Clause::and_of(sig(1), Clause::preimage(lock)),
            Clause::and_of(sig(2), Clause::older(RelativeLock::Height(6))),
        );
        let times = [(0, u32::MAX), (0, 6)];
        check_equivalence(&clause, &contexts(&[key(1), key(2)], &[preimage(9), preimage(8)], &times));
    }

    #[test]
    fn mixed_threshold_expansion() {
        let clause = Clause::threshold(2, vec![
            sig(1),
            Clause::preimage(preimage(5).hash_lock()),
            Clause::older(RelativeLock::Height(3)),
        ])
        .unwrap();
        let compiled = compile(&clause);
        assert_eq!(compiled.branch_count(), 3);
        let times = [(0, u32::MAX), (0, 3)];
        check_equivalence(&clause, &contexts(&[key(1)], &[preimage(5)], &times));
    }

    #[test]
    fn native_threshold() {
        let config = LoweringConfig {
            max_threshold_combinations: 2,
            ..default!()
        };
        let clause = Clause::threshold(2, vec![
            Clause::preimage(preimage(1).hash_lock()),
            sig(2),
            sig(3),
        ])
        .unwrap();
        let compiled = lower(&clause, &config).unwrap();
        assert_eq!(compiled.branch_count(), 1);
        assert!(matches!(compiled.branches()[0].conditions()[0], Condition::Thresh(2, _)));
        for ctx in contexts(&[key(2), key(3)], &[preimage(1)], &[(0, u32::MAX)]) {
            assert_eq!(compiled.satisfy(&ctx).is_some(), clause.is_satisfied(&ctx));
        }

        let mixed = Clause::threshold(2, vec![
            sig(1),
            sig(2),
            Clause::older(RelativeLock::Height(3)),
        ])
        .unwrap();
        assert_eq!(
            lower(&mixed, &config),
            Err(LowerError::ClauseTooComplex(Complexity::MixedThreshold {
                k: 2,
                n: 3,
                combinations: 3,
                limit: 2
            }))
        );
    }

    #[test]
    fn branch_limit() {
        let config = LoweringConfig {
            max_branches: 4,
            ..default!()
        };
        let pair = |a: u8, b: u8| Clause::or_of(Clause::and_of(sig(a), sig(b)), Clause::older(RelativeLock::Height(a as u16)));
        let clause = Clause::and_of(Clause::and_of(pair(1, 2), pair(3, 4)), pair(5, 6));
        assert_eq!(
            lower(&clause, &config),
            Err(LowerError::ClauseTooComplex(Complexity::TooManyBranches(4)))
        );
    }

    #[test]
    fn determinism_and_commutativity() {
        let a = Clause::and_of(sig(1), Clause::older(RelativeLock::Height(5)));
        let b = Clause::and_of(sig(2), Clause::preimage(preimage(3).hash_lock()));
        let ab = compile(&Clause::or_of(a.clone(), b.clone()));
        let ba = compile(&Clause::or_of(b.clone(), a.clone()));
        assert_eq!(ab, ba);
        assert_eq!(ab.script(), compile(&Clause::or_of(a, b)).script());
    }

    #[test]
    fn selectors() {
        assert_eq!(branch_selector(0, 1), Vec::<Vec<u8>>::new());
        assert_eq!(branch_selector(0, 3), vec![vec![1]]);
        assert_eq!(branch_selector(1, 3), vec![vec![1], vec![]]);
        assert_eq!(branch_selector(2, 3), vec![Vec::<u8>::new(), vec![]]);
    }

    #[test]
    fn combinations() {
        assert_eq!(binomial(5, 2), 10);
        assert_eq!(binomial(20, 10), 184756);
        assert_eq!(binomial(3, 3), 1);
        let all = Combinations::new(4, 2).collect::<Vec<_>>();
        assert_eq!(all, vec![vec![0, 1], vec![0, 2], vec![0, 3], vec![1, 2], vec![1, 3], vec![2, 3]]);
        assert_eq!(Combinations::new(3, 3).count(), 1);
    }
}
