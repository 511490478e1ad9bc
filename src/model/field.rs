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

//! Typed contract parameters.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use bitcoin::hashes::{sha256, HashEngine};
use bitcoin::{Amount, PublicKey};
use bitcoin_clause::{Clause, HashLock, LockTime, RelativeLock, TimeSpec};

use crate::model::ContractInstance;
use crate::Error;

/// Type of a contract field.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType {
    Amount,
    Key,
    LockTime,
    RelativeLock,
    /// Either relative or absolute time lock
    TimeSpec,
    HashLock,
    Clause,
    /// Nested contract instance
    Contract,
    Integer,
    Tuple(Vec<FieldType>),
    List(Box<FieldType>),
}

impl FieldType {
    /// Payment of an amount to a nested contract: `(amount, contract)`.
    #[inline]
    pub fn payment() -> FieldType { FieldType::Tuple(vec![FieldType::Amount, FieldType::Contract]) }

    #[inline]
    pub fn list_of(item: FieldType) -> FieldType { FieldType::List(Box::new(item)) }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Amount => f.write_str("amount"),
            FieldType::Key => f.write_str("key"),
            FieldType::LockTime => f.write_str("lock_time"),
            FieldType::RelativeLock => f.write_str("relative_lock"),
            FieldType::TimeSpec => f.write_str("time_spec"),
            FieldType::HashLock => f.write_str("hash_lock"),
            FieldType::Clause => f.write_str("clause"),
            FieldType::Contract => f.write_str("contract"),
            FieldType::Integer => f.write_str("integer"),
            FieldType::Tuple(items) => {
                f.write_str("(")?;
                for (no, item) in items.iter().enumerate() {
                    if no > 0 {
                        f.write_str(",")?;
                    }
                    Display::fmt(item, f)?;
                }
                f.write_str(")")
            }
            FieldType::List(item) => write!(f, "[{}]", item),
        }
    }
}

/// Value of a contract field.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Value {
    Amount(Amount),
    Key(PublicKey),
    LockTime(LockTime),
    RelativeLock(RelativeLock),
    TimeSpec(TimeSpec),
    HashLock(HashLock),
    Clause(Clause),
    Contract(Arc<ContractInstance>),
    Integer(u64),
    Tuple(Vec<Value>),
    /// List of values of the given item type
    List(FieldType, Vec<Value>),
}

impl From<Amount> for Value {
    fn from(amount: Amount) -> Self { Value::Amount(amount) }
}

impl From<PublicKey> for Value {
    fn from(key: PublicKey) -> Self { Value::Key(key) }
}

impl From<LockTime> for Value {
    fn from(lock_time: LockTime) -> Self { Value::LockTime(lock_time) }
}

impl From<RelativeLock> for Value {
    fn from(lock: RelativeLock) -> Self { Value::RelativeLock(lock) }
}

impl From<TimeSpec> for Value {
    fn from(spec: TimeSpec) -> Self { Value::TimeSpec(spec) }
}

impl From<HashLock> for Value {
    fn from(lock: HashLock) -> Self { Value::HashLock(lock) }
}

impl From<Clause> for Value {
    fn from(clause: Clause) -> Self { Value::Clause(clause) }
}

impl From<Arc<ContractInstance>> for Value {
    fn from(instance: Arc<ContractInstance>) -> Self { Value::Contract(instance) }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self { Value::Integer(value) }
}

impl Value {
    /// Constructs `(amount, contract)` payment tuple.
    pub fn payment(amount: Amount, contract: Arc<ContractInstance>) -> Value {
        Value::Tuple(vec![Value::Amount(amount), Value::Contract(contract)])
    }

    /// Constructs list of payments.
    pub fn payments(payments: impl IntoIterator<Item = (Amount, Arc<ContractInstance>)>) -> Value {
        Value::List(
            FieldType::payment(),
            payments
                .into_iter()
                .map(|(amount, contract)| Value::payment(amount, contract))
                .collect(),
        )
    }

    /// Type of the value; for lists this is the declared item type.
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Amount(_) => FieldType::Amount,
            Value::Key(_) => FieldType::Key,
            Value::LockTime(_) => FieldType::LockTime,
            Value::RelativeLock(_) => FieldType::RelativeLock,
            Value::TimeSpec(_) => FieldType::TimeSpec,
            Value::HashLock(_) => FieldType::HashLock,
            Value::Clause(_) => FieldType::Clause,
            Value::Contract(_) => FieldType::Contract,
            Value::Integer(_) => FieldType::Integer,
            Value::Tuple(items) => FieldType::Tuple(items.iter().map(Value::field_type).collect()),
            Value::List(item, _) => FieldType::list_of(item.clone()),
        }
    }

    /// Checks the value, including all list items, against the expected
    /// type. Mismatches are reported for the innermost offending item,
    /// named like `payments[2].1`.
    pub fn type_check(&self, expected: &FieldType, field: &str) -> Result<(), Error> {
        let mismatch = || Error::FieldTypeMismatch {
            field: field.to_owned(),
            expected: expected.clone(),
            found: self.field_type(),
        };
        match (self, expected) {
            (Value::Tuple(items), FieldType::Tuple(types)) => {
                if items.len() != types.len() {
                    return Err(mismatch());
                }
                items
                    .iter()
                    .zip(types)
                    .enumerate()
                    .try_for_each(|(no, (item, ty))| item.type_check(ty, &format!("{}.{}", field, no)))
            }
            (Value::List(item_type, items), FieldType::List(expected_item)) => {
                if item_type != expected_item.as_ref() {
                    return Err(mismatch());
                }
                items
                    .iter()
                    .enumerate()
                    .try_for_each(|(no, item)| item.type_check(item_type, &format!("{}[{}]", field, no)))
            }
            _ if &self.field_type() == expected => Ok(()),
            _ => Err(mismatch()),
        }
    }

    pub fn as_amount(&self) -> Option<Amount> {
        match self {
            Value::Amount(amount) => Some(*amount),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<PublicKey> {
        match self {
            Value::Key(key) => Some(*key),
            _ => None,
        }
    }

    pub fn as_lock_time(&self) -> Option<LockTime> {
        match self {
            Value::LockTime(lock_time) => Some(*lock_time),
            _ => None,
        }
    }

    pub fn as_relative_lock(&self) -> Option<RelativeLock> {
        match self {
            Value::RelativeLock(lock) => Some(*lock),
            _ => None,
        }
    }

    pub fn as_time_spec(&self) -> Option<TimeSpec> {
        match self {
            Value::TimeSpec(spec) => Some(*spec),
            _ => None,
        }
    }

    pub fn as_hash_lock(&self) -> Option<HashLock> {
        match self {
            Value::HashLock(lock) => Some(*lock),
            _ => None,
        }
    }

    pub fn as_clause(&self) -> Option<&Clause> {
        match self {
            Value::Clause(clause) => Some(clause),
            _ => None,
        }
    }

    pub fn as_contract(&self) -> Option<&Arc<ContractInstance>> {
        match self {
            Value::Contract(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<u64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(_, items) => Some(items),
            _ => None,
        }
    }

    /// Interprets value as `(amount, contract)` payment.
    pub fn as_payment(&self) -> Option<(Amount, &Arc<ContractInstance>)> {
        match self.as_tuple()? {
            [amount, contract] => Some((amount.as_amount()?, contract.as_contract()?)),
            _ => None,
        }
    }

    /// Feeds canonical encoding of the value into the hash engine. Nested
    /// contracts are represented by their content keys.
    pub(crate) fn commit_encode(&self, engine: &mut sha256::HashEngine) {
        match self {
            Value::Amount(amount) => {
                engine.input(&[0x01]);
                engine.input(&amount.to_sat().to_le_bytes());
            }
            Value::Key(key) => {
                engine.input(&[0x02]);
                encode_bytes(engine, &key.to_bytes());
            }
            Value::LockTime(lock_time) => {
                engine.input(&[0x03]);
                engine.input(&lock_time.into_consensus().to_le_bytes());
            }
            Value::RelativeLock(lock) => {
                engine.input(&[0x04]);
                engine.input(&lock.to_sequence().to_le_bytes());
            }
            Value::TimeSpec(TimeSpec::Relative(lock)) => {
                engine.input(&[0x05, 0x00]);
                engine.input(&lock.to_sequence().to_le_bytes());
            }
            Value::TimeSpec(TimeSpec::Absolute(lock_time)) => {
                engine.input(&[0x05, 0x01]);
                engine.input(&lock_time.into_consensus().to_le_bytes());
            }
            Value::HashLock(lock) => {
                engine.input(&[0x06]);
                engine.input(&lock.to_byte_array());
            }
            Value::Clause(clause) => {
                engine.input(&[0x07]);
                encode_clause(engine, clause);
            }
            Value::Contract(instance) => {
                engine.input(&[0x08]);
                engine.input(&instance.key().to_byte_array());
            }
            Value::Integer(value) => {
                engine.input(&[0x09]);
                engine.input(&value.to_le_bytes());
            }
            Value::Tuple(items) => {
                engine.input(&[0x0A]);
                engine.input(&(items.len() as u32).to_le_bytes());
                items.iter().for_each(|item| item.commit_encode(engine));
            }
            Value::List(item_type, items) => {
                engine.input(&[0x0B]);
                encode_bytes(engine, item_type.to_string().as_bytes());
                engine.input(&(items.len() as u32).to_le_bytes());
                items.iter().for_each(|item| item.commit_encode(engine));
            }
        }
    }
}

pub(crate) fn encode_bytes(engine: &mut sha256::HashEngine, bytes: &[u8]) {
    engine.input(&(bytes.len() as u32).to_le_bytes());
    engine.input(bytes);
}

fn encode_clause(engine: &mut sha256::HashEngine, clause: &Clause) {
    match clause {
        Clause::Signature(key) => {
            engine.input(&[0x01]);
            encode_bytes(engine, &key.to_bytes());
        }
        Clause::AbsoluteTimelock(lock_time) => {
            engine.input(&[0x02]);
            engine.input(&lock_time.into_consensus().to_le_bytes());
        }
        Clause::RelativeTimelock(lock) => {
            engine.input(&[0x03]);
            engine.input(&lock.to_sequence().to_le_bytes());
        }
        Clause::HashPreimage(lock) => {
            engine.input(&[0x04]);
            engine.input(&lock.to_byte_array());
        }
        Clause::Threshold(k, clauses) => {
            engine.input(&[0x05]);
            engine.input(&(*k as u32).to_le_bytes());
            engine.input(&(clauses.len() as u32).to_le_bytes());
            clauses.iter().for_each(|clause| encode_clause(engine, clause));
        }
        Clause::And(a, b) => {
            engine.input(&[0x06]);
            encode_clause(engine, a);
            encode_clause(engine, b);
        }
        Clause::Or(a, b) => {
            engine.input(&[0x07]);
            encode_clause(engine, a);
            encode_clause(engine, b);
        }
    }
}

/// Field values bound to a contract instance.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Fields(BTreeMap<String, Value>);

impl Fields {
    pub(crate) fn with(values: BTreeMap<String, Value>) -> Fields { Fields(values) }

    /// Returns field value or [`Error::MissingField`].
    pub fn get(&self, name: &str) -> Result<&Value, Error> {
        self.0.get(name).ok_or_else(|| Error::MissingField(name.to_owned()))
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> { self.0.iter() }

    fn typed<'me, T>(
        &'me self,
        name: &str,
        expected: FieldType,
        cast: impl FnOnce(&'me Value) -> Option<T>,
    ) -> Result<T, Error> {
        let value = self.get(name)?;
        cast(value).ok_or_else(|| Error::FieldTypeMismatch {
            field: name.to_owned(),
            expected,
            found: value.field_type(),
        })
    }

    pub fn amount(&self, name: &str) -> Result<Amount, Error> {
        self.typed(name, FieldType::Amount, Value::as_amount)
    }

    pub fn key(&self, name: &str) -> Result<PublicKey, Error> {
        self.typed(name, FieldType::Key, Value::as_key)
    }

    pub fn lock_time(&self, name: &str) -> Result<LockTime, Error> {
        self.typed(name, FieldType::LockTime, Value::as_lock_time)
    }

    pub fn relative_lock(&self, name: &str) -> Result<RelativeLock, Error> {
        self.typed(name, FieldType::RelativeLock, Value::as_relative_lock)
    }

    pub fn time_spec(&self, name: &str) -> Result<TimeSpec, Error> {
        self.typed(name, FieldType::TimeSpec, Value::as_time_spec)
    }

    pub fn hash_lock(&self, name: &str) -> Result<HashLock, Error> {
        self.typed(name, FieldType::HashLock, Value::as_hash_lock)
    }

    pub fn clause(&self, name: &str) -> Result<&Clause, Error> {
        self.typed(name, FieldType::Clause, Value::as_clause)
    }

    pub fn contract(&self, name: &str) -> Result<&Arc<ContractInstance>, Error> {
        self.typed(name, FieldType::Contract, Value::as_contract)
    }

    pub fn integer(&self, name: &str) -> Result<u64, Error> {
        self.typed(name, FieldType::Integer, Value::as_integer)
    }

    /// Returns items of a list field, whatever their type is.
    pub fn list(&self, name: &str) -> Result<&[Value], Error> {
        let value = self.get(name)?;
        value.as_list().ok_or_else(|| Error::FieldTypeMismatch {
            field: name.to_owned(),
            expected: FieldType::list_of(value.field_type()),
            found: value.field_type(),
        })
    }

    /// Returns items of a list of `(amount, contract)` payments.
    pub fn payments(&self, name: &str) -> Result<Vec<(Amount, Arc<ContractInstance>)>, Error> {
        let expected = FieldType::list_of(FieldType::payment());
        let value = self.get(name)?;
        value.type_check(&expected, name)?;
        self.list(name)?
            .iter()
            .map(|item| item.as_payment().map(|(amount, contract)| (amount, contract.clone())))
            .collect::<Option<Vec<_>>>()
            .ok_or(Error::FieldTypeMismatch {
                field: name.to_owned(),
                expected,
                found: value.field_type(),
            })
    }
}
