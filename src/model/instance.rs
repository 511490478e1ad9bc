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

use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash as StdHash, Hasher};
use std::sync::Arc;

use bitcoin::hashes::{hash_newtype, sha256, Hash, HashEngine};

use super::{ContractDefinition, Fields};

hash_newtype!(
    ContractKey,
    sha256::Hash,
    32,
    doc = "Identifier of a contract instance: commitment to the definition registration and \
           canonically encoded field values",
    false
);

impl ContractKey {
    #[inline]
    pub fn to_byte_array(self) -> [u8; 32] { self.into_inner() }
}

/// Contract definition bound to concrete field values.
///
/// Instances compare equal when their keys are equal, so value-equal
/// instances of the same definition constructed independently are compiled
/// only once.
pub struct ContractInstance {
    definition: Arc<ContractDefinition>,
    fields: Fields,
    key: ContractKey,
}

impl ContractInstance {
    pub(super) fn new(definition: Arc<ContractDefinition>, fields: Fields) -> ContractInstance {
        let mut engine = sha256::Hash::engine();
        engine.input(&definition.fingerprint().into_inner());
        engine.input(&definition.id().to_le_bytes());
        for (name, _) in definition.fields() {
            if let Ok(value) = fields.get(name) {
                value.commit_encode(&mut engine);
            }
        }
        ContractInstance {
            definition,
            fields,
            key: ContractKey::from_engine(engine),
        }
    }

    #[inline]
    pub fn definition(&self) -> &Arc<ContractDefinition> { &self.definition }

    #[inline]
    pub fn name(&self) -> &str { self.definition.name() }

    #[inline]
    pub fn fields(&self) -> &Fields { &self.fields }

    #[inline]
    pub fn key(&self) -> ContractKey { self.key }
}

impl PartialEq for ContractInstance {
    fn eq(&self, other: &Self) -> bool { self.key == other.key }
}

impl Eq for ContractInstance {}

impl StdHash for ContractInstance {
    fn hash<H: Hasher>(&self, state: &mut H) { StdHash::hash(&self.key, state) }
}

impl Debug for ContractInstance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractInstance")
            .field("name", &self.definition.name())
            .field("key", &self.key)
            .field("fields", &self.fields)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use bitcoin::{Amount, PublicKey};

    use super::*;
    use crate::model::{FieldType, Value};
    use crate::Error;

    fn key(no: u8) -> PublicKey {
        let secp = Secp256k1::signing_only();
        let sk = SecretKey::from_slice(&[no; 32]).unwrap();
        PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk))
    }

    fn definition() -> Arc<ContractDefinition> {
        ContractDefinition::with("Payout")
            .field("key", FieldType::Key)
            .field("amount", FieldType::Amount)
            .auth_path("spend", |fields| Ok(bitcoin_clause::Clause::signature(fields.key("key")?)))
            .finish()
    }

    #[test]
    fn instantiation() {
        let def = definition();
        let instance = def
            .instantiate([("key", Value::from(key(1))), ("amount", Value::from(Amount::from_sat(5)))])
            .unwrap();
        assert_eq!(instance.name(), "Payout");
        assert_eq!(instance.fields().key("key").unwrap(), key(1));
        assert_eq!(instance.fields().amount("amount").unwrap(), Amount::from_sat(5));
        assert_eq!(
            instance.fields().integer("amount"),
            Err(Error::FieldTypeMismatch {
                field: s!("amount"),
                expected: FieldType::Integer,
                found: FieldType::Amount
            })
        );

        assert_eq!(
            def.instantiate([("key", Value::from(key(1)))]).unwrap_err(),
            Error::MissingField(s!("amount"))
        );
        assert_eq!(
            def.instantiate([("key", Value::from(Amount::from_sat(1)))]).unwrap_err(),
            Error::FieldTypeMismatch {
                field: s!("key"),
                expected: FieldType::Key,
                found: FieldType::Amount
            }
        );
        assert_eq!(
            def.instantiate([("owner", Value::from(key(1)))]).unwrap_err(),
            Error::UnknownField(s!("owner"))
        );
    }

    #[test]
    fn list_items_checked() {
        let def = ContractDefinition::with("Batch")
            .field("payments", FieldType::list_of(FieldType::payment()))
            .finish();
        let bad = Value::List(FieldType::payment(), vec![Value::Tuple(vec![
            Value::from(Amount::from_sat(1)),
            Value::from(key(2)),
        ])]);
        assert_eq!(
            def.instantiate([("payments", bad)]).unwrap_err(),
            Error::FieldTypeMismatch {
                field: s!("payments[0].1"),
                expected: FieldType::Contract,
                found: FieldType::Key
            }
        );
    }

    #[test]
    fn duplicate_declarations() {
        let def = ContractDefinition::with("Twice")
            .field("key", FieldType::Key)
            .field("key", FieldType::Amount)
            .finish();
        assert_eq!(
            def.instantiate([("key", Value::from(key(1)))]).unwrap_err(),
            Error::DuplicateDeclaration(s!("key"))
        );

        let def = ContractDefinition::with("Twice")
            .field("key", FieldType::Key)
            .auth_path("spend", |fields| Ok(bitcoin_clause::Clause::signature(fields.key("key")?)))
            .guard("spend", |fields| Ok(bitcoin_clause::Clause::signature(fields.key("key")?)))
            .finish();
        assert_eq!(
            def.instantiate([("key", Value::from(key(1)))]).unwrap_err(),
            Error::DuplicateDeclaration(s!("spend"))
        );

        let def = definition();
        assert_eq!(
            def.instantiate([
                ("key", Value::from(key(1))),
                ("key", Value::from(key(2))),
                ("amount", Value::from(Amount::from_sat(5)))
            ])
            .unwrap_err(),
            Error::DuplicateDeclaration(s!("key"))
        );
    }

    #[test]
    fn content_keys() {
        let def = definition();
        let a = def
            .instantiate([("amount", Value::from(Amount::from_sat(5))), ("key", Value::from(key(1)))])
            .unwrap();
        let b = def
            .instantiate([("key", Value::from(key(1))), ("amount", Value::from(Amount::from_sat(5)))])
            .unwrap();
        let c = def
            .instantiate([("key", Value::from(key(1))), ("amount", Value::from(Amount::from_sat(6)))])
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());

        // same declarations registered twice are distinct definitions
        let other = definition()
            .instantiate([("key", Value::from(key(1))), ("amount", Value::from(Amount::from_sat(5)))])
            .unwrap();
        assert_eq!(other.definition().fingerprint(), a.definition().fingerprint());
        assert_ne!(other.definition().id(), a.definition().id());
        assert_ne!(other.key(), a.key());

        let renamed = ContractDefinition::with("Other")
            .field("key", FieldType::Key)
            .field("amount", FieldType::Amount)
            .finish()
            .instantiate([("key", Value::from(key(1))), ("amount", Value::from(Amount::from_sat(5)))])
            .unwrap();
        assert_ne!(renamed.key(), a.key());
    }
}
