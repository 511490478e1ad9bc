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

//! Sample contracts.

use std::sync::Arc;

use bitcoin::{Amount, PublicKey};
use bitcoin_clause::{Clause, TimeSpec};
use once_cell::sync::Lazy;

use crate::model::{ContractDefinition, ContractInstance, FieldType, TemplatePath, Value};
use crate::Error;

/// Payment of an amount to a contract.
pub type Payment = (Amount, Arc<ContractInstance>);

static PAY_TO_KEY: Lazy<Arc<ContractDefinition>> = Lazy::new(|| {
    ContractDefinition::with("PayToKey")
        .field("key", FieldType::Key)
        .auth_path("spend", |fields| Ok(Clause::signature(fields.key("key")?)))
        .finish()
});

/// Contract spendable by a single key.
pub fn pay_to_key() -> Arc<ContractDefinition> { PAY_TO_KEY.clone() }

pub fn pay_to(key: PublicKey) -> Result<Arc<ContractInstance>, Error> {
    pay_to_key().instantiate([("key", Value::from(key))])
}

static ESCROW: Lazy<Arc<ContractDefinition>> = Lazy::new(|| {
    ContractDefinition::with("Escrow")
        .field("alice", FieldType::Key)
        .field("bob", FieldType::Key)
        .field("escrow", FieldType::Key)
        .auth_path("use_escrow", |fields| {
            Ok(Clause::and_of(
                Clause::signature(fields.key("escrow")?),
                Clause::or_of(
                    Clause::signature(fields.key("alice")?),
                    Clause::signature(fields.key("bob")?),
                ),
            ))
        })
        .auth_path("cooperate", |fields| {
            Ok(Clause::and_of(
                Clause::signature(fields.key("alice")?),
                Clause::signature(fields.key("bob")?),
            ))
        })
        .finish()
});

/// Two parties, either of which may spend together with the escrow agent,
/// or both of them cooperatively.
pub fn escrow() -> Arc<ContractDefinition> { ESCROW.clone() }

static NESTED_ESCROW: Lazy<Arc<ContractDefinition>> = Lazy::new(|| {
    ContractDefinition::with("NestedEscrow")
        .field("alice", FieldType::Key)
        .field("bob", FieldType::Key)
        .field("escrow", FieldType::Key)
        .field("payouts", FieldType::list_of(FieldType::payment()))
        .field("fee", FieldType::Amount)
        .auth_path("cooperate", |fields| {
            Ok(Clause::and_of(
                Clause::signature(fields.key("alice")?),
                Clause::signature(fields.key("bob")?),
            ))
        })
        .guard("escrow_approves", |fields| {
            Ok(Clause::and_of(
                Clause::signature(fields.key("escrow")?),
                Clause::or_of(
                    Clause::signature(fields.key("alice")?),
                    Clause::signature(fields.key("bob")?),
                ),
            ))
        })
        .template(
            TemplatePath::new("use_escrow", |fields, skeleton| {
                for (amount, payee) in fields.payments("payouts")? {
                    skeleton.add_output(amount, payee);
                }
                skeleton.set_fee(fields.amount("fee")?);
                Ok(())
            })
            .guarded_by("escrow_approves"),
        )
        .finish()
});

/// Escrow which, upon the escrow agent approval, can only be spent with a
/// transaction distributing funds to the given payees.
pub fn nested_escrow() -> Arc<ContractDefinition> { NESTED_ESCROW.clone() }

pub fn nested_escrow_with(
    alice: PublicKey,
    bob: PublicKey,
    escrow: PublicKey,
    payouts: impl IntoIterator<Item = Payment>,
    fee: Amount,
) -> Result<Arc<ContractInstance>, Error> {
    nested_escrow().instantiate([
        ("alice", Value::from(alice)),
        ("bob", Value::from(bob)),
        ("escrow", Value::from(escrow)),
        ("payouts", Value::payments(payouts)),
        ("fee", Value::from(fee)),
    ])
}

/// Funding required by a payment tree, including fees of all its
/// transactions. `None` on overflow or if the radix is below 2.
pub fn tree_cost(payments: &[Payment], radix: usize, fee: Amount) -> Option<Amount> {
    if radix < 2 {
        return None;
    }
    if payments.len() <= radix {
        return payments
            .iter()
            .try_fold(fee, |sum, (amount, _)| sum.checked_add(*amount));
    }
    payments
        .chunks(chunk_size(payments.len(), radix))
        .try_fold(fee, |sum, group| sum.checked_add(tree_cost(group, radix, fee)?))
}

fn chunk_size(len: usize, radix: usize) -> usize { (len + radix - 1) / radix }

fn checked_radix(radix: u64) -> Result<usize, Error> {
    match usize::try_from(radix) {
        Ok(radix) if radix >= 2 => Ok(radix),
        _ => Err(Error::custom(format!("invalid payment tree radix {}: it must be at least 2", radix))),
    }
}

static TREE_PAY: Lazy<Arc<ContractDefinition>> = Lazy::new(|| {
    ContractDefinition::with("TreePay")
        .field("payments", FieldType::list_of(FieldType::payment()))
        .field("radix", FieldType::Integer)
        .field("fee", FieldType::Amount)
        .template(TemplatePath::new("pay", |fields, skeleton| {
            let payments = fields.payments("payments")?;
            let radix = fields.integer("radix")?;
            let width = checked_radix(radix)?;
            let fee = fields.amount("fee")?;
            skeleton.set_fee(fee);
            if payments.len() <= width {
                for (amount, payee) in payments {
                    skeleton.add_output(amount, payee);
                }
                return Ok(());
            }
            for group in payments.chunks(chunk_size(payments.len(), width)) {
                let cost = tree_cost(group, width, fee).ok_or(Error::EncodingOverflow)?;
                skeleton.add_output(cost, tree_pay_with(group.to_vec(), radix, fee)?);
            }
            Ok(())
        }))
        .finish()
});

/// Radix tree of transactions paying to many payees, each transaction
/// having no more than `radix` outputs.
pub fn tree_pay() -> Arc<ContractDefinition> { TREE_PAY.clone() }

pub fn tree_pay_with(
    payments: Vec<Payment>,
    radix: u64,
    fee: Amount,
) -> Result<Arc<ContractInstance>, Error> {
    tree_pay().instantiate([
        ("payments", Value::payments(payments)),
        ("radix", Value::from(radix)),
        ("fee", Value::from(fee)),
    ])
}

/// Type of air drop batches: delay and payments.
pub fn batch_type() -> FieldType {
    FieldType::Tuple(vec![FieldType::TimeSpec, FieldType::list_of(FieldType::payment())])
}

/// Constructs air drop batch.
pub fn batch(delay: impl Into<TimeSpec>, payments: impl IntoIterator<Item = Payment>) -> Value {
    Value::Tuple(vec![Value::TimeSpec(delay.into()), Value::payments(payments)])
}

fn parse_batch(batch: &Value) -> Result<(TimeSpec, Vec<Payment>), Error> {
    let malformed = || Error::custom("malformed air drop batch");
    let (delay, payments) = match batch.as_tuple() {
        Some([delay, payments]) => (delay, payments),
        _ => return Err(malformed()),
    };
    let delay = delay.as_time_spec().ok_or_else(malformed)?;
    let payments = payments
        .as_list()
        .ok_or_else(malformed)?
        .iter()
        .map(|payment| {
            payment
                .as_payment()
                .map(|(amount, payee)| (amount, payee.clone()))
                .ok_or_else(malformed)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((delay, payments))
}

/// Funding required by an air drop of the given batches.
pub fn air_drop_cost(batches: &[Value], radix: usize, fee: Amount) -> Result<Amount, Error> {
    batches.iter().try_fold(Amount::ZERO, |sum, batch| {
        let (_, payments) = parse_batch(batch)?;
        tree_cost(&payments, radix, fee)
            .and_then(|cost| cost.checked_add(fee))
            .and_then(|cost| sum.checked_add(cost))
            .ok_or(Error::EncodingOverflow)
    })
}

static AIR_DROP: Lazy<Arc<ContractDefinition>> = Lazy::new(|| {
    ContractDefinition::with("AirDrop")
        .field("batches", FieldType::list_of(batch_type()))
        .field("radix", FieldType::Integer)
        .field("fee", FieldType::Amount)
        .template(TemplatePath::new("payout", |fields, skeleton| {
            let batches = fields.list("batches")?;
            let radix = fields.integer("radix")?;
            let width = checked_radix(radix)?;
            let fee = fields.amount("fee")?;
            let (current, rest) = batches
                .split_first()
                .ok_or_else(|| Error::custom("air drop has no batches"))?;
            let (delay, payments) = parse_batch(current)?;
            let cost = tree_cost(&payments, width, fee).ok_or(Error::EncodingOverflow)?;
            skeleton.set_fee(fee);
            skeleton.set_timelock(delay)?;
            skeleton.add_output(cost, tree_pay_with(payments, radix, fee)?);
            if !rest.is_empty() {
                let remaining = air_drop_cost(rest, width, fee)?;
                skeleton.add_output(remaining, air_drop_with(rest.to_vec(), radix, fee)?);
            }
            Ok(())
        }))
        .finish()
});

/// Periodic distribution of funds: each batch is paid through a payment
/// tree after its delay, and the rest is passed to the next air drop.
pub fn air_drop() -> Arc<ContractDefinition> { AIR_DROP.clone() }

pub fn air_drop_with(
    batches: Vec<Value>,
    radix: u64,
    fee: Amount,
) -> Result<Arc<ContractInstance>, Error> {
    air_drop().instantiate([
        ("batches", Value::List(batch_type(), batches)),
        ("radix", Value::from(radix)),
        ("fee", Value::from(fee)),
    ])
}
