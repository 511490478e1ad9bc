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

//! Value conservation checks.

use bitcoin::Amount;

use crate::compiled::CompiledContract;
use crate::config::FeePolicy;
use crate::location::Location;
use crate::{CompileErrors, Diagnostic, Error};

/// Checks the fee against the policy and returns funding required by a
/// transaction: sum of its outputs plus the fee.
pub fn template_funding(
    outputs: impl IntoIterator<Item = Amount>,
    fee: Amount,
    policy: &FeePolicy,
) -> Result<Amount, Error> {
    if fee < policy.min_fee {
        return Err(Error::InsufficientFee {
            fee,
            min_fee: policy.min_fee,
        });
    }
    if fee > policy.max_fee {
        return Err(Error::ExcessLoss {
            fee,
            max_fee: policy.max_fee,
        });
    }
    outputs
        .into_iter()
        .try_fold(fee, Amount::checked_add)
        .ok_or(Error::EncodingOverflow)
}

/// Checks that an output embedding a nested contract carries exactly the
/// amount the contract requires. Contracts without template paths accept any
/// amount.
pub fn check_nested(assigned: Amount, required: Option<Amount>) -> Result<(), Error> {
    match required {
        Some(required) if required != assigned => {
            Err(Error::SubcontractFundingMismatch { assigned, required })
        }
        _ => Ok(()),
    }
}

/// Checks that all template paths of a contract require the same funding,
/// returning index and error for each divergent path.
pub fn check_agreement(fundings: &[Amount]) -> Vec<(usize, Error)> {
    let Some(expected) = fundings.first().copied() else {
        return vec![];
    };
    fundings
        .iter()
        .enumerate()
        .filter(|(_, found)| **found != expected)
        .map(|(index, found)| (index, Error::DivergentFunding {
            expected,
            found: *found,
        }))
        .collect()
}

/// Checks that spending the given input amount through the outputs leaves
/// a fee within the policy, returning the fee.
pub fn check_available(
    outputs: Amount,
    available: Amount,
    policy: &FeePolicy,
) -> Result<Amount, Error> {
    let fee = available.checked_sub(outputs).ok_or(Error::Underfunded {
        available,
        required: outputs,
    })?;
    if fee < policy.min_fee {
        return Err(Error::InsufficientFee {
            fee,
            min_fee: policy.min_fee,
        });
    }
    if fee > policy.max_fee {
        return Err(Error::ExcessLoss {
            fee,
            max_fee: policy.max_fee,
        });
    }
    Ok(fee)
}

/// Verifies that a compiled contract funded with the `available` amount
/// conserves value on each of its template paths:
/// `available - max_fee <= sum(outputs) <= available - min_fee`.
///
/// Authorization paths spend the whole input and need no check; nested
/// contracts are checked against their outputs during compilation.
pub fn verify(
    contract: &CompiledContract,
    available: Amount,
    policy: &FeePolicy,
) -> Result<(), CompileErrors> {
    let location = Location::contract(contract.name());
    let diagnostics = contract
        .templates()
        .iter()
        .filter_map(|template| {
            let path = location.path(&template.name);
            let outputs = match template.template.output_value() {
                Some(outputs) => outputs,
                None => return Some(Diagnostic::new(path, Error::EncodingOverflow)),
            };
            check_available(outputs, available, policy)
                .err()
                .map(|err| Diagnostic::new(path, err))
        })
        .collect::<Vec<_>>();
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sat(value: u64) -> Amount { Amount::from_sat(value) }

    #[test]
    fn funding() {
        let policy = FeePolicy::default();
        assert_eq!(template_funding([sat(10), sat(20)], sat(5), &policy), Ok(sat(35)));
        assert_eq!(
            template_funding([sat(10)], sat(200_000), &policy),
            Err(Error::ExcessLoss {
                fee: sat(200_000),
                max_fee: sat(100_000)
            })
        );
        assert_eq!(
            template_funding([sat(10)], sat(1), &FeePolicy::exact(sat(2))),
            Err(Error::InsufficientFee {
                fee: sat(1),
                min_fee: sat(2)
            })
        );
        assert_eq!(
            template_funding([Amount::MAX_MONEY, Amount::from_sat(u64::MAX)], sat(0), &policy),
            Err(Error::EncodingOverflow)
        );
    }

    #[test]
    fn nested() {
        assert_eq!(check_nested(sat(10), None), Ok(()));
        assert_eq!(check_nested(sat(10), Some(sat(10))), Ok(()));
        assert_eq!(
            check_nested(sat(10_000), Some(sat(1_00010000))),
            Err(Error::SubcontractFundingMismatch {
                assigned: sat(10_000),
                required: sat(1_00010000)
            })
        );
    }

    #[test]
    fn agreement() {
        assert!(check_agreement(&[]).is_empty());
        assert!(check_agreement(&[sat(5), sat(5)]).is_empty());
        assert_eq!(check_agreement(&[sat(5), sat(5), sat(6)]), vec![(2, Error::DivergentFunding {
            expected: sat(5),
            found: sat(6)
        })]);
    }

    #[test]
    fn available() {
        let policy = FeePolicy {
            min_fee: sat(100),
            max_fee: sat(1000),
        };
        assert_eq!(check_available(sat(9_900), sat(10_000), &policy), Ok(sat(100)));
        assert_eq!(check_available(sat(9_000), sat(10_000), &policy), Ok(sat(1000)));
        assert_eq!(
            check_available(sat(10_001), sat(10_000), &policy),
            Err(Error::Underfunded {
                available: sat(10_000),
                required: sat(10_001)
            })
        );
        assert_eq!(
            check_available(sat(8_999), sat(10_000), &policy),
            Err(Error::ExcessLoss {
                fee: sat(1001),
                max_fee: sat(1000)
            })
        );
        assert_eq!(
            check_available(sat(9_950), sat(10_000), &policy),
            Err(Error::InsufficientFee {
                fee: sat(50),
                min_fee: sat(100)
            })
        );
    }
}
