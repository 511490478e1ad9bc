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

use std::fmt::{self, Display, Formatter};

use bitcoin::Amount;
use bitcoin_clause::{LockMergeError, LowerError};

use crate::location::Location;
use crate::model::FieldType;

/// Errors compiling a single declaration of a contract.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// Clause can't be lowered into script (see [`LowerError`]).
    #[from]
    #[display(inner)]
    Lowering(LowerError),

    /// field `{field}` must be of type `{expected}`, while value of type
    /// `{found}` is provided
    FieldTypeMismatch {
        /// Field name
        field: String,
        /// Declared field type
        expected: FieldType,
        /// Type of the provided value
        found: FieldType,
    },

    /// value for the field `{0}` is not provided
    MissingField(String),

    /// field `{0}` is not declared by the contract
    UnknownField(String),

    /// outputs spend {required}, which exceeds the available input amount
    /// of {available}
    Underfunded {
        /// Input amount
        available: Amount,
        /// Sum of output amounts
        required: Amount,
    },

    /// transaction loses {fee} as a fee, which is above the maximal fee of
    /// {max_fee}
    ExcessLoss {
        /// Fee paid by the transaction
        fee: Amount,
        /// Maximal fee allowed by the fee policy
        max_fee: Amount,
    },

    /// transaction pays {fee} as a fee, which is below the minimal fee of
    /// {min_fee}
    InsufficientFee {
        /// Fee paid by the transaction
        fee: Amount,
        /// Minimal fee allowed by the fee policy
        min_fee: Amount,
    },

    /// output assigns {assigned} to a nested contract which requires
    /// {required}
    SubcontractFundingMismatch {
        /// Output amount
        assigned: Amount,
        /// Funding required by the nested contract
        required: Amount,
    },

    /// template path requires {found}, while other template paths of the
    /// contract require {expected}
    DivergentFunding {
        /// Funding required by the first template path
        expected: Amount,
        /// Funding required by this template path
        found: Amount,
    },

    /// contract `{0}` embeds itself, directly or through other contracts, or
    /// is nested too deep
    NonTerminatingContract(String),

    /// amount arithmetic overflows
    EncodingOverflow,

    /// template path produces transaction without outputs
    EmptyTemplate,

    /// contract has neither terminal authorization paths nor template paths
    EmptyContract,

    /// Time locks of the template can't be combined (see
    /// [`LockMergeError`]).
    #[from]
    #[display(inner)]
    Timelock(LockMergeError),

    /// template path is guarded by unknown authorization path `{0}`
    UnknownGuard(String),

    /// `{0}` is declared more than once
    DuplicateDeclaration(String),

    /// {0}
    Custom(String),
}

impl Error {
    /// Constructs error reported by a user-provided path builder.
    #[inline]
    pub fn custom(msg: impl ToString) -> Error { Error::Custom(msg.to_string()) }
}

/// Compilation error together with the location of the offending
/// declaration.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Diagnostic {
    pub location: Location,
    pub error: Error,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.error)
    }
}

impl std::error::Error for Diagnostic {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { Some(&self.error) }
}

impl Diagnostic {
    #[inline]
    pub fn new(location: Location, error: impl Into<Error>) -> Diagnostic {
        Diagnostic {
            location,
            error: error.into(),
        }
    }

    /// Places diagnostic of a nested contract under the parent location.
    #[inline]
    pub fn nested_under(&self, parent: &Location) -> Diagnostic {
        Diagnostic {
            location: self.location.nested_under(parent),
            error: self.error.clone(),
        }
    }
}

/// All errors discovered while compiling a contract instance.
#[derive(Wrapper, Clone, PartialEq, Eq, Debug, From)]
pub struct CompileErrors(#[from] Vec<Diagnostic>);

impl Display for CompileErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "contract compilation failed with {} error(s):", self.0.len())?;
        for diagnostic in &self.0 {
            writeln!(f, "- {}", diagnostic)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrors {}

impl CompileErrors {
    #[inline]
    pub fn diagnostics(&self) -> &[Diagnostic] { &self.0 }

    /// Iterates over errors, ignoring their locations.
    #[inline]
    pub fn errors(&self) -> impl Iterator<Item = &Error> { self.0.iter().map(|d| &d.error) }
}
