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

//! Locations of declarations inside a contract tree, used to report errors.

use std::fmt::{self, Display, Formatter};

/// Single step of a [`Location`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "snake_case")
)]
pub enum Fragment {
    /// Contract instance, named after its definition
    Contract(String),

    /// Authorization or template path
    Path(String),

    /// Template output
    Output(usize),
}

impl Display for Fragment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Fragment::Contract(name) | Fragment::Path(name) => f.write_str(name),
            Fragment::Output(no) => write!(f, "#{}", no),
        }
    }
}

/// Chain of fragments leading from the root contract instance to a
/// declaration, displayed as `Vault/unvault/#1/Escrow/cooperate`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct Location(Vec<Fragment>);

impl Location {
    /// Location of the contract instance itself.
    #[inline]
    pub fn contract(name: impl ToString) -> Location {
        Location(vec![Fragment::Contract(name.to_string())])
    }

    /// Extends location with a fragment.
    #[inline]
    pub fn with(&self, fragment: Fragment) -> Location {
        let mut location = self.clone();
        location.0.push(fragment);
        location
    }

    #[inline]
    pub fn path(&self, name: impl ToString) -> Location { self.with(Fragment::Path(name.to_string())) }

    #[inline]
    pub fn output(&self, no: usize) -> Location { self.with(Fragment::Output(no)) }

    /// Places this location, relative to some nested instance, under the
    /// location at which that instance is embedded.
    pub fn nested_under(&self, parent: &Location) -> Location {
        let mut location = parent.clone();
        location.0.extend(self.0.iter().cloned());
        location
    }

    #[inline]
    pub fn fragments(&self) -> &[Fragment] { &self.0 }

    /// Depth of contract nesting.
    pub fn contract_depth(&self) -> usize {
        self.0
            .iter()
            .filter(|fragment| matches!(fragment, Fragment::Contract(_)))
            .count()
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut iter = self.0.iter();
        if let Some(first) = iter.next() {
            Display::fmt(first, f)?;
        }
        for fragment in iter {
            f.write_str("/")?;
            Display::fmt(fragment, f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display() {
        let inner = Location::contract("Escrow").path("cooperate");
        let outer = Location::contract("Vault").path("unvault").output(1);
        let location = inner.nested_under(&outer);
        assert_eq!(location.to_string(), "Vault/unvault/#1/Escrow/cooperate");
        assert_eq!(location.contract_depth(), 2);
        assert_eq!(Location::default().to_string(), "");
    }
}
