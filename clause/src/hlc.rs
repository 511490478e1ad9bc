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

//! Hash locks: SHA256 digests whose 32-byte preimage must be revealed.

use std::borrow::Borrow;
use std::fmt::{self, Display, Formatter};

use amplify::Wrapper;
use bitcoin::hashes::hex::ToHex;
use bitcoin::hashes::{sha256, Hash};

/// Length of the preimages accepted by lowered hash lock scripts.
pub const PREIMAGE_LEN: usize = 32;

/// SHA256 digest locking a spending condition.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
#[derive(
    Wrapper, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, From
)]
#[display(LowerHex)]
#[wrapper(FromStr, LowerHex)]
pub struct HashLock(#[from] sha256::Hash);

impl From<HashPreimage> for HashLock {
    fn from(preimage: HashPreimage) -> Self { Self::from_inner(sha256::Hash::hash(&preimage.0)) }
}

impl HashLock {
    /// Returns the digest bytes as they are pushed into the script.
    #[inline]
    pub fn to_byte_array(self) -> [u8; 32] { self.0.into_inner() }
}

impl AsRef<[u8]> for HashLock {
    fn as_ref(&self) -> &[u8] { &self.0.as_inner()[..] }
}

impl Borrow<[u8]> for HashLock {
    fn borrow(&self) -> &[u8] { &self.0.as_inner()[..] }
}

/// Preimage unlocking a [`HashLock`].
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, From)]
pub struct HashPreimage(#[from] [u8; PREIMAGE_LEN]);

impl HashPreimage {
    #[inline]
    pub fn hash_lock(self) -> HashLock { HashLock::from(self) }

    #[inline]
    pub fn to_byte_array(self) -> [u8; PREIMAGE_LEN] { self.0 }
}

impl Display for HashPreimage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(&self.0[..].to_hex()) }
}

impl AsRef<[u8]> for HashPreimage {
    fn as_ref(&self) -> &[u8] { &self.0[..] }
}

impl Borrow<[u8]> for HashPreimage {
    fn borrow(&self) -> &[u8] { &self.0[..] }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lock_from_preimage() {
        let preimage = HashPreimage::from([7u8; 32]);
        let lock = preimage.hash_lock();
        assert_eq!(lock.to_byte_array(), sha256::Hash::hash(&[7u8; 32]).into_inner());
        assert_eq!(lock.to_string(), sha256::Hash::hash(&[7u8; 32]).to_string());
        assert_eq!(lock.to_string().parse::<HashLock>().unwrap(), lock);
    }
}
