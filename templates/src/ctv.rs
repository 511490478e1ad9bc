// CTV transaction templates
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

//! BIP-119 default template hash.

use bitcoin::blockdata::opcodes::all::OP_NOP4;
use bitcoin::blockdata::script::{Builder, Script};
use bitcoin::consensus::serialize;
use bitcoin::hashes::{hash_newtype, sha256, Hash, HashEngine};
use bitcoin::{Transaction, TxOut};

/// `OP_CHECKTEMPLATEVERIFY` re-uses `OP_NOP4` opcode.
pub const OP_CHECKTEMPLATEVERIFY: bitcoin::blockdata::opcodes::All = OP_NOP4;

hash_newtype!(
    CtvHash,
    sha256::Hash,
    32,
    doc = "BIP-119 default `OP_CHECKTEMPLATEVERIFY` template hash",
    false
);

/// Hashes input sequences as they are committed by the template.
pub fn hash_sequences(sequences: impl IntoIterator<Item = u32>) -> sha256::Hash {
    let mut engine = sha256::Hash::engine();
    for sequence in sequences {
        engine.input(&sequence.to_le_bytes());
    }
    sha256::Hash::from_engine(engine)
}

/// Hashes consensus-serialized `scriptSig`s, if any of them is non-empty.
pub fn hash_script_sigs<'script>(
    script_sigs: impl IntoIterator<Item = &'script Script> + Clone,
) -> Option<sha256::Hash> {
    if script_sigs.clone().into_iter().all(Script::is_empty) {
        return None;
    }
    let mut engine = sha256::Hash::engine();
    for script_sig in script_sigs {
        engine.input(&serialize(script_sig));
    }
    Some(sha256::Hash::from_engine(engine))
}

/// Hashes consensus-serialized transaction outputs.
pub fn hash_outputs<'output>(outputs: impl IntoIterator<Item = &'output TxOut>) -> sha256::Hash {
    let mut engine = sha256::Hash::engine();
    for output in outputs {
        engine.input(&serialize(output));
    }
    sha256::Hash::from_engine(engine)
}

impl CtvHash {
    /// Computes the hash committing to the transaction being spent at the
    /// given input index.
    pub fn from_transaction(tx: &Transaction, input_index: u32) -> CtvHash {
        CtvHash::from_components(
            tx.version,
            tx.lock_time.0,
            hash_script_sigs(tx.input.iter().map(|input| &input.script_sig)),
            tx.input.len() as u32,
            hash_sequences(tx.input.iter().map(|input| input.sequence.0)),
            tx.output.len() as u32,
            hash_outputs(&tx.output),
            input_index,
        )
    }

    /// Computes the hash from the transaction fields and intermediate hashes.
    #[allow(clippy::too_many_arguments)]
    pub fn from_components(
        version: i32,
        lock_time: u32,
        script_sigs_hash: Option<sha256::Hash>,
        input_count: u32,
        sequences_hash: sha256::Hash,
        output_count: u32,
        outputs_hash: sha256::Hash,
        input_index: u32,
    ) -> CtvHash {
        let mut engine = sha256::Hash::engine();
        engine.input(&version.to_le_bytes());
        engine.input(&lock_time.to_le_bytes());
        if let Some(hash) = script_sigs_hash {
            engine.input(&hash[..]);
        }
        engine.input(&input_count.to_le_bytes());
        engine.input(&sequences_hash[..]);
        engine.input(&output_count.to_le_bytes());
        engine.input(&outputs_hash[..]);
        engine.input(&input_index.to_le_bytes());
        CtvHash::from_engine(engine)
    }

    /// Script fragment `<hash> OP_CHECKTEMPLATEVERIFY`.
    pub fn commitment_script(self) -> Script {
        Builder::new()
            .push_slice(&self.into_inner())
            .push_opcode(OP_CHECKTEMPLATEVERIFY)
            .into_script()
    }

    #[inline]
    pub fn to_byte_array(self) -> [u8; 32] { self.into_inner() }
}

#[cfg(test)]
mod test {
    use bitcoin::consensus::deserialize;
    use bitcoin::hashes::hex::FromHex;
    use bitcoin::{OutPoint, PackedLockTime, Sequence, TxIn, Witness};

    use super::*;

    fn tx(version: i32, lock_time: u32, sequence: u32, values: &[u64]) -> Transaction {
        Transaction {
            version,
            lock_time: PackedLockTime(lock_time),
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: Script::new(),
                sequence: Sequence(sequence),
                witness: Witness::new(),
            }],
            output: values
                .iter()
                .map(|value| TxOut {
                    value: *value,
                    script_pubkey: Builder::new().push_int(1).into_script(),
                })
                .collect(),
        }
    }

    #[test]
    fn byte_layout() {
        let tx = tx(2, 0, 0xFFFFFFFF, &[1000, 2000]);
        let mut data = vec![];
        data.extend(2i32.to_le_bytes());
        data.extend(0u32.to_le_bytes());
        data.extend(1u32.to_le_bytes());
        data.extend(&sha256::Hash::hash(&0xFFFFFFFFu32.to_le_bytes())[..]);
        data.extend(2u32.to_le_bytes());
        let mut outputs = serialize(&tx.output[0]);
        outputs.extend(serialize(&tx.output[1]));
        data.extend(&sha256::Hash::hash(&outputs)[..]);
        data.extend(0u32.to_le_bytes());
        assert_eq!(
            CtvHash::from_transaction(&tx, 0).to_byte_array(),
            sha256::Hash::hash(&data).into_inner()
        );
    }

    #[test]
    fn committed_fields() {
        let base = CtvHash::from_transaction(&tx(2, 0, 0xFFFFFFFF, &[1000]), 0);
        assert_ne!(base, CtvHash::from_transaction(&tx(1, 0, 0xFFFFFFFF, &[1000]), 0));
        assert_ne!(base, CtvHash::from_transaction(&tx(2, 10, 0xFFFFFFFF, &[1000]), 0));
        assert_ne!(base, CtvHash::from_transaction(&tx(2, 0, 0xFFFFFFFE, &[1000]), 0));
        assert_ne!(base, CtvHash::from_transaction(&tx(2, 0, 0xFFFFFFFF, &[1001]), 0));
        assert_ne!(base, CtvHash::from_transaction(&tx(2, 0, 0xFFFFFFFF, &[1000, 0]), 0));
        assert_ne!(base, CtvHash::from_transaction(&tx(2, 0, 0xFFFFFFFF, &[1000]), 1));
    }

    #[test]
    fn prevout_not_committed() {
        let unbound = tx(2, 0, 0xFFFFFFFF, &[1000]);
        let mut bound = unbound.clone();
        bound.input[0].previous_output = OutPoint::new(unbound.txid(), 7);
        assert_eq!(
            CtvHash::from_transaction(&unbound, 0),
            CtvHash::from_transaction(&bound, 0)
        );
    }

    #[test]
    fn script_sigs() {
        let empty = tx(2, 0, 0xFFFFFFFF, &[1000]);
        assert_eq!(hash_script_sigs(empty.input.iter().map(|input| &input.script_sig)), None);
        let mut signed = empty.clone();
        signed.input[0].script_sig = Builder::new().push_int(1).into_script();
        assert!(hash_script_sigs(signed.input.iter().map(|input| &input.script_sig)).is_some());
        assert_ne!(
            CtvHash::from_transaction(&empty, 0),
            CtvHash::from_transaction(&signed, 0)
        );
    }

    /// Raw transactions with input indexes and their template hashes,
    /// produced by the BIP-119 reference algorithm.
    const VECTORS: [(&str, u32, &str); 3] = [
        (
            "02000000010000000000000000000000000000000000000000000000000000000000000000ffffffff00ffffff\
             ff01a086010000000000220020000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f\
             00000000",
            0,
            "5450d606a78b6cbeda345a9ef882bda6b5a9ed3d8b1310b1b95d990e10cb4882",
        ),
        (
            "01000000030101010101010101010101010101010101010101010101010101010101010101000000000\
             0feffffff020202020202020202020202020202020202020202020202020202020202020203000000045102aa\
             bb9000000003030303030303030303030303030303030303030303030303030303030303030100000000ffff\
             ffff028813000000000000160014abababababababababababababababababababab0000000000000000066a\
             046d656d6f20a10700",
            1,
            "e4f27a2c5b70167f53362036e81e4721f92f50ac13f63b2db027162578ac0308",
        ),
        (
            "020000000204040404040404040404040404040404040404040404040404040404040404040700000000100040\
             0005050505050505050505050505050505050505050505050505050505050505050200000000ffffffff03010000\
             0000000000220020000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f0040075af0\
             750700160014abababababababababababababababababababab2202000000000000066a046d656d6f00f15365",
            1,
            "5cd27acae966189a7ea327500cce00fabac38b4c862eac13c44ec65083ac481f",
        ),
    ];

    #[test]
    fn reference_vectors() {
        for (raw, input_index, expected) in VECTORS {
            let tx: Transaction = deserialize(&Vec::<u8>::from_hex(raw).unwrap()).unwrap();
            assert_eq!(
                CtvHash::from_transaction(&tx, input_index).to_byte_array().to_vec(),
                Vec::<u8>::from_hex(expected).unwrap(),
                "transaction {}",
                tx.txid()
            );
        }
    }

    #[test]
    fn commitment() {
        let hash = CtvHash::from_transaction(&tx(2, 0, 0xFFFFFFFF, &[1000]), 0);
        let script = hash.commitment_script();
        assert_eq!(script.len(), 34);
        assert_eq!(script.as_bytes()[0], 32);
        assert_eq!(script.as_bytes()[1..33], hash.to_byte_array());
        assert_eq!(script.as_bytes()[33], OP_NOP4.into_u8());
    }
}
