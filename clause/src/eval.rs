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

//! Dry-run evaluation of lowered scripts.
//!
//! The evaluator interprets exactly the opcode subset emitted by the lowering
//! (plus `OP_CHECKTEMPLATEVERIFY`) against a [`SpendContext`]. Signatures are
//! symbolic: a signature for a key is the key serialization prefixed with
//! [`MOCK_SIG_PREFIX`], and it is valid only if the key belongs to
//! [`SpendContext::signers`]. This allows checking which parties and which
//! conditions are able to spend a script without any signing taking place.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::blockdata::opcodes::all::*;
use bitcoin::blockdata::script::{Instruction, Script};
use bitcoin::hashes::{sha256, Hash};
use bitcoin::PublicKey;

use crate::hlc::{HashLock, HashPreimage};
use crate::locks::{
    LOCKTIME_THRESHOLD, SEQ_NO_CSV_DISABLE_MASK, SEQ_NO_CSV_TYPE_MASK, SEQ_NO_CSV_VALUE_MASK,
    SEQ_NO_MAX_VALUE,
};

/// First byte of symbolic signatures.
pub const MOCK_SIG_PREFIX: u8 = 0x30;

/// Maximal number of elements on the stack during evaluation.
pub const MAX_STACK_SIZE: usize = 1000;

/// Errors of the script evaluation.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum EvalError {
    /// script can't be parsed into instructions
    InvalidScript,

    /// opcode {0:#04x} is not supported by the evaluator
    UnsupportedOpcode(u8),

    /// operation requires more stack elements than present
    StackUnderflow,

    /// stack size exceeds the limit of 1000 elements
    StackOverflow,

    /// `OP_IF`/`OP_ELSE`/`OP_ENDIF` are not balanced
    UnbalancedConditional,

    /// `OP_IF` argument must be either empty or a single 0x01 byte
    MinimalIf,

    /// stack element is not a valid script number
    InvalidNumber,

    /// verification operation failed
    VerifyFailed,

    /// `OP_CHECKLOCKTIMEVERIFY` is not satisfied by transaction lock time
    /// {0}
    LockTime(u32),

    /// `OP_CHECKSEQUENCEVERIFY` is not satisfied by input sequence {0:#x}
    Sequence(u32),

    /// `OP_CHECKTEMPLATEVERIFY` hash does not match the spending transaction
    TemplateMismatch,

    /// script finished with a false value on the top of the stack
    FalseResult,

    /// script left {0} elements on the stack instead of a single one
    CleanStack(usize),
}

/// Everything the evaluator knows about the spending transaction and the
/// spending parties.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SpendContext {
    /// Keys which are ready to sign
    pub signers: BTreeSet<PublicKey>,

    /// Known hash preimages
    pub preimages: BTreeMap<HashLock, HashPreimage>,

    /// Spending transaction `nLockTime`
    pub lock_time: u32,

    /// Spending input `nSeq`
    pub sequence: u32,

    /// Spending transaction version
    pub tx_version: i32,

    /// BIP-119 template hash of the spending transaction, if it is known
    pub template_hash: Option<[u8; 32]>,
}

impl Default for SpendContext {
    fn default() -> Self {
        SpendContext {
            signers: empty!(),
            preimages: empty!(),
            lock_time: 0,
            sequence: SEQ_NO_MAX_VALUE,
            tx_version: 2,
            template_hash: None,
        }
    }
}

impl SpendContext {
    /// Adds a signing party.
    pub fn with_signer(mut self, key: PublicKey) -> Self {
        self.signers.insert(key);
        self
    }

    /// Adds a known preimage.
    pub fn with_preimage(mut self, preimage: HashPreimage) -> Self {
        self.preimages.insert(preimage.hash_lock(), preimage);
        self
    }

    /// Returns symbolic signature for the key if the key is a signer.
    pub fn signature(&self, key: &PublicKey) -> Option<Vec<u8>> {
        if self.signers.contains(key) {
            Some(mock_signature(key))
        } else {
            None
        }
    }

    /// Returns preimage for a hash lock, if known.
    pub fn preimage(&self, lock: &HashLock) -> Option<HashPreimage> {
        self.preimages.get(lock).copied()
    }

    fn check_sig(&self, sig: &[u8], key: &[u8]) -> bool {
        match PublicKey::from_slice(key) {
            Ok(key) => self.signers.contains(&key) && sig == mock_signature(&key).as_slice(),
            Err(_) => false,
        }
    }
}

/// Produces symbolic signature for the key.
pub fn mock_signature(key: &PublicKey) -> Vec<u8> {
    let mut sig = vec![MOCK_SIG_PREFIX];
    sig.extend(key.to_bytes());
    sig
}

fn cast_to_bool(data: &[u8]) -> bool {
    for (index, byte) in data.iter().enumerate() {
        if *byte != 0 {
            // negative zero is false
            return !(index == data.len() - 1 && *byte == 0x80);
        }
    }
    false
}

fn decode_num(data: &[u8], max_len: usize) -> Result<i64, EvalError> {
    if data.len() > max_len {
        return Err(EvalError::InvalidNumber);
    }
    if data.is_empty() {
        return Ok(0);
    }
    let mut value = 0i64;
    for (index, byte) in data.iter().enumerate() {
        value |= (*byte as i64) << (8 * index);
    }
    let last = data[data.len() - 1];
    if last & 0x80 != 0 {
        value &= !(0x80i64 << (8 * (data.len() - 1)));
        value = -value;
    }
    Ok(value)
}

fn encode_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return vec![];
    }
    let negative = value < 0;
    let mut abs = value.unsigned_abs();
    let mut data = vec![];
    while abs > 0 {
        data.push((abs & 0xFF) as u8);
        abs >>= 8;
    }
    if data[data.len() - 1] & 0x80 != 0 {
        data.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        let last = data.len() - 1;
        data[last] |= 0x80;
    }
    data
}

fn encode_bool(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        vec![]
    }
}

struct Machine<'ctx> {
    ctx: &'ctx SpendContext,
    stack: Vec<Vec<u8>>,
}

impl<'ctx> Machine<'ctx> {
    fn pop(&mut self) -> Result<Vec<u8>, EvalError> {
        self.stack.pop().ok_or(EvalError::StackUnderflow)
    }

    fn top(&self) -> Result<&[u8], EvalError> {
        self.stack
            .last()
            .map(Vec::as_slice)
            .ok_or(EvalError::StackUnderflow)
    }

    fn push(&mut self, data: Vec<u8>) -> Result<(), EvalError> {
        if self.stack.len() >= MAX_STACK_SIZE {
            return Err(EvalError::StackOverflow);
        }
        self.stack.push(data);
        Ok(())
    }

    fn pop_num(&mut self) -> Result<i64, EvalError> {
        let data = self.pop()?;
        decode_num(&data, 4)
    }

    fn verify(&mut self) -> Result<(), EvalError> {
        let data = self.pop()?;
        if cast_to_bool(&data) {
            Ok(())
        } else {
            Err(EvalError::VerifyFailed)
        }
    }

    fn check_lock_time(&self) -> Result<(), EvalError> {
        let required = decode_num(self.top()?, 5)?;
        if required < 0 {
            return Err(EvalError::InvalidNumber);
        }
        let required = required as u32;
        let lock_time = self.ctx.lock_time;
        let same_kind = (required < LOCKTIME_THRESHOLD) == (lock_time < LOCKTIME_THRESHOLD);
        if !same_kind || required > lock_time || self.ctx.sequence == SEQ_NO_MAX_VALUE {
            return Err(EvalError::LockTime(lock_time));
        }
        Ok(())
    }

    fn check_sequence(&self) -> Result<(), EvalError> {
        let required = decode_num(self.top()?, 5)?;
        if required < 0 {
            return Err(EvalError::InvalidNumber);
        }
        let required = required as u32;
        if required & SEQ_NO_CSV_DISABLE_MASK != 0 {
            return Ok(());
        }
        let sequence = self.ctx.sequence;
        let mask = SEQ_NO_CSV_TYPE_MASK | SEQ_NO_CSV_VALUE_MASK;
        if self.ctx.tx_version < 2 ||
            sequence & SEQ_NO_CSV_DISABLE_MASK != 0 ||
            (required & SEQ_NO_CSV_TYPE_MASK) != (sequence & SEQ_NO_CSV_TYPE_MASK) ||
            (required & mask) > (sequence & mask)
        {
            return Err(EvalError::Sequence(sequence));
        }
        Ok(())
    }

    fn check_template(&self) -> Result<(), EvalError> {
        let top = self.top()?;
        if top.len() != 32 {
            return Ok(());
        }
        match self.ctx.template_hash {
            Some(hash) if hash[..] == top[..] => Ok(()),
            _ => Err(EvalError::TemplateMismatch),
        }
    }

    fn check_multisig(&mut self) -> Result<bool, EvalError> {
        let n = self.pop_num()?;
        if !(0..=20).contains(&n) {
            return Err(EvalError::InvalidNumber);
        }
        let mut keys = (0..n).map(|_| self.pop()).collect::<Result<Vec<_>, _>>()?;
        keys.reverse();
        let k = self.pop_num()?;
        if !(0..=n).contains(&k) {
            return Err(EvalError::InvalidNumber);
        }
        let mut sigs = (0..k).map(|_| self.pop()).collect::<Result<Vec<_>, _>>()?;
        sigs.reverse();
        // NULLDUMMY
        if !self.pop()?.is_empty() {
            return Err(EvalError::VerifyFailed);
        }
        let mut keys = keys.iter();
        for sig in &sigs {
            if !keys.any(|key| self.ctx.check_sig(sig, key)) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn step(&mut self, op: bitcoin::blockdata::opcodes::All) -> Result<(), EvalError> {
        let code = op.into_u8();
        if (OP_PUSHNUM_1.into_u8()..=OP_PUSHNUM_16.into_u8()).contains(&code) {
            let value = (code - OP_PUSHNUM_1.into_u8() + 1) as i64;
            return self.push(encode_num(value));
        }
        match op {
            OP_PUSHNUM_NEG1 => self.push(encode_num(-1))?,
            OP_VERIFY => self.verify()?,
            OP_DROP => {
                self.pop()?;
            }
            OP_SWAP => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(EvalError::StackUnderflow);
                }
                self.stack.swap(len - 1, len - 2);
            }
            OP_SIZE => {
                let len = self.top()?.len();
                self.push(encode_num(len as i64))?;
            }
            OP_EQUAL | OP_EQUALVERIFY => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(encode_bool(a == b))?;
                if op == OP_EQUALVERIFY {
                    self.verify()?;
                }
            }
            OP_ADD => {
                let b = self.pop_num()?;
                let a = self.pop_num()?;
                self.push(encode_num(a + b))?;
            }
            OP_SHA256 => {
                let data = self.pop()?;
                self.push(sha256::Hash::hash(&data).into_inner().to_vec())?;
            }
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let key = self.pop()?;
                let sig = self.pop()?;
                let valid = self.ctx.check_sig(&sig, &key);
                self.push(encode_bool(valid))?;
                if op == OP_CHECKSIGVERIFY {
                    self.verify()?;
                }
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let valid = self.check_multisig()?;
                self.push(encode_bool(valid))?;
                if op == OP_CHECKMULTISIGVERIFY {
                    self.verify()?;
                }
            }
            OP_CLTV => self.check_lock_time()?,
            OP_CSV => self.check_sequence()?,
            OP_NOP4 => self.check_template()?,
            _ => return Err(EvalError::UnsupportedOpcode(code)),
        }
        Ok(())
    }
}

/// Executes script over the witness stack (given bottom to top) and checks
/// that it leaves exactly one true element.
pub fn execute(script: &Script, witness: &[Vec<u8>], ctx: &SpendContext) -> Result<(), EvalError> {
    let mut machine = Machine {
        ctx,
        stack: vec![],
    };
    for item in witness {
        machine.push(item.clone())?;
    }

    let mut exec_stack: Vec<bool> = vec![];
    for instruction in script.instructions() {
        let instruction = instruction.map_err(|_| EvalError::InvalidScript)?;
        let executing = exec_stack.iter().all(|flag| *flag);
        match instruction {
            Instruction::Op(OP_IF) => {
                if executing {
                    let cond = machine.pop()?;
                    let flag = match cond.as_slice() {
                        [] => false,
                        [1] => true,
                        _ => return Err(EvalError::MinimalIf),
                    };
                    exec_stack.push(flag);
                } else {
                    exec_stack.push(false);
                }
            }
            Instruction::Op(OP_ELSE) => {
                let last = exec_stack.last_mut().ok_or(EvalError::UnbalancedConditional)?;
                *last = !*last;
            }
            Instruction::Op(OP_ENDIF) => {
                exec_stack.pop().ok_or(EvalError::UnbalancedConditional)?;
            }
            _ if !executing => {}
            Instruction::PushBytes(data) => machine.push(data.to_vec())?,
            Instruction::Op(op) => machine.step(op)?,
        }
    }
    if !exec_stack.is_empty() {
        return Err(EvalError::UnbalancedConditional);
    }

    match machine.stack.len() {
        1 if cast_to_bool(&machine.stack[0]) => Ok(()),
        1 => Err(EvalError::FalseResult),
        0 => Err(EvalError::StackUnderflow),
        len => Err(EvalError::CleanStack(len)),
    }
}

#[cfg(test)]
mod test {
    use bitcoin::blockdata::script::Builder;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    use super::*;

    fn key(no: u8) -> PublicKey {
        let secp = Secp256k1::signing_only();
        let sk = SecretKey::from_slice(&[no; 32]).unwrap();
        PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk))
    }

    #[test]
    fn numbers() {
        for value in [0i64, 1, -1, 127, 128, 255, 256, -255, 0x7FFFFFFF, -0x7FFFFFFF] {
            assert_eq!(decode_num(&encode_num(value), 5), Ok(value));
        }
        assert_eq!(encode_num(128), vec![0x80, 0x00]);
        assert_eq!(encode_num(-1), vec![0x81]);
        assert!(!cast_to_bool(&[0x00, 0x80]));
        assert!(cast_to_bool(&[0x00, 0x01]));
    }

    #[test]
    fn checksig() {
        let script = Builder::new()
            .push_key(&key(1))
            .push_opcode(OP_CHECKSIG)
            .into_script();
        let ctx = SpendContext::default().with_signer(key(1));
        assert_eq!(execute(&script, &[mock_signature(&key(1))], &ctx), Ok(()));
        assert_eq!(
            execute(&script, &[mock_signature(&key(1))], &SpendContext::default()),
            Err(EvalError::FalseResult)
        );
        assert_eq!(execute(&script, &[], &ctx), Err(EvalError::StackUnderflow));
    }

    #[test]
    fn branches() {
        let script = Builder::new()
            .push_opcode(OP_IF)
            .push_int(1)
            .push_opcode(OP_ELSE)
            .push_int(0)
            .push_opcode(OP_ENDIF)
            .into_script();
        let ctx = SpendContext::default();
        assert_eq!(execute(&script, &[vec![1]], &ctx), Ok(()));
        assert_eq!(execute(&script, &[vec![]], &ctx), Err(EvalError::FalseResult));
        assert_eq!(execute(&script, &[vec![2]], &ctx), Err(EvalError::MinimalIf));
    }

    #[test]
    fn timelocks() {
        let script = Builder::new()
            .push_int(100)
            .push_opcode(OP_CLTV)
            .push_opcode(OP_DROP)
            .push_int(1)
            .into_script();
        let mut ctx = SpendContext {
            lock_time: 99,
            sequence: 0,
            ..default!()
        };
        assert_eq!(execute(&script, &[], &ctx), Err(EvalError::LockTime(99)));
        ctx.lock_time = 100;
        assert_eq!(execute(&script, &[], &ctx), Ok(()));
        ctx.sequence = SEQ_NO_MAX_VALUE;
        assert!(execute(&script, &[], &ctx).is_err());

        let script = Builder::new()
            .push_int(10)
            .push_opcode(OP_CSV)
            .push_opcode(OP_DROP)
            .push_int(1)
            .into_script();
        ctx.sequence = 10;
        assert_eq!(execute(&script, &[], &ctx), Ok(()));
        ctx.sequence = 9;
        assert_eq!(execute(&script, &[], &ctx), Err(EvalError::Sequence(9)));
    }

    #[test]
    fn template() {
        let hash = [0xAB; 32];
        let script = Builder::new()
            .push_slice(&hash)
            .push_opcode(OP_NOP4)
            .into_script();
        let ctx = SpendContext {
            template_hash: Some(hash),
            ..default!()
        };
        assert_eq!(execute(&script, &[], &ctx), Ok(()));
        let ctx = SpendContext {
            template_hash: Some([0; 32]),
            ..default!()
        };
        assert_eq!(execute(&script, &[], &ctx), Err(EvalError::TemplateMismatch));
    }
}
