//! Classification of the four recognized standard scriptPubKey forms
//! (spec §3 invariants) and the scriptSig shape each expects.

use bitcoin::opcodes::all as opcodes;
use bitcoin::script::{Instruction, Script, ScriptBuf};
use bitcoin::PubkeyHash;

/// Above this many signature operations, an unrecognized P2SH redeem script
/// is refused even though its exact arity can't be computed (mirrors
/// Bitcoin Core's bare sigop policy limit for non-standard redeem scripts).
pub const MAX_P2SH_SIGOPS: usize = 15;

#[derive(Debug, Clone)]
pub enum ScriptKind {
    P2pkh { pubkey_hash: PubkeyHash },
    P2pk { pubkey: Vec<u8> },
    Multisig { m: u8, n: u8, pubkeys: Vec<Vec<u8>> },
    P2sh { script_hash: [u8; 20] },
    NonStandard,
}

fn small_int(op: bitcoin::opcodes::Opcode) -> Option<u8> {
    let byte = op.to_u8();
    if byte >= opcodes::OP_PUSHNUM_1.to_u8() && byte <= opcodes::OP_PUSHNUM_16.to_u8() {
        Some(byte - opcodes::OP_PUSHNUM_1.to_u8() + 1)
    } else {
        None
    }
}

fn instructions(script: &Script) -> Option<Vec<Instruction<'_>>> {
    script.instructions().collect::<Result<Vec<_>, _>>().ok()
}

/// Classify a scriptPubKey as one of the four recognized forms, or
/// `NonStandard` if it matches none of them. No other forms are accepted
/// anywhere in this protocol (spec §3 invariants).
pub fn classify(script_pubkey: &Script) -> ScriptKind {
    let Some(ins) = instructions(script_pubkey) else {
        return ScriptKind::NonStandard;
    };

    // P2PKH: OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG
    if let [Instruction::Op(dup), Instruction::Op(hash160), Instruction::PushBytes(hash), Instruction::Op(eqverify), Instruction::Op(checksig)] =
        ins.as_slice()
    {
        if dup.to_u8() == opcodes::OP_DUP.to_u8()
            && hash160.to_u8() == opcodes::OP_HASH160.to_u8()
            && eqverify.to_u8() == opcodes::OP_EQUALVERIFY.to_u8()
            && checksig.to_u8() == opcodes::OP_CHECKSIG.to_u8()
            && hash.len() == 20
        {
            if let Ok(pkh) = PubkeyHash::from_slice(hash.as_bytes()) {
                return ScriptKind::P2pkh { pubkey_hash: pkh };
            }
        }
    }

    // P2PK: <pubkey> OP_CHECKSIG
    if let [Instruction::PushBytes(pubkey), Instruction::Op(checksig)] = ins.as_slice() {
        if checksig.to_u8() == opcodes::OP_CHECKSIG.to_u8() && (pubkey.len() == 33 || pubkey.len() == 65) {
            return ScriptKind::P2pk { pubkey: pubkey.as_bytes().to_vec() };
        }
    }

    // P2SH: OP_HASH160 <20 bytes> OP_EQUAL
    if let [Instruction::Op(hash160), Instruction::PushBytes(hash), Instruction::Op(equal)] = ins.as_slice() {
        if hash160.to_u8() == opcodes::OP_HASH160.to_u8()
            && equal.to_u8() == opcodes::OP_EQUAL.to_u8()
            && hash.len() == 20
        {
            let mut arr = [0u8; 20];
            arr.copy_from_slice(hash.as_bytes());
            return ScriptKind::P2sh { script_hash: arr };
        }
    }

    // Bare multisig: OP_m <pubkey>... OP_n OP_CHECKMULTISIG
    if let Some(ins) = instructions(script_pubkey) {
        if ins.len() >= 4 {
            if let (Instruction::Op(m_op), Instruction::Op(n_op), Instruction::Op(checkmultisig)) =
                (&ins[0], &ins[ins.len() - 2], &ins[ins.len() - 1])
            {
                if checkmultisig.to_u8() == opcodes::OP_CHECKMULTISIG.to_u8() {
                    if let (Some(m), Some(n)) = (small_int(*m_op), small_int(*n_op)) {
                        let pubkey_instrs = &ins[1..ins.len() - 2];
                        if pubkey_instrs.len() == n as usize && m >= 1 && m <= n {
                            let mut pubkeys = Vec::with_capacity(n as usize);
                            let mut all_pushes = true;
                            for instr in pubkey_instrs {
                                match instr {
                                    Instruction::PushBytes(bytes)
                                        if bytes.len() == 33 || bytes.len() == 65 =>
                                    {
                                        pubkeys.push(bytes.as_bytes().to_vec());
                                    }
                                    _ => {
                                        all_pushes = false;
                                        break;
                                    }
                                }
                            }
                            if all_pushes {
                                return ScriptKind::Multisig { m, n, pubkeys };
                            }
                        }
                    }
                }
            }
        }
    }

    ScriptKind::NonStandard
}

/// The number of scriptSig stack items this scriptPubKey expects, or `None`
/// if it is not one of the recognized forms (arity is then computed via the
/// embedded redeem script for P2SH instead).
pub fn recognized_arity(kind: &ScriptKind) -> Option<usize> {
    match kind {
        ScriptKind::P2pkh { .. } => Some(2),
        ScriptKind::P2pk { .. } => Some(1),
        // +1 for the dummy OP_0 the OP_CHECKMULTISIG off-by-one bug expects.
        ScriptKind::Multisig { m, .. } => Some(*m as usize + 1),
        ScriptKind::P2sh { .. } => None,
        ScriptKind::NonStandard => None,
    }
}

/// `true` iff the scriptSig contains only data pushes (spec §3: every input
/// is standard iff its scriptSig is push-only).
pub fn is_push_only(script_sig: &Script) -> bool {
    script_sig.is_push_only()
}

/// The number of data pushes in a push-only scriptSig, i.e. the number of
/// items left on the stack after it runs. Returns `None` if the scriptSig
/// contains anything that doesn't parse as a push.
pub fn push_count(script_sig: &Script) -> Option<usize> {
    let ins = instructions(script_sig)?;
    if ins.iter().any(|i| !matches!(i, Instruction::PushBytes(_))) {
        return None;
    }
    Some(ins.len())
}

/// The last data push in a scriptSig — for a P2SH input, this is the
/// serialized redeem script.
pub fn last_push(script_sig: &Script) -> Option<ScriptBuf> {
    let ins = instructions(script_sig)?;
    match ins.last()? {
        Instruction::PushBytes(bytes) => Some(ScriptBuf::from_bytes(bytes.as_bytes().to_vec())),
        Instruction::Op(_) => None,
    }
}

/// Legacy (non-accurate) sigop count: OP_CHECKSIG(VERIFY) count as 1,
/// OP_CHECKMULTISIG(VERIFY) counts as the preceding small-int pubkey count
/// if present, else the policy default of 20 (mirrors Bitcoin Core's
/// `GetSigOpCount(accurate=false)`).
pub fn count_sigops(script: &Script) -> usize {
    let Some(ins) = instructions(script) else {
        return usize::MAX;
    };
    let mut count = 0usize;
    let mut last_small_int: Option<u8> = None;
    for instr in &ins {
        match instr {
            Instruction::Op(op) => {
                let byte = op.to_u8();
                if byte == opcodes::OP_CHECKSIG.to_u8() || byte == opcodes::OP_CHECKSIGVERIFY.to_u8() {
                    count += 1;
                } else if byte == opcodes::OP_CHECKMULTISIG.to_u8()
                    || byte == opcodes::OP_CHECKMULTISIGVERIFY.to_u8()
                {
                    count += last_small_int.map(|n| n as usize).unwrap_or(20);
                }
                last_small_int = small_int(*op);
            }
            Instruction::PushBytes(_) => {
                last_small_int = None;
            }
        }
    }
    count
}
