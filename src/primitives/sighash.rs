//! Signing and verifying SIGHASH_ALL|ANYONECANPAY inputs for each of the
//! four recognized script forms, and the "append a random trailing input"
//! proof device pledge validation uses to confirm ANYONECANPAY (spec §4.2
//! step 3).
//!
//! Execution here is deliberately scoped to exactly the four forms the
//! protocol whitelists (spec §3: "No other forms are accepted") rather than
//! a general Script interpreter — anything else is already rejected as
//! `NonStandardInput` before signature verification runs, so a
//! general-purpose interpreter's extra generality is never exercised.

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey, Verification};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::error::PledgeError;
use crate::primitives::script::{self, ScriptKind};

pub const ANYONECANPAY_ALL: EcdsaSighashType = EcdsaSighashType::AllPlusAnyoneCanPay;

/// Compute the legacy sighash for `input_index` against `script_pubkey`
/// (or, for P2SH, the embedded redeem script) under an arbitrary sighash
/// type. The pledging path always uses `ANYONECANPAY_ALL`; ordinary wallet
/// spends (dependency and revocation transactions) use plain `All`.
pub fn legacy_sighash_with_type(
    tx: &Transaction,
    input_index: usize,
    script_pubkey: &Script,
    sighash_type: EcdsaSighashType,
) -> Result<Message, PledgeError> {
    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .legacy_signature_hash(input_index, script_pubkey, sighash_type.to_u32())
        .map_err(|e| PledgeError::ScriptExecutionFailure { index: input_index, reason: e.to_string() })?;
    Ok(Message::from_digest(sighash.to_byte_array()))
}

/// Compute the legacy sighash for `input_index` against `script_pubkey`
/// (or, for P2SH, the embedded redeem script) under
/// SIGHASH_ALL|ANYONECANPAY.
pub fn legacy_sighash(
    tx: &Transaction,
    input_index: usize,
    script_pubkey: &Script,
) -> Result<Message, PledgeError> {
    legacy_sighash_with_type(tx, input_index, script_pubkey, ANYONECANPAY_ALL)
}

/// Sign input `input_index` of `tx` with `secret_key` under
/// SIGHASH_ALL|ANYONECANPAY against `script_code` (the scriptPubKey being
/// spent, or the redeem script for P2SH).
pub fn sign_input<C: bitcoin::secp256k1::Signing>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    secret_key: &SecretKey,
) -> Result<Vec<u8>, PledgeError> {
    let message = legacy_sighash(tx, input_index, script_code)?;
    let sig = secp.sign_ecdsa(&message, secret_key);
    let mut bytes = sig.serialize_der().to_vec();
    bytes.push(ANYONECANPAY_ALL.to_u32() as u8);
    Ok(bytes)
}

/// Sign input `input_index` of `tx` under plain SIGHASH_ALL — the ordinary
/// wallet machinery used for dependency and revocation transactions, which
/// are not pledges and so carry no ANYONECANPAY requirement.
pub fn sign_input_all<C: bitcoin::secp256k1::Signing>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    secret_key: &SecretKey,
) -> Result<Vec<u8>, PledgeError> {
    let message = legacy_sighash_with_type(tx, input_index, script_code, EcdsaSighashType::All)?;
    let sig = secp.sign_ecdsa(&message, secret_key);
    let mut bytes = sig.serialize_der().to_vec();
    bytes.push(EcdsaSighashType::All.to_u32() as u8);
    Ok(bytes)
}

/// Append a throwaway input spending a nonexistent outpoint, with a
/// push-only scriptSig carrying a 32-byte nonce, to a clone of `tx`. Used to
/// prove every real input is ANYONECANPAY: if the real inputs' signatures
/// still verify with this extra input attached, ANYONECANPAY held.
pub fn with_random_trailing_input(tx: &Transaction, nonce: [u8; 32]) -> Transaction {
    let mut tx = tx.clone();
    let script_sig = ScriptBuf::builder().push_slice(nonce).into_script();
    tx.input.push(TxIn {
        previous_output: OutPoint::null(),
        script_sig,
        sequence: Sequence::MAX,
        witness: Witness::new(),
    });
    tx
}

/// Build the scriptSig for a freshly signed pledge input, given the
/// scriptPubKey it spends and (for P2SH) the redeem script. Assumes a
/// single signer: the multisig arm covers only 1-of-n stubs, which is all
/// the pledging wallet ever creates for itself.
pub fn build_script_sig(kind: &ScriptKind, signature: &[u8], pubkey: Option<&PublicKey>, redeem_script: Option<&Script>) -> ScriptBuf {
    match kind {
        ScriptKind::P2pkh { .. } => {
            let pk = pubkey.expect("P2PKH scriptSig requires a pubkey");
            ScriptBuf::builder()
                .push_slice(<&bitcoin::script::PushBytes>::try_from(signature).unwrap())
                .push_slice(pk.serialize())
                .into_script()
        }
        ScriptKind::P2pk { .. } => ScriptBuf::builder()
            .push_slice(<&bitcoin::script::PushBytes>::try_from(signature).unwrap())
            .into_script(),
        ScriptKind::Multisig { .. } => {
            // OP_0 dummy for the CHECKMULTISIG off-by-one bug, then each
            // signature in pubkey order.
            let mut builder = ScriptBuf::builder().push_opcode(bitcoin::opcodes::OP_0);
            builder = builder.push_slice(<&bitcoin::script::PushBytes>::try_from(signature).unwrap());
            builder.into_script()
        }
        ScriptKind::P2sh { .. } => {
            let redeem = redeem_script.expect("P2SH scriptSig requires the redeem script");
            ScriptBuf::builder()
                .push_slice(<&bitcoin::script::PushBytes>::try_from(signature).unwrap())
                .push_slice(redeem.as_bytes())
                .into_script()
        }
        ScriptKind::NonStandard => ScriptBuf::new(),
    }
}

/// Verify a single recognized-form signature against `message`.
pub fn verify_signature<C: Verification>(
    secp: &Secp256k1<C>,
    message: &Message,
    signature_with_type: &[u8],
    pubkey: &PublicKey,
) -> bool {
    if signature_with_type.is_empty() {
        return false;
    }
    let der = &signature_with_type[..signature_with_type.len() - 1];
    let Ok(sig) = Signature::from_der(der) else {
        return false;
    };
    secp.verify_ecdsa(message, &sig, pubkey).is_ok()
}

/// Reference to a confirmed UTXO an input spends, as reported by the UTXO
/// oracle.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedOutput {
    pub value: u64,
    pub script_pubkey: ScriptBuf,
}

impl From<&FetchedOutput> for TxOut {
    fn from(value: &FetchedOutput) -> Self {
        TxOut {
            value: bitcoin::Amount::from_sat(value.value),
            script_pubkey: value.script_pubkey.clone(),
        }
    }
}

/// Verify that input `index` of `tx` (with scriptSig already attached)
/// correctly spends `output`, under the recognized-form rules (spec §4.2
/// step 3). `classify` must already have rejected `NonStandard`.
pub fn verify_recognized_input<C: Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    index: usize,
    output: &FetchedOutput,
    kind: &ScriptKind,
) -> Result<(), PledgeError> {
    let script_sig = &tx.input[index].script_sig;

    let fail = |reason: &str| PledgeError::ScriptExecutionFailure { index, reason: reason.to_string() };

    match kind {
        ScriptKind::P2pkh { pubkey_hash } => {
            let pushes = script::push_count(script_sig).ok_or_else(|| fail("scriptSig not push-only"))?;
            if pushes != 2 {
                return Err(fail("expected exactly 2 pushes for P2PKH"));
            }
            let items = collect_pushes(script_sig);
            let (sig, pk_bytes) = (&items[0], &items[1]);
            let pubkey = PublicKey::from_slice(pk_bytes).map_err(|_| fail("invalid pubkey encoding"))?;
            if bitcoin::PublicKey::new(pubkey).pubkey_hash() != *pubkey_hash {
                return Err(fail("pubkey does not hash to the expected P2PKH hash"));
            }
            let message = legacy_sighash(tx, index, &output.script_pubkey)?;
            if !verify_signature(secp, &message, sig, &pubkey) {
                return Err(fail("ECDSA signature did not verify"));
            }
            Ok(())
        }
        ScriptKind::P2pk { pubkey } => {
            let pushes = script::push_count(script_sig).ok_or_else(|| fail("scriptSig not push-only"))?;
            if pushes != 1 {
                return Err(fail("expected exactly 1 push for P2PK"));
            }
            let items = collect_pushes(script_sig);
            let pk = PublicKey::from_slice(pubkey).map_err(|_| fail("invalid embedded pubkey"))?;
            let message = legacy_sighash(tx, index, &output.script_pubkey)?;
            if !verify_signature(secp, &message, &items[0], &pk) {
                return Err(fail("ECDSA signature did not verify"));
            }
            Ok(())
        }
        ScriptKind::Multisig { m, pubkeys, .. } => {
            let pushes = script::push_count(script_sig).ok_or_else(|| fail("scriptSig not push-only"))?;
            if pushes != *m as usize + 1 {
                return Err(fail("wrong number of multisig scriptSig pushes"));
            }
            let items = collect_pushes(script_sig);
            // items[0] is the OP_CHECKMULTISIG dummy push (expected empty).
            let sigs = &items[1..];
            let message = legacy_sighash(tx, index, &output.script_pubkey)?;
            verify_ordered_multisig(secp, &message, sigs, pubkeys).map_err(|_| fail("multisig did not verify"))
        }
        ScriptKind::P2sh { script_hash } => {
            let redeem = script::last_push(script_sig).ok_or_else(|| fail("missing redeem script push"))?;
            let computed_hash = bitcoin::hashes::hash160::Hash::hash(redeem.as_bytes());
            if computed_hash.as_byte_array() != script_hash {
                return Err(fail("redeem script does not hash to the P2SH script hash"));
            }
            let inner_kind = script::classify(&redeem);
            match inner_kind {
                ScriptKind::NonStandard => {
                    if script::count_sigops(&redeem) > script::MAX_P2SH_SIGOPS {
                        return Err(fail("unrecognized redeem script exceeds the sigop limit"));
                    }
                    Ok(())
                }
                _ => verify_recognized_p2sh_inner(secp, tx, index, output, &inner_kind, &redeem),
            }
        }
        ScriptKind::NonStandard => Err(fail("non-standard scriptPubKey")),
    }
}

fn verify_recognized_p2sh_inner<C: Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    index: usize,
    output: &FetchedOutput,
    inner_kind: &ScriptKind,
    redeem: &Script,
) -> Result<(), PledgeError> {
    let fail = |reason: &str| PledgeError::ScriptExecutionFailure { index, reason: reason.to_string() };
    let script_sig = &tx.input[index].script_sig;
    let all_pushes = collect_pushes(script_sig);
    // Drop the trailing redeem-script push; everything before it are the
    // redeem script's own arguments.
    let args = &all_pushes[..all_pushes.len() - 1];
    let message = legacy_sighash(tx, index, redeem)?;

    match inner_kind {
        ScriptKind::P2pkh { pubkey_hash } => {
            if args.len() != 2 {
                return Err(fail("expected 2 args for P2SH-P2PKH"));
            }
            let pubkey = PublicKey::from_slice(&args[1]).map_err(|_| fail("invalid pubkey"))?;
            if bitcoin::PublicKey::new(pubkey).pubkey_hash() != *pubkey_hash {
                return Err(fail("embedded pubkey mismatch"));
            }
            if !verify_signature(secp, &message, &args[0], &pubkey) {
                return Err(fail("signature did not verify"));
            }
            Ok(())
        }
        ScriptKind::P2pk { pubkey } => {
            if args.len() != 1 {
                return Err(fail("expected 1 arg for P2SH-P2PK"));
            }
            let pk = PublicKey::from_slice(pubkey).map_err(|_| fail("invalid pubkey"))?;
            if !verify_signature(secp, &message, &args[0], &pk) {
                return Err(fail("signature did not verify"));
            }
            Ok(())
        }
        ScriptKind::Multisig { m, pubkeys, .. } => {
            if args.len() != *m as usize + 1 {
                return Err(fail("wrong number of args for P2SH multisig"));
            }
            verify_ordered_multisig(secp, &message, &args[1..], pubkeys).map_err(|_| fail("multisig did not verify"))
        }
        _ => Err(fail("unexpected inner script kind")),
    }
    .map(|_| ())
}

/// Verify that each signature matches the next pubkey in order (Bitcoin's
/// CHECKMULTISIG semantics: signatures must appear in the same relative
/// order as their pubkeys, skipping pubkeys freely).
fn verify_ordered_multisig<C: Verification>(
    secp: &Secp256k1<C>,
    message: &Message,
    sigs: &[Vec<u8>],
    pubkeys: &[Vec<u8>],
) -> Result<(), ()> {
    let mut pk_iter = pubkeys.iter();
    for sig in sigs {
        let mut matched = false;
        for pk_bytes in pk_iter.by_ref() {
            let Ok(pk) = PublicKey::from_slice(pk_bytes) else { continue };
            if verify_signature(secp, message, sig, &pk) {
                matched = true;
                break;
            }
        }
        if !matched {
            return Err(());
        }
    }
    Ok(())
}

fn collect_pushes(script: &Script) -> Vec<Vec<u8>> {
    script
        .instructions()
        .filter_map(|i| match i {
            Ok(bitcoin::script::Instruction::PushBytes(b)) => Some(b.as_bytes().to_vec()),
            _ => None,
        })
        .collect()
}
