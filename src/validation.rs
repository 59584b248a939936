//! Pledge validation: given a pledge and a UTXO source, decide if it's
//! valid (spec §4.2). The four-step algorithm here must be reproduced
//! exactly — this is the protocol's only defense against forged or
//! already-spent pledges.

use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::OutPoint;

use crate::config::constants;
use crate::envelope::pledge::Pledge;
use crate::envelope::project::Project;
use crate::error::PledgeError;
use crate::primitives::script::{self, ScriptKind};
use crate::primitives::sighash::{self, FetchedOutput};
use crate::utxo::batcher::BatchingUtxoSource;

/// Step 1: decode the pledge tx, check its outputs against the project's,
/// and reject duplicate inputs. Does not touch the network.
fn fast_sanity_check(project: &Project, pledge: &Pledge) -> Result<bitcoin::Transaction, PledgeError> {
    let pledge_tx = pledge.pledge_tx()?.clone();

    let expected_outputs = project.outputs();
    if pledge_tx.output.len() != expected_outputs.len() {
        return Err(PledgeError::TxWrongNumberOfOutputs {
            actual: pledge_tx.output.len(),
            expected: expected_outputs.len(),
        });
    }
    for (index, (actual, expected)) in pledge_tx.output.iter().zip(expected_outputs.iter()).enumerate() {
        if actual.value.to_sat() != expected.value || actual.script_pubkey != expected.script {
            return Err(PledgeError::OutputMismatch { index });
        }
    }

    let mut seen: Vec<OutPoint> = Vec::with_capacity(pledge_tx.input.len());
    for input in &pledge_tx.input {
        if seen.contains(&input.previous_output) {
            return Err(PledgeError::DuplicatedOutPoint);
        }
        seen.push(input.previous_output);
    }

    Ok(pledge_tx)
}

/// Step 2: look every input's outpoint up via the (batching) UTXO source.
async fn fetch_inputs(
    utxo_source: &BatchingUtxoSource,
    pledge_tx: &bitcoin::Transaction,
) -> Result<Vec<FetchedOutput>, PledgeError> {
    let outpoints: Vec<OutPoint> = pledge_tx.input.iter().map(|i| i.previous_output).collect();
    let answers = utxo_source.lookup(outpoints).await?;
    let mut outputs = Vec::with_capacity(answers.len());
    for answer in answers {
        outputs.push(answer.ok_or(PledgeError::UnknownUtxo)?);
    }
    Ok(outputs)
}

/// The expected scriptSig arity for `kind`, with the P2SH-aware adjustment:
/// total arity = scriptPubKey arity (the redeem-script push) + the redeem
/// script's own arity. An unrecognized redeem script is accepted as long as
/// its sigop count is within the policy limit, in which case arity isn't
/// checked further.
enum ArityCheck {
    Exact(usize),
    SigopBound,
}

fn expected_arity(kind: &ScriptKind, script_sig: &bitcoin::Script) -> Option<ArityCheck> {
    if let Some(n) = script::recognized_arity(kind) {
        return Some(ArityCheck::Exact(n));
    }
    match kind {
        ScriptKind::P2sh { .. } => {
            let redeem = script::last_push(script_sig)?;
            let inner_kind = script::classify(&redeem);
            match script::recognized_arity(&inner_kind) {
                Some(inner_arity) => Some(ArityCheck::Exact(1 + inner_arity)),
                None if script::count_sigops(&redeem) <= script::MAX_P2SH_SIGOPS => Some(ArityCheck::SigopBound),
                None => None,
            }
        }
        _ => None,
    }
}

/// Step 3: cross-check every original input's scriptSig against its fetched
/// scriptPubKey, proving ANYONECANPAY via a random trailing input.
fn script_cross_check<C: Verification>(
    secp: &Secp256k1<C>,
    pledge_tx: &bitcoin::Transaction,
    fetched: &[FetchedOutput],
) -> Result<(), PledgeError> {
    let nonce: [u8; 32] = rand::random();
    let proof_tx = sighash::with_random_trailing_input(pledge_tx, nonce);

    for (index, output) in fetched.iter().enumerate() {
        let script_sig = &proof_tx.input[index].script_sig;
        let kind = script::classify(&output.script_pubkey);

        if matches!(kind, ScriptKind::NonStandard) {
            return Err(PledgeError::NonStandardInput { index });
        }
        if !script::is_push_only(script_sig) {
            return Err(PledgeError::NonStandardInput { index });
        }
        let pushes = script::push_count(script_sig).ok_or(PledgeError::NonStandardInput { index })?;
        match expected_arity(&kind, script_sig) {
            Some(ArityCheck::Exact(expected)) if expected == pushes => {}
            Some(ArityCheck::SigopBound) => {}
            _ => return Err(PledgeError::NonStandardInput { index }),
        }

        sighash::verify_recognized_input(secp, &proof_tx, index, output, &kind)?;
    }

    Ok(())
}

/// Step 4: the fetched UTXO sum must match the pledge's cached total and
/// meet the project's minimum pledge size.
fn value_check(project: &Project, fetched: &[FetchedOutput], pledge: &Pledge) -> Result<(), PledgeError> {
    let total: u64 = fetched.iter().map(|o| o.value).sum();
    if total == 0 || total != pledge.total_input_value() {
        return Err(PledgeError::CachedValueMismatch);
    }
    let min = project.min_pledge_size();
    if total < min {
        return Err(PledgeError::PledgeTooSmall { shortfall: min - total });
    }
    Ok(())
}

/// Validate `pledge` against `project`, fetching its inputs' outputs from
/// `utxo_source`. Reproduces spec §4.2 exactly: fast sanity, UTXO lookup,
/// script cross-check, value check, in that order, short-circuiting on the
/// first failure.
pub async fn validate_pledge<C: Verification>(
    secp: &Secp256k1<C>,
    project: &Project,
    pledge: &Pledge,
    utxo_source: &BatchingUtxoSource,
) -> Result<(), PledgeError> {
    let pledge_tx = fast_sanity_check(project, pledge)?;
    let fetched = fetch_inputs(utxo_source, &pledge_tx).await?;
    script_cross_check(secp, &pledge_tx, &fetched)?;
    value_check(project, &fetched, pledge)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::SecretKey;
    use bitcoin::{Amount, PubkeyHash, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
    use prost::Message as _;

    fn dummy_outpoint(byte: u8) -> OutPoint {
        OutPoint { txid: Txid::from_byte_array([byte; 32]), vout: 0 }
    }

    fn single_output_project(value: u64, script: &ScriptBuf) -> Project {
        let details = crate::proto::ProjectDetails {
            time: Some(0),
            expires: None,
            network: Some("test".to_string()),
            outputs: vec![crate::proto::Output { amount: Some(value), script: Some(script.to_bytes()) }],
            memo: None,
            payment_url: None,
            merchant_data: None,
            extra_details: None,
        };
        let envelope = crate::proto::Project {
            serialized_payment_details: Some(details.encode_to_vec()),
            signature: None,
        };
        Project::parse(&envelope.encode_to_vec()).expect("well-formed test project")
    }

    #[test]
    fn fast_sanity_rejects_duplicate_outpoints() {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let pk = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk);
        let pkh = PubkeyHash::hash(&pk.serialize());
        let spk = ScriptBuf::new_p2pkh(&pkh);

        let project = single_output_project(1000, &spk);
        let outpoint = dummy_outpoint(1);
        let tx = Transaction {
            version: bitcoin::transaction::Version::ONE,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![
                TxIn {
                    previous_output: outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                },
                TxIn {
                    previous_output: outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                },
            ],
            output: vec![TxOut { value: Amount::from_sat(1000), script_pubkey: spk }],
        };

        let pledge = Pledge::new(Vec::new(), tx, 1000, project.id_hex());
        let result = fast_sanity_check(&project, &pledge);
        assert!(matches!(result, Err(PledgeError::DuplicatedOutPoint)));
    }

    #[test]
    fn fast_sanity_rejects_output_mismatch() {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[9u8; 32]).unwrap();
        let pk = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk);
        let pkh = PubkeyHash::hash(&pk.serialize());
        let spk = ScriptBuf::new_p2pkh(&pkh);

        let project = single_output_project(1000, &spk);
        let tx = Transaction {
            version: bitcoin::transaction::Version::ONE,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: dummy_outpoint(2),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            // Wrong amount: project wants 1000.
            output: vec![TxOut { value: Amount::from_sat(900), script_pubkey: spk }],
        };
        let pledge = Pledge::new(Vec::new(), tx, 900, project.id_hex());
        let result = fast_sanity_check(&project, &pledge);
        assert!(matches!(result, Err(PledgeError::OutputMismatch { index: 0 })));
    }
}
