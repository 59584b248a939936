//! End-to-end coverage across module boundaries (spec §8): a pledge built
//! by a real wallet, validated against a real peer-set oracle backed by
//! in-memory mock peers.

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::{Network, OutPoint, PubkeyHash, ScriptBuf};
use prost::Message as _;

use crate::envelope::project::Project;
use crate::error::TransportError;
use crate::primitives::sighash::FetchedOutput;
use crate::utxo::batcher::BatchingUtxoSource;
use crate::utxo::oracle::{PeerSetUtxoOracle, UtxoPeer};
use crate::utxo::UtxoAnswer;
use crate::validation::validate_pledge;
use crate::wallet::keys::WalletKeys;
use crate::wallet::pledging_wallet::PledgingWallet;
use crate::wallet::simple_wallet::{Coin, SimpleWallet};

/// Answers every query with a fixed, preset `UtxoAnswer` regardless of the
/// outpoints asked about.
struct FixedAnswerPeer(UtxoAnswer);

#[async_trait]
impl UtxoPeer for FixedAnswerPeer {
    async fn get_utxos(&self, _outpoints: &[OutPoint]) -> Result<UtxoAnswer, TransportError> {
        Ok(self.0.clone())
    }
}

fn funded_wallet(value: u64, seed: u8) -> SimpleWallet {
    let keys = WalletKeys::from_seed(&[seed; 32], Network::Regtest).unwrap();
    let mut wallet = SimpleWallet::new(keys);
    let secret = wallet.keys().receive_key(0);
    let pubkey = PublicKey::from_secret_key(wallet.keys().secp(), &secret);
    let script = ScriptBuf::new_p2pkh(&PubkeyHash::hash(&pubkey.serialize()));
    let outpoint = OutPoint { txid: bitcoin::Txid::from_byte_array([seed; 32]), vout: 0 };
    wallet.add_coin(Coin { outpoint, value, script_pubkey: script, derivation_index: 0, is_change: false });
    wallet
}

fn single_output_project(value: u64, script: &ScriptBuf) -> Project {
    let details = crate::proto::ProjectDetails {
        time: Some(0),
        expires: None,
        network: Some("regtest".to_string()),
        outputs: vec![crate::proto::Output { amount: Some(value), script: Some(script.to_bytes()) }],
        memo: None,
        payment_url: None,
        merchant_data: None,
        extra_details: None,
    };
    let envelope = crate::proto::Project { serialized_payment_details: Some(details.encode_to_vec()), signature: None };
    Project::parse(&envelope.encode_to_vec()).unwrap()
}

/// Run `validate_pledge` against `utxo_source`, driving `flush()` on the
/// same executor so the single in-flight `lookup()` actually resolves.
async fn run_validation(
    utxo_source: &BatchingUtxoSource,
    project: &Project,
    pledge: &crate::envelope::pledge::Pledge,
) -> Result<(), crate::error::PledgeError> {
    let secp = Secp256k1::verification_only();
    let (result, _) = tokio::join!(validate_pledge(&secp, project, pledge, utxo_source), async {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        utxo_source.flush().await;
    });
    result
}

/// Scenario 1: a perfect-size pledge, validated against a consistent
/// two-peer set, is accepted.
#[tokio::test]
async fn perfect_size_pledge_validates_against_consistent_peers() {
    let wallet = funded_wallet(250_000, 11);
    let project_script = ScriptBuf::new_p2pkh(&PubkeyHash::hash(&[2u8; 33]));
    let project = single_output_project(250_000, &project_script);
    let pledging = PledgingWallet::new(wallet);

    let pending = pledging.create_pledge(&project, 250_000, false).unwrap();
    assert!(pending.dependency.is_none(), "exact-size coin needs no dependency tx");
    let pledge = pending.pledge;

    let answer = UtxoAnswer {
        hits: vec![true],
        outputs: vec![FetchedOutput { value: 250_000, script_pubkey: pending.stub.script_pubkey.clone() }],
    };
    let peers: Vec<Arc<dyn UtxoPeer>> =
        vec![Arc::new(FixedAnswerPeer(answer.clone())), Arc::new(FixedAnswerPeer(answer))];
    let utxo_source = BatchingUtxoSource::new(PeerSetUtxoOracle::new(peers));

    let result = run_validation(&utxo_source, &project, &pledge).await;
    assert!(result.is_ok(), "expected valid pledge to pass: {result:?}");
}

/// Scenario 6: peers disagree about the same outpoint's UTXO status, so
/// validation fails closed rather than picking a side.
#[tokio::test]
async fn inconsistent_peer_answers_fail_validation() {
    let wallet = funded_wallet(250_000, 12);
    let project_script = ScriptBuf::new_p2pkh(&PubkeyHash::hash(&[3u8; 33]));
    let project = single_output_project(250_000, &project_script);
    let pledging = PledgingWallet::new(wallet);

    let pending = pledging.create_pledge(&project, 250_000, false).unwrap();
    let pledge = pending.pledge;

    let agrees = UtxoAnswer {
        hits: vec![true],
        outputs: vec![FetchedOutput { value: 250_000, script_pubkey: pending.stub.script_pubkey.clone() }],
    };
    let disagrees = UtxoAnswer { hits: vec![false], outputs: vec![] };
    let peers: Vec<Arc<dyn UtxoPeer>> = vec![Arc::new(FixedAnswerPeer(agrees)), Arc::new(FixedAnswerPeer(disagrees))];
    let utxo_source = BatchingUtxoSource::new(PeerSetUtxoOracle::new(peers));

    let result = run_validation(&utxo_source, &project, &pledge).await;
    let err = result.expect_err("disagreeing peers must not validate");
    assert!(err.to_string().contains("inconsistent"), "unexpected error: {err}");
}
