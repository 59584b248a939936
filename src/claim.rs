//! Claim assembly: combine a set of fully-validated pledges into the single
//! transaction that claims a project's funding goal (spec §4.3).

use std::collections::HashSet;

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{ScriptBuf, Sequence, Transaction, TxIn, Witness};

use crate::envelope::pledge::Pledge;
use crate::envelope::project::Project;
use crate::error::ClaimError;
use crate::wallet::pledging_wallet::Broadcaster;
use crate::wallet::simple_wallet::SimpleWallet;

/// The assembled claim, before the extra fee input has been attached.
pub struct ClaimSkeleton {
    pub tx: Transaction,
}

/// Build the claim transaction: outputs are the project's outputs in
/// project order, inputs are the concatenation of each pledge's pledge-tx
/// inputs in pledge-iteration order. Fails `ValueMismatch` unless the
/// pledge set sums exactly to the goal.
pub fn assemble_claim(project: &Project, pledges: &[Pledge]) -> Result<ClaimSkeleton, ClaimError> {
    let total: i64 = pledges.iter().map(|p| p.total_input_value() as i64).sum();
    let goal = project.goal() as i64;
    if total != goal {
        return Err(ClaimError::ValueMismatch(total - goal));
    }

    let mut inputs: Vec<TxIn> = Vec::new();
    for pledge in pledges {
        let pledge_tx = pledge.pledge_tx().map_err(|e| ClaimError::InsufficientFunds(e.to_string()))?;
        inputs.extend(pledge_tx.input.iter().cloned());
    }

    let outputs = project
        .outputs()
        .into_iter()
        .map(|o| bitcoin::TxOut { value: bitcoin::Amount::from_sat(o.value), script_pubkey: o.script })
        .collect();

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs,
        output: outputs,
    };

    Ok(ClaimSkeleton { tx })
}

/// Monotonically non-decreasing progress in `[0, 1]` merged from two
/// broadcasts: the dependency transaction that manufactures the claimer's
/// fee input, and the claim transaction itself. Each broadcast contributes
/// half the range.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimProgress {
    dependency: f64,
    claim: f64,
}

impl ClaimProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_dependency(&mut self, fraction: f64) {
        self.dependency = self.dependency.max(fraction.clamp(0.0, 1.0));
    }

    pub fn report_claim(&mut self, fraction: f64) {
        self.claim = self.claim.max(fraction.clamp(0.0, 1.0));
    }

    /// The merged, monotonic overall progress: half for each leg.
    pub fn overall(&self) -> f64 {
        0.5 * self.dependency + 0.5 * self.claim
    }
}

/// The claimer's two-transaction fee arrangement (spec §4.3): since a pure
/// claim has no change, the wallet first broadcasts a dependency tx that
/// produces an output of `2x` the dust floor, then attaches that output as
/// the claim's extra fee-paying input.
pub const CLAIM_FEE_INPUT_SATS: u64 = crate::config::constants::CLAIM_FEE_INPUT_SATS;

/// Assemble a claim, attach the claimer's own fee-paying input, sign and
/// broadcast both legs (spec §4.3): first the dependency transaction that
/// manufactures a `CLAIM_FEE_INPUT_SATS` output from the claimer's wallet,
/// then the claim transaction itself with that output appended as its
/// final input. Returns the broadcast claim transaction.
pub async fn assemble_and_broadcast_claim(
    project: &Project,
    pledges: &[Pledge],
    wallet: &mut SimpleWallet,
    broadcaster: &dyn Broadcaster,
    progress: &mut ClaimProgress,
) -> Result<Transaction, ClaimError> {
    let skeleton = assemble_claim(project, pledges)?;

    let (dependency_tx, fee_coin) = wallet
        .build_dependency_tx(CLAIM_FEE_INPUT_SATS, false, &HashSet::new())
        .map_err(|e| ClaimError::InsufficientFunds(e.to_string()))?;

    broadcaster.broadcast(&dependency_tx).await?;
    progress.report_dependency(1.0);

    let mut tx = skeleton.tx;
    let fee_input_index = tx.input.len();
    tx.input.push(TxIn {
        previous_output: fee_coin.outpoint,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    });
    wallet
        .sign_fee_input(&mut tx, fee_input_index, &fee_coin)
        .map_err(|e| ClaimError::SigningFailed(e.to_string()))?;

    broadcaster.broadcast(&tx).await?;
    progress.report_claim(1.0);

    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::PublicKey;
    use bitcoin::{Network, OutPoint, PubkeyHash};
    use prost::Message as _;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::TransportError;
    use crate::wallet::keys::WalletKeys;
    use crate::wallet::simple_wallet::Coin;

    struct RecordingBroadcaster {
        calls: AtomicUsize,
    }

    impl RecordingBroadcaster {
        fn new() -> Self {
            RecordingBroadcaster { calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Broadcaster for RecordingBroadcaster {
        async fn broadcast(&self, _tx: &Transaction) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
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

    fn pledge_spending(value: u64, project_id: &str) -> Pledge {
        let input = TxIn {
            previous_output: OutPoint { txid: bitcoin::Txid::from_byte_array([6u8; 32]), vout: 0 },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        };
        let tx = Transaction { version: Version::ONE, lock_time: LockTime::ZERO, input: vec![input], output: vec![] };
        Pledge::new(Vec::new(), tx, value, project_id.to_string())
    }

    fn funded_wallet(value: u64) -> SimpleWallet {
        let keys = WalletKeys::from_seed(&[8u8; 32], Network::Regtest).unwrap();
        let mut wallet = SimpleWallet::new(keys);
        let secret = wallet.keys().receive_key(0);
        let pubkey = PublicKey::from_secret_key(wallet.keys().secp(), &secret);
        let script = ScriptBuf::new_p2pkh(&PubkeyHash::hash(&pubkey.serialize()));
        wallet.add_coin(Coin {
            outpoint: OutPoint { txid: bitcoin::Txid::from_byte_array([9u8; 32]), vout: 0 },
            value,
            script_pubkey: script,
            derivation_index: 0,
            is_change: false,
        });
        wallet
    }

    #[tokio::test]
    async fn assemble_and_broadcast_claim_attaches_fee_input_and_broadcasts_both_legs() {
        let project_script = ScriptBuf::new_p2pkh(&PubkeyHash::hash(&[0u8; 33]));
        let project = single_output_project(100_000, &project_script);
        let pledges = vec![pledge_spending(100_000, &project.id_hex())];
        let mut wallet = funded_wallet(50_000);
        let broadcaster = RecordingBroadcaster::new();
        let mut progress = ClaimProgress::new();

        let tx = assemble_and_broadcast_claim(&project, &pledges, &mut wallet, &broadcaster, &mut progress)
            .await
            .unwrap();

        // One pledge input plus the claimer's own fee-paying input.
        assert_eq!(tx.input.len(), 2);
        assert!(!tx.input[1].script_sig.is_empty());
        assert_eq!(broadcaster.calls.load(Ordering::SeqCst), 2);
        assert_eq!(progress.overall(), 1.0);
    }

    #[tokio::test]
    async fn assemble_and_broadcast_claim_fails_on_value_mismatch_before_touching_the_wallet() {
        let project_script = ScriptBuf::new_p2pkh(&PubkeyHash::hash(&[0u8; 33]));
        let project = single_output_project(100_000, &project_script);
        let pledges = vec![pledge_spending(40_000, &project.id_hex())];
        let mut wallet = funded_wallet(50_000);
        let broadcaster = RecordingBroadcaster::new();
        let mut progress = ClaimProgress::new();

        let result = assemble_and_broadcast_claim(&project, &pledges, &mut wallet, &broadcaster, &mut progress).await;
        assert!(matches!(result, Err(ClaimError::ValueMismatch(-60_000))));
        assert_eq!(broadcaster.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn claim_progress_is_monotonic_and_merges_halves() {
        let mut p = ClaimProgress::new();
        assert_eq!(p.overall(), 0.0);
        p.report_dependency(1.0);
        assert_eq!(p.overall(), 0.5);
        p.report_claim(0.5);
        assert_eq!(p.overall(), 0.75);
        // reporting a lower fraction never decreases progress
        p.report_claim(0.1);
        assert_eq!(p.overall(), 0.75);
        p.report_claim(1.0);
        assert_eq!(p.overall(), 1.0);
    }
}
