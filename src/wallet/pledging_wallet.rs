//! The pledging wallet (spec §4.5): creates pledges against a
//! `SimpleWallet`'s coins, tracks committed/revoked pledges, and reacts to
//! observed spends of its own pledge stubs.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::{OutPoint, PubkeyHash, Transaction};

use crate::envelope::pledge::Pledge;
use crate::envelope::project::{Output, Project};
use crate::error::{TransportError, WalletError};
use crate::primitives::script::ScriptKind;
use crate::primitives::sighash;
use crate::wallet::simple_wallet::{Coin, SimpleWallet};

/// Broadcasts a raw transaction to the network. A thin seam so tests can
/// substitute an in-memory fake instead of a live peer connection.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, tx: &Transaction) -> Result<(), TransportError>;
}

/// A pledge built and signed but not yet committed to wallet state.
pub struct PendingPledge {
    pub dependency: Option<Transaction>,
    pub pledge: Pledge,
    pub fee_paid: u64,
    pub stub: Coin,
}

struct Committed {
    pledge: Pledge,
    stub: OutPoint,
}

struct State {
    simple: SimpleWallet,
    committed: HashMap<[u8; 32], Committed>,
    revoked: HashMap<[u8; 32], Pledge>,
    /// Stub outpoints this wallet has broadcast its own revocation for, but
    /// not yet observed confirmed — so the spend-of-stub observer doesn't
    /// mistake our own revocation for a foreign double-spend.
    outstanding_revocations: HashSet<OutPoint>,
}

pub enum SpendOutcome {
    /// The stub was spent by our own tracked revocation.
    OwnRevocation,
    /// The stub was spent by a transaction matching the project's claim
    /// shape.
    Claimed,
    /// The stub was spent by something else — a foreign double-spend,
    /// probably from a cloned wallet.
    ForeignRevoke,
}

type PledgeListener = Box<dyn Fn(&Pledge) + Send + Sync>;
type ClaimListener = Box<dyn Fn(&Pledge, &Transaction) + Send + Sync>;

/// Creates, commits, and revokes pledges against an owned `SimpleWallet`.
/// One internal lock guards the pledge maps (spec §5): short, non-blocking
/// critical sections only, never held across network I/O.
pub struct PledgingWallet {
    state: Mutex<State>,
    on_pledge: Mutex<Vec<PledgeListener>>,
    on_claim: Mutex<Vec<ClaimListener>>,
    on_revoke: Mutex<Vec<PledgeListener>>,
}

impl PledgingWallet {
    pub fn new(simple: SimpleWallet) -> Self {
        PledgingWallet {
            state: Mutex::new(State {
                simple,
                committed: HashMap::new(),
                revoked: HashMap::new(),
                outstanding_revocations: HashSet::new(),
            }),
            on_pledge: Mutex::new(Vec::new()),
            on_claim: Mutex::new(Vec::new()),
            on_revoke: Mutex::new(Vec::new()),
        }
    }

    pub fn on_pledge(&self, listener: impl Fn(&Pledge) + Send + Sync + 'static) {
        self.on_pledge.lock().unwrap().push(Box::new(listener));
    }

    pub fn on_claim(&self, listener: impl Fn(&Pledge, &Transaction) + Send + Sync + 'static) {
        self.on_claim.lock().unwrap().push(Box::new(listener));
    }

    pub fn on_revoke(&self, listener: impl Fn(&Pledge) + Send + Sync + 'static) {
        self.on_revoke.lock().unwrap().push(Box::new(listener));
    }

    /// Step 1-3 of spec §4.5: find or manufacture a stub of exactly `value`
    /// satoshis, then build and sign the pledge transaction against it.
    pub fn create_pledge(&self, project: &Project, value: u64, empty_wallet: bool) -> Result<PendingPledge, WalletError> {
        let mut state = self.state.lock().unwrap();

        let stub_outpoints: HashSet<OutPoint> = state.committed.values().map(|c| c.stub).collect();

        let (stub, dependency) = if let Some(existing) = state
            .simple
            .coins_iter()
            .find(|c| c.value == value && !stub_outpoints.contains(&c.outpoint))
            .cloned()
        {
            (existing, None)
        } else {
            let (dep_tx, stub) = state.simple.build_dependency_tx(value, empty_wallet, &stub_outpoints)?;
            (stub, Some(dep_tx))
        };

        let outputs: Vec<bitcoin::TxOut> = project
            .outputs()
            .into_iter()
            .map(|o| bitcoin::TxOut { value: bitcoin::Amount::from_sat(o.value), script_pubkey: o.script })
            .collect();
        let input = bitcoin::TxIn {
            previous_output: stub.outpoint,
            script_sig: bitcoin::ScriptBuf::new(),
            sequence: bitcoin::Sequence::MAX,
            witness: bitcoin::Witness::new(),
        };
        let mut pledge_tx = Transaction {
            version: bitcoin::transaction::Version::ONE,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![input],
            output: outputs,
        };

        let secret = state.simple.secret_for_stub(&stub);
        let pubkey = state.simple.keys().public_key(&secret);
        let signature = sighash::sign_input(state.simple.keys().secp(), &pledge_tx, 0, &stub.script_pubkey, &secret)
            .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
        let script_sig = sighash::build_script_sig(
            &ScriptKind::P2pkh { pubkey_hash: PubkeyHash::hash(&pubkey.serialize()) },
            &signature,
            Some(&pubkey),
            None,
        );
        pledge_tx.input[0].script_sig = script_sig;

        let pledge = Pledge::new(Vec::new(), pledge_tx, stub.value, project.id_hex());

        Ok(PendingPledge { dependency, pledge, fee_paid: crate::config::constants::FIXED_FEE_SATS, stub })
    }

    /// Idempotent: the first call records the pledge, optionally broadcasts
    /// the dependency, and fires `onPledge`; later calls for the same
    /// pledge id fail with `AlreadyCommitted`.
    pub async fn commit(
        &self,
        pending: PendingPledge,
        broadcaster: &dyn Broadcaster,
        broadcast_deps: bool,
    ) -> Result<(), WalletError> {
        let id = pending.pledge.id();
        {
            let state = self.state.lock().unwrap();
            if state.committed.contains_key(&id) {
                return Err(WalletError::AlreadyCommitted(hex::encode(id)));
            }
        }

        if broadcast_deps {
            if let Some(dep_tx) = &pending.dependency {
                broadcaster.broadcast(dep_tx).await?;
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            if state.committed.contains_key(&id) {
                return Err(WalletError::AlreadyCommitted(hex::encode(id)));
            }
            state.simple.add_coin(pending.stub.clone());
            state.committed.insert(id, Committed { pledge: pending.pledge.clone(), stub: pending.stub.outpoint });
        }

        for listener in self.on_pledge.lock().unwrap().iter() {
            listener(&pending.pledge);
        }
        Ok(())
    }

    /// Build, broadcast, then record a revocation of `pledge_id`'s stub.
    pub async fn revoke(&self, pledge_id: [u8; 32], broadcaster: &dyn Broadcaster) -> Result<(), WalletError> {
        let (stub, pledge) = {
            let mut state = self.state.lock().unwrap();
            let committed = state
                .committed
                .get(&pledge_id)
                .ok_or_else(|| WalletError::UnknownPledge(hex::encode(pledge_id)))?;
            let stub_outpoint = committed.stub;
            let pledge = committed.pledge.clone();
            let stub = state
                .simple
                .coin(&stub_outpoint)
                .cloned()
                .ok_or_else(|| WalletError::UnknownPledge(hex::encode(pledge_id)))?;
            state.outstanding_revocations.insert(stub_outpoint);
            (stub, pledge)
        };

        let revocation_tx = {
            let mut state = self.state.lock().unwrap();
            state.simple.build_revocation_tx(&stub)?
        };

        broadcaster.broadcast(&revocation_tx).await?;

        {
            let mut state = self.state.lock().unwrap();
            state.committed.remove(&pledge_id);
            state.revoked.insert(pledge_id, pledge.clone());
        }

        for listener in self.on_revoke.lock().unwrap().iter() {
            listener(&pledge);
        }
        Ok(())
    }

    /// Called whenever a wallet-relevant transaction is observed spending
    /// `spent_outpoint`. Dispatches `onRevoke`/`onClaim` per spec §4.5
    /// "Spend-of-stub observation".
    pub fn observe_spend(&self, spent_outpoint: OutPoint, spending_tx: &Transaction, project_outputs: &[Output]) -> Option<SpendOutcome> {
        let (pledge_id, pledge) = {
            let state = self.state.lock().unwrap();
            let (id, committed) = state.committed.iter().find(|(_, c)| c.stub == spent_outpoint)?;
            (*id, committed.pledge.clone())
        };

        let mut state = self.state.lock().unwrap();
        let is_own_revocation = state.outstanding_revocations.remove(&spent_outpoint);
        if is_own_revocation {
            drop(state);
            for listener in self.on_revoke.lock().unwrap().iter() {
                listener(&pledge);
            }
            return Some(SpendOutcome::OwnRevocation);
        }

        let matches_claim = spending_tx.output.len() == project_outputs.len()
            && spending_tx
                .output
                .iter()
                .zip(project_outputs.iter())
                .all(|(actual, expected)| actual.value.to_sat() == expected.value && actual.script_pubkey == expected.script);

        if matches_claim {
            state.committed.remove(&pledge_id);
            drop(state);
            for listener in self.on_claim.lock().unwrap().iter() {
                listener(&pledge, spending_tx);
            }
            Some(SpendOutcome::Claimed)
        } else {
            state.committed.remove(&pledge_id);
            state.revoked.insert(pledge_id, pledge.clone());
            drop(state);
            for listener in self.on_revoke.lock().unwrap().iter() {
                listener(&pledge);
            }
            Some(SpendOutcome::ForeignRevoke)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::PublicKey;
    use bitcoin::{Network, PubkeyHash, ScriptBuf};
    use prost::Message as _;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::wallet::keys::WalletKeys;

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

    fn funded_wallet(value: u64) -> (SimpleWallet, OutPoint) {
        let keys = WalletKeys::from_seed(&[5u8; 32], Network::Regtest).unwrap();
        let mut wallet = SimpleWallet::new(keys);
        let secret = wallet.keys().receive_key(0);
        let pubkey = PublicKey::from_secret_key(wallet.keys().secp(), &secret);
        let script = ScriptBuf::new_p2pkh(&PubkeyHash::hash(&pubkey.serialize()));
        let outpoint = OutPoint { txid: bitcoin::Txid::from_byte_array([9u8; 32]), vout: 0 };
        wallet.add_coin(Coin { outpoint, value, script_pubkey: script, derivation_index: 0, is_change: false });
        (wallet, outpoint)
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

    /// Scenario 1: a perfect-size pledge consumes exactly one input and
    /// creates no dependency transaction.
    #[tokio::test]
    async fn perfect_size_pledge_has_no_dependency() {
        let (wallet, _outpoint) = funded_wallet(100_000);
        let project_script = ScriptBuf::new_p2pkh(&PubkeyHash::hash(&[0u8; 33]));
        let project = single_output_project(100_000, &project_script);
        let pledging = PledgingWallet::new(wallet);

        let pending = pledging.create_pledge(&project, 100_000, false).unwrap();
        assert!(pending.dependency.is_none());
        assert_eq!(pending.pledge.pledge_tx().unwrap().input.len(), 1);

        let broadcaster = RecordingBroadcaster::new();
        pledging.commit(pending, &broadcaster, true).await.unwrap();
        assert_eq!(broadcaster.calls.load(Ordering::SeqCst), 0, "no dependency to broadcast");
    }

    /// Idempotence: committing the same pending pledge twice fails the
    /// second time and leaves wallet state unchanged.
    #[tokio::test]
    async fn commit_is_not_idempotent_past_the_first_call() {
        let (wallet, _outpoint) = funded_wallet(100_000);
        let project_script = ScriptBuf::new_p2pkh(&PubkeyHash::hash(&[0u8; 33]));
        let project = single_output_project(100_000, &project_script);
        let pledging = PledgingWallet::new(wallet);

        let pending = pledging.create_pledge(&project, 100_000, false).unwrap();
        let pledge_clone = pending.pledge.clone();
        let stub_clone = pending.stub.clone();
        let broadcaster = RecordingBroadcaster::new();
        pledging.commit(pending, &broadcaster, true).await.unwrap();

        let retry = PendingPledge { dependency: None, pledge: pledge_clone, fee_paid: 0, stub: stub_clone };
        let result = pledging.commit(retry, &broadcaster, true).await;
        assert!(matches!(result, Err(WalletError::AlreadyCommitted(_))));
    }

    /// Scenario 3: revoking fires `onRevoke` with the original pledge and
    /// broadcasts exactly one transaction spending the stub.
    #[tokio::test]
    async fn revoke_fires_on_revoke_and_broadcasts_once() {
        let (wallet, _outpoint) = funded_wallet(1_000_000);
        let project_script = ScriptBuf::new_p2pkh(&PubkeyHash::hash(&[0u8; 33]));
        let project = single_output_project(500_000, &project_script);
        let pledging = PledgingWallet::new(wallet);

        let pending = pledging.create_pledge(&project, 500_000, false).unwrap();
        let pledge_id = pending.pledge.id();
        let broadcaster = RecordingBroadcaster::new();
        pledging.commit(pending, &broadcaster, false).await.unwrap();

        let revoked = std::sync::Arc::new(std::sync::Mutex::new(None));
        let revoked_clone = revoked.clone();
        pledging.on_revoke(move |p| *revoked_clone.lock().unwrap() = Some(p.id()));

        pledging.revoke(pledge_id, &broadcaster).await.unwrap();
        assert_eq!(broadcaster.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*revoked.lock().unwrap(), Some(pledge_id));
    }

    /// Scenario 4: observing a spend of our stub whose outputs don't match
    /// the project fires `onRevoke` without us broadcasting anything.
    #[tokio::test]
    async fn foreign_double_spend_fires_on_revoke_without_broadcast() {
        let (wallet, _outpoint) = funded_wallet(1_000_000);
        let project_script = ScriptBuf::new_p2pkh(&PubkeyHash::hash(&[0u8; 33]));
        let project = single_output_project(500_000, &project_script);
        let pledging = PledgingWallet::new(wallet);

        let pending = pledging.create_pledge(&project, 500_000, false).unwrap();
        let stub_outpoint = pending.stub.outpoint;
        let broadcaster = RecordingBroadcaster::new();
        pledging.commit(pending, &broadcaster, false).await.unwrap();

        let revoked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let revoked_clone = revoked.clone();
        pledging.on_revoke(move |_| revoked_clone.store(true, Ordering::SeqCst));

        let foreign_tx = Transaction {
            version: bitcoin::transaction::Version::ONE,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![bitcoin::TxIn {
                previous_output: stub_outpoint,
                script_sig: ScriptBuf::new(),
                sequence: bitcoin::Sequence::MAX,
                witness: bitcoin::Witness::new(),
            }],
            output: vec![bitcoin::TxOut { value: bitcoin::Amount::from_sat(1), script_pubkey: ScriptBuf::new() }],
        };

        let outcome = pledging.observe_spend(stub_outpoint, &foreign_tx, &project.outputs());
        assert!(matches!(outcome, Some(SpendOutcome::ForeignRevoke)));
        assert!(revoked.load(Ordering::SeqCst));
        assert_eq!(broadcaster.calls.load(Ordering::SeqCst), 0);
    }

    /// Scenario 5: a claim spending the stub into the project's exact
    /// outputs fires `onClaim`, not `onRevoke`.
    #[tokio::test]
    async fn claim_spend_fires_on_claim() {
        let (wallet, _outpoint) = funded_wallet(1_000_000);
        let project_script = ScriptBuf::new_p2pkh(&PubkeyHash::hash(&[0u8; 33]));
        let project = single_output_project(1_000_000, &project_script);
        let pledging = PledgingWallet::new(wallet);

        let pending = pledging.create_pledge(&project, 1_000_000, false).unwrap();
        let stub_outpoint = pending.stub.outpoint;
        let broadcaster = RecordingBroadcaster::new();
        pledging.commit(pending, &broadcaster, true).await.unwrap();

        let claimed = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let claimed_clone = claimed.clone();
        pledging.on_claim(move |_, _| claimed_clone.store(true, Ordering::SeqCst));

        let claim_tx = Transaction {
            version: bitcoin::transaction::Version::ONE,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![bitcoin::TxIn {
                previous_output: stub_outpoint,
                script_sig: ScriptBuf::new(),
                sequence: bitcoin::Sequence::MAX,
                witness: bitcoin::Witness::new(),
            }],
            output: vec![bitcoin::TxOut { value: bitcoin::Amount::from_sat(1_000_000), script_pubkey: project_script.clone() }],
        };

        let outcome = pledging.observe_spend(stub_outpoint, &claim_tx, &project.outputs());
        assert!(matches!(outcome, Some(SpendOutcome::Claimed)));
        assert!(claimed.load(Ordering::SeqCst));
    }
}
