//! The peer-set UTXO oracle: query every peer, succeed only if every reply
//! is byte-identical (spec §4.4).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::OutPoint;

use crate::config::constants;
use crate::error::{PledgeError, TransportError};
use crate::utxo::UtxoAnswer;

/// A single full-node peer capable of answering "is this outpoint unspent,
/// and if so what does it look like" queries. SPV/peer-discovery internals
/// are out of scope (spec §1); this trait is the seam a concrete transport
/// (e.g. `rpc_peer::RpcUtxoPeer`) plugs into.
#[async_trait]
pub trait UtxoPeer: Send + Sync {
    async fn get_utxos(&self, outpoints: &[OutPoint]) -> Result<UtxoAnswer, TransportError>;
}

/// Sends the same "get UTXO" query to every peer in parallel, awaits all
/// replies, and succeeds iff every reply is byte-for-byte identical.
pub struct PeerSetUtxoOracle {
    peers: Vec<Arc<dyn UtxoPeer>>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl PeerSetUtxoOracle {
    pub fn new(peers: Vec<Arc<dyn UtxoPeer>>) -> Self {
        assert!(!peers.is_empty(), "the oracle needs at least one peer");
        PeerSetUtxoOracle {
            peers,
            connect_timeout: Duration::from_secs(constants::PEER_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(constants::PEER_READ_TIMEOUT_SECS),
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub async fn query(&self, outpoints: &[OutPoint]) -> Result<UtxoAnswer, PledgeError> {
        let mut handles = Vec::with_capacity(self.peers.len());
        for peer in self.peers.iter().cloned() {
            let outpoints = outpoints.to_vec();
            let timeout = self.connect_timeout + self.read_timeout;
            handles.push(tokio::spawn(async move {
                tokio::time::timeout(timeout, peer.get_utxos(&outpoints))
                    .await
                    .map_err(|_| TransportError::ReadTimeout(timeout))?
            }));
        }

        let mut answers = Vec::with_capacity(handles.len());
        for handle in handles {
            let answer = handle
                .await
                .map_err(|e| PledgeError::TxDecode(format!("peer task panicked: {e}")))??;
            answers.push(answer);
        }

        let first = &answers[0];
        if answers.iter().any(|a| a != first) {
            return Err(PledgeError::InconsistentUtxoAnswers);
        }
        Ok(first.clone())
    }
}
