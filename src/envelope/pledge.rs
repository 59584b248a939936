//! Pledge entity and its wire envelope (spec §2, §3).

use bitcoin::consensus::{deserialize, serialize};
use bitcoin::Transaction;
use prost::Message as _;

use crate::envelope::double_sha256;
use crate::error::PledgeError;
use crate::proto;

/// A pledge: an ordered list of transactions (the last is the pledge tx
/// itself; earlier entries are dependency transactions needed to satisfy
/// it) plus the cached details spec §3 requires.
#[derive(Debug, Clone)]
pub struct Pledge {
    transactions: Vec<Transaction>,
    total_input_value: u64,
    timestamp: chrono::DateTime<chrono::Utc>,
    project_id: String,
    /// Set once the pledge has been scrubbed (transactions stripped) by a
    /// server. When present, it — not a hash of the current bytes — is the
    /// pledge's identity, so scrubbing never changes identity.
    orig_hash: Option<[u8; 32]>,
}

impl Pledge {
    pub fn parse(bytes: &[u8]) -> Result<Self, PledgeError> {
        let envelope = proto::Pledge::decode(bytes).map_err(|e| PledgeError::TxDecode(e.to_string()))?;
        let details = envelope.pledge_details.unwrap_or_default();

        let transactions = envelope
            .transactions
            .iter()
            .map(|tx_bytes| deserialize::<Transaction>(tx_bytes).map_err(|e| PledgeError::TxDecode(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        let timestamp = chrono::DateTime::from_timestamp(details.timestamp.unwrap_or(0) as i64, 0)
            .unwrap_or_else(|| chrono::DateTime::from_timestamp(0, 0).unwrap());

        let orig_hash = details
            .orig_hash
            .as_ref()
            .filter(|b| !b.is_empty())
            .map(|b| {
                let mut arr = [0u8; 32];
                let n = b.len().min(32);
                arr[..n].copy_from_slice(&b[..n]);
                arr
            });

        Ok(Pledge {
            transactions,
            total_input_value: details.total_input_value.unwrap_or(0),
            timestamp,
            project_id: details.project_id.unwrap_or_default(),
            orig_hash,
        })
    }

    /// Construct a pledge directly from an assembled pledge transaction (no
    /// dependency transactions), as a wallet does after signing.
    pub fn new(
        dependencies: Vec<Transaction>,
        pledge_tx: Transaction,
        total_input_value: u64,
        project_id: String,
    ) -> Self {
        let mut transactions = dependencies;
        transactions.push(pledge_tx);
        Pledge {
            transactions,
            total_input_value,
            timestamp: chrono::Utc::now(),
            project_id,
            orig_hash: None,
        }
    }

    /// Construct a scrubbed stub directly from a remote server's status
    /// view, which carries only an id/value/scrubbed flag and no
    /// transaction data (spec §4.6 "Remote status fetch" reconciliation).
    pub fn from_remote_stub(id_hex: &str, total_input_value: u64, project_id: String) -> Result<Pledge, PledgeError> {
        let bytes = hex::decode(id_hex).map_err(|e| PledgeError::TxDecode(format!("bad remote pledge id: {e}")))?;
        if bytes.len() != 32 {
            return Err(PledgeError::TxDecode(format!("remote pledge id is {} bytes, want 32", bytes.len())));
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes);
        Ok(Pledge {
            transactions: Vec::new(),
            total_input_value,
            timestamp: chrono::Utc::now(),
            project_id,
            orig_hash: Some(id),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let details = proto::PledgeDetails {
            total_input_value: Some(self.total_input_value),
            timestamp: Some(self.timestamp.timestamp() as u64),
            project_id: Some(self.project_id.clone()),
            orig_hash: self.orig_hash.map(|h| h.to_vec()),
        };
        let envelope = proto::Pledge {
            transactions: self.transactions.iter().map(serialize).collect(),
            pledge_details: Some(details),
        };
        envelope.encode_to_vec()
    }

    /// `double_sha256(encoded bytes)` unless `origHash` is set, in which
    /// case `origHash` is the identity — this is what lets a server publish
    /// status with transactions stripped without changing identity
    /// (spec §3).
    pub fn id(&self) -> [u8; 32] {
        match self.orig_hash {
            Some(h) => h,
            None => double_sha256(&self.encode()),
        }
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.id())
    }

    /// The last transaction in the list: the pledge transaction itself.
    pub fn pledge_tx(&self) -> Result<&Transaction, PledgeError> {
        self.transactions.last().ok_or(PledgeError::NoTransactionData)
    }

    /// Every transaction before the pledge tx: optional dependencies needed
    /// to satisfy it (e.g. a resize-to-stub transaction).
    pub fn dependencies(&self) -> &[Transaction] {
        if self.transactions.is_empty() {
            &[]
        } else {
            &self.transactions[..self.transactions.len() - 1]
        }
    }

    pub fn total_input_value(&self) -> u64 {
        self.total_input_value
    }

    pub fn timestamp(&self) -> chrono::DateTime<chrono::Utc> {
        self.timestamp
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn orig_hash(&self) -> Option<[u8; 32]> {
        self.orig_hash
    }

    pub fn is_scrubbed(&self) -> bool {
        self.orig_hash.is_some()
    }

    /// Produce the scrubbed form a server returns to non-owners: all
    /// transactions stripped, `origHash` fixed to this pledge's current
    /// identity so the scrubbed message's own identity is unchanged.
    pub fn scrub(&self) -> Pledge {
        let id = self.id();
        Pledge {
            transactions: Vec::new(),
            total_input_value: self.total_input_value,
            timestamp: self.timestamp,
            project_id: self.project_id.clone(),
            orig_hash: Some(id),
        }
    }
}
