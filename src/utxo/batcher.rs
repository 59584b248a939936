//! Batches concurrent `lookup()` calls between explicit `flush()` calls into
//! a single oracle round-trip (spec §4.4): every pledge validation running
//! in the same turn shares one query instead of hammering the peer set once
//! per input.

use std::sync::Mutex;

use bitcoin::OutPoint;
use tokio::sync::oneshot;

use crate::error::PledgeError;
use crate::primitives::sighash::FetchedOutput;
use crate::utxo::oracle::PeerSetUtxoOracle;

struct Pending {
    outpoints: Vec<OutPoint>,
    reply: oneshot::Sender<Result<Vec<Option<FetchedOutput>>, PledgeError>>,
}

/// Accumulates outpoint lookups and issues one oracle query per `flush()`.
pub struct BatchingUtxoSource {
    oracle: PeerSetUtxoOracle,
    pending: Mutex<Vec<Pending>>,
}

impl BatchingUtxoSource {
    pub fn new(oracle: PeerSetUtxoOracle) -> Self {
        BatchingUtxoSource { oracle, pending: Mutex::new(Vec::new()) }
    }

    /// Enqueue a lookup and await its answer. The answer only arrives once
    /// someone calls `flush()`; callers typically run concurrently and a
    /// single `flush()` satisfies all of them.
    pub async fn lookup(&self, outpoints: Vec<OutPoint>) -> Result<Vec<Option<FetchedOutput>>, PledgeError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().push(Pending { outpoints, reply: tx });
        rx.await
            .unwrap_or_else(|_| Err(PledgeError::TxDecode("batcher dropped before flush".into())))
    }

    /// Issue one oracle query for everything queued since the last flush,
    /// then distribute outputs (or the shared error) back to every waiter.
    pub async fn flush(&self) {
        let drained: Vec<Pending> = std::mem::take(&mut *self.pending.lock().unwrap());
        if drained.is_empty() {
            return;
        }

        let mut concatenated = Vec::new();
        let mut bounds = Vec::with_capacity(drained.len());
        for entry in &drained {
            let start = concatenated.len();
            concatenated.extend_from_slice(&entry.outpoints);
            bounds.push((start, concatenated.len()));
        }

        let result = self.oracle.query(&concatenated).await;
        match result {
            Ok(answer) => {
                let by_outpoint = answer.by_outpoint(&concatenated);
                for (entry, (start, end)) in drained.into_iter().zip(bounds) {
                    let slice = by_outpoint[start..end].to_vec();
                    let _ = entry.reply.send(Ok(slice));
                }
            }
            Err(err) => {
                for entry in drained {
                    let _ = entry.reply.send(Err(clone_pledge_error(&err)));
                }
            }
        }
    }
}

/// `PledgeError` doesn't implement `Clone` (it wraps non-`Clone` transport
/// errors); every waiter still needs the same failure, so re-describe it.
fn clone_pledge_error(err: &PledgeError) -> PledgeError {
    PledgeError::TxDecode(err.to_string())
}
