//! UTXO oracle: the peer-set oracle and the per-turn batcher built on top of
//! it (spec §4.4).

pub mod oracle;
pub mod batcher;
pub mod rpc_peer;

use bitcoin::OutPoint;

use crate::primitives::sighash::FetchedOutput;

/// One oracle reply: a hit-map (bit `i` set iff outpoint `i` is unspent) and
/// the fetched outputs, in hit order.
#[derive(Debug, Clone, PartialEq)]
pub struct UtxoAnswer {
    pub hits: Vec<bool>,
    pub outputs: Vec<FetchedOutput>,
}

impl UtxoAnswer {
    /// Walk the hit-map and distribute `self.outputs` back out in the same
    /// order as the original `outpoints` query, with `None` for a spent or
    /// unknown outpoint.
    pub fn by_outpoint(&self, outpoints: &[OutPoint]) -> Vec<Option<FetchedOutput>> {
        let mut out_iter = self.outputs.iter().cloned();
        self.hits
            .iter()
            .zip(outpoints.iter())
            .map(|(hit, _)| if *hit { out_iter.next() } else { None })
            .collect()
    }
}
