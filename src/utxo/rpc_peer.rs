//! A `UtxoPeer` backed by a single bitcoind-like JSON-RPC endpoint, queried
//! with one `gettxout` call per outpoint (spec §4.4). Connection setup
//! mirrors the teacher's `BitcoindClient::new`.

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{Amount, OutPoint, ScriptBuf};
use lightning_block_sync::http::HttpEndpoint;
use lightning_block_sync::rpc::RpcClient;
use serde::Deserialize;

use crate::backoff;
use crate::config::PeerEndpoint;
use crate::error::TransportError;
use crate::primitives::sighash::FetchedOutput;
use crate::utxo::oracle::UtxoPeer;
use crate::utxo::UtxoAnswer;

/// Retry a single peer RPC call this many times total before giving up.
const MAX_RPC_ATTEMPTS: u32 = 5;

#[derive(Debug, Deserialize)]
struct GetTxOutScriptPubKey {
    hex: String,
}

#[derive(Debug, Deserialize)]
struct GetTxOutResponse {
    value: f64,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: GetTxOutScriptPubKey,
}

/// One connected peer, reached over its JSON-RPC interface.
pub struct RpcUtxoPeer {
    client: Arc<RpcClient>,
}

impl RpcUtxoPeer {
    pub async fn connect(endpoint: &PeerEndpoint) -> std::io::Result<Self> {
        let http_endpoint = HttpEndpoint::for_host(endpoint.host.clone()).with_port(endpoint.port);
        let credentials = base64::encode(format!("{}:{}", endpoint.rpc_user, endpoint.rpc_password));
        let client = RpcClient::new(&credentials, http_endpoint)?;
        Ok(RpcUtxoPeer { client: Arc::new(client) })
    }

    async fn get_txout(&self, outpoint: &OutPoint) -> Result<Option<FetchedOutput>, TransportError> {
        let params = vec![
            serde_json::json!(outpoint.txid.to_string()),
            serde_json::json!(outpoint.vout),
            serde_json::json!(true),
        ];
        let response = self
            .client
            .call_method::<serde_json::Value>("gettxout", &params)
            .await
            .map_err(|e| TransportError::Rpc(e.to_string()))?;

        if response.is_null() {
            return Ok(None);
        }
        let parsed: GetTxOutResponse =
            serde_json::from_value(response).map_err(|e| TransportError::Rpc(e.to_string()))?;
        let script_bytes = hex::decode(&parsed.script_pub_key.hex)
            .map_err(|e| TransportError::Rpc(format!("bad scriptPubKey hex: {e}")))?;
        let value = Amount::from_btc(parsed.value)
            .map_err(|e| TransportError::Rpc(format!("bad txout value: {e}")))?;
        Ok(Some(FetchedOutput {
            value: value.to_sat(),
            script_pubkey: ScriptBuf::from_bytes(script_bytes),
        }))
    }
}

#[async_trait]
impl UtxoPeer for RpcUtxoPeer {
    async fn get_utxos(&self, outpoints: &[OutPoint]) -> Result<UtxoAnswer, TransportError> {
        let mut hits = Vec::with_capacity(outpoints.len());
        let mut outputs = Vec::new();
        for outpoint in outpoints {
            let fetched = backoff::retry(MAX_RPC_ATTEMPTS, || self.get_txout(outpoint)).await?;
            match fetched {
                Some(output) => {
                    hits.push(true);
                    outputs.push(output);
                }
                None => hits.push(false),
            }
        }
        Ok(UtxoAnswer { hits, outputs })
    }
}
