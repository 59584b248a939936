//! Wallet extension persistence (spec §4.5 "Persistence"): pledges,
//! projects and revoked pledges are stored as a tagged side-table keyed by
//! `WALLET_EXTENSION_ID`, alongside (not inside) the standard wallet file.

use std::path::Path;

use prost::Message as _;

use crate::config::constants::WALLET_EXTENSION_ID;
use crate::envelope::pledge::Pledge;
use crate::error::CrowdfundError;
use crate::proto;

/// The decoded contents of the `WALLET_EXTENSION_ID` side-table.
pub struct WalletExtensionState {
    pub pledges: Vec<Pledge>,
    pub projects: Vec<Vec<u8>>,
    pub revoked_pledges: Vec<Pledge>,
}

impl WalletExtensionState {
    pub fn empty() -> Self {
        WalletExtensionState { pledges: Vec::new(), projects: Vec::new(), revoked_pledges: Vec::new() }
    }

    pub fn encode(&self) -> Vec<u8> {
        let extension = proto::WalletExtension {
            pledges: self.pledges.iter().map(|p| decode_roundtrip(p)).collect(),
            projects: self.projects.iter().map(|bytes| proto::Project { serialized_payment_details: Some(bytes.clone()), signature: None }).collect(),
            revoked_pledges: self.revoked_pledges.iter().map(|p| decode_roundtrip(p)).collect(),
        };
        extension.encode_to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CrowdfundError> {
        let extension = proto::WalletExtension::decode(bytes)
            .map_err(|e| CrowdfundError::Inconsistent(format!("wallet extension did not decode: {e}")))?;

        let pledges = extension
            .pledges
            .iter()
            .map(|p| Pledge::parse(&p.encode_to_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        let revoked_pledges = extension
            .revoked_pledges
            .iter()
            .map(|p| Pledge::parse(&p.encode_to_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        let projects = extension
            .projects
            .iter()
            .filter_map(|p| p.serialized_payment_details.clone())
            .collect();

        Ok(WalletExtensionState { pledges, projects, revoked_pledges })
    }

    /// Write the extension to `path` under the reserved extension id,
    /// preceded by a length prefix so the reader can find it even if the
    /// surrounding wallet file format carries other side-tables.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let body = self.encode();
        let mut framed = Vec::with_capacity(WALLET_EXTENSION_ID.len() + 4 + body.len());
        framed.extend_from_slice(&(WALLET_EXTENSION_ID.len() as u32).to_le_bytes());
        framed.extend_from_slice(WALLET_EXTENSION_ID.as_bytes());
        framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
        framed.extend_from_slice(&body);
        std::fs::write(path, framed)
    }

    pub fn load(path: &Path) -> Result<Self, CrowdfundError> {
        let framed = std::fs::read(path)?;
        if framed.len() < 8 {
            return Err(CrowdfundError::Inconsistent("wallet extension file too short".to_string()));
        }
        let id_len = u32::from_le_bytes(framed[0..4].try_into().unwrap()) as usize;
        let id_end = 4 + id_len;
        let id = std::str::from_utf8(&framed[4..id_end])
            .map_err(|e| CrowdfundError::Inconsistent(e.to_string()))?;
        if id != WALLET_EXTENSION_ID {
            return Err(CrowdfundError::Inconsistent(format!("unexpected wallet extension id {id:?}")));
        }
        let body_len = u32::from_le_bytes(framed[id_end..id_end + 4].try_into().unwrap()) as usize;
        let body = &framed[id_end + 4..id_end + 4 + body_len];
        Self::decode(body)
    }
}

fn decode_roundtrip(pledge: &Pledge) -> proto::Pledge {
    proto::Pledge::decode(pledge.encode().as_slice()).expect("Pledge::encode always produces a valid Pledge message")
}

/// Re-link each persisted pledge to its backing stub output by looking the
/// stub's outpoint up among the wallet's currently known coins. A pledge
/// whose stub isn't found is dropped — the stub-owning transaction must
/// have been evicted from the wallet's view for reasons outside this
/// protocol's concern (spec §4.5 "Rehydration").
pub fn rehydrate_stub_outpoint(pledge: &Pledge, known_outpoints: &[bitcoin::OutPoint]) -> Option<bitcoin::OutPoint> {
    let pledge_tx = pledge.pledge_tx().ok()?;
    let stub_outpoint = pledge_tx.input.first()?.previous_output;
    known_outpoints.iter().find(|o| **o == stub_outpoint).copied()
}
