//! CLI and runtime configuration, generalizing the teacher's `clap`-derived
//! arguments (host/port/rpc credentials for a single bitcoind) into the
//! multi-peer, multi-mode configuration this protocol needs.

use std::path::PathBuf;

use bitcoin::Network;
use clap::{Parser, ValueEnum};

/// `main` / `test` / `regtest`, matching the payment-protocol network tokens
/// spec §3 requires a project to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NetworkArg {
    Main,
    Test,
    Regtest,
}

impl NetworkArg {
    pub fn to_bitcoin(self) -> Network {
        match self {
            NetworkArg::Main => Network::Bitcoin,
            NetworkArg::Test => Network::Testnet,
            NetworkArg::Regtest => Network::Regtest,
        }
    }

    pub fn as_wire_str(self) -> &'static str {
        match self {
            NetworkArg::Main => "main",
            NetworkArg::Test => "test",
            NetworkArg::Regtest => "regtest",
        }
    }

    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "main" => Some(NetworkArg::Main),
            "test" => Some(NetworkArg::Test),
            "regtest" => Some(NetworkArg::Regtest),
            _ => None,
        }
    }
}

/// One full-node peer endpoint used by the UTXO oracle.
#[derive(Debug, Clone)]
pub struct PeerEndpoint {
    pub host: String,
    pub port: u16,
    pub rpc_user: String,
    pub rpc_password: String,
}

#[derive(Debug, Parser)]
#[command(name = "crowdfund", about = "Assurance-contract crowdfunding backend")]
pub struct Args {
    /// Which Bitcoin network to operate on.
    #[arg(long, value_enum, default_value_t = NetworkArg::Regtest)]
    pub network: NetworkArg,

    /// Directory holding the wallet file, the local project directory, and
    /// (in server mode) the sled database.
    #[arg(long, default_value = "./crowdfund-data")]
    pub data_dir: PathBuf,

    /// Peer endpoints for the UTXO oracle, as host:port:user:password.
    #[arg(long = "peer", value_parser = parse_peer)]
    pub peers: Vec<PeerEndpoint>,

    /// Minimum number of peers that must agree before a UTXO answer is
    /// trusted (spec §4.6 default).
    #[arg(long, default_value_t = 2)]
    pub min_peers_for_utxo_query: usize,

    /// Run as the authoritative server for projects instead of a client that
    /// submits pledges to a remote project server.
    #[arg(long)]
    pub server_mode: bool,

    /// Address to bind the HTTP surface to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub http_addr: String,
}

fn parse_peer(s: &str) -> Result<PeerEndpoint, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 4 {
        return Err(format!("expected host:port:user:password, got {s:?}"));
    }
    let port = parts[1]
        .parse::<u16>()
        .map_err(|e| format!("invalid port: {e}"))?;
    Ok(PeerEndpoint {
        host: parts[0].to_string(),
        port,
        rpc_user: parts[2].to_string(),
        rpc_password: parts[3].to_string(),
    })
}

/// Hard-coded protocol constants referenced throughout the crate.
pub mod constants {
    /// Below this, an output is not worth the fee to spend (policy dust).
    pub const DUST_FLOOR_SATS: u64 = 546;

    /// `minPledgeSize` must be at least 4x the dust floor so a pledge can
    /// later be revoked without consuming its entire value in fees
    /// (spec §3 invariants).
    pub const MIN_PLEDGE_SIZE_FLOOR: u64 = DUST_FLOOR_SATS * 4;

    /// Fixed fee floor used for dependency/revocation transactions, in lieu
    /// of dynamic fee estimation (spec §1 non-goals).
    pub const FIXED_FEE_SATS: u64 = DUST_FLOOR_SATS;

    /// The extra fee-paying input in claim assembly carries exactly this
    /// value (spec §4.3): 2x the dust-minimum fee.
    pub const CLAIM_FEE_INPUT_SATS: u64 = DUST_FLOOR_SATS * 2;

    pub const MIN_PEERS_FOR_UTXO_QUERY_DEFAULT: usize = 2;

    pub const PEER_CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const PEER_READ_TIMEOUT_SECS: u64 = 10;
    pub const HTTP_FETCH_TIMEOUT_SECS: u64 = 10;
    pub const HTTP_RESPONSE_CAP_BYTES: usize = 1 << 20;
    pub const POST_BODY_CAP_BYTES: usize = 1 << 20;

    pub const WALLET_EXTENSION_ID: &str = "com.vinumeris.lighthouse";
    pub const PROJECT_MIME: &str = "application/vnd.vinumeris.lighthouse-project";
    pub const PROJECT_EXTENSION: &str = "lighthouse-project";
    pub const PLEDGE_MIME: &str = "application/vnd.vinumeris.lighthouse-pledge";
    pub const URL_PATH_PREFIX: &str = "/_lighthouse/crowdfund/project/";
    /// Reserved local test port a `localhost` project payment URL's port is
    /// rewritten to (spec §4.1).
    pub const LOCAL_TEST_PORT: u16 = 39293;

    pub const RESTRICTED_KEY_PURPOSE: u32 = 1776;
}
