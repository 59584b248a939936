//! The error taxonomy described in spec §7: one tagged variant per failure
//! mode, never exceptions-for-control-flow. Every fallible operation in this
//! crate returns one of these (or a subset via `From`).

use thiserror::Error;

/// Envelope decoded but semantically invalid.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("envelope bytes did not decode as a protobuf message")]
    Malformed(#[from] prost::DecodeError),
    #[error("project goal must be positive, got {0}")]
    NonPositiveGoal(i64),
    #[error("payment url has no host: {0}")]
    NoUrlHost(String),
    #[error("payment url did not parse: {0}")]
    BadUrl(#[from] url::ParseError),
    #[error("output {index} has non-positive amount {amount}")]
    NonPositiveOutputAmount { index: usize, amount: i64 },
    #[error("network identifier {0:?} is not recognized")]
    UnknownNetwork(String),
    #[error("required field {0} missing from envelope")]
    MissingField(&'static str),
}

/// Pledge structural faults and validation failures, spec §4.2 / §7.
#[derive(Debug, Error)]
pub enum PledgeError {
    #[error("pledge envelope carries no transaction data")]
    NoTransactionData,
    #[error("pledge tx has {actual} outputs, project has {expected}")]
    TxWrongNumberOfOutputs { actual: usize, expected: usize },
    #[error("pledge tx output {index} does not match the project's output")]
    OutputMismatch { index: usize },
    #[error("pledge tx spends the same outpoint more than once")]
    DuplicatedOutPoint,
    #[error("one or more pledged outpoints are spent or unknown to peers")]
    UnknownUtxo,
    #[error("peers returned inconsistent UTXO answers for the same query")]
    InconsistentUtxoAnswers,
    #[error("input {index} is not one of the recognized standard forms")]
    NonStandardInput { index: usize },
    #[error("script execution failed for input {index}: {reason}")]
    ScriptExecutionFailure { index: usize, reason: String },
    #[error("cached total input value does not match the fetched UTXO sum")]
    CachedValueMismatch,
    #[error("pledge is below the project's minimum pledge size by {shortfall} sats")]
    PledgeTooSmall { shortfall: u64 },
    #[error("transaction decode failed: {0}")]
    TxDecode(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Claim assembly failures, spec §4.3 / §7.
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("pledge set sums to goal +/- {0} (positive = overpledged)")]
    ValueMismatch(i64),
    #[error("wallet could not afford the claim's fee input: {0}")]
    InsufficientFunds(String),
    #[error("signing the claim's fee input failed: {0}")]
    SigningFailed(String),
    #[error("broadcasting a claim-assembly transaction failed: {0}")]
    BroadcastFailed(#[from] TransportError),
}

/// Transport-layer failures: peer RPC timeouts, HTTP fetch errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),
    #[error("read timed out after {0:?}")]
    ReadTimeout(std::time::Duration),
    #[error("peer RPC call failed: {0}")]
    Rpc(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("response exceeded the {0} byte cap")]
    ResponseTooLarge(usize),
}

/// Wallet-level failures not already covered above.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("insufficient funds: need {needed} sats, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("pledge {0} was already committed")]
    AlreadyCommitted(String),
    #[error("no such pledge: {0}")]
    UnknownPledge(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("broadcast failed: {0}")]
    BroadcastFailed(#[from] TransportError),
    #[error(transparent)]
    Claim(#[from] ClaimError),
}

/// Top-level error uniting every subsystem, used at crate boundaries (HTTP
/// handlers, the CLI) where callers don't care which subsystem failed.
#[derive(Debug, Error)]
pub enum CrowdfundError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Pledge(#[from] PledgeError),
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error("project {0} is closed")]
    ProjectClosed(String),
    #[error("duplicate pledge {0}")]
    DuplicatePledge(String),
    #[error("unrecoverable inconsistency: {0}")]
    Inconsistent(String),
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
