//! Project entity: a pure function of its envelope (spec §2, §4.1).

use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey, Signing, Verification};
use prost::Message as _;

use crate::config::{constants, NetworkArg};
use crate::envelope::double_sha256;
use crate::error::ParseError;
use crate::proto;

/// One fixed output of the funding goal: an amount and the exact script
/// bytes it must pay to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub value: u64,
    pub script: ScriptBuf,
}

/// A project is immutable once constructed from its envelope; every
/// accessor below is a pure function of the bytes it was parsed from.
#[derive(Debug, Clone)]
pub struct Project {
    /// The exact bytes the envelope was parsed from. Identity and
    /// re-emission are both defined over these bytes, never over a
    /// re-encoding of the decoded struct.
    raw_bytes: Vec<u8>,
    id: [u8; 32],
    details: proto::ProjectDetails,
    signature: Option<Vec<u8>>,
}

impl Project {
    /// Parse a project envelope. Fails if the bytes don't decode, the goal
    /// is non-positive, the payment URL has no host, or any output has a
    /// non-positive amount (spec §4.1).
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let envelope = proto::Project::decode(bytes)?;
        let payment_details_bytes = envelope
            .serialized_payment_details
            .ok_or(ParseError::MissingField("serializedPaymentDetails"))?;
        let details = proto::ProjectDetails::decode(payment_details_bytes.as_slice())?;

        if let Some(network) = details.network.as_deref() {
            if NetworkArg::from_wire_str(network).is_none() {
                return Err(ParseError::UnknownNetwork(network.to_string()));
            }
        }

        let mut goal: i64 = 0;
        for (index, output) in details.outputs.iter().enumerate() {
            let amount = output.amount.unwrap_or(0) as i64;
            if amount <= 0 {
                return Err(ParseError::NonPositiveOutputAmount { index, amount });
            }
            goal += amount;
        }
        if goal <= 0 {
            return Err(ParseError::NonPositiveGoal(goal));
        }

        if let Some(url) = details.payment_url.as_deref() {
            let parsed = url::Url::parse(url)?;
            if parsed.host_str().is_none() {
                return Err(ParseError::NoUrlHost(url.to_string()));
            }
        }

        let id = double_sha256(bytes);

        Ok(Project {
            raw_bytes: bytes.to_vec(),
            id,
            details,
            signature: envelope.signature,
        })
    }

    /// The canonical byte-hash identity: SHA256(SHA256(envelope bytes)).
    /// Identical bytes always produce identical ids, independent of how
    /// many extension fields a project author added.
    pub fn id(&self) -> [u8; 32] {
        self.id
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }

    /// The original envelope bytes, preserved byte-for-byte for re-emission.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw_bytes
    }

    pub fn outputs(&self) -> Vec<Output> {
        self.details
            .outputs
            .iter()
            .map(|o| Output {
                value: o.amount.unwrap_or(0),
                script: ScriptBuf::from_bytes(o.script.clone().unwrap_or_default()),
            })
            .collect()
    }

    pub fn goal(&self) -> u64 {
        self.details.outputs.iter().map(|o| o.amount.unwrap_or(0)).sum()
    }

    pub fn network(&self) -> Option<NetworkArg> {
        self.details
            .network
            .as_deref()
            .and_then(NetworkArg::from_wire_str)
    }

    pub fn creation_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.details.time.map(unix_secs_to_datetime)
    }

    pub fn expiry_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.details.expires.map(unix_secs_to_datetime)
    }

    pub fn memo(&self) -> Option<&str> {
        self.details.memo.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.details.extra_details.as_ref().and_then(|e| e.title.as_deref())
    }

    pub fn cover_image(&self) -> Option<&[u8]> {
        self.details
            .extra_details
            .as_ref()
            .and_then(|e| e.cover_image.as_deref())
    }

    pub fn author_key(&self) -> Option<PublicKey> {
        let bytes = self.details.extra_details.as_ref()?.author_key.as_deref()?;
        PublicKey::from_slice(bytes).ok()
    }

    pub fn author_key_index(&self) -> Option<u32> {
        self.details.extra_details.as_ref()?.author_key_index
    }

    /// `minPledgeSize`, floored at 4x the dust floor per spec §3 invariants
    /// regardless of what the envelope requests.
    pub fn min_pledge_size(&self) -> u64 {
        let requested = self
            .details
            .extra_details
            .as_ref()
            .and_then(|e| e.min_pledge_size)
            .unwrap_or(0);
        requested.max(constants::MIN_PLEDGE_SIZE_FLOOR)
    }

    /// The project's payment URL, with `localhost` ports rewritten to the
    /// reserved local test port (spec §4.1).
    pub fn payment_url(&self) -> Option<url::Url> {
        let raw = self.details.payment_url.as_deref()?;
        let mut url = url::Url::parse(raw).ok()?;
        if url.host_str() == Some("localhost") {
            let _ = url.set_port(Some(constants::LOCAL_TEST_PORT));
        }
        Some(url)
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    /// Sign an arbitrary message as the project owner, using the supplied
    /// secret key. The scheme is a plain ECDSA signature over
    /// SHA256(SHA256(msg)) — simple message signing, not a full signed-tx
    /// scheme, since the owner key never appears on-chain.
    pub fn sign_as_owner<C: Signing>(secp: &Secp256k1<C>, owner_key: &SecretKey, msg: &[u8]) -> Vec<u8> {
        let digest = double_sha256(msg);
        let message = Message::from_digest(digest);
        secp.sign_ecdsa(&message, owner_key).serialize_der().to_vec()
    }

    /// Verify a signature produced by `sign_as_owner` against this
    /// project's author key.
    pub fn authenticate_owner<C: Verification>(&self, secp: &Secp256k1<C>, msg: &[u8], sig: &[u8]) -> bool {
        let Some(author_key) = self.author_key() else {
            return false;
        };
        let Ok(signature) = Signature::from_der(sig) else {
            return false;
        };
        let digest = double_sha256(msg);
        let message = Message::from_digest(digest);
        secp.verify_ecdsa(&message, &signature, &author_key).is_ok()
    }
}

fn unix_secs_to_datetime(secs: u64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(secs as i64, 0).unwrap_or_else(|| chrono::DateTime::from_timestamp(0, 0).unwrap())
}
