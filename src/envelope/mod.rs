//! Envelope codec: parse/serialize the Project and Pledge wire messages,
//! preserving the original bytes alongside the decoded struct so re-emission
//! is byte-exact (identity is a bytes-hash, not a hash of the logical
//! fields — spec §3/§4.1).

pub mod project;
pub mod pledge;

use sha2::{Digest, Sha256};

/// SHA256(SHA256(bytes)), the hash used for both project and (unscrubbed)
/// pledge identity.
pub fn double_sha256(bytes: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(first);
    second.into()
}
