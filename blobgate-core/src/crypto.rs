//! SHA-256 and HMAC-SHA256 byte routines shared by the request signer.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{GateError, Result};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 digest of `data` as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// HMAC-SHA256 of `message` under `key`.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Recursive HMAC chain: `H1 = HMAC(seed, m1)`, `Hk = HMAC(Hk-1, mk)`.
///
/// At least one message is required; an empty chain is a caller bug.
pub fn hmac_sha256_chain(seed: &[u8], messages: &[&[u8]]) -> Result<[u8; 32]> {
    let (first, rest) = messages.split_first().ok_or_else(|| {
        GateError::Internal("hmac chain requires at least one message".to_string())
    })?;

    let mut digest = hmac_sha256(seed, first);
    for message in rest {
        digest = hmac_sha256(&digest, message);
    }
    Ok(digest)
}
