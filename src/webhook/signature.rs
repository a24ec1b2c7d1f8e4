//! HMAC-SHA256 request signing
//!
//! Signatures are lowercase hex digests over the `serde_json` serialization of
//! a value. JSON object keys serialize in sorted order, so equal payloads
//! always produce equal bytes.

use std::fmt;

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug)]
pub enum SignatureError {
    /// The payload could not be serialized
    Serialize(serde_json::Error),

    /// The secret was rejected as an HMAC key
    InvalidKey,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::Serialize(err) => write!(f, "failed to serialize payload: {}", err),
            SignatureError::InvalidKey => write!(f, "invalid signing key"),
        }
    }
}

impl std::error::Error for SignatureError {}

impl From<serde_json::Error> for SignatureError {
    fn from(err: serde_json::Error) -> Self {
        SignatureError::Serialize(err)
    }
}

fn mac(secret: &str) -> Result<HmacSha256, SignatureError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)
}

pub fn sign_bytes(bytes: &[u8], secret: &str) -> Result<String, SignatureError> {
    let mut mac = mac(secret)?;
    mac.update(bytes);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Length of a hex-encoded SHA-256 digest
const SIGNATURE_LEN: usize = 64;

fn is_lower_hex_digest(signature: &str) -> bool {
    signature.len() == SIGNATURE_LEN
        && signature
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Check `signature` against `bytes` in constant time
///
/// Only the exact lowercase hex form produced by [`sign_bytes`] matches.
pub fn verify_bytes(bytes: &[u8], signature: &str, secret: &str) -> bool {
    if !is_lower_hex_digest(signature) {
        return false;
    }
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = mac(secret) else {
        return false;
    };

    mac.update(bytes);
    mac.verify_slice(&expected).is_ok()
}

/// Compare a presented secret with the expected one in constant time
///
/// Both sides are reduced to an HMAC keyed by `expected`, so the comparison
/// does not depend on where the two strings first differ.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    match sign_bytes(expected.as_bytes(), expected) {
        Ok(digest) => verify_bytes(presented.as_bytes(), &digest, expected),
        Err(_) => false,
    }
}

pub fn sign<T: Serialize + ?Sized>(payload: &T, secret: &str) -> Result<String, SignatureError> {
    sign_bytes(&serde_json::to_vec(payload)?, secret)
}

pub fn verify<T: Serialize + ?Sized>(payload: &T, signature: &str, secret: &str) -> bool {
    match serde_json::to_vec(payload) {
        Ok(bytes) => verify_bytes(&bytes, signature, secret),
        Err(_) => false,
    }
}
