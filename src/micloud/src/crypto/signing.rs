//! Nonces, signed nonces and request signatures.
//!
//! Every RPC derives a fresh symmetric key from the session secret:
//! `signed_nonce = b64(SHA-256(b64d(ssecurity) || b64d(nonce)))`. The signed
//! nonce keys the RC4 codec and the HMAC plain signature, and is mixed into
//! the SHA-1 enc signature. Signature inputs are joined with `&` in the exact
//! order the parameters were inserted.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::{decode_b64, CryptoError};
use crate::params::OrderedParams;

type HmacSha256 = Hmac<Sha256>;

/// Length of the decoded nonce: 8 random bytes plus a 4-byte minute counter.
pub const NONCE_LEN: usize = 12;

/// Builds a base64 nonce for a request issued at `now_millis`.
pub fn generate_nonce(now_millis: u64) -> String {
    let mut bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut bytes[..8]);
    let minutes = (now_millis / 60_000) as u32;
    bytes[8..].copy_from_slice(&minutes.to_be_bytes());
    STANDARD.encode(bytes)
}

/// Derives the per-request key from the session secret and a nonce.
pub fn signed_nonce(ssecurity: &str, nonce: &str) -> Result<String, CryptoError> {
    let mut hasher = Sha256::new();
    hasher.update(decode_b64("ssecurity", ssecurity)?);
    hasher.update(decode_b64("nonce", nonce)?);
    Ok(STANDARD.encode(hasher.finalize()))
}

/// Returns the part of `url` following the first `.com`.
///
/// URLs without `.com` are signed verbatim.
pub fn path_after_domain(url: &str) -> &str {
    url.split_once(".com").map(|(_, rest)| rest).unwrap_or(url)
}

/// HMAC-SHA256 signature used by plain (unencrypted) signed calls.
pub fn plain_signature(
    url: &str,
    signed_nonce: &str,
    nonce: &str,
    params: &OrderedParams,
) -> Result<String, CryptoError> {
    let mut parts = vec![
        path_after_domain(url).to_string(),
        signed_nonce.to_string(),
        nonce.to_string(),
    ];
    parts.extend(params.iter().map(|(k, v)| format!("{k}={v}")));
    let message = parts.join("&");

    let key = decode_b64("signed_nonce", signed_nonce)?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    mac.update(message.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// SHA-1 signature used by the RC4-encrypted RPC envelope, both for the
/// `rc4_hash__` field and the trailing `signature` field.
pub fn enc_signature(url: &str, method: &str, signed_nonce: &str, params: &OrderedParams) -> String {
    let mut parts = vec![
        method.to_uppercase(),
        path_after_domain(url).replace("/app/", "/"),
    ];
    parts.extend(params.iter().map(|(k, v)| format!("{k}={v}")));
    parts.push(signed_nonce.to_string());
    let digest = Sha1::digest(parts.join("&").as_bytes());
    STANDARD.encode(digest)
}

/// Upper-case hex MD5 of the password, as sent in the login form.
pub fn password_hash(password: &str) -> String {
    hex::encode_upper(Md5::digest(password.as_bytes()))
}
