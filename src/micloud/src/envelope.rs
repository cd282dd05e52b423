//! Request envelopes for the device API.
//!
//! An encrypted envelope is built in three layers over an [`OrderedParams`]:
//! the logical parameters (including `data`), then `rc4_hash__` over the
//! plaintext, then every value RC4-encrypted followed by `signature`,
//! `ssecurity` and `_nonce` in clear. Responses are decrypted with the key
//! derived from the nonce that was sent. Response integrity is not verified;
//! the protocol carries no response signature.

use serde_json::Value;
use thiserror::Error;

use crate::crypto::{self, CryptoError};
use crate::params::OrderedParams;

pub const RC4_HASH_FIELD: &str = "rc4_hash__";
pub const SIGNATURE_FIELD: &str = "signature";
pub const SSECURITY_FIELD: &str = "ssecurity";
pub const NONCE_FIELD: &str = "_nonce";
pub const DATA_FIELD: &str = "data";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("response is not valid utf-8")]
    Utf8,
    #[error("response is not valid json: {0}")]
    Json(String),
    #[error("envelope has no `{0}` field")]
    MissingField(&'static str),
}

/// Form parameters ready to post, plus the nonce material that opens the reply.
#[derive(Debug, Clone)]
pub struct SealedEnvelope {
    pub params: OrderedParams,
    pub nonce: String,
    pub signed_nonce: String,
}

/// Seals requests and opens responses for one session secret.
#[derive(Clone)]
pub struct EnvelopeCrypto {
    ssecurity: String,
}

impl EnvelopeCrypto {
    pub fn new(ssecurity: impl Into<String>) -> Self {
        Self {
            ssecurity: ssecurity.into(),
        }
    }

    /// Builds an encrypted envelope with a fresh nonce for `now_millis`.
    pub fn seal(
        &self,
        url: &str,
        method: &str,
        params: OrderedParams,
        now_millis: u64,
    ) -> Result<SealedEnvelope, EnvelopeError> {
        self.seal_with_nonce(url, method, params, crypto::generate_nonce(now_millis))
    }

    /// Same as [`seal`](Self::seal) with a caller-chosen nonce.
    pub fn seal_with_nonce(
        &self,
        url: &str,
        method: &str,
        mut params: OrderedParams,
        nonce: String,
    ) -> Result<SealedEnvelope, EnvelopeError> {
        let signed_nonce = crypto::signed_nonce(&self.ssecurity, &nonce)?;

        let rc4_hash = crypto::enc_signature(url, method, &signed_nonce, &params);
        params.insert(RC4_HASH_FIELD, rc4_hash);

        let mut sealed = params.try_map_values(|value| crypto::encrypt_b64(&signed_nonce, value))?;
        let signature = crypto::enc_signature(url, method, &signed_nonce, &sealed);
        sealed.insert(SIGNATURE_FIELD, signature);
        sealed.insert(SSECURITY_FIELD, self.ssecurity.as_str());
        sealed.insert(NONCE_FIELD, nonce.as_str());

        Ok(SealedEnvelope {
            params: sealed,
            nonce,
            signed_nonce,
        })
    }

    /// Builds a plaintext envelope signed with the HMAC plain signature.
    pub fn sign_plain(
        &self,
        url: &str,
        mut params: OrderedParams,
        now_millis: u64,
    ) -> Result<SealedEnvelope, EnvelopeError> {
        let nonce = crypto::generate_nonce(now_millis);
        let signed_nonce = crypto::signed_nonce(&self.ssecurity, &nonce)?;
        let signature = crypto::plain_signature(url, &signed_nonce, &nonce, &params)?;
        params.insert(SIGNATURE_FIELD, signature);
        params.insert(NONCE_FIELD, nonce.as_str());
        Ok(SealedEnvelope {
            params,
            nonce,
            signed_nonce,
        })
    }

    /// Decrypts an encrypted response body sent in reply to `nonce`.
    pub fn open(&self, nonce: &str, body: &str) -> Result<Value, EnvelopeError> {
        let signed_nonce = crypto::signed_nonce(&self.ssecurity, nonce)?;
        let plain = crypto::decrypt_b64(&signed_nonce, body)?;
        let text = String::from_utf8(plain).map_err(|_| EnvelopeError::Utf8)?;
        serde_json::from_str(&text).map_err(|e| EnvelopeError::Json(e.to_string()))
    }

    /// Opens the reply to a sealed envelope using the `_nonce` it carried.
    pub fn open_reply(&self, sent: &OrderedParams, body: &str) -> Result<Value, EnvelopeError> {
        let nonce = sent
            .get(NONCE_FIELD)
            .ok_or(EnvelopeError::MissingField(NONCE_FIELD))?;
        self.open(nonce, body)
    }
}
