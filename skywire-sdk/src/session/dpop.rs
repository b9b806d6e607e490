//! DPoP proof keys and per-request proof tokens (RFC 9449).
//!
//! Proofs are ES256 JWTs signed with a P-256 key that lives for the whole
//! session. Every outgoing request gets a fresh proof; proofs are never cached.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::{OsRng, RngCore};
use reqwest::Method;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use url::Url;

use crate::errors::{AuthError, Result};
use crate::util::now_secs;

/// Claims of a DPoP proof.
#[derive(Debug, Serialize)]
struct ProofClaims<'a> {
    jti: String,
    htm: &'a str,
    htu: String,
    iat: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ath: Option<String>,
}

/// P-256 key pair binding tokens to this client.
///
/// The public half travels in every proof's `jwk` header; the private half
/// never leaves the process except through [`crate::StoredSession`].
pub struct DpopKey {
    signing_key: SigningKey,
    proofs_issued: AtomicU64,
}

impl DpopKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Import a key from its 32-byte scalar.
    pub fn from_bytes(secret: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_slice(secret)
            .map_err(|e| AuthError::Key(format!("invalid P-256 secret key: {e}")))?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        Self {
            signing_key,
            proofs_issued: AtomicU64::new(0),
        }
    }

    /// The 32-byte secret scalar. Treat as a secret.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }

    /// Public key as a JWK (`kty=EC`, `crv=P-256`).
    pub fn public_jwk(&self) -> serde_json::Value {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        let x = point.x().map(|x| URL_SAFE_NO_PAD.encode(x)).unwrap_or_default();
        let y = point.y().map(|y| URL_SAFE_NO_PAD.encode(y)).unwrap_or_default();
        json!({ "kty": "EC", "crv": "P-256", "x": x, "y": y })
    }

    /// RFC 7638 JWK thumbprint, base64url encoded.
    pub fn thumbprint(&self) -> String {
        let jwk = self.public_jwk();
        // Required members in lexicographic order, no whitespace.
        let canonical = format!(
            r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#,
            jwk["x"].as_str().unwrap_or_default(),
            jwk["y"].as_str().unwrap_or_default()
        );
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }

    /// Number of proofs signed with this key so far.
    pub fn proofs_issued(&self) -> u64 {
        self.proofs_issued.load(Ordering::Relaxed)
    }

    /// Sign a proof for `method` + `url`.
    ///
    /// `htu` is the URL without query and fragment. `nonce` is the latest value
    /// the target server handed out; `access_token` adds the `ath` hash and is
    /// omitted for token-endpoint requests.
    pub fn proof(
        &self,
        method: &Method,
        url: &Url,
        nonce: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<String> {
        let mut htu = url.clone();
        htu.set_query(None);
        htu.set_fragment(None);

        let mut jti = [0u8; 16];
        OsRng.fill_bytes(&mut jti);

        let claims = ProofClaims {
            jti: URL_SAFE_NO_PAD.encode(jti),
            htm: method.as_str(),
            htu: htu.to_string(),
            iat: now_secs(),
            nonce,
            ath: access_token.map(access_token_hash),
        };
        let header = json!({
            "typ": "dpop+jwt",
            "alg": "ES256",
            "jwk": self.public_jwk(),
        });

        let header = serde_json::to_vec(&header)
            .map_err(|e| AuthError::Key(format!("proof header encoding failed: {e}")))?;
        let claims = serde_json::to_vec(&claims)
            .map_err(|e| AuthError::Key(format!("proof claims encoding failed: {e}")))?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );
        let signature: Signature = self.signing_key.sign(signing_input.as_bytes());

        self.proofs_issued.fetch_add(1, Ordering::Relaxed);
        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }
}

impl std::fmt::Debug for DpopKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DpopKey")
            .field("thumbprint", &self.thumbprint())
            .finish_non_exhaustive()
    }
}

/// `ath` claim: base64url SHA-256 of the access token.
pub fn access_token_hash(access_token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(access_token.as_bytes()))
}
