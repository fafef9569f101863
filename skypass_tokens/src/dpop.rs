//! DPoP proof keys and proof generation
//!
//! Implements the client half of [RFC 9449][]: an ES256 (P-256) key pair held
//! in memory, and compact signed proofs binding the HTTP method, target URL,
//! bound token, and server nonce of each outgoing request. Proofs are
//! single-use by convention — one fresh proof per request, never cached.
//!
//! Key material is generated once per flow or session and held in memory
//! only; this crate never writes it to disk and its `Debug`/`Display`
//! renderings are redacted so it cannot leak through logs.
//!
//! [RFC 9449]: https://www.rfc-editor.org/rfc/rfc9449

use std::fmt;
use std::sync::Arc;

use aliri_clock::{Clock, System, UnixTime};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::{ProofError, ProofKeyError};
use crate::{DpopNonceRef, DpopProof};

/// The public half of a proof key, as embedded in each proof's header
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    /// Key type, always `EC`
    pub kty: String,
    /// Curve, always `P-256`
    pub crv: String,
    /// Base64url x coordinate
    pub x: String,
    /// Base64url y coordinate
    pub y: String,
}

/// An ES256 key pair used to demonstrate proof of possession
///
/// Cloning is cheap: clones share the underlying key material, so a locked
/// credential can hand out a snapshot without copying the key.
#[derive(Clone)]
pub struct ProofKey {
    inner: Arc<Inner>,
}

struct Inner {
    pkcs8: Vec<u8>,
    key: EcdsaKeyPair,
    jwk: PublicJwk,
}

impl ProofKey {
    /// Generates a fresh P-256 key pair
    pub fn generate() -> Result<Self, ProofKeyError> {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| ProofKeyError::Generate)?;
        Self::from_pkcs8(document.as_ref())
    }

    /// Loads a key pair from a PKCS#8 document
    pub fn from_pkcs8(der: &[u8]) -> Result<Self, ProofKeyError> {
        let rng = SystemRandom::new();
        let key = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, der, &rng)
            .map_err(|_| ProofKeyError::InvalidKey)?;

        // The ring public key is an uncompressed SEC1 point: 0x04 || x || y
        let public = key.public_key().as_ref();
        let jwk = PublicJwk {
            kty: String::from("EC"),
            crv: String::from("P-256"),
            x: URL_SAFE_NO_PAD.encode(&public[1..33]),
            y: URL_SAFE_NO_PAD.encode(&public[33..65]),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                pkcs8: der.to_vec(),
                key,
                jwk,
            }),
        })
    }

    /// The public half of this key
    #[inline]
    pub fn public_jwk(&self) -> &PublicJwk {
        &self.inner.jwk
    }

    /// Signs a proof for a single outgoing request
    ///
    /// The proof binds the HTTP method, the target URL stripped of query and
    /// fragment, a hash of `token` when one accompanies the request, and the
    /// server's current `nonce` when one has been issued. Each proof carries
    /// a fresh unique identifier and timestamp and must not be reused.
    pub fn sign_proof(
        &self,
        method: &http::Method,
        url: &Url,
        token: Option<&str>,
        nonce: Option<&DpopNonceRef>,
    ) -> Result<DpopProof, ProofError> {
        self.sign_proof_at(method, url, token, nonce, System.now())
    }

    /// Signs a proof with an explicit issuance instant
    pub fn sign_proof_at(
        &self,
        method: &http::Method,
        url: &Url,
        token: Option<&str>,
        nonce: Option<&DpopNonceRef>,
        issued_at: UnixTime,
    ) -> Result<DpopProof, ProofError> {
        let header = Header {
            typ: "dpop+jwt",
            alg: "ES256",
            jwk: self.public_jwk(),
        };
        let claims = Claims {
            jti: fresh_jti()?,
            htm: method.as_str(),
            htu: proof_target(url),
            iat: issued_at.0,
            ath: token.map(|t| {
                URL_SAFE_NO_PAD.encode(ring::digest::digest(&ring::digest::SHA256, t.as_bytes()))
            }),
            nonce: nonce.map(|n| n.as_str()),
        };

        let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let message = format!("{}.{}", header, payload);

        let rng = SystemRandom::new();
        let signature = self
            .inner
            .key
            .sign(&rng, message.as_bytes())
            .map_err(|_| ProofError::Signing)?;

        Ok(DpopProof::new(format!(
            "{}.{}",
            message,
            URL_SAFE_NO_PAD.encode(signature.as_ref())
        )))
    }
}

impl PartialEq for ProofKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner.pkcs8 == other.inner.pkcs8
    }
}

impl Eq for ProofKey {}

impl fmt::Debug for ProofKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("***PROOF KEY***")
    }
}

impl Serialize for ProofKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(&self.inner.pkcs8))
    }
}

impl<'de> Deserialize<'de> for ProofKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let der = URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map_err(D::Error::custom)?;
        ProofKey::from_pkcs8(&der).map_err(D::Error::custom)
    }
}

#[derive(Serialize)]
struct Header<'a> {
    typ: &'static str,
    alg: &'static str,
    jwk: &'a PublicJwk,
}

#[derive(Serialize)]
struct Claims<'a> {
    jti: String,
    htm: &'a str,
    htu: String,
    iat: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    ath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<&'a str>,
}

/// The proof's `htu` target: scheme, host, and path with query and fragment
/// stripped, per RFC 9449 §4.2
fn proof_target(url: &Url) -> String {
    let mut target = url.clone();
    target.set_query(None);
    target.set_fragment(None);
    target.into()
}

fn fresh_jti() -> Result<String, ProofError> {
    let mut bytes = [0u8; 16];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| ProofError::Rng)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
