//! Construction of credentials from token material or claim sets
//!
//! [`create`] dispatches on which optional pieces of material are present and
//! returns the one credential shape that combination supports.
//! [`credential_from_claims`] reconstructs a DPoP-bound session credential
//! from a claims collection, the interop surface for hosts that have already
//! authenticated the user through their own identity middleware.

use url::Url;

use crate::credential::Credential;
use crate::dpop::ProofKey;
use crate::error::{ArgumentError, CredentialError};
use crate::{AccessToken, Did, DpopNonce, RefreshToken};

/// Whether the credential authenticates an end-user session or an
/// inter-service call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthenticationType {
    /// An end-user session, refreshable
    Session,
    /// A single-purpose inter-service token, never refreshed
    Service,
}

/// Builds the credential shape matching the supplied material
///
/// | access | refresh | proof key + nonce | result |
/// |--------|---------|-------------------|--------|
/// | —      | ✔       | —                 | refresh-only |
/// | —      | ✔       | ✔                 | DPoP refresh-only |
/// | ✔      | ✔       | —                 | access |
/// | ✔      | ✔       | ✔                 | DPoP access |
/// | ✔      | —       | — (`Service`)     | service |
///
/// Any other combination fails with
/// [`CredentialError::NoMatchingShape`]. Supplying a proof key without a
/// nonce, or a nonce without a key, fails with
/// [`ArgumentError::PartialDpopBinding`].
pub fn create(
    service: Url,
    auth_type: AuthenticationType,
    access: Option<AccessToken>,
    refresh: Option<RefreshToken>,
    key: Option<ProofKey>,
    nonce: Option<DpopNonce>,
) -> Result<Credential, CredentialError> {
    if key.is_some() != nonce.is_some() {
        return Err(ArgumentError::PartialDpopBinding.into());
    }

    let credential = match (auth_type, access, refresh, key, nonce) {
        (AuthenticationType::Session, None, Some(refresh), None, None) => {
            Credential::refresh_only(service, refresh)?
        }
        (AuthenticationType::Session, None, Some(refresh), Some(key), Some(nonce)) => {
            Credential::dpop_refresh(service, refresh, key, nonce)?
        }
        (AuthenticationType::Session, Some(access), Some(refresh), None, None) => {
            Credential::access(service, access, refresh)?
        }
        (AuthenticationType::Session, Some(access), Some(refresh), Some(key), Some(nonce)) => {
            Credential::dpop_access(service, access, refresh, key, nonce)?
        }
        (AuthenticationType::Service, Some(access), None, None, None) => {
            Credential::service_auth(service, access)?
        }
        _ => return Err(CredentialError::NoMatchingShape),
    };
    Ok(credential)
}

/// Well-known claim names consumed by [`credential_from_claims`]
pub mod claim {
    /// The account's decentralized identifier
    pub const DID: &str = "did";
    /// The DPoP-bound access token
    pub const ACCESS_TOKEN: &str = "access_token";
    /// The paired refresh token
    pub const REFRESH_TOKEN: &str = "refresh_token";
    /// The base64url PKCS#8 proof key the tokens are bound to
    pub const DPOP_PROOF_KEY: &str = "dpop_proof_key";
    /// The most recent server-issued DPoP nonce
    pub const DPOP_NONCE: &str = "dpop_nonce";
}

/// A read-only view over a host's claims collection
pub trait ClaimsSource {
    /// The first value of the named claim, if present
    fn claim(&self, name: &str) -> Option<&str>;

    /// The issuer recorded alongside the named claim, if any
    fn claim_issuer(&self, name: &str) -> Option<&str>;
}

/// A plain list of `(name, value, issuer)` claims
#[derive(Clone, Debug, Default)]
pub struct ClaimList {
    claims: Vec<(String, String, Option<String>)>,
}

impl ClaimList {
    /// An empty claim list
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a claim without an issuer
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.claims.push((name.into(), value.into(), None));
    }

    /// Appends a claim with its issuer
    pub fn push_with_issuer(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        issuer: impl Into<String>,
    ) {
        self.claims
            .push((name.into(), value.into(), Some(issuer.into())));
    }
}

impl ClaimsSource for ClaimList {
    fn claim(&self, name: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, v, _)| v.as_str())
    }

    fn claim_issuer(&self, name: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|(n, _, _)| n == name)
            .and_then(|(_, _, i)| i.as_deref())
    }
}

/// Reconstructs a DPoP-bound session credential from a claims collection
///
/// Requires the five claims named in [`claim`], plus an issuer URI recorded
/// on the [`claim::DID`] claim, all present and individually well-formed.
/// Each failure names the offending claim so callers can distinguish a
/// missing DID from a missing issuer.
pub fn credential_from_claims<S: ClaimsSource>(source: &S) -> Result<Credential, CredentialError> {
    let did = source
        .claim(claim::DID)
        .ok_or(CredentialError::MissingClaim(claim::DID))?;
    if !Did::from(did).is_wellformed() {
        return Err(CredentialError::InvalidClaim {
            claim: claim::DID,
            expected: "a well-formed DID",
        });
    }

    let issuer = source
        .claim_issuer(claim::DID)
        .ok_or(CredentialError::MissingClaim("issuer"))?;
    let service = Url::parse(issuer).map_err(|_| CredentialError::InvalidClaim {
        claim: "issuer",
        expected: "an absolute URI",
    })?;

    let access = source
        .claim(claim::ACCESS_TOKEN)
        .ok_or(CredentialError::MissingClaim(claim::ACCESS_TOKEN))?;
    let refresh = source
        .claim(claim::REFRESH_TOKEN)
        .ok_or(CredentialError::MissingClaim(claim::REFRESH_TOKEN))?;

    let key = source
        .claim(claim::DPOP_PROOF_KEY)
        .ok_or(CredentialError::MissingClaim(claim::DPOP_PROOF_KEY))?;
    let key = decode_proof_key(key).ok_or(CredentialError::InvalidClaim {
        claim: claim::DPOP_PROOF_KEY,
        expected: "a base64url PKCS#8 P-256 key",
    })?;

    let nonce = source
        .claim(claim::DPOP_NONCE)
        .ok_or(CredentialError::MissingClaim(claim::DPOP_NONCE))?;

    let credential = Credential::dpop_access(
        service,
        AccessToken::from(access),
        RefreshToken::from(refresh),
        key,
        DpopNonce::from(nonce),
    )?;
    Ok(credential)
}

fn decode_proof_key(encoded: &str) -> Option<ProofKey> {
    use base64::Engine as _;

    let der = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(encoded.as_bytes())
        .ok()?;
    ProofKey::from_pkcs8(&der).ok()
}
