//! Common errors

use thiserror::Error;

/// The caller supplied a blank or structurally invalid input
///
/// These failures are always local to the call and are never retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ArgumentError {
    /// A required value was empty or whitespace
    #[error("required value `{0}` is blank")]
    Blank(&'static str),

    /// Exactly one of the DPoP proof key and nonce was supplied
    #[error("DPoP binding requires both a proof key and a nonce")]
    PartialDpopBinding,

    /// A scope list was empty
    #[error("at least one scope must be requested")]
    EmptyScopes,
}

/// A token string could not be parsed into the expected compact structure
///
/// This is not fatal to the owning credential: an uninspectable access token
/// is treated as already expired so callers can still attempt a refresh.
#[derive(Debug, Error)]
pub enum MalformedToken {
    /// The token is not a three-part compact JWT
    #[error("token is not a three-part compact JWT")]
    Structure,

    /// The payload section is not valid base64url
    #[error("token payload is not valid base64url")]
    Encoding(#[source] base64::DecodeError),

    /// The payload section is not a valid claim set
    #[error("token payload is not a valid claim set")]
    Payload(#[source] serde_json::Error),
}

/// A credential could not be constructed from the supplied material
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No credential shape matches the combination of supplied material
    #[error("no matching credential shape")]
    NoMatchingShape,

    /// A supplied value was blank or structurally invalid
    #[error(transparent)]
    InvalidArgument(#[from] ArgumentError),

    /// A required claim was absent from the claims collection
    #[error("required claim `{0}` is missing")]
    MissingClaim(&'static str),

    /// A claim was present but not usable
    #[error("claim `{claim}` is not {expected}")]
    InvalidClaim {
        /// The offending claim name
        claim: &'static str,
        /// What the claim value was expected to be
        expected: &'static str,
    },

    /// An update was applied across two credentials of different shapes
    #[error("credential shapes do not match")]
    ShapeMismatch,
}

/// Proof key material could not be generated or loaded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ProofKeyError {
    /// The system randomness source failed during key generation
    #[error("unable to generate a new P-256 key pair")]
    Generate,

    /// The supplied bytes are not a PKCS#8 P-256 private key document
    #[error("key material is not a valid PKCS#8 P-256 document")]
    InvalidKey,
}

/// A DPoP proof could not be produced
#[derive(Debug, Error)]
pub enum ProofError {
    /// The proof header or claim set could not be serialized
    #[error("unable to serialize proof claims")]
    Serialize(#[from] serde_json::Error),

    /// The system randomness source failed
    #[error("unable to source randomness for the proof identifier")]
    Rng,

    /// The signing operation failed
    #[error("proof signing operation failed")]
    Signing,
}

/// Authentication headers could not be attached to a request
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// A fresh DPoP proof could not be generated
    #[error(transparent)]
    Proof(#[from] ProofError),

    /// The token material is not a valid HTTP header value
    #[error("token is not a valid header value")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
}
