//! Authorization flow errors
//!
//! Each distinguishable failure gets its own variant. The validation
//! failures in particular must stay distinct: a wrong issuer, a missing
//! scope, and a wrong audience are different trust violations, and the
//! caller's response to each differs.

use http::StatusCode;
use skypass_tokens::{ArgumentError, Did, MalformedToken};
use thiserror::Error;
use url::Url;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A failure during the authorization flow
#[derive(Debug, Error)]
pub enum OAuthError {
    /// A caller-supplied input was blank or structurally invalid
    #[error(transparent)]
    InvalidArgument(#[from] ArgumentError),

    /// The discovery document could not be fetched
    #[error("unable to fetch the authorization server metadata")]
    Discovery(#[source] BoxError),

    /// The discovery document was missing a required field
    #[error("authorization server metadata is missing `{0}`")]
    Metadata(&'static str),

    /// The authorization server does not support a required capability
    #[error("authorization server does not support {0}")]
    UnsupportedAuthority(&'static str),

    /// The system randomness source failed
    #[error("unable to source randomness")]
    Rng,

    /// A fresh DPoP proof key could not be generated
    #[error("unable to generate the flow's proof key")]
    KeyGeneration,

    /// The callback's state token does not match the flow's
    ///
    /// Either the callback was forged or it belongs to a different flow.
    #[error("callback state token does not match this flow")]
    StateMismatch,

    /// The token exchange could not be carried out
    #[error("the authorization code exchange failed")]
    Exchange(#[source] BoxError),

    /// The token endpoint rejected the exchange
    #[error("token endpoint rejected the exchange ({status}): {error}")]
    ExchangeRejected {
        /// The response status
        status: StatusCode,
        /// The `error` code from the response body, if any
        error: String,
    },

    /// The token response was missing a field the credential requires
    #[error("token response did not include `{0}`")]
    TokenResponse(&'static str),

    /// The returned access token could not be inspected
    #[error("returned access token could not be inspected")]
    Inspect(#[from] MalformedToken),

    /// The returned access token carries no audience at all
    #[error("returned access token has an empty audience list")]
    EmptyAudience,

    /// The returned access token lacks a required scope
    #[error("returned access token lacks the `{0}` scope")]
    MissingScope(&'static str),

    /// The returned access token was issued by a different authority
    #[error("token issuer `{actual}` does not match the expected authority `{expected}`")]
    IssuerMismatch {
        /// The authority captured at flow start
        expected: Url,
        /// The issuer claimed by the returned token
        actual: String,
    },

    /// The expected service's DID is not in the token's audience
    #[error("token audience does not include the expected service `{service_did}`")]
    AudienceMismatch {
        /// The DID the expected service resolved to
        service_did: Did,
    },

    /// An operation was invoked in a stage that does not support it
    #[error("flow cannot {0} in its current stage")]
    FlowState(&'static str),

    /// The expected service's DID could not be resolved
    #[error("unable to resolve the expected service's DID")]
    ServiceResolution(#[source] BoxError),
}
