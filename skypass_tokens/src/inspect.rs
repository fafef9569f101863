//! Inspection of tokens for local bookkeeping
//!
//! Tokens handled by this crate arrive over TLS from the issuing host, and
//! signature verification is the issuing server's job; this client only needs
//! the expiry instant and subject for its own bookkeeping, plus the audience,
//! issuer, and scope claims consulted by the authorization flow. The
//! inspector therefore decodes the claim set without verifying the signature.

use aliri_clock::UnixTime;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;

use crate::error::MalformedToken;
use crate::{AccessTokenRef, Subject, SubjectRef};

/// The claims extracted from an access token
#[derive(Clone, Debug)]
pub struct TokenInfo {
    subject: Option<Subject>,
    expiry: UnixTime,
    issuer: Option<String>,
    audiences: Vec<String>,
    scope: Option<String>,
}

impl TokenInfo {
    /// The `sub` claim, if present
    #[inline]
    pub fn subject(&self) -> Option<&SubjectRef> {
        self.subject.as_deref()
    }

    /// The instant the token expires
    ///
    /// A token without an `exp` claim reports the minimum representable
    /// instant, so it is always treated as already expired.
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// The `iss` claim, if present
    #[inline]
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// The `aud` claim, normalized to a list
    #[inline]
    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    /// Whether the whitespace-delimited `scope` claim contains `scope`
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope
            .as_deref()
            .map_or(false, |s| s.split_whitespace().any(|x| x == scope))
    }
}

#[derive(Deserialize)]
struct ClaimSet {
    #[serde(default)]
    sub: Option<Subject>,
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    aud: Option<OneOrMany>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Extracts the standard claim set from a compact token
///
/// # Errors
///
/// Returns [`MalformedToken`] if the token does not decompose into three
/// `.`-separated sections or the payload section cannot be decoded.
pub fn inspect(token: &AccessTokenRef) -> Result<TokenInfo, MalformedToken> {
    let mut sections = token.as_str().split('.');
    let payload = match (
        sections.next(),
        sections.next(),
        sections.next(),
        sections.next(),
    ) {
        (Some(_header), Some(payload), Some(_signature), None) => payload,
        _ => return Err(MalformedToken::Structure),
    };

    let raw = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(MalformedToken::Encoding)?;
    let claims: ClaimSet = serde_json::from_slice(&raw).map_err(MalformedToken::Payload)?;

    Ok(TokenInfo {
        subject: claims.sub,
        expiry: claims.exp.map(UnixTime).unwrap_or_default(),
        issuer: claims.iss,
        audiences: match claims.aud {
            None => Vec::new(),
            Some(OneOrMany::One(aud)) => vec![aud],
            Some(OneOrMany::Many(auds)) => auds,
        },
        scope: claims.scope,
    })
}
