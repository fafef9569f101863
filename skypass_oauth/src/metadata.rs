//! Authorization server discovery metadata

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::OAuthError;

/// Well-known path of the discovery document, per RFC 8414
pub const WELL_KNOWN_PATH: &str = ".well-known/oauth-authorization-server";

/// The subset of the discovery document this flow consumes
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AuthorizationServerMetadata {
    /// The issuer identifier the server asserts for itself
    pub issuer: Url,

    /// Where the user is sent to authorize
    pub authorization_endpoint: Url,

    /// Where authorization codes are exchanged for tokens
    pub token_endpoint: Url,

    /// Scopes the server advertises
    #[serde(default)]
    pub scopes_supported: Vec<String>,

    /// Response types the server supports
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// Grant types the server supports
    #[serde(default)]
    pub grant_types_supported: Vec<String>,

    /// PKCE challenge methods the server supports
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,

    /// DPoP proof signing algorithms the server supports
    #[serde(default)]
    pub dpop_signing_alg_values_supported: Vec<String>,
}

impl AuthorizationServerMetadata {
    /// Parses a fetched discovery document
    ///
    /// A document missing one of the required fields (`issuer`,
    /// `authorization_endpoint`, `token_endpoint`) fails with
    /// [`OAuthError::Metadata`] naming that field; any other malformation
    /// surfaces as [`OAuthError::Discovery`].
    pub fn from_document(document: serde_json::Value) -> Result<Self, OAuthError> {
        for &field in &["issuer", "authorization_endpoint", "token_endpoint"] {
            if document.get(field).is_none() {
                return Err(OAuthError::Metadata(field));
            }
        }
        serde_json::from_value(document).map_err(|e| OAuthError::Discovery(Box::new(e)))
    }

    /// Checks that the server supports everything this flow requires
    ///
    /// The flow only speaks the authorization-code grant with S256 PKCE and
    /// ES256 DPoP proofs; a server missing any of these cannot complete a
    /// login and is rejected up front.
    pub fn require_capabilities(&self) -> Result<(), OAuthError> {
        if !self.response_types_supported.iter().any(|t| t == "code") {
            return Err(OAuthError::UnsupportedAuthority(
                "the `code` response type",
            ));
        }
        if !self
            .grant_types_supported
            .iter()
            .any(|t| t == "authorization_code")
        {
            return Err(OAuthError::UnsupportedAuthority(
                "the `authorization_code` grant",
            ));
        }
        if !self
            .code_challenge_methods_supported
            .iter()
            .any(|m| m == crate::pkce::CHALLENGE_METHOD)
        {
            return Err(OAuthError::UnsupportedAuthority("S256 PKCE challenges"));
        }
        if !self
            .dpop_signing_alg_values_supported
            .iter()
            .any(|a| a == "ES256")
        {
            return Err(OAuthError::UnsupportedAuthority("ES256 DPoP proofs"));
        }
        Ok(())
    }

    /// Checks that the asserted issuer belongs to the queried authority
    ///
    /// A document served from one origin claiming another origin as issuer
    /// is a mix-up attack, not a configuration quirk.
    pub fn validate_issuer(&self, authority: &Url) -> Result<(), OAuthError> {
        if self.issuer.origin() == authority.origin() {
            Ok(())
        } else {
            Err(OAuthError::IssuerMismatch {
                expected: authority.clone(),
                actual: self.issuer.as_str().to_owned(),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn capable_metadata(authority: &str) -> AuthorizationServerMetadata {
        serde_json::from_value(serde_json::json!({
            "issuer": authority,
            "authorization_endpoint": format!("{}/oauth/authorize", authority),
            "token_endpoint": format!("{}/oauth/token", authority),
            "scopes_supported": ["atproto", "transition:generic"],
            "response_types_supported": ["code"],
            "grant_types_supported": ["authorization_code", "refresh_token"],
            "code_challenge_methods_supported": ["S256"],
            "dpop_signing_alg_values_supported": ["ES256"],
        }))
        .unwrap()
    }

    #[test]
    fn parses_the_discovery_document() {
        let metadata = capable_metadata("https://auth.example");
        assert_eq!(metadata.issuer.as_str(), "https://auth.example/");
        assert_eq!(
            metadata.token_endpoint.as_str(),
            "https://auth.example/oauth/token"
        );
        metadata.require_capabilities().unwrap();
    }

    #[test]
    fn document_missing_a_required_field_names_it() {
        let err = AuthorizationServerMetadata::from_document(serde_json::json!({
            "issuer": "https://auth.example",
        }))
        .unwrap_err();
        assert!(matches!(err, OAuthError::Metadata("authorization_endpoint")));

        let err = AuthorizationServerMetadata::from_document(serde_json::json!({
            "authorization_endpoint": "https://auth.example/oauth/authorize",
            "token_endpoint": "https://auth.example/oauth/token",
        }))
        .unwrap_err();
        assert!(matches!(err, OAuthError::Metadata("issuer")));
    }

    #[test]
    fn malformed_document_fields_are_rejected() {
        let err = AuthorizationServerMetadata::from_document(serde_json::json!({
            "issuer": "not a url",
            "authorization_endpoint": "https://auth.example/oauth/authorize",
            "token_endpoint": "https://auth.example/oauth/token",
        }))
        .unwrap_err();
        assert!(matches!(err, OAuthError::Discovery(_)));
    }

    #[test]
    fn each_missing_capability_is_named() {
        let strip = |field: &str| {
            let mut metadata = capable_metadata("https://auth.example");
            match field {
                "response" => metadata.response_types_supported.clear(),
                "grant" => metadata.grant_types_supported.clear(),
                "pkce" => metadata.code_challenge_methods_supported.clear(),
                "dpop" => metadata.dpop_signing_alg_values_supported.clear(),
                _ => unreachable!(),
            }
            metadata.require_capabilities().unwrap_err()
        };

        assert!(matches!(strip("response"), OAuthError::UnsupportedAuthority(m) if m.contains("response type")));
        assert!(matches!(strip("grant"), OAuthError::UnsupportedAuthority(m) if m.contains("grant")));
        assert!(matches!(strip("pkce"), OAuthError::UnsupportedAuthority(m) if m.contains("S256")));
        assert!(matches!(strip("dpop"), OAuthError::UnsupportedAuthority(m) if m.contains("ES256")));
    }

    #[test]
    fn issuer_must_match_the_queried_origin() {
        let metadata = capable_metadata("https://auth.example");
        metadata
            .validate_issuer(&Url::parse("https://auth.example").unwrap())
            .unwrap();

        let err = metadata
            .validate_issuer(&Url::parse("https://evil.example").unwrap())
            .unwrap_err();
        assert!(matches!(err, OAuthError::IssuerMismatch { .. }));
    }
}
