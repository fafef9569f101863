//! DTOs for the token exchange and service description lookups

use aliri_clock::DurationSecs;
use serde::{Deserialize, Serialize, Serializer};
use skypass_tokens::{
    AccessToken, AuthorizationCode, ClientId, CodeVerifier, Did, DpopNonce, RefreshToken, Subject,
};
use url::Url;

/// The authorization-code exchange request
#[derive(Debug)]
pub struct CodeExchange {
    /// The client the code was issued to
    pub client_id: ClientId,

    /// The redirect URI the code was delivered to
    pub redirect_uri: Url,

    /// The authorization code from the callback
    pub code: AuthorizationCode,

    /// The PKCE verifier paired with the authorization request's challenge
    pub code_verifier: CodeVerifier,
}

impl Serialize for CodeExchange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("CodeExchange", 5)?;
        ser.serialize_field("grant_type", "authorization_code")?;
        ser.serialize_field("client_id", &self.client_id)?;
        ser.serialize_field("redirect_uri", &self.redirect_uri)?;
        ser.serialize_field("code", &self.code)?;
        ser.serialize_field("code_verifier", &self.code_verifier)?;
        ser.end()
    }
}

/// The token endpoint's success response body
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// The issued access token
    pub access_token: AccessToken,

    /// The paired refresh token, when the grant allows offline access
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,

    /// Advisory lifetime of the access token
    #[serde(default)]
    pub expires_in: Option<DurationSecs>,

    /// The scopes actually granted
    #[serde(default)]
    pub scope: Option<String>,

    /// The account the tokens were issued to
    #[serde(default)]
    pub sub: Option<Subject>,
}

/// A completed grant: the response body plus the response's DPoP nonce
#[derive(Debug)]
pub struct TokenGrant {
    /// The issued access token
    pub access_token: AccessToken,

    /// The paired refresh token, if issued
    pub refresh_token: Option<RefreshToken>,

    /// Advisory lifetime of the access token
    pub expires_in: Option<DurationSecs>,

    /// The scopes actually granted
    pub scope: Option<String>,

    /// The account the tokens were issued to
    pub sub: Option<Subject>,

    /// The nonce from the response's `DPoP-Nonce` header
    pub dpop_nonce: Option<DpopNonce>,
}

impl TokenGrant {
    /// Pairs a response body with the nonce from its headers
    pub fn new(response: TokenResponse, dpop_nonce: Option<DpopNonce>) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
            scope: response.scope,
            sub: response.sub,
            dpop_nonce,
        }
    }
}

/// The subset of `com.atproto.server.describeServer` this flow consumes
#[derive(Debug, Deserialize)]
pub struct ServerDescription {
    /// The DID the service asserts for itself
    pub did: Did,
}
