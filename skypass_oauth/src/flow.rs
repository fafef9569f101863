//! The authorization flow controller
//!
//! One [`AuthorizationFlow`] drives one login attempt and is not reentrant.
//! Stages move `Idle → MetadataFetched → AwaitingCallback → Completed`, with
//! `Failed` reachable from anywhere. The suspension between issuing the
//! authorization URL and receiving the callback has no timeout here; callers
//! abandon a login by dropping the controller and its persisted
//! [`FlowState`], which is safe because nothing is in flight during that
//! window.

use async_trait::async_trait;
use skypass_tokens::inspect;
use skypass_tokens::{
    ArgumentError, AuthorizationCode, ClientId, Credential, ProofKey, StateToken,
};
use url::Url;
use uuid::Uuid;

use crate::dto::{CodeExchange, ServerDescription, TokenGrant};
use crate::error::OAuthError;
use crate::metadata::AuthorizationServerMetadata;
use crate::pkce;
use crate::state::FlowState;

/// The scope every AT Protocol login must request
pub const ATPROTO_SCOPE: &str = "atproto";

/// The three outbound calls the flow makes
///
/// Everything else the subsystem does stays local; network policy (proxies,
/// timeouts, retries beyond the bounded nonce retry) belongs to the
/// implementation behind this seam.
#[async_trait]
pub trait FlowTransport {
    /// Fetches the authorization server's discovery document
    async fn fetch_metadata(
        &self,
        authority: &Url,
    ) -> Result<AuthorizationServerMetadata, OAuthError>;

    /// Exchanges an authorization code for tokens, DPoP-signed
    ///
    /// The implementation performs the one bounded `use_dpop_nonce` retry
    /// the token endpoint may demand.
    async fn exchange_code(
        &self,
        token_endpoint: &Url,
        exchange: &CodeExchange,
        proof_key: &ProofKey,
    ) -> Result<TokenGrant, OAuthError>;

    /// Resolves the DID a service asserts for itself
    async fn describe_service(&self, service: &Url) -> Result<ServerDescription, OAuthError>;
}

/// What the caller supplies to issue an authorization URL
#[derive(Clone, Debug)]
pub struct AuthorizeRequest {
    /// The OAuth client identifier
    pub client_id: ClientId,

    /// Where the authorization server will deliver the callback
    pub redirect_uri: Url,

    /// The scopes to request; `atproto` is added if absent
    pub scopes: Vec<String>,

    /// The service the minted credential will authenticate against
    pub service: Url,
}

/// The query parameters delivered to the redirect URI
#[derive(Clone, Debug)]
pub struct CallbackParams {
    /// The authorization code
    pub code: AuthorizationCode,

    /// The echoed state token
    pub state: StateToken,
}

/// Client identity needed to resume a flow in another process
///
/// [`FlowState`] deliberately carries only per-flow secrets; the client's
/// own registration values travel with the caller's configuration instead.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// The OAuth client identifier
    pub client_id: ClientId,

    /// The redirect URI registered for the client
    pub redirect_uri: Url,

    /// The authorization server's token endpoint
    pub token_endpoint: Url,
}

#[derive(Debug)]
enum Stage {
    MetadataFetched {
        authority: Url,
        metadata: AuthorizationServerMetadata,
    },
    AwaitingCallback {
        state: FlowState,
        client_id: ClientId,
        redirect_uri: Url,
        token_endpoint: Url,
    },
    Completed,
    Failed,
}

/// A single login attempt
#[derive(Debug)]
pub struct AuthorizationFlow<T> {
    transport: T,
    stage: Stage,
}

impl<T: FlowTransport> AuthorizationFlow<T> {
    /// Starts a flow by discovering the authorization server
    ///
    /// Fetches the discovery document from the authority's well-known path
    /// and rejects servers that cannot complete an AT Protocol login.
    pub async fn discover(transport: T, authority: Url) -> Result<Self, OAuthError> {
        let metadata = transport.fetch_metadata(&authority).await?;
        metadata.require_capabilities()?;
        metadata.validate_issuer(&authority)?;

        tracing::debug!(authority = %authority, "authorization server metadata fetched");
        Ok(Self {
            transport,
            stage: Stage::MetadataFetched {
                authority,
                metadata,
            },
        })
    }

    /// Issues the authorization URL the user must be sent to
    ///
    /// Generates the flow's proof key, PKCE pair, and state token. After
    /// this call [`flow_state`][Self::flow_state] exposes the state to
    /// persist across the redirect suspension.
    pub fn begin(&mut self, request: AuthorizeRequest) -> Result<Url, OAuthError> {
        let (authority, metadata) = match &self.stage {
            Stage::MetadataFetched {
                authority,
                metadata,
            } => (authority.clone(), metadata.clone()),
            _ => {
                self.stage = Stage::Failed;
                return Err(OAuthError::FlowState("issue an authorization URL"));
            }
        };

        if request.client_id.as_str().trim().is_empty() {
            return Err(ArgumentError::Blank("client id").into());
        }
        if request.scopes.is_empty() {
            return Err(ArgumentError::EmptyScopes.into());
        }
        let mut scopes = request.scopes;
        if !scopes.iter().any(|s| s == ATPROTO_SCOPE) {
            scopes.push(ATPROTO_SCOPE.to_owned());
        }

        let proof_key = ProofKey::generate().map_err(|_| OAuthError::KeyGeneration)?;
        let (code_verifier, challenge) = pkce::generate()?;
        let state_token = fresh_state_token()?;

        let state = FlowState {
            correlation_id: Uuid::new_v4(),
            expected_authority: authority,
            expected_service: request.service,
            code_verifier,
            proof_key,
            state_token,
        };

        let mut authorize_url = metadata.authorization_endpoint.clone();
        authorize_url
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", request.client_id.as_str())
            .append_pair("redirect_uri", request.redirect_uri.as_str())
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", state.state_token.as_str())
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", pkce::CHALLENGE_METHOD);

        tracing::info!(
            correlation_id = %state.correlation_id,
            client_id = %request.client_id,
            "authorization URL issued"
        );

        self.stage = Stage::AwaitingCallback {
            state,
            client_id: request.client_id,
            redirect_uri: request.redirect_uri,
            token_endpoint: metadata.token_endpoint,
        };
        Ok(authorize_url)
    }

    /// The state to persist across the redirect suspension
    ///
    /// Only available while the flow awaits its callback.
    pub fn flow_state(&self) -> Option<&FlowState> {
        match &self.stage {
            Stage::AwaitingCallback { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Reconstructs a flow awaiting its callback, possibly in a new process
    pub fn resume(transport: T, state: FlowState, config: ClientConfig) -> Self {
        tracing::debug!(correlation_id = %state.correlation_id, "authorization flow resumed");
        Self {
            transport,
            stage: Stage::AwaitingCallback {
                state,
                client_id: config.client_id,
                redirect_uri: config.redirect_uri,
                token_endpoint: config.token_endpoint,
            },
        }
    }

    /// Processes the callback and mints the credential
    ///
    /// Exchanges the code, then validates the grant in a fixed order: the
    /// audience must be non-empty, the `atproto` scope granted, the issuer
    /// the authority captured at flow start, and the expected service's DID
    /// present in the audience. Each check fails with its own
    /// [`OAuthError`] variant. Any failure leaves the flow `Failed`; no
    /// credential is returned.
    pub async fn complete(&mut self, params: CallbackParams) -> Result<Credential, OAuthError> {
        let stage = std::mem::replace(&mut self.stage, Stage::Failed);
        let (state, client_id, redirect_uri, token_endpoint) = match stage {
            Stage::AwaitingCallback {
                state,
                client_id,
                redirect_uri,
                token_endpoint,
            } => (state, client_id, redirect_uri, token_endpoint),
            _ => return Err(OAuthError::FlowState("process a callback")),
        };
        let correlation_id = state.correlation_id;

        let result = self
            .run_exchange(params, state, client_id, redirect_uri, token_endpoint)
            .await;
        match &result {
            Ok(_) => {
                self.stage = Stage::Completed;
                tracing::info!(correlation_id = %correlation_id, "login completed");
            }
            Err(error) => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    error = (error as &dyn std::error::Error),
                    "login failed"
                );
            }
        }
        result
    }

    async fn run_exchange(
        &self,
        params: CallbackParams,
        state: FlowState,
        client_id: ClientId,
        redirect_uri: Url,
        token_endpoint: Url,
    ) -> Result<Credential, OAuthError> {
        if params.state != state.state_token {
            return Err(OAuthError::StateMismatch);
        }

        let exchange = CodeExchange {
            client_id,
            redirect_uri,
            code: params.code,
            code_verifier: state.code_verifier.clone(),
        };
        let grant = self
            .transport
            .exchange_code(&token_endpoint, &exchange, &state.proof_key)
            .await?;

        let info = inspect::inspect(&grant.access_token)?;

        if info.audiences().is_empty() {
            return Err(OAuthError::EmptyAudience);
        }
        if !info.has_scope(ATPROTO_SCOPE) {
            return Err(OAuthError::MissingScope(ATPROTO_SCOPE));
        }
        match info.issuer() {
            Some(issuer) if issuer_matches(issuer, &state.expected_authority) => {}
            issuer => {
                return Err(OAuthError::IssuerMismatch {
                    expected: state.expected_authority,
                    actual: issuer.unwrap_or_default().to_owned(),
                });
            }
        }
        let description = self
            .transport
            .describe_service(&state.expected_service)
            .await?;
        if !info
            .audiences()
            .iter()
            .any(|aud| aud == description.did.as_str())
        {
            return Err(OAuthError::AudienceMismatch {
                service_did: description.did,
            });
        }

        let refresh = grant
            .refresh_token
            .ok_or(OAuthError::TokenResponse("refresh_token"))?;
        let nonce = grant
            .dpop_nonce
            .ok_or(OAuthError::TokenResponse("DPoP-Nonce"))?;

        let credential = Credential::dpop_access(
            state.expected_service,
            grant.access_token,
            refresh,
            state.proof_key,
            nonce,
        )
        .map_err(OAuthError::InvalidArgument)?;
        Ok(credential)
    }
}

fn issuer_matches(issuer: &str, authority: &Url) -> bool {
    match Url::parse(issuer) {
        Ok(issuer) => issuer.origin() == authority.origin(),
        Err(_) => false,
    }
}

fn fresh_state_token() -> Result<StateToken, OAuthError> {
    use base64::Engine as _;
    use ring::rand::SecureRandom;

    let mut bytes = [0u8; 24];
    ring::rand::SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| OAuthError::Rng)?;
    Ok(StateToken::new(
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes),
    ))
}

#[cfg(feature = "reqwest")]
mod transport {
    use super::*;
    use crate::dto::TokenResponse;
    use crate::metadata::WELL_KNOWN_PATH;
    use serde::Deserialize;
    use skypass_tokens::dispatch::nonce_from_headers;
    use skypass_tokens::{DpopNonce, DpopNonceRef};

    /// The production transport
    #[derive(Clone, Debug, Default)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        /// A transport over an existing client
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[derive(Debug, Default, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
    }

    enum Attempt {
        Granted(TokenGrant),
        Challenged(DpopNonce),
        Rejected(OAuthError),
    }

    impl ReqwestTransport {
        async fn attempt_exchange(
            &self,
            token_endpoint: &Url,
            exchange: &CodeExchange,
            proof_key: &ProofKey,
            nonce: Option<&DpopNonceRef>,
        ) -> Result<Attempt, OAuthError> {
            let proof = proof_key
                .sign_proof(&http::Method::POST, token_endpoint, None, nonce)
                .map_err(|e| OAuthError::Exchange(Box::new(e)))?;

            let response = self
                .client
                .post(token_endpoint.clone())
                .header("dpop", proof.as_str())
                .form(exchange)
                .send()
                .await
                .map_err(|e| OAuthError::Exchange(Box::new(e)))?;

            let status = response.status();
            let header_nonce = nonce_from_headers(response.headers());

            if status.is_success() {
                let body: TokenResponse = response
                    .json()
                    .await
                    .map_err(|e| OAuthError::Exchange(Box::new(e)))?;
                return Ok(Attempt::Granted(TokenGrant::new(body, header_nonce)));
            }

            let body: ErrorBody = response.json().await.unwrap_or_default();
            match (body.error.as_deref(), header_nonce) {
                (Some("use_dpop_nonce"), Some(fresh)) => Ok(Attempt::Challenged(fresh)),
                (error, _) => Ok(Attempt::Rejected(OAuthError::ExchangeRejected {
                    status,
                    error: error.unwrap_or_default().to_owned(),
                })),
            }
        }
    }

    #[async_trait]
    impl FlowTransport for ReqwestTransport {
        async fn fetch_metadata(
            &self,
            authority: &Url,
        ) -> Result<AuthorizationServerMetadata, OAuthError> {
            let target = authority
                .join(WELL_KNOWN_PATH)
                .map_err(|e| OAuthError::Discovery(Box::new(e)))?;

            let document: serde_json::Value = self
                .client
                .get(target)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| OAuthError::Discovery(Box::new(e)))?
                .json()
                .await
                .map_err(|e| OAuthError::Discovery(Box::new(e)))?;
            AuthorizationServerMetadata::from_document(document)
        }

        async fn exchange_code(
            &self,
            token_endpoint: &Url,
            exchange: &CodeExchange,
            proof_key: &ProofKey,
        ) -> Result<TokenGrant, OAuthError> {
            match self
                .attempt_exchange(token_endpoint, exchange, proof_key, None)
                .await?
            {
                Attempt::Granted(grant) => Ok(grant),
                Attempt::Rejected(error) => Err(error),
                Attempt::Challenged(nonce) => {
                    tracing::debug!("token endpoint demanded a DPoP nonce; retrying once");
                    match self
                        .attempt_exchange(token_endpoint, exchange, proof_key, Some(&nonce))
                        .await?
                    {
                        Attempt::Granted(grant) => Ok(grant),
                        Attempt::Rejected(error) => Err(error),
                        // A second challenge means the retry budget is spent
                        Attempt::Challenged(_) => Err(OAuthError::ExchangeRejected {
                            status: http::StatusCode::BAD_REQUEST,
                            error: String::from("use_dpop_nonce"),
                        }),
                    }
                }
            }
        }

        async fn describe_service(
            &self,
            service: &Url,
        ) -> Result<ServerDescription, OAuthError> {
            let target = service
                .join("xrpc/com.atproto.server.describeServer")
                .map_err(|e| OAuthError::ServiceResolution(Box::new(e)))?;

            let description = self
                .client
                .get(target)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| OAuthError::ServiceResolution(Box::new(e)))?
                .json()
                .await
                .map_err(|e| OAuthError::ServiceResolution(Box::new(e)))?;
            Ok(description)
        }
    }
}

#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;
