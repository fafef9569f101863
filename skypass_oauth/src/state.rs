//! Persistable flow state
//!
//! The window between issuing the authorization URL and receiving the
//! callback can outlive the process; the callback may well arrive in a
//! different one. [`FlowState`] is everything a resumed flow needs to finish
//! the login, as a plain serde value with no storage coupling. This is the
//! one place the proof key crosses a serialization boundary: the key
//! captured at flow start must be the key bound into the minted credential,
//! and persisting it inside the state makes a mismatch impossible by
//! construction. Callers are responsible for protecting the persisted value
//! the way they would protect a token.

use serde::{Deserialize, Serialize};
use skypass_tokens::{CodeVerifier, ProofKey, StateToken};
use url::Url;
use uuid::Uuid;

/// Everything needed to complete a login after the redirect suspension
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowState {
    /// Correlates log lines across the suspension
    pub correlation_id: Uuid,

    /// The authorization authority captured at flow start
    pub expected_authority: Url,

    /// The service the minted credential will authenticate against
    pub expected_service: Url,

    /// The PKCE verifier paired with the challenge sent at authorization
    pub code_verifier: CodeVerifier,

    /// The proof key the issued tokens will be bound to
    pub proof_key: ProofKey,

    /// The anti-forgery token the callback must echo
    pub state_token: StateToken,
}
