//! Coordination primitives for an authenticated request dispatcher
//!
//! The dispatcher itself lives outside this crate, but its obligations are
//! defined here:
//!
//! * Before each request, check [`Credential::is_expired`] and, when the
//!   credential has a refresh capability, perform the refresh exchange before
//!   sending the original request. A reactive refresh-and-retry-once after a
//!   `401` must also be supported as a clock-skew fallback.
//! * Refresh exchanges serialize per credential through a [`RefreshGate`]:
//!   when two requests discover expiry at the same time, only one exchange
//!   runs and the other waits for and reuses its result. Many servers
//!   invalidate a refresh token on first use, so a duplicate exchange would
//!   kill the session.
//! * On any response carrying a [`DPOP_NONCE_HEADER`], success or failure,
//!   rotate the credential's nonce with [`rotate_nonce`]. When the response
//!   failed solely because of a nonce mismatch ([`is_nonce_challenge`]),
//!   retry exactly once with the new nonce.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderMap, StatusCode};
use tokio::sync::watch;

use crate::credential::Credential;
use crate::DpopNonce;

/// Response header carrying a server-issued DPoP nonce
pub const DPOP_NONCE_HEADER: &str = "dpop-nonce";

/// Performs one refresh exchange against the issuing server
///
/// Implementations exchange the credential's refresh token for new token
/// material and install it with [`Credential::update_tokens`]. The gate
/// guarantees at most one concurrent call per credential.
#[async_trait]
pub trait TokenRefresher {
    /// The error produced when the exchange fails
    type Error: std::error::Error + Send + Sync + 'static;

    /// Exchanges the credential's refresh token and installs the result
    async fn refresh(&self, credential: &Credential) -> Result<(), Self::Error>;
}

/// A refresh exchange failed
///
/// Cloneable so a single failure can be handed to every waiter that joined
/// the in-flight exchange.
#[derive(Clone, Debug)]
pub enum RefreshError {
    /// The refresh exchange itself failed
    Exchange(Arc<dyn std::error::Error + Send + Sync>),

    /// The exchange task stopped without reporting a result
    Abandoned,
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RefreshError::Exchange(_) => f.write_str("the refresh exchange failed"),
            RefreshError::Abandoned => {
                f.write_str("the refresh exchange stopped without reporting a result")
            }
        }
    }
}

impl std::error::Error for RefreshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RefreshError::Exchange(error) => {
                Some(&**error as &(dyn std::error::Error + 'static))
            }
            RefreshError::Abandoned => None,
        }
    }
}

/// How a call through the gate was satisfied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The credential was not expired; no exchange ran
    Fresh,
    /// This call ran the exchange
    Refreshed,
    /// This call waited for an exchange another caller started
    Reused,
}

type Slot = watch::Receiver<Option<Result<(), RefreshError>>>;

/// Serializes refresh exchanges for a single credential
///
/// The exchange runs on a detached task, so a waiter that is cancelled never
/// cancels the exchange other waiters are depending on.
#[derive(Default)]
pub struct RefreshGate {
    inflight: Mutex<Option<Slot>>,
}

impl RefreshGate {
    /// A gate with no exchange in flight
    pub fn new() -> Self {
        Self::default()
    }

    /// Refreshes the credential only if it has expired
    ///
    /// Expiry is decided under the same lock that owns the exchange slot, so
    /// a caller that observed expiry just before another caller's exchange
    /// completed re-observes the refreshed credential instead of starting a
    /// redundant exchange.
    pub async fn refresh_if_expired<R>(
        &self,
        refresher: &R,
        credential: &Credential,
    ) -> Result<RefreshOutcome, RefreshError>
    where
        R: TokenRefresher + Clone + Send + Sync + 'static,
    {
        self.run(refresher, credential, true).await
    }

    /// Runs a refresh exchange, or joins the one already in flight
    ///
    /// Every concurrent caller receives the same result. Once an exchange
    /// completes, the next call starts a new one.
    pub async fn refresh<R>(
        &self,
        refresher: &R,
        credential: &Credential,
    ) -> Result<RefreshOutcome, RefreshError>
    where
        R: TokenRefresher + Clone + Send + Sync + 'static,
    {
        self.run(refresher, credential, false).await
    }

    async fn run<R>(
        &self,
        refresher: &R,
        credential: &Credential,
        only_if_expired: bool,
    ) -> Result<RefreshOutcome, RefreshError>
    where
        R: TokenRefresher + Clone + Send + Sync + 'static,
    {
        let (rx, outcome) = {
            let mut slot = self.inflight.lock().unwrap_or_else(|e| e.into_inner());

            if only_if_expired && !credential.is_expired() {
                return Ok(RefreshOutcome::Fresh);
            }

            match &*slot {
                Some(rx) if rx.borrow().is_none() => {
                    tracing::trace!("joining in-flight token refresh");
                    (rx.clone(), RefreshOutcome::Reused)
                }
                _ => {
                    tracing::debug!("starting token refresh exchange");
                    let (tx, rx) = watch::channel(None);
                    let refresher = refresher.clone();
                    let credential = credential.clone();
                    tokio::spawn(async move {
                        let result = refresher
                            .refresh(&credential)
                            .await
                            .map_err(|e| RefreshError::Exchange(Arc::new(e)));
                        let _ = tx.send(Some(result));
                    });
                    *slot = Some(rx.clone());
                    (rx, RefreshOutcome::Refreshed)
                }
            }
        };

        await_result(rx).await?;
        Ok(outcome)
    }
}

async fn await_result(mut rx: Slot) -> Result<(), RefreshError> {
    loop {
        if let Some(result) = rx.borrow_and_update().as_ref() {
            return result.clone();
        }
        if rx.changed().await.is_err() {
            return Err(RefreshError::Abandoned);
        }
    }
}

impl fmt::Debug for RefreshGate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshGate").finish_non_exhaustive()
    }
}

/// Extracts a server-issued DPoP nonce from response headers
pub fn nonce_from_headers(headers: &HeaderMap) -> Option<DpopNonce> {
    headers
        .get(DPOP_NONCE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(DpopNonce::from)
}

/// Rotates the credential's nonce from response headers
///
/// Returns `true` when a nonce was present and the credential accepted it.
/// Applies to every response, success or failure; servers rotate nonces on
/// their own schedule.
pub fn rotate_nonce(credential: &Credential, headers: &HeaderMap) -> bool {
    match nonce_from_headers(headers) {
        Some(nonce) => credential.set_nonce(nonce),
        None => false,
    }
}

/// Whether a response failed solely because the proof's nonce was stale
///
/// A `401` challenging with `use_dpop_nonce` means the request was otherwise
/// acceptable; the dispatcher should rotate the nonce and retry exactly once.
pub fn is_nonce_challenge(status: StatusCode, headers: &HeaderMap) -> bool {
    status == StatusCode::UNAUTHORIZED
        && headers
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .map_or(false, |challenge| challenge.contains("use_dpop_nonce"))
}
