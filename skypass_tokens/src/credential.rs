//! Credentials and authenticated request signing
//!
//! A [`Credential`] wraps one of the five credential shapes an AT Protocol
//! client can hold and knows how to attach itself to an outgoing request.
//! Token material lives behind a per-instance reader-writer lock shared by
//! every clone, so a refresh applied through one handle is immediately
//! visible to all of them.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use aliri_clock::{Clock, System, UnixTime};
use http::header::{HeaderValue, AUTHORIZATION};
use http::HeaderMap;
use url::Url;

use crate::dpop::ProofKey;
use crate::error::{ArgumentError, AuthenticationError, CredentialError};
use crate::inspect;
use crate::{AccessToken, DpopNonce, RefreshToken, Subject, SubjectRef};

/// Header carrying the signed proof on DPoP-bound requests
const DPOP_HEADER: &str = "dpop";

/// The shape of a credential, without its material
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialKind {
    /// Bearer access token with a paired refresh token
    Access,
    /// Refresh token only, pending its first session refresh
    RefreshOnly,
    /// Bearer access token for inter-service calls, not refreshable
    Service,
    /// DPoP-bound access token with a paired refresh token
    DpopAccess,
    /// DPoP-bound refresh token only
    DpopRefresh,
}

/// A consistent view of a credential's access material
///
/// All three fields were read under a single lock acquisition, so the expiry
/// and subject always describe the token in `access_token`.
#[derive(Clone, Debug)]
pub struct AccessSnapshot {
    /// The current access token
    pub access_token: AccessToken,
    /// The instant that token expires
    pub expiry: UnixTime,
    /// The subject the token was issued to, if it carried one
    pub subject: Option<Subject>,
}

#[derive(Clone, Debug)]
enum Material {
    Access {
        access: AccessToken,
        refresh: RefreshToken,
        expiry: UnixTime,
        subject: Option<Subject>,
    },
    RefreshOnly {
        refresh: RefreshToken,
    },
    Service {
        access: AccessToken,
        expiry: UnixTime,
        subject: Option<Subject>,
    },
    DpopAccess {
        access: AccessToken,
        refresh: RefreshToken,
        expiry: UnixTime,
        subject: Option<Subject>,
        key: ProofKey,
        nonce: DpopNonce,
    },
    DpopRefresh {
        refresh: RefreshToken,
        key: ProofKey,
        nonce: DpopNonce,
    },
}

impl Material {
    fn kind(&self) -> CredentialKind {
        match self {
            Material::Access { .. } => CredentialKind::Access,
            Material::RefreshOnly { .. } => CredentialKind::RefreshOnly,
            Material::Service { .. } => CredentialKind::Service,
            Material::DpopAccess { .. } => CredentialKind::DpopAccess,
            Material::DpopRefresh { .. } => CredentialKind::DpopRefresh,
        }
    }
}

/// A credential for a single session against a single service
///
/// Clones share the underlying token material; see the [crate
/// documentation](crate) for the sharing contract.
#[derive(Clone, Debug)]
pub struct Credential {
    service: Url,
    inner: Arc<RwLock<Material>>,
}

impl Credential {
    /// A session credential holding a bearer access token and its refresh token
    pub fn access(
        service: Url,
        access: AccessToken,
        refresh: RefreshToken,
    ) -> Result<Self, ArgumentError> {
        require_filled(access.as_str(), "access token")?;
        require_filled(refresh.as_str(), "refresh token")?;
        let (expiry, subject) = derive_lifetime(&access);
        Ok(Self::wrap(
            service,
            Material::Access {
                access,
                refresh,
                expiry,
                subject,
            },
        ))
    }

    /// A session credential holding only a refresh token
    ///
    /// The credential reports itself as expired until its first refresh
    /// supplies an access token, at which point it becomes an access-shaped
    /// credential in place.
    pub fn refresh_only(service: Url, refresh: RefreshToken) -> Result<Self, ArgumentError> {
        require_filled(refresh.as_str(), "refresh token")?;
        Ok(Self::wrap(service, Material::RefreshOnly { refresh }))
    }

    /// A service-auth credential holding a short-lived inter-service token
    ///
    /// Service tokens are minted for a single purpose and are never refreshed.
    pub fn service_auth(service: Url, access: AccessToken) -> Result<Self, ArgumentError> {
        require_filled(access.as_str(), "access token")?;
        let (expiry, subject) = derive_lifetime(&access);
        Ok(Self::wrap(
            service,
            Material::Service {
                access,
                expiry,
                subject,
            },
        ))
    }

    /// A DPoP-bound session credential with an access and refresh token
    ///
    /// DPoP binding is all-or-nothing: the proof key and the server-issued
    /// nonce are both taken by value, so a partially bound credential cannot
    /// be constructed. The token response that binds a key always carries a
    /// `DPoP-Nonce` header.
    pub fn dpop_access(
        service: Url,
        access: AccessToken,
        refresh: RefreshToken,
        key: ProofKey,
        nonce: DpopNonce,
    ) -> Result<Self, ArgumentError> {
        require_filled(access.as_str(), "access token")?;
        require_filled(refresh.as_str(), "refresh token")?;
        require_filled(nonce.as_str(), "dpop nonce")?;
        let (expiry, subject) = derive_lifetime(&access);
        Ok(Self::wrap(
            service,
            Material::DpopAccess {
                access,
                refresh,
                expiry,
                subject,
                key,
                nonce,
            },
        ))
    }

    /// A DPoP-bound session credential holding only a refresh token
    ///
    /// As with [`dpop_access`][Self::dpop_access], the proof key and nonce
    /// are both required.
    pub fn dpop_refresh(
        service: Url,
        refresh: RefreshToken,
        key: ProofKey,
        nonce: DpopNonce,
    ) -> Result<Self, ArgumentError> {
        require_filled(refresh.as_str(), "refresh token")?;
        require_filled(nonce.as_str(), "dpop nonce")?;
        Ok(Self::wrap(
            service,
            Material::DpopRefresh {
                refresh,
                key,
                nonce,
            },
        ))
    }

    fn wrap(service: Url, material: Material) -> Self {
        Self {
            service,
            inner: Arc::new(RwLock::new(material)),
        }
    }

    /// The service this credential authenticates against
    #[inline]
    pub fn service(&self) -> &Url {
        &self.service
    }

    /// The credential's current shape
    pub fn kind(&self) -> CredentialKind {
        self.read().kind()
    }

    /// Whether requests signed with this credential carry a DPoP proof
    pub fn is_dpop_bound(&self) -> bool {
        matches!(
            self.read().kind(),
            CredentialKind::DpopAccess | CredentialKind::DpopRefresh
        )
    }

    /// The current access token, if the shape carries one
    pub fn access_token(&self) -> Option<AccessToken> {
        match &*self.read() {
            Material::Access { access, .. }
            | Material::Service { access, .. }
            | Material::DpopAccess { access, .. } => Some(access.clone()),
            Material::RefreshOnly { .. } | Material::DpopRefresh { .. } => None,
        }
    }

    /// The current refresh token, if the shape carries one
    pub fn refresh_token(&self) -> Option<RefreshToken> {
        match &*self.read() {
            Material::Access { refresh, .. }
            | Material::RefreshOnly { refresh }
            | Material::DpopAccess { refresh, .. }
            | Material::DpopRefresh { refresh, .. } => Some(refresh.clone()),
            Material::Service { .. } => None,
        }
    }

    /// The subject the current access token was issued to
    pub fn subject(&self) -> Option<Subject> {
        match &*self.read() {
            Material::Access { subject, .. }
            | Material::Service { subject, .. }
            | Material::DpopAccess { subject, .. } => subject.clone(),
            Material::RefreshOnly { .. } | Material::DpopRefresh { .. } => None,
        }
    }

    /// The expiry of the current access token, if the shape carries one
    pub fn expiry(&self) -> Option<UnixTime> {
        match &*self.read() {
            Material::Access { expiry, .. }
            | Material::Service { expiry, .. }
            | Material::DpopAccess { expiry, .. } => Some(*expiry),
            Material::RefreshOnly { .. } | Material::DpopRefresh { .. } => None,
        }
    }

    /// The most recent server-issued DPoP nonce, if the shape is DPoP-bound
    pub fn dpop_nonce(&self) -> Option<DpopNonce> {
        match &*self.read() {
            Material::DpopAccess { nonce, .. } | Material::DpopRefresh { nonce, .. } => {
                Some(nonce.clone())
            }
            _ => None,
        }
    }

    /// The proof key bound to this credential, if DPoP-bound
    pub fn proof_key(&self) -> Option<ProofKey> {
        match &*self.read() {
            Material::DpopAccess { key, .. } | Material::DpopRefresh { key, .. } => {
                Some(key.clone())
            }
            _ => None,
        }
    }

    /// An atomic view of the access token with its expiry and subject
    ///
    /// Returns `None` when the shape carries no access token.
    pub fn access_snapshot(&self) -> Option<AccessSnapshot> {
        match &*self.read() {
            Material::Access {
                access,
                expiry,
                subject,
                ..
            }
            | Material::Service {
                access,
                expiry,
                subject,
            }
            | Material::DpopAccess {
                access,
                expiry,
                subject,
                ..
            } => Some(AccessSnapshot {
                access_token: access.clone(),
                expiry: *expiry,
                subject: subject.clone(),
            }),
            Material::RefreshOnly { .. } | Material::DpopRefresh { .. } => None,
        }
    }

    /// Whether the access token has expired
    ///
    /// A credential with no access token is always expired; the dispatcher
    /// reacts by refreshing before the first authenticated request.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(System.now())
    }

    /// As [`is_expired`][Self::is_expired], against the provided clock
    pub fn is_expired_with_clock<C: Clock>(&self, clock: &C) -> bool {
        self.is_expired_at(clock.now())
    }

    /// As [`is_expired`][Self::is_expired], against an explicit instant
    pub fn is_expired_at(&self, now: UnixTime) -> bool {
        match self.expiry() {
            Some(expiry) => expiry <= now,
            None => true,
        }
    }

    /// Records a server-issued DPoP nonce for use in the next signed proof
    ///
    /// Returns `false` without storing anything when the credential is not
    /// DPoP-bound.
    pub fn set_nonce(&self, new_nonce: DpopNonce) -> bool {
        match &mut *self.write() {
            Material::DpopAccess { nonce, .. } | Material::DpopRefresh { nonce, .. } => {
                *nonce = new_nonce;
                true
            }
            _ => false,
        }
    }

    /// Installs freshly issued tokens, preserving the credential's binding
    ///
    /// A refresh-only credential is promoted in place to the corresponding
    /// access shape. When the server did not rotate the refresh token the
    /// existing one is kept.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::ShapeMismatch`] when a refresh token is
    /// supplied for a service-auth credential, which has no refresh cycle.
    pub fn update_tokens(
        &self,
        access: AccessToken,
        refresh: Option<RefreshToken>,
    ) -> Result<(), CredentialError> {
        require_filled(access.as_str(), "access token")
            .map_err(CredentialError::InvalidArgument)?;
        let (expiry, subject) = derive_lifetime(&access);

        let mut material = self.write();
        match &mut *material {
            Material::Access {
                access: current_access,
                refresh: current_refresh,
                expiry: current_expiry,
                subject: current_subject,
            } => {
                *current_access = access;
                if let Some(refresh) = refresh {
                    *current_refresh = refresh;
                }
                *current_expiry = expiry;
                *current_subject = subject;
            }
            Material::RefreshOnly {
                refresh: current_refresh,
            } => {
                let refresh = refresh.unwrap_or_else(|| current_refresh.clone());
                *material = Material::Access {
                    access,
                    refresh,
                    expiry,
                    subject,
                };
            }
            Material::Service {
                access: current_access,
                expiry: current_expiry,
                subject: current_subject,
            } => {
                if refresh.is_some() {
                    return Err(CredentialError::ShapeMismatch);
                }
                *current_access = access;
                *current_expiry = expiry;
                *current_subject = subject;
            }
            Material::DpopAccess {
                access: current_access,
                refresh: current_refresh,
                expiry: current_expiry,
                subject: current_subject,
                ..
            } => {
                *current_access = access;
                if let Some(refresh) = refresh {
                    *current_refresh = refresh;
                }
                *current_expiry = expiry;
                *current_subject = subject;
            }
            Material::DpopRefresh {
                refresh: current_refresh,
                key,
                nonce,
            } => {
                let key = key.clone();
                let nonce = nonce.clone();
                let refresh = refresh.unwrap_or_else(|| current_refresh.clone());
                *material = Material::DpopAccess {
                    access,
                    refresh,
                    expiry,
                    subject,
                    key,
                    nonce,
                };
            }
        }
        Ok(())
    }

    /// Copies another credential's material into this one
    ///
    /// Used when a session restored from storage is superseded by a newer
    /// handle to the same account.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::ShapeMismatch`] unless both credentials
    /// currently have the same shape.
    pub fn update_from(&self, other: &Credential) -> Result<(), CredentialError> {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return Ok(());
        }

        // Clone outside our own lock so two credentials updating from each
        // other can never deadlock.
        let incoming = other.read().clone();

        let mut material = self.write();
        if material.kind() != incoming.kind() {
            return Err(CredentialError::ShapeMismatch);
        }
        *material = incoming;
        Ok(())
    }

    /// Attaches this credential's authentication headers to a request
    ///
    /// Bearer shapes set `Authorization: Bearer …`; DPoP-bound shapes set
    /// `Authorization: DPoP …` plus a freshly signed proof in the `DPoP`
    /// header. Refresh-only shapes authenticate with the refresh token, which
    /// is what a session refresh endpoint expects. The authorization header
    /// value is marked sensitive so middleware will not log it.
    pub fn attach_authentication(
        &self,
        method: &http::Method,
        url: &Url,
        headers: &mut HeaderMap,
    ) -> Result<(), AuthenticationError> {
        // Snapshot under the read lock, then sign after releasing it: proof
        // signing must never hold the credential lock.
        let auth = match &*self.read() {
            Material::Access { access, .. } | Material::Service { access, .. } => {
                Auth::Bearer(access.clone().take())
            }
            Material::RefreshOnly { refresh } => Auth::Bearer(refresh.clone().take()),
            Material::DpopAccess {
                access, key, nonce, ..
            } => Auth::Dpop {
                token: access.clone().take(),
                key: key.clone(),
                nonce: nonce.clone(),
            },
            Material::DpopRefresh {
                refresh,
                key,
                nonce,
            } => Auth::Dpop {
                token: refresh.clone().take(),
                key: key.clone(),
                nonce: nonce.clone(),
            },
        };

        match auth {
            Auth::Bearer(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Auth::Dpop { token, key, nonce } => {
                let proof = key.sign_proof(method, url, Some(token.as_str()), Some(&nonce))?;

                let mut value = HeaderValue::from_str(&format!("DPoP {}", token))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
                headers.insert(DPOP_HEADER, HeaderValue::from_str(proof.as_str())?);
            }
        }
        Ok(())
    }

    /// Attaches authentication headers directly to a [`reqwest::Request`]
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub fn authenticate_request(
        &self,
        request: &mut reqwest::Request,
    ) -> Result<(), AuthenticationError> {
        let method = request.method().clone();
        let url = request.url().clone();
        self.attach_authentication(&method, &url, request.headers_mut())
    }

    fn read(&self) -> RwLockReadGuard<'_, Material> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Material> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

enum Auth {
    Bearer(String),
    Dpop {
        token: String,
        key: ProofKey,
        nonce: DpopNonce,
    },
}

/// Best-effort expiry and subject for a freshly installed access token
///
/// An uninspectable token is installed anyway with the minimum expiry, so it
/// is treated as already expired and the next request triggers a refresh.
fn derive_lifetime(access: &AccessToken) -> (UnixTime, Option<Subject>) {
    match inspect::inspect(access) {
        Ok(info) => (info.expiry(), info.subject().map(SubjectRef::to_owned)),
        Err(error) => {
            tracing::warn!(
                error = (&error as &dyn std::error::Error),
                "access token could not be inspected; treating it as expired"
            );
            (UnixTime(0), None)
        }
    }
}

fn require_filled(value: &str, name: &'static str) -> Result<(), ArgumentError> {
    if value.trim().is_empty() {
        Err(ArgumentError::Blank(name))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::tests::token_with_claims;
    use aliri_clock::TestClock;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;

    fn service() -> Url {
        Url::parse("https://pds.example").unwrap()
    }

    fn access_token(sub: &str, exp: u64) -> AccessToken {
        token_with_claims(serde_json::json!({ "sub": sub, "exp": exp }))
    }

    #[test]
    fn blank_material_is_rejected() {
        let err = Credential::access(
            service(),
            AccessToken::from_static("   "),
            RefreshToken::from_static("refresh"),
        )
        .unwrap_err();
        assert_eq!(err, ArgumentError::Blank("access token"));

        let err = Credential::refresh_only(service(), RefreshToken::from_static("")).unwrap_err();
        assert_eq!(err, ArgumentError::Blank("refresh token"));
    }

    #[test]
    fn dpop_shapes_require_a_nonce_alongside_the_key() {
        // The constructors take the nonce by value, so a key without a nonce
        // is unrepresentable; a blank nonce is the remaining degenerate case.
        let err = Credential::dpop_access(
            service(),
            access_token("did:web:alice.example", 1000),
            RefreshToken::from_static("refresh"),
            ProofKey::generate().unwrap(),
            DpopNonce::from_static("  "),
        )
        .unwrap_err();
        assert_eq!(err, ArgumentError::Blank("dpop nonce"));

        let err = Credential::dpop_refresh(
            service(),
            RefreshToken::from_static("refresh"),
            ProofKey::generate().unwrap(),
            DpopNonce::from_static(""),
        )
        .unwrap_err();
        assert_eq!(err, ArgumentError::Blank("dpop nonce"));
    }

    #[test]
    fn access_credential_reports_claims() {
        let credential = Credential::access(
            service(),
            access_token("did:web:alice.example", 2000),
            RefreshToken::from_static("refresh"),
        )
        .unwrap();

        assert_eq!(credential.kind(), CredentialKind::Access);
        assert!(!credential.is_dpop_bound());
        assert_eq!(
            credential.subject().unwrap().as_str(),
            "did:web:alice.example"
        );
        assert_eq!(credential.expiry(), Some(UnixTime(2000)));

        let mut clock = TestClock::default();
        clock.set(UnixTime(1000));
        assert!(!credential.is_expired_with_clock(&clock));
        clock.set(UnixTime(2000));
        assert!(credential.is_expired_with_clock(&clock));
    }

    #[test]
    fn uninspectable_token_is_installed_as_expired() {
        let credential = Credential::access(
            service(),
            AccessToken::from_static("opaque-not-a-jwt"),
            RefreshToken::from_static("refresh"),
        )
        .unwrap();

        assert!(credential.is_expired_at(UnixTime(0)));
        assert_eq!(credential.subject(), None);
    }

    #[test]
    fn refresh_only_credential_is_always_expired() {
        let credential =
            Credential::refresh_only(service(), RefreshToken::from_static("refresh")).unwrap();

        assert_eq!(credential.kind(), CredentialKind::RefreshOnly);
        assert!(credential.is_expired_at(UnixTime(0)));
        assert!(credential.access_token().is_none());
        assert!(credential.access_snapshot().is_none());
    }

    #[test]
    fn update_promotes_refresh_only_to_access() {
        let credential =
            Credential::refresh_only(service(), RefreshToken::from_static("old-refresh")).unwrap();

        credential
            .update_tokens(access_token("did:web:alice.example", 5000), None)
            .unwrap();

        assert_eq!(credential.kind(), CredentialKind::Access);
        assert_eq!(
            credential.refresh_token().unwrap().as_str(),
            "old-refresh"
        );
        assert_eq!(credential.expiry(), Some(UnixTime(5000)));
    }

    #[test]
    fn update_keeps_refresh_token_unless_rotated() {
        let credential = Credential::access(
            service(),
            access_token("did:web:alice.example", 1000),
            RefreshToken::from_static("first"),
        )
        .unwrap();

        credential
            .update_tokens(access_token("did:web:alice.example", 2000), None)
            .unwrap();
        assert_eq!(credential.refresh_token().unwrap().as_str(), "first");

        credential
            .update_tokens(
                access_token("did:web:alice.example", 3000),
                Some(RefreshToken::from_static("second")),
            )
            .unwrap();
        assert_eq!(credential.refresh_token().unwrap().as_str(), "second");
    }

    #[test]
    fn service_credential_rejects_refresh_tokens() {
        let credential =
            Credential::service_auth(service(), access_token("did:web:feedgen.example", 1000))
                .unwrap();
        assert_eq!(credential.kind(), CredentialKind::Service);
        assert!(credential.refresh_token().is_none());

        let err = credential
            .update_tokens(
                access_token("did:web:feedgen.example", 2000),
                Some(RefreshToken::from_static("unexpected")),
            )
            .unwrap_err();
        assert!(matches!(err, CredentialError::ShapeMismatch));
    }

    #[test]
    fn dpop_refresh_promotion_keeps_key_and_nonce() {
        let key = ProofKey::generate().unwrap();
        let credential = Credential::dpop_refresh(
            service(),
            RefreshToken::from_static("refresh"),
            key.clone(),
            DpopNonce::from_static("n1"),
        )
        .unwrap();
        assert!(credential.is_dpop_bound());

        credential
            .update_tokens(
                access_token("did:web:alice.example", 9000),
                Some(RefreshToken::from_static("rotated")),
            )
            .unwrap();

        assert_eq!(credential.kind(), CredentialKind::DpopAccess);
        assert_eq!(credential.proof_key().unwrap(), key);
        assert_eq!(credential.dpop_nonce().unwrap().as_str(), "n1");
    }

    #[test]
    fn set_nonce_only_applies_to_dpop_shapes() {
        let bearer = Credential::access(
            service(),
            access_token("did:web:alice.example", 1000),
            RefreshToken::from_static("refresh"),
        )
        .unwrap();
        assert!(!bearer.set_nonce(DpopNonce::from_static("n")));

        let key = ProofKey::generate().unwrap();
        let bound = Credential::dpop_access(
            service(),
            access_token("did:web:alice.example", 1000),
            RefreshToken::from_static("refresh"),
            key,
            DpopNonce::from_static("n0"),
        )
        .unwrap();
        assert!(bound.set_nonce(DpopNonce::from_static("n")));
        assert_eq!(bound.dpop_nonce().unwrap().as_str(), "n");
    }

    #[test]
    fn updates_are_visible_through_clones() {
        let credential = Credential::access(
            service(),
            access_token("did:web:alice.example", 1000),
            RefreshToken::from_static("refresh"),
        )
        .unwrap();
        let clone = credential.clone();

        credential
            .update_tokens(access_token("did:web:alice.example", 7777), None)
            .unwrap();

        assert_eq!(clone.expiry(), Some(UnixTime(7777)));
    }

    #[test]
    fn update_from_requires_matching_shapes() {
        let a = Credential::access(
            service(),
            access_token("did:web:alice.example", 1000),
            RefreshToken::from_static("a"),
        )
        .unwrap();
        let b = Credential::access(
            service(),
            access_token("did:web:alice.example", 2000),
            RefreshToken::from_static("b"),
        )
        .unwrap();

        a.update_from(&b).unwrap();
        assert_eq!(a.refresh_token().unwrap().as_str(), "b");
        assert_eq!(a.expiry(), Some(UnixTime(2000)));

        let svc =
            Credential::service_auth(service(), access_token("did:web:svc.example", 500)).unwrap();
        let err = a.update_from(&svc).unwrap_err();
        assert!(matches!(err, CredentialError::ShapeMismatch));

        // A handle of itself is a no-op, not a deadlock
        a.update_from(&a.clone()).unwrap();
    }

    #[test]
    fn bearer_authentication_sets_sensitive_authorization() {
        let credential = Credential::access(
            service(),
            access_token("did:web:alice.example", 1000),
            RefreshToken::from_static("refresh"),
        )
        .unwrap();

        let url = Url::parse("https://pds.example/xrpc/app.bsky.feed.getTimeline").unwrap();
        let mut headers = HeaderMap::new();
        credential
            .attach_authentication(&http::Method::GET, &url, &mut headers)
            .unwrap();

        let auth = headers.get(AUTHORIZATION).unwrap();
        assert!(auth.is_sensitive());
        assert!(auth.to_str().unwrap().starts_with("Bearer "));
        assert!(headers.get(DPOP_HEADER).is_none());
    }

    #[test]
    fn refresh_only_authenticates_with_the_refresh_token() {
        let credential =
            Credential::refresh_only(service(), RefreshToken::from_static("the-refresh")).unwrap();

        let url = Url::parse("https://pds.example/xrpc/com.atproto.server.refreshSession").unwrap();
        let mut headers = HeaderMap::new();
        credential
            .attach_authentication(&http::Method::POST, &url, &mut headers)
            .unwrap();

        assert_eq!(
            headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer the-refresh"
        );
    }

    #[test]
    fn dpop_authentication_signs_a_proof_over_the_bound_token() {
        let key = ProofKey::generate().unwrap();
        let token = access_token("did:web:alice.example", 1000);
        let expected_ath = URL_SAFE_NO_PAD.encode(ring::digest::digest(
            &ring::digest::SHA256,
            token.as_str().as_bytes(),
        ));

        let credential = Credential::dpop_access(
            service(),
            token,
            RefreshToken::from_static("refresh"),
            key,
            DpopNonce::from_static("server-nonce"),
        )
        .unwrap();

        let url = Url::parse("https://pds.example/xrpc/com.atproto.repo.createRecord?x=1").unwrap();
        let mut headers = HeaderMap::new();
        credential
            .attach_authentication(&http::Method::POST, &url, &mut headers)
            .unwrap();

        let auth = headers.get(AUTHORIZATION).unwrap();
        assert!(auth.to_str().unwrap().starts_with("DPoP "));

        let proof = headers.get(DPOP_HEADER).unwrap().to_str().unwrap();
        let payload = URL_SAFE_NO_PAD
            .decode(proof.split('.').nth(1).unwrap())
            .unwrap();
        let claims: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(claims["htm"], "POST");
        assert_eq!(
            claims["htu"],
            "https://pds.example/xrpc/com.atproto.repo.createRecord"
        );
        assert_eq!(claims["ath"], expected_ath.as_str());
        assert_eq!(claims["nonce"], "server-nonce");
    }

    #[test]
    fn concurrent_readers_see_consistent_snapshots() {
        let credential = Credential::access(
            service(),
            access_token("did:web:alice.example", 1111),
            RefreshToken::from_static("refresh"),
        )
        .unwrap();

        let writer = {
            let credential = credential.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    credential
                        .update_tokens(access_token("did:web:alice.example", 1111), None)
                        .unwrap();
                    credential
                        .update_tokens(access_token("did:web:bob.example", 2222), None)
                        .unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let credential = credential.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let snapshot = credential.access_snapshot().unwrap();
                        let info = inspect::inspect(&snapshot.access_token).unwrap();
                        // Expiry and subject always describe the token itself
                        assert_eq!(snapshot.expiry, info.expiry());
                        assert_eq!(
                            snapshot.subject.as_deref(),
                            info.subject(),
                        );
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
