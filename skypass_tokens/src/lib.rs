//! Credential management and authenticated request signing for AT Protocol clients
//!
//! AT Protocol servers issue short-lived bearer access tokens, longer-lived
//! refresh tokens, and sender-constrained tokens bound to a per-client
//! asymmetric key (DPoP, [RFC 9449][]). This crate represents every credential
//! shape the protocol supports as a single [`Credential`] value, attaches the
//! correct authentication material to outgoing requests, and supplies the
//! coordination primitives a request dispatcher needs to recover transparently
//! from token expiry and server-issued replay-protection nonces.
//!
//! A credential owns its token material behind a per-instance reader-writer
//! lock. Clones of a [`Credential`] share that material, so a refresh applied
//! through one handle is observed by every caller holding another handle to
//! the same session — callers never need to swap credential references after
//! a refresh.
//!
//! ```
//! use skypass_tokens::{AccessToken, Credential, RefreshToken};
//!
//! let service = url::Url::parse("https://pds.example").unwrap();
//! let credential = Credential::access(
//!     service,
//!     AccessToken::from_static(concat!(
//!         "eyJhbGciOiJFUzI1NiJ9.",
//!         "eyJzdWIiOiJkaWQ6d2ViOmFsaWNlLmV4YW1wbGUiLCJleHAiOjQxMDI0NDQ4MDB9.",
//!         "c2ln",
//!     )),
//!     RefreshToken::from_static("refresh-opaque"),
//! )
//! .unwrap();
//!
//! assert!(!credential.is_expired());
//! assert_eq!(
//!     credential.subject().unwrap().as_str(),
//!     "did:web:alice.example",
//! );
//! ```
//!
//! The endpoint wrappers of an AT Protocol client are deliberately out of
//! scope: they consume a [`Credential`] and the [`dispatch`] contract, and
//! feed refreshed tokens back through [`Credential::update_tokens`].
//!
//! [RFC 9449]: https://www.rfc-editor.org/rfc/rfc9449

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod credential;
pub mod dispatch;
pub mod dpop;
pub mod error;
pub mod factory;
pub mod inspect;

pub use braids::*;
pub use credential::{AccessSnapshot, Credential, CredentialKind};
pub use dpop::ProofKey;
pub use error::{ArgumentError, CredentialError, MalformedToken};
