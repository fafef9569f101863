//! OAuth login flow for AT Protocol clients
//!
//! Implements the authorization-code grant with PKCE ([RFC 7636][]) and DPoP
//! sender constraint ([RFC 9449][]) against an AT Protocol authorization
//! server. A single [`AuthorizationFlow`] drives one login attempt:
//!
//! 1. discover the authorization server's metadata from its well-known path,
//! 2. issue the authorization URL the user must be sent to,
//! 3. after the redirect comes back, exchange the authorization code for
//!    tokens, validate the grant, and mint a DPoP-bound
//!    [`Credential`][skypass_tokens::Credential].
//!
//! The redirect suspension may outlive the process. [`FlowState`] is a plain
//! serializable value that callers persist across that window and hand back
//! to [`AuthorizationFlow::resume`] to finish the login elsewhere.
//!
//! [RFC 7636]: https://www.rfc-editor.org/rfc/rfc7636
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

pub mod dto;
pub mod error;
pub mod flow;
pub mod metadata;
pub mod pkce;
pub mod state;

pub use error::OAuthError;
pub use flow::{AuthorizationFlow, AuthorizeRequest, CallbackParams, ClientConfig, FlowTransport};
pub use metadata::AuthorizationServerMetadata;
pub use state::FlowState;

#[cfg(feature = "reqwest")]
pub use flow::ReqwestTransport;
