use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// An OAuth client ID
#[braid(serde)]
pub struct ClientId;

/// A short-lived bearer or DPoP-bound access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A refresh token, used to obtain a replacement access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

limited_reveal!(RefreshTokenRef: "REFRESH TOKEN", 5);

/// A server-issued DPoP nonce, echoed in the next signed proof
#[braid(serde)]
pub struct DpopNonce;

/// A signed DPoP proof in compact JWS form, carried in the `DPoP` header
#[braid(serde)]
pub struct DpopProof;

/// A decentralized identifier naming an account or service
#[braid(serde)]
pub struct Did;

impl DidRef {
    /// Checks that the identifier has the `did:<method>:<id>` shape
    ///
    /// The method segment must be non-empty lowercase ASCII alphanumeric and
    /// the method-specific identifier must be non-empty.
    pub fn is_wellformed(&self) -> bool {
        let mut parts = self.as_str().splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(method), Some(id)) => {
                !method.is_empty()
                    && method
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
                    && !id.is_empty()
            }
            _ => false,
        }
    }
}

/// The subject identifier claimed by a token, generally a DID
#[braid(serde)]
pub struct Subject;

/// An OAuth2 authorization code delivered to the redirect URI
#[braid(serde)]
pub struct AuthorizationCode;

/// A PKCE code verifier, used for the authorization code with PKCE flow
#[braid(serde, debug = "owned", display = "owned")]
pub struct CodeVerifier;

limited_reveal!(CodeVerifierRef: "CODE VERIFIER", 5);

/// An anti-forgery state token echoed by the authorization server
#[braid(serde)]
pub struct StateToken;
