//! PKCE verifier and challenge generation, RFC 7636

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};
use skypass_tokens::{CodeVerifier, CodeVerifierRef};

use crate::error::OAuthError;

/// The only challenge method this flow uses
pub const CHALLENGE_METHOD: &str = "S256";

/// Generates a fresh verifier and its S256 challenge
///
/// The verifier is 32 random bytes in base64url, 43 characters, the length
/// RFC 7636 recommends.
pub fn generate() -> Result<(CodeVerifier, String), OAuthError> {
    let mut entropy = [0u8; 32];
    SystemRandom::new()
        .fill(&mut entropy)
        .map_err(|_| OAuthError::Rng)?;

    let verifier = CodeVerifier::new(URL_SAFE_NO_PAD.encode(entropy));
    let challenge = challenge_for(&verifier);
    Ok((verifier, challenge))
}

/// The S256 challenge for a verifier: base64url(SHA-256(verifier))
pub fn challenge_for(verifier: &CodeVerifierRef) -> String {
    URL_SAFE_NO_PAD.encode(digest(&SHA256, verifier.as_str().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_the_rfc_7636_appendix_b_vector() {
        let verifier = CodeVerifier::from_static("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(
            challenge_for(&verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn generated_verifiers_are_43_chars_and_unique() {
        let (a, challenge_a) = generate().unwrap();
        let (b, _) = generate().unwrap();

        assert_eq!(a.as_str().len(), 43);
        assert_ne!(a, b);
        assert_eq!(challenge_for(&a), challenge_a);
    }
}
