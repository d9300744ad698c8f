//! PKCE S256 and CSRF state generation
//!
//! Implements the Proof Key for Code Exchange (PKCE) extension to OAuth 2.0
//! as defined in RFC 7636, `S256` method only.
//!
//! # How PKCE works
//!
//! 1. The client generates a high-entropy random string called the
//!    `code_verifier`, drawn from the unreserved set `[A-Za-z0-9-._~]`.
//! 2. The client computes a SHA-256 hash of the verifier and base64url-encodes
//!    it (no padding) to produce the `code_challenge`.
//! 3. The authorization request carries `code_challenge` and
//!    `code_challenge_method=S256`.
//! 4. The token request carries the original `code_verifier`.
//!
//! The CSRF `state` parameter is generated from the same alphabet.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>

use base64::Engine as _;
use rand::Rng as _;
use sha2::{Digest, Sha256};

use crate::auth::discovery::AuthorizationServerMetadata;

/// RFC 7636 unreserved characters
pub const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Verifier length used by the flow
pub const VERIFIER_LENGTH: usize = 64;

/// CSRF state length used by the flow
pub const STATE_LENGTH: usize = 32;

/// The only challenge method the flow sends
pub const CHALLENGE_METHOD: &str = "S256";

// ---------------------------------------------------------------------------
// PkcePair
// ---------------------------------------------------------------------------

/// A verifier together with the challenge derived from it
///
/// The two are only ever created together so the challenge always matches.
///
/// # Examples
///
/// ```
/// use mcp_auth_playground::auth::pkce::PkcePair;
///
/// let pair = PkcePair::generate();
/// assert_eq!(pair.verifier.len(), 64);
/// assert!(pair.is_consistent());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    /// The secret sent at token exchange
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`, sent at authorization
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh pair with a [`VERIFIER_LENGTH`]-character verifier
    pub fn generate() -> Self {
        Self::from_verifier(generate_verifier(VERIFIER_LENGTH))
    }

    /// Derive the pair for an existing verifier
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = generate_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// Whether the challenge is the S256 transform of the verifier
    pub fn is_consistent(&self) -> bool {
        generate_challenge(&self.verifier) == self.challenge
    }
}

// ---------------------------------------------------------------------------
// Public functions
// ---------------------------------------------------------------------------

/// Generate a random code verifier of `length` unreserved characters
///
/// Each character is sampled uniformly from [`UNRESERVED`] using the thread
/// RNG. RFC 7636 requires 43 to 128 characters; the flow uses 64.
pub fn generate_verifier(length: usize) -> String {
    random_unreserved(length)
}

/// Generate a random CSRF state value of `length` unreserved characters
pub fn generate_state(length: usize) -> String {
    random_unreserved(length)
}

/// Compute the S256 challenge of `verifier`
///
/// `BASE64URL-NOPAD(SHA256(ASCII(verifier)))`, as specified in RFC 7636
/// section 4.2.
///
/// # Examples
///
/// ```
/// use mcp_auth_playground::auth::pkce::generate_challenge;
///
/// assert_eq!(
///     generate_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
///     "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
/// );
/// ```
pub fn generate_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}

/// Whether the authorization server advertises `S256`
///
/// Returns `None` when the metadata does not list supported methods at all.
/// Comparison is case-sensitive.
pub fn s256_advertised(metadata: &AuthorizationServerMetadata) -> Option<bool> {
    metadata
        .code_challenge_methods_supported
        .as_ref()
        .map(|methods| methods.iter().any(|m| m == CHALLENGE_METHOD))
}

fn random_unreserved(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| UNRESERVED[rng.random_range(0..UNRESERVED.len())] as char)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
