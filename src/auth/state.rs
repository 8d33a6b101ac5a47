use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::scope::ScopeSet;

const RANDOM_STATE_LENGTH: usize = 16;
const PKCE_VERIFIER_LENGTH: usize = 128; // maximum Spotify allows

/// The short-lived correlation data of one interactive authorization: the random `state` sent with the authorize URL
/// and, for PKCE, the locally generated code verifier.
#[derive(Clone)]
pub struct GrantState {
    state: String,
    pkce: Option<PkcePair>,
}

#[derive(Clone)]
struct PkcePair {
    verifier: String,
    challenge: String,
}

/// An authorization that has been started but not finalized. Direct the user to
/// [authorize_url](PendingAuthorization::authorize_url) and pass the URL they're redirected back to into
/// [TokenAuthority::finalize](crate::auth::TokenAuthority::finalize).
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub(crate) grant_state: GrantState,
    pub(crate) authorize_url: Url,
    pub(crate) scope: ScopeSet,
}

impl GrantState {
    pub fn new() -> Self {
        Self {
            state: random_string(RANDOM_STATE_LENGTH),
            pkce: None,
        }
    }

    pub fn with_pkce() -> Self {
        Self {
            pkce: Some(PkcePair::generate()),
            ..Self::new()
        }
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// The PKCE code challenge sent with the authorize request, if PKCE is used.
    pub fn code_challenge(&self) -> Option<&str> {
        self.pkce.as_ref().map(|pkce| pkce.challenge.as_str())
    }

    /// The PKCE code verifier sent with the code exchange. Never part of the authorize URL.
    pub(crate) fn code_verifier(&self) -> Option<&str> {
        self.pkce.as_ref().map(|pkce| pkce.verifier.as_str())
    }

    /// Returns true if the state returned in the redirect matches the one sent. A missing state never matches.
    pub fn matches(&self, returned_state: Option<&str>) -> bool {
        returned_state == Some(self.state.as_str())
    }
}

impl Default for GrantState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GrantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantState")
            .field("state", &self.state)
            .field("code_challenge", &self.code_challenge())
            .finish()
    }
}

impl PkcePair {
    fn generate() -> Self {
        let verifier = random_string(PKCE_VERIFIER_LENGTH);
        let challenge = code_challenge(&verifier);

        Self { verifier, challenge }
    }
}

impl PendingAuthorization {
    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    pub fn state(&self) -> &str {
        self.grant_state.state()
    }

    pub fn scope(&self) -> &ScopeSet {
        &self.scope
    }
}

/// Derives the S256 PKCE code challenge of a verifier: the unpadded base64url encoding of its SHA-256 digest.
pub fn code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
