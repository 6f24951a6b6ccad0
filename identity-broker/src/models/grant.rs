//! Transient per-flow records held by the broker's flow stores.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkceMethod {
    S256,
    Plain,
}

impl std::str::FromStr for PkceMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(PkceMethod::S256),
            "plain" => Ok(PkceMethod::Plain),
            _ => Err(format!("Unsupported code_challenge_method: {}", s)),
        }
    }
}

/// PKCE challenge captured at login time (RFC 7636).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceChallenge {
    pub challenge: String,
    pub method: PkceMethod,
}

impl PkceChallenge {
    pub fn new(challenge: String, method: PkceMethod) -> Self {
        Self { challenge, method }
    }

    /// Check a verifier against the stored challenge in constant time.
    pub fn verify(&self, verifier: &str) -> bool {
        let derived = match self.method {
            PkceMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
            PkceMethod::Plain => verifier.to_string(),
        };
        derived.as_bytes().ct_eq(self.challenge.as_bytes()).into()
    }
}

/// Login started by a client and awaiting the provider callback.
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub client_id: String,
    pub provider_id: String,
    pub state: String,
    pub redirect_url: String,
    pub pkce: Option<PkceChallenge>,
}

impl PendingLogin {
    /// Key under which the pending login is stored: state is only unique
    /// per client.
    pub fn key(client_id: &str, state: &str) -> String {
        format!("{}\u{1f}{}", client_id, state)
    }
}

/// Internal authorization code issued after a successful federation.
#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub client_id: String,
    pub user_id: String,
    pub redirect_url: String,
    pub state: String,
    pub pkce: Option<PkceChallenge>,
}
