//! Contract between the broker and upstream identity providers, plus the
//! generic OAuth2 authorization-code implementation.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::models::{AuthProvider, FederatedIdentity};
use crate::services::cipher::{CipherError, SecretCipher};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid provider URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("provider secret could not be decrypted: {0}")]
    Secret(#[from] CipherError),

    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider rejected the request with status {0}")]
    Rejected(u16),

    #[error("provider response missing {0}")]
    MissingField(&'static str),
}

#[async_trait]
pub trait IdentityProviderAdapter: Send + Sync {
    /// Provider authorization URL the user agent is sent to.
    fn authorization_url(
        &self,
        provider: &AuthProvider,
        state: &str,
        redirect_uri: &str,
    ) -> Result<String, ProviderError> {
        let mut url =
            Url::parse(&provider.authorization_url).map_err(|e| ProviderError::InvalidUrl {
                url: provider.authorization_url.clone(),
                reason: e.to_string(),
            })?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &provider.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &provider.scopes.join(" "))
            .append_pair("state", state);

        Ok(url.to_string())
    }

    async fn exchange_code(
        &self,
        provider: &AuthProvider,
        code: &str,
        redirect_uri: &str,
    ) -> Result<FederatedIdentity, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Authorization-code exchange against the provider's token endpoint, then
/// profile lookup on its userinfo endpoint. No retries.
#[derive(Clone)]
pub struct OAuth2Adapter {
    http: reqwest::Client,
    cipher: SecretCipher,
}

impl OAuth2Adapter {
    pub fn new(cipher: SecretCipher, timeout: Duration) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, cipher })
    }
}

#[async_trait]
impl IdentityProviderAdapter for OAuth2Adapter {
    #[tracing::instrument(skip(self, provider, code), fields(provider_id = %provider.id))]
    async fn exchange_code(
        &self,
        provider: &AuthProvider,
        code: &str,
        redirect_uri: &str,
    ) -> Result<FederatedIdentity, ProviderError> {
        let client_secret = self.cipher.decrypt(&provider.client_secret_encrypted)?;

        let token_res = self
            .http
            .post(&provider.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", provider.client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await?;

        if !token_res.status().is_success() {
            let status = token_res.status();
            tracing::error!(status = %status, "Provider token exchange rejected");
            return Err(ProviderError::Rejected(status.as_u16()));
        }

        let token: TokenResponse = token_res.json().await?;

        let userinfo_res = self
            .http
            .get(&provider.userinfo_url)
            .bearer_auth(&token.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !userinfo_res.status().is_success() {
            let status = userinfo_res.status();
            tracing::error!(status = %status, "Provider userinfo request rejected");
            return Err(ProviderError::Rejected(status.as_u16()));
        }

        let profile: Value = userinfo_res.json().await?;
        identity_from_profile(&provider.id, &profile)
    }
}

/// Subject comes from `sub`, falling back to `id` (string or number).
fn identity_from_profile(
    provider_id: &str,
    profile: &Value,
) -> Result<FederatedIdentity, ProviderError> {
    let subject = ["sub", "id"]
        .iter()
        .filter_map(|field| match profile.get(*field) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .next()
        .ok_or(ProviderError::MissingField("sub"))?;

    let text = |field: &str| {
        profile
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Ok(FederatedIdentity {
        provider_id: provider_id.to_string(),
        subject,
        email: text("email"),
        name: text("name"),
    })
}
