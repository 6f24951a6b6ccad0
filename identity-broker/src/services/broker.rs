//! Three-leg broker protocol: login, provider callback, code exchange.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use rand::Rng;
use reqwest::Url;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;

use crate::models::{AuthorizationGrant, Client, PendingLogin, PkceChallenge, PkceMethod, User};
use crate::services::cipher::SecretCipher;
use crate::services::claims::{Claims, ClaimsTokenService};
use crate::services::credentials::{CallerAuth, ClientCredentials};
use crate::services::directory::ProviderDirectory;
use crate::services::error::BrokerError;
use crate::services::flow_store::{FlowStore, RedeemError};
use crate::services::provider::IdentityProviderAdapter;
use crate::services::registry::ProviderRegistry;

pub const CALLBACK_PATH: &str = "/auth/v1/authp-callback";
const CODE_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Start,
    ProviderRedirected,
    CodeIssued,
    TokenIssued,
    Failed,
}

impl FlowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStage::Start => "start",
            FlowStage::ProviderRedirected => "provider_redirected",
            FlowStage::CodeIssued => "code_issued",
            FlowStage::TokenIssued => "token_issued",
            FlowStage::Failed => "failed",
        }
    }
}

fn record(stage: FlowStage, client_id: &str) {
    tracing::info!(stage = stage.as_str(), client_id = %client_id, "Broker flow transition");
    metrics::counter!("broker_flow_transitions_total", "stage" => stage.as_str()).increment(1);
}

fn settle<T>(
    stage: FlowStage,
    client_id: &str,
    result: Result<T, BrokerError>,
) -> Result<T, BrokerError> {
    match &result {
        Ok(_) => record(stage, client_id),
        Err(e) => {
            tracing::warn!(client_id = %client_id, error = %e, "Broker flow failed");
            record(FlowStage::Failed, client_id);
        }
    }
    result
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub public_url: String,
    pub login_ttl: Duration,
    pub code_ttl: Duration,
    pub access_token_ttl_seconds: i64,
}

#[derive(Debug, Clone, Default)]
pub struct LoginRequest {
    pub client_id: String,
    pub auth_provider: Option<String>,
    pub state: String,
    pub redirect_url: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    pub code: Option<String>,
    pub state: String,
    pub client_id: String,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct VerifyRequest {
    pub code: String,
    pub client_id: String,
    pub credentials: ClientCredentials,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

pub struct OAuthBroker {
    registry: Arc<dyn ProviderRegistry>,
    directory: ProviderDirectory,
    adapter: Arc<dyn IdentityProviderAdapter>,
    tokens: ClaimsTokenService,
    cipher: SecretCipher,
    pending: FlowStore<PendingLogin>,
    grants: FlowStore<AuthorizationGrant>,
    settings: BrokerSettings,
}

impl OAuthBroker {
    pub fn new(
        registry: Arc<dyn ProviderRegistry>,
        directory: ProviderDirectory,
        adapter: Arc<dyn IdentityProviderAdapter>,
        tokens: ClaimsTokenService,
        cipher: SecretCipher,
        settings: BrokerSettings,
    ) -> Self {
        Self {
            registry,
            directory,
            adapter,
            tokens,
            cipher,
            pending: FlowStore::new(settings.login_ttl),
            grants: FlowStore::new(settings.code_ttl),
            settings,
        }
    }

    /// Start a flow; returns the provider authorization URL.
    pub async fn login(&self, req: LoginRequest) -> Result<String, BrokerError> {
        let client_id = req.client_id.clone();
        let result = self.start_login(req).await;
        settle(FlowStage::ProviderRedirected, &client_id, result)
    }

    /// Handle the provider callback; returns the client redirect URL carrying
    /// the internal code and the original state.
    pub async fn callback(&self, req: CallbackRequest) -> Result<String, BrokerError> {
        let client_id = req.client_id.clone();
        let result = self.complete_federation(req).await;
        settle(FlowStage::CodeIssued, &client_id, result)
    }

    /// Exchange an internal code for an access token.
    pub async fn verify(&self, req: VerifyRequest) -> Result<IssuedToken, BrokerError> {
        let client_id = req.client_id.clone();
        let result = self.exchange_code(req).await;
        settle(FlowStage::TokenIssued, &client_id, result)
    }

    /// Drop expired pending logins and codes.
    pub fn purge_expired(&self) -> (usize, usize) {
        (self.pending.purge_expired(), self.grants.purge_expired())
    }

    pub fn pending_logins(&self) -> usize {
        self.pending.len()
    }

    pub fn outstanding_codes(&self) -> usize {
        self.grants.len()
    }

    async fn start_login(&self, req: LoginRequest) -> Result<String, BrokerError> {
        require(&req.client_id, "client_id")?;
        require(&req.state, "state")?;
        require(&req.redirect_url, "redirect_url")?;
        record(FlowStage::Start, &req.client_id);

        let client = self.active_client(&req.client_id).await?;
        if !client.allows_redirect(&req.redirect_url) {
            return Err(BrokerError::RedirectNotAllowed);
        }

        let provider_id = req
            .auth_provider
            .filter(|p| !p.is_empty())
            .or_else(|| client.default_auth_provider_id.clone())
            .ok_or_else(|| BrokerError::ProviderNotFound("no provider configured".to_string()))?;
        let provider = self
            .directory
            .get(&provider_id)
            .await?
            .ok_or_else(|| BrokerError::ProviderNotFound(provider_id.clone()))?;

        let pkce = match req.code_challenge.filter(|c| !c.is_empty()) {
            Some(challenge) => {
                let method = match req.code_challenge_method.as_deref() {
                    None | Some("") => PkceMethod::Plain,
                    Some(m) => m
                        .parse::<PkceMethod>()
                        .map_err(|_| BrokerError::InvalidPkceMethod(m.to_string()))?,
                };
                Some(PkceChallenge::new(challenge, method))
            }
            None => None,
        };

        let callback_uri = self.callback_uri(&client.id)?;
        let login_url = self
            .adapter
            .authorization_url(&provider, &req.state, &callback_uri)
            .map_err(|e| BrokerError::Url(e.to_string()))?;

        let pending = PendingLogin {
            client_id: client.id.clone(),
            provider_id: provider.id.clone(),
            state: req.state.clone(),
            redirect_url: req.redirect_url,
            pkce,
        };
        self.pending
            .insert_new(PendingLogin::key(&client.id, &req.state), pending)
            .map_err(|_| BrokerError::DuplicateState)?;

        tracing::debug!(client_id = %client.id, provider_id = %provider.id, "Pending login recorded");
        Ok(login_url)
    }

    async fn complete_federation(&self, req: CallbackRequest) -> Result<String, BrokerError> {
        if let Some(error) = req.error.filter(|e| !e.is_empty()) {
            return Err(BrokerError::ProviderDenied(error));
        }
        require(&req.client_id, "client_id")?;
        require(&req.state, "state")?;
        let code = req
            .code
            .filter(|c| !c.is_empty())
            .ok_or(BrokerError::MissingParameter("code"))?;

        let key = PendingLogin::key(&req.client_id, &req.state);
        let pending = self
            .pending
            .peek(&key)
            .filter(|p| p.client_id == req.client_id && p.state == req.state)
            .ok_or(BrokerError::StateMismatch)?;

        let provider = self
            .directory
            .get(&pending.provider_id)
            .await?
            .ok_or_else(|| BrokerError::ProviderNotFound(pending.provider_id.clone()))?;

        let callback_uri = self.callback_uri(&pending.client_id)?;
        let identity = self
            .adapter
            .exchange_code(&provider, &code, &callback_uri)
            .await?;
        let user = self.registry.upsert_identity(&identity).await?;

        // A concurrent callback for the same state that got here first has
        // already consumed the login.
        let pending = self.pending.take(&key).ok_or(BrokerError::StateMismatch)?;

        let code = generate_code();
        let grant = AuthorizationGrant {
            client_id: pending.client_id.clone(),
            user_id: user.id.clone(),
            redirect_url: pending.redirect_url.clone(),
            state: pending.state.clone(),
            pkce: pending.pkce.clone(),
        };
        self.grants
            .insert_new(code.clone(), grant)
            .map_err(|_| BrokerError::InvalidGrant("code collision"))?;

        let mut redirect = Url::parse(&pending.redirect_url)
            .map_err(|e| BrokerError::Url(format!("{}: {}", pending.redirect_url, e)))?;
        redirect
            .query_pairs_mut()
            .append_pair("code", &code)
            .append_pair("state", &pending.state);

        tracing::info!(client_id = %pending.client_id, user_id = %user.id, "Authorization code issued");
        Ok(redirect.to_string())
    }

    async fn exchange_code(&self, req: VerifyRequest) -> Result<IssuedToken, BrokerError> {
        require(&req.code, "code")?;
        require(&req.client_id, "client_id")?;

        if let CallerAuth::Confidential { client_id, .. } = &req.credentials.auth {
            if client_id != &req.client_id {
                return Err(BrokerError::ClientMismatch(req.client_id.clone()));
            }
        }

        let client = self.active_client(&req.client_id).await?;

        if let CallerAuth::Confidential { secret, .. } = &req.credentials.auth {
            let stored = self.cipher.decrypt(&client.secret_encrypted)?;
            let matches: bool = stored
                .as_bytes()
                .ct_eq(secret.expose_secret().as_bytes())
                .into();
            if !matches {
                return Err(BrokerError::SecretMismatch);
            }
        }

        let grant = self
            .grants
            .peek(&req.code)
            .ok_or(BrokerError::InvalidGrant("unknown, expired or already used"))?;
        let user = self
            .registry
            .get_user(&grant.user_id)
            .await?
            .ok_or(BrokerError::InvalidGrant("identity no longer exists"))?;

        let issued_at = Utc::now().timestamp();
        let expires_in = self.settings.access_token_ttl_seconds;
        let credentials = &req.credentials;

        let access_token = self
            .grants
            .redeem_with(&req.code, |grant| {
                check_grant(grant, &client, &user, credentials)?;
                let claims = token_claims(&user, &client, issued_at);
                Ok::<_, BrokerError>(self.tokens.issue(claims, issued_at + expires_in)?)
            })
            .map_err(|e| match e {
                RedeemError::Missing => BrokerError::InvalidGrant("unknown or already used"),
                RedeemError::Expired => BrokerError::InvalidGrant("expired"),
                RedeemError::Rejected(e) => e,
            })?;

        tracing::info!(client_id = %client.id, user_id = %user.id, "Access token issued");
        Ok(IssuedToken {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
        })
    }

    async fn active_client(&self, client_id: &str) -> Result<Client, BrokerError> {
        let client = self
            .registry
            .get_client(client_id)
            .await?
            .ok_or_else(|| BrokerError::ClientNotFound(client_id.to_string()))?;
        if !client.enabled {
            return Err(BrokerError::ClientDisabled(client_id.to_string()));
        }
        Ok(client)
    }

    /// Broker callback URL handed to providers; identical at login and
    /// exchange time.
    fn callback_uri(&self, client_id: &str) -> Result<String, BrokerError> {
        let base = self.settings.public_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{}{}", base, CALLBACK_PATH))
            .map_err(|e| BrokerError::Url(format!("{}: {}", base, e)))?;
        url.query_pairs_mut().append_pair("client_id", client_id);
        Ok(url.to_string())
    }
}

fn require(value: &str, name: &'static str) -> Result<(), BrokerError> {
    if value.trim().is_empty() {
        return Err(BrokerError::MissingParameter(name));
    }
    Ok(())
}

fn generate_code() -> String {
    let mut bytes = [0u8; CODE_BYTES];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn check_grant(
    grant: &AuthorizationGrant,
    client: &Client,
    user: &User,
    credentials: &ClientCredentials,
) -> Result<(), BrokerError> {
    if grant.client_id != client.id {
        return Err(BrokerError::InvalidGrant("issued to another client"));
    }
    if grant.user_id != user.id {
        return Err(BrokerError::InvalidGrant("identity changed"));
    }
    if !client.allows_redirect(&grant.redirect_url) {
        return Err(BrokerError::InvalidGrant("redirect URL no longer registered"));
    }

    match (&grant.pkce, credentials.verifier.as_deref()) {
        (Some(challenge), Some(verifier)) => {
            if !challenge.verify(verifier) {
                return Err(BrokerError::PkceMismatch);
            }
        }
        (Some(_), None) => return Err(BrokerError::PkceRequired),
        // A public caller has nothing but the verifier to prove possession.
        (None, _) if credentials.is_public() => return Err(BrokerError::PkceRequired),
        (None, _) => {}
    }
    Ok(())
}

fn token_claims(user: &User, client: &Client, issued_at: i64) -> Claims {
    let mut claims = Claims::new();
    claims.insert("sub".to_string(), Value::from(user.id.clone()));
    claims.insert("client_id".to_string(), Value::from(client.id.clone()));
    claims.insert(
        "email".to_string(),
        user.email.clone().map(Value::from).unwrap_or(Value::Null),
    );
    claims.insert(
        "name".to_string(),
        user.name.clone().map(Value::from).unwrap_or(Value::Null),
    );
    claims.insert("scope".to_string(), Value::from(client.scope_string()));
    claims.insert("iat".to_string(), Value::from(issued_at));
    claims
}
