//! Shared setup for identity-broker integration tests.
//!
//! Builds the real router over in-memory registry and cache, with a scripted
//! identity provider in place of network calls.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use http_body_util::BodyExt;
use identity_broker::{
    build_router,
    config::{
        BootstrapConfig, BrokerConfig, CacheBackend, CacheConfig, Environment, FlowConfig,
        ProviderSeed, RedisConfig, SecurityConfig, TokenConfig,
    },
    models::{AuthProvider, Client, FederatedIdentity},
    seed_bootstrap,
    services::{
        AuthEnforcement, EventBus, IdentityProviderAdapter, InMemoryCache, InMemoryRegistry,
        ProviderError, SecretCipher,
    },
    subscribe_defaults, AppState,
};
use reqwest::Url;
use secrecy::{ExposeSecret, Secret};
use service_core::axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

pub const PUBLIC_URL: &str = "http://broker.test";
pub const BOOTSTRAP_CLIENT_ID: &str = "iam-console";
pub const BOOTSTRAP_SECRET: &str = "console-secret";
pub const BOOTSTRAP_REDIRECT: &str = "https://console.test/callback";
pub const APP_CLIENT_ID: &str = "orders-app";
pub const APP_SECRET: &str = "orders-secret";
pub const APP_REDIRECT: &str = "https://orders.test/cb";
pub const PROVIDER_ID: &str = "github";
/// Provider code the fake adapter refuses.
pub const REJECTED_CODE: &str = "rejected";

/// Resolves any provider code to the identity `subject-<code>`.
pub struct ScriptedProvider;

#[async_trait]
impl IdentityProviderAdapter for ScriptedProvider {
    async fn exchange_code(
        &self,
        provider: &AuthProvider,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<FederatedIdentity, ProviderError> {
        if code == REJECTED_CODE {
            return Err(ProviderError::Rejected(401));
        }
        Ok(FederatedIdentity {
            provider_id: provider.id.clone(),
            subject: format!("subject-{}", code),
            email: Some(format!("{}@example.com", code)),
            name: Some(format!("User {}", code)),
        })
    }
}

pub fn test_config(with_bootstrap: bool) -> BrokerConfig {
    let bootstrap = with_bootstrap.then(|| BootstrapConfig {
        client_id: BOOTSTRAP_CLIENT_ID.to_string(),
        client_name: "IAM Console".to_string(),
        client_secret: Secret::new(BOOTSTRAP_SECRET.to_string()),
        redirect_urls: vec![BOOTSTRAP_REDIRECT.to_string()],
        project_id: "iam".to_string(),
        provider: ProviderSeed {
            id: PROVIDER_ID.to_string(),
            name: "GitHub".to_string(),
            authorization_url: "https://github.test/login/oauth/authorize".to_string(),
            token_url: "https://github.test/login/oauth/access_token".to_string(),
            userinfo_url: "https://api.github.test/user".to_string(),
            client_id: "gh-client".to_string(),
            client_secret: Secret::new("gh-secret".to_string()),
            scopes: vec!["read:user".to_string(), "user:email".to_string()],
        },
    });

    BrokerConfig {
        common: service_core::config::Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        environment: Environment::Dev,
        service_name: "identity-broker-test".to_string(),
        service_version: "0.0.0-test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        cache: CacheConfig {
            backend: CacheBackend::Memory,
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            identity_ttl_seconds: 60,
            provider_ttl_seconds: 60,
        },
        tokens: TokenConfig {
            signing_secret: Secret::new("integration-signing-secret".to_string()),
            access_token_ttl_seconds: 900,
        },
        cipher_key: Secret::new(STANDARD.encode([7u8; 32])),
        flow: FlowConfig {
            public_url: PUBLIC_URL.to_string(),
            login_ttl_seconds: 300,
            code_ttl_seconds: 60,
            provider_timeout_seconds: 5,
            refresh_interval_seconds: 300,
        },
        security: SecurityConfig {
            allowed_origins: vec!["https://console.test".to_string()],
        },
        bootstrap,
    }
}

/// In-process broker wired exactly as the binary wires it.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub registry: Arc<InMemoryRegistry>,
}

impl TestApp {
    /// Broker with the bootstrap client seeded (auth enforced) and a second,
    /// ordinary client sharing the same provider.
    pub async fn spawn() -> anyhow::Result<Self> {
        let app = Self::build(test_config(true)).await?;
        app.add_client(APP_CLIENT_ID, APP_SECRET, APP_REDIRECT).await?;
        Ok(app)
    }

    /// Broker with nothing seeded; auth is not enforced.
    pub async fn spawn_unbootstrapped() -> anyhow::Result<Self> {
        Self::build(test_config(false)).await
    }

    async fn build(config: BrokerConfig) -> anyhow::Result<Self> {
        let cache = Arc::new(InMemoryCache::new());
        let bus = Arc::new(EventBus::new());
        let enforcement = AuthEnforcement::new();
        subscribe_defaults(&bus, &enforcement, cache.clone());

        let registry = Arc::new(InMemoryRegistry::new(bus));
        let cipher = SecretCipher::from_base64_key(config.cipher_key.expose_secret())?;
        let state = AppState::new(
            config.clone(),
            registry.clone(),
            cache,
            Arc::new(ScriptedProvider),
            cipher,
            enforcement,
        )?;

        if let Some(seed) = &config.bootstrap {
            seed_bootstrap(&registry, &state.cipher, seed).await?;
        }

        Ok(Self {
            router: build_router(state.clone()),
            state,
            registry,
        })
    }

    pub async fn add_client(
        &self,
        client_id: &str,
        secret: &str,
        redirect_url: &str,
    ) -> anyhow::Result<()> {
        let mut client = Client::new(
            client_id.to_string(),
            client_id.to_string(),
            self.state.cipher.encrypt(secret)?,
            vec![redirect_url.to_string()],
            "orders".to_string(),
        );
        client.default_auth_provider_id = Some(PROVIDER_ID.to_string());
        client.scopes = vec!["openid".to_string(), "orders:read".to_string()];
        self.registry.create_client(client).await
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.get_with_headers(uri, &[]).await
    }

    pub async fn get_with_headers(&self, uri: &str, headers: &[(&str, &str)]) -> Response<Body> {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// Login with postback, returning the provider authorization URL.
    pub async fn login(&self, client_id: &str, state: &str, redirect_url: &str) -> String {
        self.login_with(client_id, state, redirect_url, "").await
    }

    pub async fn login_with(
        &self,
        client_id: &str,
        state: &str,
        redirect_url: &str,
        extra_query: &str,
    ) -> String {
        let uri = format!(
            "/auth/v1/login?client_id={}&state={}&redirect_url={}&postback=true{}",
            client_id,
            state,
            encode(redirect_url),
            extra_query
        );
        let response = self.get(&uri).await;
        assert_eq!(response.status(), StatusCode::OK, "login failed");
        let body = json_body(response).await;
        body["data"]["login_url"].as_str().unwrap().to_string()
    }

    /// Provider callback with postback, returning the client redirect URL.
    pub async fn callback(&self, client_id: &str, state: &str, provider_code: &str) -> String {
        let uri = format!(
            "/auth/v1/authp-callback?client_id={}&state={}&code={}&postback=true",
            client_id, state, provider_code
        );
        let response = self.get(&uri).await;
        assert_eq!(response.status(), StatusCode::OK, "callback failed");
        let body = json_body(response).await;
        body["data"]["redirect_url"].as_str().unwrap().to_string()
    }

    /// Runs login and callback; returns the broker authorization code.
    pub async fn authorize(
        &self,
        client_id: &str,
        redirect_url: &str,
        provider_code: &str,
    ) -> String {
        let state = format!("state-{}", uuid::Uuid::new_v4());
        self.login(client_id, &state, redirect_url).await;
        let redirect = self.callback(client_id, &state, provider_code).await;
        query_param(&redirect, "code").expect("redirect carries a code")
    }

    pub async fn verify(&self, client_id: &str, code: &str, secret: &str) -> Response<Body> {
        let authorization = basic_auth(client_id, secret);
        self.get_with_headers(
            &format!("/auth/v1/verify?client_id={}&code={}", client_id, code),
            &[("authorization", authorization.as_str())],
        )
        .await
    }

    /// Full flow for the bootstrap client; returns an access token.
    pub async fn access_token(&self, provider_code: &str) -> String {
        let code = self
            .authorize(BOOTSTRAP_CLIENT_ID, BOOTSTRAP_REDIRECT, provider_code)
            .await;
        let response = self.verify(BOOTSTRAP_CLIENT_ID, &code, BOOTSTRAP_SECRET).await;
        assert_eq!(response.status(), StatusCode::OK, "verify failed");
        let body = json_body(response).await;
        body["data"]["access_token"].as_str().unwrap().to_string()
    }
}

pub fn basic_auth(client_id: &str, secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", client_id, secret)))
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

pub fn encode(value: &str) -> String {
    Url::parse_with_params("http://x/", &[("v", value)])
        .map(|url| url.query().unwrap_or_default().trim_start_matches("v=").to_string())
        .unwrap()
}

pub fn query_params(url: &str) -> HashMap<String, String> {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    query_params(url).remove(name)
}

pub fn location(response: &Response<Body>) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
