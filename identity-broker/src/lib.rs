pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use secrecy::ExposeSecret;
use service_core::axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::{BootstrapConfig, BrokerConfig};
use crate::middleware::project::PROJECT_IDS_HEADER;
use crate::models::{AuditMetadata, AuthProvider, Client};
use crate::services::events::{BootstrapTracker, IdentityCacheInvalidator, ProviderCacheInvalidator};
use crate::services::{
    AuthEnforcement, BrokerSettings, ClaimsTokenService, EventBus, EventKind,
    IdentityProviderAdapter, IdentityResolver, InMemoryRegistry, OAuthBroker, ProviderDirectory,
    ProviderRegistry, SecretCipher, Subscriber, TtlCache,
};

#[derive(Clone)]
pub struct AppState {
    pub config: BrokerConfig,
    pub broker: Arc<OAuthBroker>,
    pub resolver: Arc<IdentityResolver>,
    pub directory: ProviderDirectory,
    pub enforcement: AuthEnforcement,
    pub cipher: SecretCipher,
    pub cache: Arc<dyn TtlCache>,
}

impl AppState {
    pub fn new(
        config: BrokerConfig,
        registry: Arc<dyn ProviderRegistry>,
        cache: Arc<dyn TtlCache>,
        adapter: Arc<dyn IdentityProviderAdapter>,
        cipher: SecretCipher,
        enforcement: AuthEnforcement,
    ) -> Result<Self, AppError> {
        let tokens = ClaimsTokenService::new(config.tokens.signing_secret.expose_secret().as_bytes())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("TOKEN_SIGNING_SECRET: {}", e)))?;

        let directory = ProviderDirectory::new(
            registry.clone(),
            cache.clone(),
            config.cache.provider_ttl_seconds,
        );
        let broker = OAuthBroker::new(
            registry.clone(),
            directory.clone(),
            adapter,
            tokens.clone(),
            cipher.clone(),
            BrokerSettings {
                public_url: config.flow.public_url.clone(),
                login_ttl: config.flow.login_ttl(),
                code_ttl: config.flow.code_ttl(),
                access_token_ttl_seconds: config.tokens.access_token_ttl_seconds,
            },
        );
        let resolver = IdentityResolver::new(
            tokens,
            registry,
            cache.clone(),
            config.cache.identity_ttl_seconds,
        );

        Ok(Self {
            config,
            broker: Arc::new(broker),
            resolver: Arc::new(resolver),
            directory,
            enforcement,
            cipher,
            cache,
        })
    }
}

/// Register the fixed subscriber set. Must run before any registry write so
/// no lifecycle event is missed.
pub fn subscribe_defaults(
    bus: &EventBus,
    enforcement: &AuthEnforcement,
    cache: Arc<dyn TtlCache>,
) {
    let tracker = Arc::new(Subscriber::BootstrapTracker(BootstrapTracker::new(
        enforcement.clone(),
    )));
    bus.subscribe(EventKind::ClientCreated, tracker.clone());
    bus.subscribe(EventKind::ClientUpdated, tracker);

    let invalidator = Arc::new(Subscriber::CacheInvalidator(ProviderCacheInvalidator::new(
        cache.clone(),
    )));
    bus.subscribe(EventKind::ClientUpdated, invalidator.clone());
    bus.subscribe(EventKind::ClientDeleted, invalidator.clone());
    bus.subscribe(EventKind::AuthProviderUpdated, invalidator);

    bus.subscribe(
        EventKind::IdentityUpdated,
        Arc::new(Subscriber::IdentityInvalidator(IdentityCacheInvalidator::new(
            cache,
        ))),
    );
}

/// Store the configured bootstrap provider and client, encrypting both
/// secrets.
pub async fn seed_bootstrap(
    registry: &InMemoryRegistry,
    cipher: &SecretCipher,
    seed: &BootstrapConfig,
) -> Result<(), AppError> {
    let encrypt = |secret: &str| {
        cipher
            .encrypt(secret)
            .map_err(|e| AppError::CryptoError(anyhow::Error::new(e)))
    };

    let provider = AuthProvider {
        id: seed.provider.id.clone(),
        name: seed.provider.name.clone(),
        project_id: seed.project_id.clone(),
        authorization_url: seed.provider.authorization_url.clone(),
        token_url: seed.provider.token_url.clone(),
        userinfo_url: seed.provider.userinfo_url.clone(),
        client_id: seed.provider.client_id.clone(),
        client_secret_encrypted: encrypt(seed.provider.client_secret.expose_secret())?,
        scopes: seed.provider.scopes.clone(),
        audit: AuditMetadata::new(Some("bootstrap".to_string())),
    };
    registry.put_auth_provider(provider).await?;

    let mut client = Client::new(
        seed.client_id.clone(),
        seed.client_name.clone(),
        encrypt(seed.client_secret.expose_secret())?,
        seed.redirect_urls.clone(),
        seed.project_id.clone(),
    );
    client.default_auth_provider_id = Some(seed.provider.id.clone());
    client.is_bootstrap = true;
    client.audit = AuditMetadata::new(Some("bootstrap".to_string()));
    registry.create_client(client).await?;

    tracing::info!(
        client_id = %seed.client_id,
        provider_id = %seed.provider.id,
        "Bootstrap client seeded"
    );
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/v1/me", get(handlers::get_me))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::identity_middleware,
        ));

    let allowed_origins: Vec<HeaderValue> = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(origin) => Some(origin),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect();

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/auth/v1/login", get(handlers::login))
        .route("/auth/v1/authp-callback", get(handlers::authp_callback))
        .route("/auth/v1/verify", get(handlers::verify))
        .route("/auth/v1/status", get(handlers::status))
        .merge(protected)
        .with_state(state)
        .layer(from_fn(middleware::project_scope_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    path = %request.uri().path(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static(PROJECT_IDS_HEADER),
                    HeaderName::from_static(REQUEST_ID_HEADER),
                ]),
        )
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.cache.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Cache health check failed");
        AppError::InternalError(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "auth_enforced": state.enforcement.is_enforced(),
        "checks": {
            "cache": "up"
        }
    })))
}
