use identity_broker::{
    build_router,
    config::{BrokerConfig, CacheBackend},
    seed_bootstrap,
    services::{
        AuthEnforcement, BackgroundJobs, EventBus, InMemoryCache, InMemoryRegistry, OAuth2Adapter,
        RedisCache, SecretCipher, TtlCache,
    },
    subscribe_defaults, AppState,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = BrokerConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    identity_broker::services::metrics::init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity broker"
    );

    let cache: Arc<dyn TtlCache> = match config.cache.backend {
        CacheBackend::Redis => Arc::new(RedisCache::new(&config.cache.redis).await?),
        CacheBackend::Memory => {
            tracing::info!("Using in-memory cache");
            Arc::new(InMemoryCache::new())
        }
    };

    // Subscribers go on the bus before the registry can emit anything.
    let bus = Arc::new(EventBus::new());
    let enforcement = AuthEnforcement::new();
    subscribe_defaults(&bus, &enforcement, cache.clone());

    let registry = Arc::new(InMemoryRegistry::new(bus.clone()));

    let cipher = SecretCipher::from_base64_key(config.cipher_key.expose_secret())
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("CIPHER_KEY: {}", e)))?;
    let adapter = Arc::new(
        OAuth2Adapter::new(cipher.clone(), config.flow.provider_timeout())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
    );

    let state = AppState::new(
        config.clone(),
        registry.clone(),
        cache,
        adapter,
        cipher,
        enforcement.clone(),
    )?;

    match &config.bootstrap {
        Some(seed) => seed_bootstrap(&registry, &state.cipher, seed).await?,
        None => tracing::warn!(
            "No bootstrap client configured, protected routes are open until one is created"
        ),
    }

    let jobs = BackgroundJobs::start(
        state.directory.clone(),
        state.broker.clone(),
        config.flow.refresh_interval(),
    );

    let app = build_router(state);

    let addr: SocketAddr = config
        .common
        .bind_address()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid bind address: {}", e)))?;

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, auth_enforced = enforcement.is_enforced(), "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    jobs.shutdown().await;
    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
