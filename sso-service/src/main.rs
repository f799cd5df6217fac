use service_core::error::AppError;
use service_core::observability::init_tracing;
use sso_service::{
    build_router,
    config::{SsoConfig, StoreBackend},
    services::{
        HttpLogoutNotifier, InMemoryStore, RedisStore, SessionStore, SsoService, TicketRegistry,
        TicketStore,
    },
    AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = SsoConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    sso_service::services::metrics::init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting SSO service"
    );

    let (session_store, ticket_store): (Arc<dyn SessionStore>, Arc<dyn TicketStore>) =
        match config.store.backend {
            StoreBackend::Redis => {
                let url = config.store.redis_url.as_deref().ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!("REDIS_URL is not set"))
                })?;
                let redis = Arc::new(
                    RedisStore::new(url, config.tickets.session_lifetime_seconds())
                        .await
                        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?,
                );
                (
                    redis.clone() as Arc<dyn SessionStore>,
                    redis as Arc<dyn TicketStore>,
                )
            }
            StoreBackend::Memory => {
                let memory = Arc::new(InMemoryStore::new());
                (
                    memory.clone() as Arc<dyn SessionStore>,
                    memory as Arc<dyn TicketStore>,
                )
            }
        };
    tracing::info!(backend = ?config.store.backend, "Store initialized");

    let notifier = HttpLogoutNotifier::new(config.logout.notification_timeout())
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

    let registry = Arc::new(TicketRegistry::from_config(&config));
    let sso = Arc::new(SsoService::new(
        &config,
        registry,
        session_store,
        ticket_store,
        Arc::new(notifier),
    ));

    if let Err(e) = sso.restore_tickets().await {
        tracing::warn!(error = %e, "Could not restore ticket registry, starting empty");
    }

    let shutdown_token = CancellationToken::new();
    let sweeper = sso.spawn_sweeper(shutdown_token.clone());

    let state = AppState {
        config: config.clone(),
        sso: sso.clone(),
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown_token.cancel();
    if tokio::time::timeout(config.common.shutdown_grace(), sweeper)
        .await
        .is_err()
    {
        tracing::warn!("Expiration sweeper did not stop within the grace period");
    }

    if let Err(e) = sso.shutdown().await {
        tracing::error!(error = %e, "Failed to flush ticket registry");
    }

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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
