use enrollment_service::{
    build_router,
    config::EnrollmentConfig,
    services::{EnrollmentNotifier, PackageBuilder, PgTokenStore, SystemClock, TokenService},
    AppState,
};
use service_core::observability::logging::init_tracing;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = EnrollmentConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    enrollment_service::services::metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting enrollment service"
    );

    let store = PgTokenStore::connect(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await?;
    store.run_migrations().await?;
    tracing::info!("Database initialized successfully");

    let packages = PackageBuilder::new(config.tak.clone(), config.packages.clone());
    tracing::info!(
        packages_dir = %config.packages.root_dir.display(),
        tak_server = %format!("{}:{}", config.tak.host, config.tak.port),
        "Package builder initialized"
    );

    let notifier = EnrollmentNotifier::from_config(&config.smtp);
    let tokens = TokenService::new(Arc::new(store), Arc::new(SystemClock), packages);

    let state = AppState {
        config: Arc::new(config.clone()),
        tokens,
        notifier,
    };
    let app = build_router(state);

    let addr = config.common.socket_addr()?;

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
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
