//! One-shot sweep of expired, never-enrolled tokens. Meant to be run by an
//! external scheduler (cron, a Kubernetes CronJob).

use enrollment_service::{
    config::EnrollmentConfig,
    services::{sweep_expired_tokens, Clock, PgTokenStore, SystemClock},
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = EnrollmentConfig::from_env()?;
    init_tracing("cleanup-tokens", &config.log_level, None);

    let store = PgTokenStore::connect(&config.database.url, 1, 1).await?;
    store.run_migrations().await?;

    let deleted_count = sweep_expired_tokens(&store, &SystemClock, "cli").await?;

    println!(
        "[{}] Cleaned up {} expired tokens",
        SystemClock.now().format("%Y-%m-%d %H:%M:%S"),
        deleted_count
    );
    Ok(())
}
