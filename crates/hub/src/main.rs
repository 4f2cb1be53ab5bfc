use std::sync::Arc;

use anyhow::Context;
use strata_hub::{
    auth::jwt::JwtAuthService, build_router, config::HubConfig, metrics, metrics::HubMetrics,
    shutdown_signal, store::EventLog, tasks, ws::HubState,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HubConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set STRATA_HUB_JWT_SECRET in production");
    }

    let jwt_service =
        Arc::new(JwtAuthService::new(&config.jwt_secret).context("invalid hub JWT secret")?);
    let event_log = EventLog::connect(config.database_url.as_deref())
        .await
        .context("failed to initialize hub event log")?;

    let hub_metrics = Arc::new(HubMetrics::default());
    metrics::set_global_metrics(Arc::clone(&hub_metrics));

    let state = HubState::new(event_log, Arc::clone(&jwt_service));
    tasks::spawn_background_tasks(state.clone(), &config);

    let app = build_router(state, jwt_service, hub_metrics);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind hub listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting collaboration hub");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("hub server exited unexpectedly")
}
