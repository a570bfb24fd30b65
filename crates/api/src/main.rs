use livescribe_api::{build_router, state::AppState};
use livescribe_config::Settings;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (silently ignore if missing)
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "livescribe_api=debug,livescribe_services=debug,tower_http=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load()?;
    info!("Starting livescribe API on {}:{}", settings.app.host, settings.app.port);
    if settings.rtms.client_id.is_empty() {
        info!("RTMS client id is empty; handshakes will be rejected by the media service");
    }

    let app_state = AppState::new(settings.clone()).await?;
    info!(instance_id = %app_state.instance_id, "Instance identity");
    let registry = app_state.registry.clone();

    let app = build_router(app_state);

    let addr = format!("{}:{}", settings.app.host, settings.app.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(sessions = registry.session_count(), "Shutting down; closing RTMS sessions");
    registry.close_all();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
