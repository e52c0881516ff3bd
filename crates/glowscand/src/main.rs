use anyhow::{Context, Result};
use glowscan_core::{BrightnessClassifier, CascadeCache};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod accounts;
mod advisor;
mod capture;
mod config;
mod error;
mod pipeline;
mod publisher;
mod routes;
mod session;
mod store;
mod stream;

use accounts::{Accounts, DEFAULT_HASH_ITERATIONS};
use advisor::{Advisor, GeminiClient};
use capture::SnapshotCapture;
use pipeline::{CameraFactory, CascadeProvider, PipelineContext};
use publisher::AnalysisPublisher;
use routes::AppState;
use session::SessionStore;
use store::Store;
use stream::StreamEncoder;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("glowscand starting");

    let config = config::Config::load().context("failed to load configuration")?;
    tracing::info!(
        device = %config.camera_device,
        cascade = %config.cascade_path.display(),
        db = %config.db_path.display(),
        "configuration loaded"
    );
    config
        .detector
        .validate()
        .context("invalid detector configuration")?;
    if !config.cascade_path.exists() {
        tracing::warn!(
            path = %config.cascade_path.display(),
            "cascade file not found; video streams will fail until it is installed"
        );
    }

    let store = Store::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    let accounts = Accounts::new(store.clone(), DEFAULT_HASH_ITERATIONS);
    match &config.admin_password {
        Some(password) => accounts
            .seed_admin(password)
            .await
            .context("failed to seed admin account")?,
        None => tracing::info!("GLOWSCAN_ADMIN_PASSWORD not set; no admin account seeded"),
    }

    let advisor: Option<Arc<dyn Advisor>> = match &config.gemini_api_key {
        Some(key) => {
            let client = GeminiClient::new(
                key.clone(),
                config.gemini_base_url.clone(),
                config.gemini_model.clone(),
                Duration::from_secs(config.advisor_timeout_secs),
            )
            .context("failed to build advisory client")?;
            tracing::info!(model = %client.model(), "advisory client ready");
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!("GEMINI_API_KEY not set; consultations will report an error");
            None
        }
    };

    let encoder = StreamEncoder::new(config.jpeg_quality);
    tracing::debug!(quality = encoder.quality(), "stream encoder ready");

    let publisher = Arc::new(AnalysisPublisher::new());
    let pipeline = Arc::new(PipelineContext::new(
        Arc::new(CameraFactory::new(&config.camera_device, config.warmup_frames)),
        Arc::new(CascadeProvider::new(
            CascadeCache::new(&config.cascade_path),
            config.detector,
        )),
        BrightnessClassifier::new(config.classifier),
        encoder,
        Arc::clone(&publisher),
        config.stream_buffer,
    ));

    let sessions = Arc::new(SessionStore::with_limits(
        Duration::from_secs(config.session_idle_secs),
        config.max_sessions,
    ));
    spawn_session_sweeper(Arc::clone(&sessions));

    let state = AppState {
        pipeline: Arc::clone(&pipeline),
        capture: Arc::new(SnapshotCapture::new(Arc::clone(&publisher), store)),
        publisher,
        accounts,
        sessions,
        advisor,
        camera_device: Arc::from(config.camera_device.as_str()),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %config.bind, "glowscand ready");

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("glowscand shutting down");
            // Ends open video streams so in-flight responses can complete.
            pipeline.shutdown();
        })
        .await
        .context("server error")?;

    Ok(())
}

/// Drop idle sessions on a fixed period.
fn spawn_session_sweeper(sessions: Arc<SessionStore>) {
    let period = (sessions.idle_timeout() / 4).max(Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let purged = sessions.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, remaining = sessions.len(), "expired sessions purged");
            }
        }
    });
}
