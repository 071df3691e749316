use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use b_random::config::Config;
use b_random::db::Database;
use b_random::feed::HttpFeedClient;
use b_random::fetcher::{start_background_refresh, Fetcher};
use b_random::routes::{self, AppState};
use b_random::scoring::RecencyScorer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "b_random=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("B_RANDOM_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)?;
    info!(
        "Loaded {} seed sources from {}",
        config.sources.len(),
        config_path
    );

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:b_random.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    let added = db.sync_sources(&config.sources).await?;
    info!("Database initialized ({} new sources registered)", added);

    let db = Arc::new(db);

    let client = HttpFeedClient::new(config.request_timeout(), &config.user_agent)?;
    let fetcher = Arc::new(Fetcher::new(
        db.clone(),
        Arc::new(client),
        Arc::new(RecencyScorer),
        config.youtube_feed_url.clone(),
    ));

    // Start background refresh task
    let bg_fetcher = fetcher.clone();
    let refresh_interval = config.refresh_interval;
    tokio::spawn(async move {
        start_background_refresh(bg_fetcher, refresh_interval).await;
    });

    let state = Arc::new(AppState {
        db: db.clone(),
        fetcher: fetcher.clone(),
    });
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Server starting on http://{}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
