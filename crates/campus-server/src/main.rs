mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use campus_api::auth::{AppState, AppStateInner};
use campus_chat::Backend;
use campus_db::Database;
use campus_realtime::ChangeFeed;
use campus_storage::ObjectStore;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campus=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Collaborators
    let db = Database::open(&config.db_path)?;
    let storage = ObjectStore::new(config.storage_dir.clone(), &config.public_url).await?;
    let storage_root = storage.root().to_path_buf();
    let backend = Arc::new(Backend::new(db, storage, ChangeFeed::new()));

    let state: AppState = Arc::new(AppStateInner {
        backend,
        jwt_secret: config.jwt_secret.clone(),
    });

    let app = campus_api::router(state, &storage_root)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Campus server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
