use std::path::PathBuf;
use std::sync::Arc;

use tally_storage::cache::ReadCache;
use tally_sync::{HttpFeed, SyncPolicy, SyncReconciler};

mod config;
mod error;
mod handlers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = config::load(config_path.as_deref())?;

    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = tally_storage::create_db(&config.database_path).await?;

    let cache = Arc::new(ReadCache::new(config.cache_page_size));
    let feed = HttpFeed::new(config.feed.base_url.clone());
    let reconciler = SyncReconciler::new(
        feed,
        db.clone(),
        cache.clone(),
        SyncPolicy {
            lock_lease_secs: config.sync.lock_lease_secs,
            max_pages: config.sync.max_pages,
            page_size: config.feed.page_size,
        },
    );

    let state = Arc::new(handlers::AppState {
        db,
        cache,
        reconciler,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, handlers::router(state)).await?;

    Ok(())
}
