use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    /// Rows per cached page of the active-transaction list.
    pub cache_page_size: usize,
    pub feed: FeedConfig,
    pub sync: SyncConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            database_path: PathBuf::from("tally.db"),
            cache_page_size: 250,
            feed: FeedConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    pub base_url: String,
    pub page_size: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://feed.example.com".to_string(),
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub lock_lease_secs: i64,
    pub max_pages: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lock_lease_secs: 300,
            max_pages: 20,
        }
    }
}

/// TOML file (optional) with environment overrides for the deployment
/// knobs that differ per host.
pub fn load(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    let mut config = match path {
        Some(p) => toml::from_str(&fs::read_to_string(p)?)?,
        None => ServerConfig::default(),
    };
    if let Ok(addr) = env::var("TALLY_BIND_ADDR") {
        config.bind_addr = addr;
    }
    if let Ok(db_path) = env::var("TALLY_DATABASE_PATH") {
        config.database_path = PathBuf::from(db_path);
    }
    if let Ok(url) = env::var("TALLY_FEED_BASE_URL") {
        config.feed.base_url = url;
    }
    Ok(config)
}
