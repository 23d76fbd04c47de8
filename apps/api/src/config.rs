use anyhow::{Context, Result};

use crate::store::table_store::DEFAULT_API_URL;
use crate::store::TableStoreConfig;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// Present only when both the API key and base id are set.
    pub table_store: Option<TableStoreConfig>,
    /// Enables the AI-draft endpoints.
    pub anthropic_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let table_store = match (non_empty("TABLE_STORE_API_KEY"), non_empty("TABLE_STORE_BASE_ID")) {
            (Some(api_key), Some(base_id)) => Some(TableStoreConfig::new(
                non_empty("TABLE_STORE_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
                base_id,
                api_key,
            )),
            _ => None,
        };

        Ok(Config {
            port: get("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            table_store,
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
        })
    }

    /// The one capability check that picks the persistence backend.
    pub fn has_table_store(&self) -> bool {
        self.table_store.is_some()
    }
}
