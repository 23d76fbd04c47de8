//! Persistence facade.
//!
//! One `Repository` capability, two implementations: the remote table store
//! (`TableStoreRepository`) and the process-wide in-memory fallback
//! (`MemoryRepository`). Which one is live is decided once, at startup, by
//! `build_repository`; nothing downstream branches on the backend again.

pub mod formula;
pub mod lookup;
pub mod memory;
pub mod remote;
pub mod table_store;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::schema::AspectKey;

pub use lookup::OptionKind;
pub use memory::MemoryRepository;
pub use remote::TableStoreRepository;
pub use table_store::{TableStoreClient, TableStoreConfig};

/// Opaque, immutable identifier of one draft. Shared by all of its aspects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DraftId(String);

impl DraftId {
    /// Wraps an existing token; blank input is not an id.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        (!trimmed.is_empty()).then(|| DraftId(trimmed.to_string()))
    }

    pub fn generate() -> Self {
        DraftId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DraftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request to table store timed out")]
    Timeout,

    #[error("table store rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("aspect {0} has no items")]
    NotAList(AspectKey),
}

impl StoreError {
    /// "Not found" is the normal state of a brand-new draft, not a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Timeout
        } else if e.is_decode() {
            StoreError::Serialization(e.to_string())
        } else {
            StoreError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    TableStore,
    Memory,
}

/// The persistence capability both backends provide.
///
/// Values cross this boundary as raw JSON: writes carry the canonical shape,
/// reads return whatever the backend has stored and are normalized by the
/// caller. List aspects are JSON arrays whose items may carry an `id`.
#[async_trait]
pub trait Repository: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Registers a new draft and returns its id.
    async fn create_draft(&self) -> Result<DraftId, StoreError>;

    /// Returns `StoreError::NotFound` when nothing is stored for this aspect yet.
    async fn load_aspect(&self, draft: &DraftId, key: AspectKey) -> Result<Value, StoreError>;

    /// Stores the canonical value and returns it as stored. For list aspects,
    /// items without an id are created (and come back with one), items with an
    /// id are updated, and stored items missing from the list are removed.
    async fn save_aspect(
        &self,
        draft: &DraftId,
        key: AspectKey,
        value: &Value,
    ) -> Result<Value, StoreError>;

    /// Removes one item of a list aspect.
    async fn delete_item(
        &self,
        draft: &DraftId,
        key: AspectKey,
        item_id: &str,
    ) -> Result<(), StoreError>;

    /// Read-only reference lists (prefectures, certifications).
    async fn lookup_options(&self, kind: OptionKind) -> Result<Vec<String>, StoreError>;
}

/// Picks the backend for the lifetime of the process.
pub fn build_repository(config: &Config) -> Result<Arc<dyn Repository>, StoreError> {
    match &config.table_store {
        Some(table_store) => {
            info!(base = %table_store.base_id, "Using remote table store backend");
            let client = TableStoreClient::new(table_store.clone())?;
            let repo: Arc<dyn Repository> = Arc::new(TableStoreRepository::new(client));
            Ok(repo)
        }
        None => {
            info!("Table store not configured; using in-memory backend");
            let repo: Arc<dyn Repository> = MemoryRepository::shared();
            Ok(repo)
        }
    }
}

/// Splits an incoming list value into its items, rejecting anything else.
pub(crate) fn list_items(key: AspectKey, value: &Value) -> Result<Vec<serde_json::Map<String, Value>>, StoreError> {
    let items = value.as_array().ok_or_else(|| {
        StoreError::Serialization(format!("{key} must be saved as a JSON array"))
    })?;
    items
        .iter()
        .map(|item| {
            item.as_object().cloned().ok_or_else(|| {
                StoreError::Serialization(format!("{key} items must be JSON objects"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(table_store: Option<TableStoreConfig>) -> Config {
        Config {
            port: 0,
            rust_log: "warn".to_string(),
            table_store,
            anthropic_api_key: None,
        }
    }

    #[test]
    fn test_draft_id_rejects_blank() {
        assert!(DraftId::new("   ").is_none());
        assert_eq!(DraftId::new(" abc ").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(DraftId::generate(), DraftId::generate());
    }

    #[test]
    fn test_not_found_is_distinguished() {
        assert!(StoreError::NotFound("x".into()).is_not_found());
        assert!(!StoreError::Timeout.is_not_found());
    }

    #[test]
    fn test_backend_is_memory_without_table_store() {
        let repo = build_repository(&config(None)).unwrap();
        assert_eq!(repo.kind(), BackendKind::Memory);
    }

    #[test]
    fn test_backend_is_table_store_when_configured() {
        let repo = build_repository(&config(Some(TableStoreConfig::new(
            "http://127.0.0.1:9",
            "appTest",
            "key",
        ))))
        .unwrap();
        assert_eq!(repo.kind(), BackendKind::TableStore);
    }

    #[tokio::test]
    async fn test_memory_backend_reads_back_in_process() {
        let repo = build_repository(&config(None)).unwrap();
        let draft = repo.create_draft().await.unwrap();
        let value = json!({ "text": "hello" });
        repo.save_aspect(&draft, AspectKey::Summary, &value).await.unwrap();

        assert!(MemoryRepository::shared().has_draft(&draft));
        assert_eq!(repo.load_aspect(&draft, AspectKey::Summary).await.unwrap(), value);
    }

    #[tokio::test]
    async fn test_table_store_backend_never_touches_memory() {
        let (table_store, shared) = table_store::mock::spawn().await;
        let repo = build_repository(&config(Some(table_store))).unwrap();
        let draft = repo.create_draft().await.unwrap();
        repo.save_aspect(&draft, AspectKey::Summary, &json!({ "text": "hello" }))
            .await
            .unwrap();

        assert!(!MemoryRepository::shared().has_draft(&draft));
        assert_eq!(shared.lock().unwrap().tables["Summary"].len(), 1);
    }
}
