//! In-memory backend. Development/fallback only: nothing here survives a restart.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::lookup::builtin_options;
use super::{list_items, BackendKind, DraftId, OptionKind, Repository, StoreError};
use crate::schema::AspectKey;

type AspectSlot = (DraftId, AspectKey);

#[derive(Default)]
struct MemoryState {
    drafts: HashSet<DraftId>,
    records: HashMap<AspectSlot, Value>,
    /// List aspects keep insertion order; each item is keyed by its item id.
    items: HashMap<AspectSlot, Vec<(String, Map<String, Value>)>>,
}

#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

static SHARED: OnceLock<Arc<MemoryRepository>> = OnceLock::new();

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance used when no table store is configured.
    pub fn shared() -> Arc<MemoryRepository> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(MemoryRepository::new())))
    }

    /// True when anything at all has been written for this draft.
    pub fn has_draft(&self, draft: &DraftId) -> bool {
        let state = self.lock();
        state.drafts.contains(draft)
            || state.records.keys().any(|(d, _)| d == draft)
            || state.items.keys().any(|(d, _)| d == draft)
    }

    // Each mutation completes under one short lock; no await happens while it is held.
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn item_value(id: &str, fields: &Map<String, Value>) -> Value {
    let mut item = fields.clone();
    item.insert("id".to_string(), Value::String(id.to_string()));
    Value::Object(item)
}

#[async_trait]
impl Repository for MemoryRepository {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn create_draft(&self) -> Result<DraftId, StoreError> {
        let id = DraftId::generate();
        self.lock().drafts.insert(id.clone());
        debug!(draft_id = %id, "created in-memory draft");
        Ok(id)
    }

    async fn load_aspect(&self, draft: &DraftId, key: AspectKey) -> Result<Value, StoreError> {
        let state = self.lock();
        let slot = (draft.clone(), key);
        let found = if key.is_list() {
            state.items.get(&slot).map(|items| {
                Value::Array(items.iter().map(|(id, f)| item_value(id, f)).collect())
            })
        } else {
            state.records.get(&slot).cloned()
        };
        found.ok_or_else(|| StoreError::NotFound(format!("{key} for draft {draft}")))
    }

    async fn save_aspect(
        &self,
        draft: &DraftId,
        key: AspectKey,
        value: &Value,
    ) -> Result<Value, StoreError> {
        let incoming = if key.is_list() {
            Some(list_items(key, value)?)
        } else {
            None
        };

        let mut state = self.lock();
        state.drafts.insert(draft.clone());
        let slot = (draft.clone(), key);

        let Some(incoming) = incoming else {
            state.records.insert(slot, value.clone());
            return Ok(value.clone());
        };

        let mut claimed = HashSet::new();
        let stored: Vec<(String, Map<String, Value>)> = incoming
            .into_iter()
            .map(|mut fields| {
                let id = match fields.remove("id") {
                    Some(Value::String(id)) if !id.is_empty() && claimed.insert(id.clone()) => id,
                    _ => format!("mem-{}", Uuid::new_v4().simple()),
                };
                (id, fields)
            })
            .collect();
        let saved = Value::Array(stored.iter().map(|(id, f)| item_value(id, f)).collect());
        state.items.insert(slot, stored);
        Ok(saved)
    }

    async fn delete_item(
        &self,
        draft: &DraftId,
        key: AspectKey,
        item_id: &str,
    ) -> Result<(), StoreError> {
        if !key.is_list() {
            return Err(StoreError::NotAList(key));
        }
        let mut state = self.lock();
        let items = state
            .items
            .get_mut(&(draft.clone(), key))
            .ok_or_else(|| StoreError::NotFound(format!("{key} for draft {draft}")))?;
        let before = items.len();
        items.retain(|(id, _)| id != item_id);
        if items.len() == before {
            return Err(StoreError::NotFound(format!("{key} item {item_id}")));
        }
        Ok(())
    }

    async fn lookup_options(&self, kind: OptionKind) -> Result<Vec<String>, StoreError> {
        Ok(builtin_options(kind))
    }
}
