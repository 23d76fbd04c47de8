//! Remote backend: maps aspects onto table store tables.
//!
//! Every aspect table carries a `resumeId` column holding the draft id. Single
//! aspects are one record per draft; list aspects are one record per item,
//! ordered by a `position` column.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::formula::{all_of, field_equals, record_id_equals};
use super::lookup::builtin_options;
use super::table_store::{TableRecord, TableStoreClient};
use super::{list_items, BackendKind, DraftId, OptionKind, Repository, StoreError};
use crate::schema::AspectKey;

pub const DRAFTS_TABLE: &str = "Drafts";
pub const CERTIFICATIONS_TABLE: &str = "Certifications";
pub const DRAFT_FIELD: &str = "resumeId";
const POSITION_FIELD: &str = "position";
const NOTE_FIELD: &str = "note";
const MAX_LIST_RECORDS: usize = 100;
const MAX_OPTION_RECORDS: usize = 500;

pub fn table_for(key: AspectKey) -> &'static str {
    match key {
        AspectKey::BasicInfo => "BasicInfo",
        AspectKey::Status => "Status",
        AspectKey::Education => "Education",
        AspectKey::Experience => "Experience",
        AspectKey::Location => "Location",
        AspectKey::SelfPr => "SelfPR",
        AspectKey::Summary => "Summary",
    }
}

pub struct TableStoreRepository {
    client: TableStoreClient,
}

impl TableStoreRepository {
    pub fn new(client: TableStoreClient) -> Self {
        Self { client }
    }

    async fn records_for(
        &self,
        draft: &DraftId,
        key: AspectKey,
        max: usize,
    ) -> Result<Vec<TableRecord>, StoreError> {
        let formula = field_equals(DRAFT_FIELD, draft.as_str());
        self.client
            .list_records(table_for(key), Some(&formula), max)
            .await
    }

    async fn save_single(&self, draft: &DraftId, key: AspectKey, value: &Value) -> Result<Value, StoreError> {
        let mut fields = to_fields(key, value)?;
        fields.insert(DRAFT_FIELD.to_string(), Value::String(draft.to_string()));

        let existing = self.records_for(draft, key, 1).await?;
        match existing.into_iter().next() {
            Some(record) => {
                self.client
                    .update_records(table_for(key), &[TableRecord { id: record.id, fields }])
                    .await?;
            }
            None => {
                self.client.create_records(table_for(key), &[fields]).await?;
            }
        }
        Ok(value.clone())
    }

    async fn save_list(&self, draft: &DraftId, key: AspectKey, value: &Value) -> Result<Value, StoreError> {
        let table = table_for(key);
        let incoming = list_items(key, value)?;
        let existing: HashSet<String> = self
            .records_for(draft, key, MAX_LIST_RECORDS)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();

        let mut updates = Vec::new();
        let mut creates = Vec::new();
        // (index in the list, Some(id) when already stored)
        let mut order: Vec<Option<String>> = Vec::with_capacity(incoming.len());

        // A repeated id only updates once; later copies are stored as new items.
        let mut claimed: HashSet<String> = HashSet::new();
        for (position, mut fields) in incoming.into_iter().enumerate() {
            let id = match fields.remove("id") {
                Some(Value::String(id)) if existing.contains(&id) && claimed.insert(id.clone()) => Some(id),
                _ => None,
            };
            fields.insert(DRAFT_FIELD.to_string(), Value::String(draft.to_string()));
            fields.insert(POSITION_FIELD.to_string(), Value::from(position));
            match id {
                Some(id) => {
                    order.push(Some(id.clone()));
                    updates.push(TableRecord { id, fields });
                }
                None => {
                    order.push(None);
                    creates.push(fields);
                }
            }
        }

        let kept: HashSet<&str> = updates.iter().map(|r| r.id.as_str()).collect();
        let stale: Vec<String> = existing
            .iter()
            .filter(|id| !kept.contains(id.as_str()))
            .cloned()
            .collect();

        let mut saved_items: Vec<Option<Value>> = vec![None; order.len()];
        let update_slots = order.iter().enumerate().filter(|(_, o)| o.is_some()).map(|(i, _)| i);
        for (slot, record) in update_slots.zip(updates.iter()) {
            saved_items[slot] = Some(record_value(record));
        }

        if !updates.is_empty() {
            self.client.update_records(table, &updates).await?;
        }
        if !creates.is_empty() {
            let created = self.client.create_records(table, &creates).await?;
            let slots = order.iter().enumerate().filter(|(_, o)| o.is_none()).map(|(i, _)| i);
            for (slot, record) in slots.zip(created.iter()) {
                saved_items[slot] = Some(record_value(record));
            }
        }
        if !stale.is_empty() {
            self.client.delete_records(table, &stale).await?;
        }

        debug!(
            draft_id = %draft,
            aspect = %key,
            updated = updates.len(),
            created = creates.len(),
            deleted = stale.len(),
            "synced list aspect"
        );
        Ok(Value::Array(saved_items.into_iter().flatten().collect()))
    }
}

/// Canonical value → table columns. Self-PR answers live in the `note`
/// column as a JSON string.
fn to_fields(key: AspectKey, value: &Value) -> Result<Map<String, Value>, StoreError> {
    let mut fields = value
        .as_object()
        .cloned()
        .ok_or_else(|| StoreError::Serialization(format!("{key} must be saved as a JSON object")))?;
    if key == AspectKey::SelfPr {
        if let Some(answers) = fields.remove("answers") {
            fields.insert(NOTE_FIELD.to_string(), Value::String(answers.to_string()));
        }
    }
    Ok(fields)
}

fn strip_bookkeeping(mut fields: Map<String, Value>) -> Map<String, Value> {
    fields.remove(DRAFT_FIELD);
    fields.remove(POSITION_FIELD);
    fields
}

/// Stored list item as the canonical layer expects it: columns plus `id`.
fn record_value(record: &TableRecord) -> Value {
    let mut fields = strip_bookkeeping(record.fields.clone());
    fields.insert("id".to_string(), Value::String(record.id.clone()));
    Value::Object(fields)
}

#[async_trait]
impl Repository for TableStoreRepository {
    fn kind(&self) -> BackendKind {
        BackendKind::TableStore
    }

    async fn create_draft(&self) -> Result<DraftId, StoreError> {
        let id = DraftId::generate();
        let mut fields = Map::new();
        fields.insert(DRAFT_FIELD.to_string(), Value::String(id.to_string()));
        fields.insert("createdAt".to_string(), Value::String(Utc::now().to_rfc3339()));
        self.client.create_records(DRAFTS_TABLE, &[fields]).await?;
        info!(draft_id = %id, "Created draft in table store");
        Ok(id)
    }

    async fn load_aspect(&self, draft: &DraftId, key: AspectKey) -> Result<Value, StoreError> {
        if key.is_list() {
            let mut records = self.records_for(draft, key, MAX_LIST_RECORDS).await?;
            if records.is_empty() {
                return Err(StoreError::NotFound(format!("{key} for draft {draft}")));
            }
            records.sort_by_key(|r| r.fields.get(POSITION_FIELD).and_then(Value::as_u64).unwrap_or(u64::MAX));
            return Ok(Value::Array(records.iter().map(record_value).collect()));
        }

        let record = self
            .records_for(draft, key, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("{key} for draft {draft}")))?;
        Ok(Value::Object(strip_bookkeeping(record.fields)))
    }

    async fn save_aspect(
        &self,
        draft: &DraftId,
        key: AspectKey,
        value: &Value,
    ) -> Result<Value, StoreError> {
        if key.is_list() {
            self.save_list(draft, key, value).await
        } else {
            self.save_single(draft, key, value).await
        }
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
        let formula = all_of(&[
            field_equals(DRAFT_FIELD, draft.as_str()),
            record_id_equals(item_id),
        ]);
        let found = self
            .client
            .list_records(table_for(key), Some(&formula), 1)
            .await?;
        if found.is_empty() {
            return Err(StoreError::NotFound(format!("{key} item {item_id}")));
        }
        self.client
            .delete_records(table_for(key), &[item_id.to_string()])
            .await
    }

    async fn lookup_options(&self, kind: OptionKind) -> Result<Vec<String>, StoreError> {
        if kind == OptionKind::Prefectures {
            return Ok(builtin_options(kind));
        }
        let names: Vec<String> = self
            .client
            .list_records(CERTIFICATIONS_TABLE, None, MAX_OPTION_RECORDS)
            .await?
            .into_iter()
            .filter_map(|r| r.fields.get("name").and_then(Value::as_str).map(str::to_string))
            .collect();
        if names.is_empty() {
            Ok(builtin_options(kind))
        } else {
            Ok(names)
        }
    }
}
