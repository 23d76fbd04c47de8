//! Table store client: the only code that talks to the remote table store.
//!
//! Speaks an Airtable-style REST dialect: records are `{id, fields}`, lists are
//! filtered with a formula string, and every write endpoint accepts at most
//! `MAX_BATCH` records per request, so writes are chunked here.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::StoreError;

pub const DEFAULT_API_URL: &str = "https://api.airtable.com/v0";
/// Per-request record limit for create/update/delete.
pub const MAX_BATCH: usize = 10;
const PAGE_SIZE: usize = 100;
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct TableStoreConfig {
    pub api_url: String,
    pub base_id: String,
    pub api_key: String,
    pub timeout: Duration,
    /// First retry delay; doubles on each further attempt.
    pub retry_backoff: Duration,
}

impl TableStoreConfig {
    pub fn new(api_url: impl Into<String>, base_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            base_id: base_id.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(15),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RecordPage {
    #[serde(default)]
    records: Vec<TableRecord>,
    offset: Option<String>,
}

#[derive(Serialize)]
struct NewRecord<'a> {
    fields: &'a Map<String, Value>,
}

#[derive(Serialize)]
struct WriteBody<T: Serialize> {
    records: Vec<T>,
    typecast: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Detailed { message: String },
    Code(String),
}

#[derive(Clone)]
pub struct TableStoreClient {
    client: Client,
    config: Arc<TableStoreConfig>,
}

impl TableStoreClient {
    pub fn new(config: TableStoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.base_id,
            table
        )
    }

    /// Sends a request with exponential backoff. 429 is always retried. 5xx and
    /// transport failures are retried only for `idempotent` requests: a create
    /// whose response was lost may already be committed.
    async fn send(
        &self,
        idempotent: bool,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<reqwest::Response, StoreError> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = self.config.retry_backoff * (1 << (attempt - 1));
                warn!(
                    "Table store request attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match build().bearer_auth(&self.config.api_key).send().await {
                Ok(r) => r,
                Err(e) if idempotent => {
                    last_error = Some(StoreError::from(e));
                    continue;
                }
                Err(e) => return Err(StoreError::from(e)),
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| match e.error {
                    ErrorBody::Detailed { message } => message,
                    ErrorBody::Code(code) => code,
                })
                .unwrap_or(body);

            if status == StatusCode::TOO_MANY_REQUESTS || (idempotent && status.is_server_error()) {
                last_error = Some(StoreError::Rejected {
                    status: status.as_u16(),
                    message,
                });
                continue;
            }
            if status == StatusCode::NOT_FOUND {
                return Err(StoreError::NotFound(message));
            }
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Err(last_error.unwrap_or(StoreError::Timeout))
    }

    /// Lists records matching `formula`, following pagination up to `max_records`.
    pub async fn list_records(
        &self,
        table: &str,
        formula: Option<&str>,
        max_records: usize,
    ) -> Result<Vec<TableRecord>, StoreError> {
        let url = self.table_url(table);
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("maxRecords", max_records.to_string()),
                ("pageSize", PAGE_SIZE.min(max_records).to_string()),
            ];
            if let Some(formula) = formula {
                query.push(("filterByFormula", formula.to_string()));
            }
            if let Some(offset) = &offset {
                query.push(("offset", offset.clone()));
            }

            let page: RecordPage = self
                .send(true, || self.client.get(&url).query(&query))
                .await?
                .json()
                .await?;
            records.extend(page.records);

            match page.offset {
                Some(next) if records.len() < max_records => offset = Some(next),
                _ => break,
            }
        }

        records.truncate(max_records);
        debug!(table, count = records.len(), "listed table store records");
        Ok(records)
    }

    /// Creates records in batches of `MAX_BATCH`; returned records keep input order.
    pub async fn create_records(
        &self,
        table: &str,
        rows: &[Map<String, Value>],
    ) -> Result<Vec<TableRecord>, StoreError> {
        let url = self.table_url(table);
        let mut created = Vec::with_capacity(rows.len());
        for chunk in rows.chunks(MAX_BATCH) {
            let body = WriteBody {
                records: chunk.iter().map(|fields| NewRecord { fields }).collect(),
                typecast: true,
            };
            let page: RecordPage = self
                .send(false, || self.client.post(&url).json(&body))
                .await?
                .json()
                .await?;
            created.extend(page.records);
        }
        debug!(table, count = created.len(), "created table store records");
        Ok(created)
    }

    /// Patches records in batches of `MAX_BATCH`. Only the given fields change.
    pub async fn update_records(
        &self,
        table: &str,
        records: &[TableRecord],
    ) -> Result<Vec<TableRecord>, StoreError> {
        let url = self.table_url(table);
        let mut updated = Vec::with_capacity(records.len());
        for chunk in records.chunks(MAX_BATCH) {
            let body = WriteBody {
                records: chunk.to_vec(),
                typecast: true,
            };
            let page: RecordPage = self
                .send(true, || self.client.patch(&url).json(&body))
                .await?
                .json()
                .await?;
            updated.extend(page.records);
        }
        debug!(table, count = updated.len(), "updated table store records");
        Ok(updated)
    }

    /// Deletes records by id in batches of `MAX_BATCH`.
    pub async fn delete_records(&self, table: &str, ids: &[String]) -> Result<(), StoreError> {
        let url = self.table_url(table);
        for chunk in ids.chunks(MAX_BATCH) {
            let query: Vec<(&str, &str)> = chunk.iter().map(|id| ("records[]", id.as_str())).collect();
            self.send(true, || self.client.delete(&url).query(&query)).await?;
        }
        debug!(table, count = ids.len(), "deleted table store records");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-process stand-in for the table store, served by axum on an ephemeral port.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Map, Value};

    use super::{TableRecord, TableStoreConfig};

    #[derive(Debug, Clone)]
    pub struct Request {
        pub method: &'static str,
        pub table: String,
        pub formula: Option<String>,
        pub batch: usize,
    }

    #[derive(Default)]
    pub struct MockState {
        pub tables: HashMap<String, Vec<TableRecord>>,
        pub requests: Vec<Request>,
        pub next_id: u64,
        /// Number of upcoming requests that fail with 503.
        pub fail_next: u32,
        /// Number of upcoming requests that fail with 429.
        pub throttle_next: u32,
        /// Applied to every create after it is committed, before responding.
        pub create_delay: std::time::Duration,
    }

    pub type Shared = Arc<Mutex<MockState>>;

    /// Evaluates the handful of formula shapes the repository emits.
    fn matches(formula: &str, record: &TableRecord) -> bool {
        formula
            .trim_start_matches("AND(")
            .trim_end_matches(')')
            .split(", ")
            .all(|clause| {
                let clause = clause.trim();
                if let Some(rest) = clause.strip_prefix("RECORD_ID() = '") {
                    return rest.trim_end_matches('\'') == record.id;
                }
                let Some((field, value)) = clause.split_once("} = '") else {
                    return true;
                };
                let field = field.trim_start_matches('{');
                let value = value.trim_end_matches('\'').replace("\\'", "'");
                record.fields.get(field).and_then(Value::as_str) == Some(value.as_str())
            })
    }

    fn check_failure(state: &mut MockState) -> Option<(StatusCode, Json<Value>)> {
        if state.throttle_next > 0 {
            state.throttle_next -= 1;
            return Some((
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "RATE_LIMITED" })),
            ));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Some((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": { "message": "try later" } })),
            ));
        }
        None
    }

    async fn list(
        State(shared): State<Shared>,
        Path((_base, table)): Path<(String, String)>,
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        let mut state = shared.lock().unwrap();
        let formula = params.get("filterByFormula").cloned();
        state.requests.push(Request {
            method: "GET",
            table: table.clone(),
            formula: formula.clone(),
            batch: 0,
        });
        if let Some(failure) = check_failure(&mut state) {
            return failure;
        }
        let max: usize = params
            .get("maxRecords")
            .and_then(|m| m.parse().ok())
            .unwrap_or(100);
        let records: Vec<TableRecord> = state
            .tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| formula.as_deref().map_or(true, |f| matches(f, r)))
                    .take(max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        (StatusCode::OK, Json(json!({ "records": records })))
    }

    async fn create(
        State(shared): State<Shared>,
        Path((_base, table)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let created = commit_create(&shared, &table, &body);
        let delay = shared.lock().unwrap().create_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        created
    }

    fn commit_create(shared: &Shared, table: &str, body: &Value) -> (StatusCode, Json<Value>) {
        let table = table.to_string();
        let mut state = shared.lock().unwrap();
        let rows = body["records"].as_array().cloned().unwrap_or_default();
        state.requests.push(Request {
            method: "POST",
            table: table.clone(),
            formula: None,
            batch: rows.len(),
        });
        if let Some(failure) = check_failure(&mut state) {
            return failure;
        }
        if rows.len() > super::MAX_BATCH {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": { "message": "too many records" } })),
            );
        }
        let mut created = Vec::new();
        for row in rows {
            state.next_id += 1;
            let record = TableRecord {
                id: format!("rec{:04}", state.next_id),
                fields: row["fields"].as_object().cloned().unwrap_or_default(),
            };
            state.tables.entry(table.clone()).or_default().push(record.clone());
            created.push(record);
        }
        (StatusCode::OK, Json(json!({ "records": created })))
    }

    async fn update(
        State(shared): State<Shared>,
        Path((_base, table)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let mut state = shared.lock().unwrap();
        let rows: Vec<TableRecord> =
            serde_json::from_value(body["records"].clone()).unwrap_or_default();
        state.requests.push(Request {
            method: "PATCH",
            table: table.clone(),
            formula: None,
            batch: rows.len(),
        });
        if let Some(failure) = check_failure(&mut state) {
            return failure;
        }
        let stored = state.tables.entry(table).or_default();
        let mut updated = Vec::new();
        for row in rows {
            if let Some(existing) = stored.iter_mut().find(|r| r.id == row.id) {
                existing.fields.extend(row.fields);
                updated.push(existing.clone());
            }
        }
        (StatusCode::OK, Json(json!({ "records": updated })))
    }

    async fn remove(
        State(shared): State<Shared>,
        Path((_base, table)): Path<(String, String)>,
        Query(params): Query<Vec<(String, String)>>,
    ) -> (StatusCode, Json<Value>) {
        let mut state = shared.lock().unwrap();
        let ids: Vec<String> = params
            .into_iter()
            .filter(|(k, _)| k == "records[]")
            .map(|(_, v)| v)
            .collect();
        state.requests.push(Request {
            method: "DELETE",
            table: table.clone(),
            formula: None,
            batch: ids.len(),
        });
        if let Some(failure) = check_failure(&mut state) {
            return failure;
        }
        if let Some(rows) = state.tables.get_mut(&table) {
            rows.retain(|r| !ids.contains(&r.id));
        }
        let deleted: Vec<Value> = ids.iter().map(|id| json!({ "id": id, "deleted": true })).collect();
        (StatusCode::OK, Json(json!({ "records": deleted })))
    }

    /// Starts the mock and returns a config pointing at it plus its shared state.
    pub async fn spawn() -> (TableStoreConfig, Shared) {
        let shared: Shared = Arc::new(Mutex::new(MockState::default()));
        let app = Router::new()
            .route(
                "/:base/:table",
                get(list).post(create).patch(update).delete(remove),
            )
            .with_state(Arc::clone(&shared));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let mut config = TableStoreConfig::new(format!("http://{addr}"), "appTest", "test-key");
        config.retry_backoff = std::time::Duration::from_millis(5);
        (config, shared)
    }

    pub fn insert(shared: &Shared, table: &str, fields: Value) -> String {
        let mut state = shared.lock().unwrap();
        state.next_id += 1;
        let id = format!("rec{:04}", state.next_id);
        state.tables.entry(table.to_string()).or_default().push(TableRecord {
            id: id.clone(),
            fields: fields.as_object().cloned().unwrap_or_else(Map::new),
        });
        id
    }
}
