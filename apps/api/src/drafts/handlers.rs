//! Axum route handlers for the Drafts API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::errors::AppError;
use crate::schema::{AspectKey, AspectRecord, NormalizationSource};
use crate::state::AppState;
use crate::store::{DraftId, OptionKind};

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDraftResponse {
    pub draft_id: DraftId,
}

#[derive(Debug, Serialize)]
pub struct AspectResponse {
    pub aspect: AspectKey,
    pub record: AspectRecord,
    /// False for an aspect nothing has been saved to yet.
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<NormalizationSource>,
}

#[derive(Debug, Serialize)]
pub struct OptionsResponse {
    pub kind: OptionKind,
    pub options: Vec<String>,
}

pub(crate) fn parse_draft_id(raw: &str) -> Result<DraftId, AppError> {
    DraftId::new(raw).ok_or_else(|| AppError::BadRequest("draft id cannot be empty".to_string()))
}

fn parse_aspect(raw: &str) -> Result<AspectKey, AppError> {
    AspectKey::parse(raw).ok_or_else(|| AppError::NotFound(format!("Unknown aspect '{raw}'")))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/drafts
pub async fn handle_create_draft(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreateDraftResponse>), AppError> {
    let draft_id = state.repo.create_draft().await?;
    info!(draft_id = %draft_id, "Draft created via API");
    Ok((StatusCode::CREATED, Json(CreateDraftResponse { draft_id })))
}

/// GET /api/v1/drafts/:draft_id/:aspect
///
/// Returns the normalized record. A never-saved aspect is the default record
/// with `found: false`, not a 404.
pub async fn handle_get_aspect(
    State(state): State<AppState>,
    Path((draft_id, aspect)): Path<(String, String)>,
) -> Result<Json<AspectResponse>, AppError> {
    let draft = parse_draft_id(&draft_id)?;
    let key = parse_aspect(&aspect)?;

    let response = match state.repo.load_aspect(&draft, key).await {
        Ok(raw) => {
            let normalized = AspectRecord::normalize(key, &raw);
            let mut record = normalized.value;
            record.canonicalize();
            AspectResponse {
                aspect: key,
                record,
                found: true,
                source: Some(normalized.source),
            }
        }
        Err(e) if e.is_not_found() => AspectResponse {
            aspect: key,
            record: AspectRecord::default_for(key),
            found: false,
            source: None,
        },
        Err(e) => return Err(e.into()),
    };
    Ok(Json(response))
}

/// PUT /api/v1/drafts/:draft_id/:aspect
///
/// Accepts the canonical shape (legacy aliases are tolerated), validates,
/// and returns the record as stored. Invalid input is never written.
pub async fn handle_put_aspect(
    State(state): State<AppState>,
    Path((draft_id, aspect)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<AspectResponse>, AppError> {
    let draft = parse_draft_id(&draft_id)?;
    let key = parse_aspect(&aspect)?;

    let normalized = AspectRecord::normalize(key, &body);
    if normalized.is_default_fallback() && !is_blank(&body) {
        return Err(AppError::BadRequest(format!("Body is not a readable {key} record")));
    }
    let mut record = normalized.value;
    record.canonicalize();
    record.validate()?;

    let stored = state.repo.save_aspect(&draft, key, &record.to_value()).await?;
    let stored = AspectRecord::normalize(key, &stored);

    Ok(Json(AspectResponse {
        aspect: key,
        record: stored.value,
        found: true,
        source: Some(stored.source),
    }))
}

/// DELETE /api/v1/drafts/:draft_id/:aspect/items/:item_id
pub async fn handle_delete_item(
    State(state): State<AppState>,
    Path((draft_id, aspect, item_id)): Path<(String, String, String)>,
) -> Result<StatusCode, AppError> {
    let draft = parse_draft_id(&draft_id)?;
    let key = parse_aspect(&aspect)?;
    state.repo.delete_item(&draft, key, &item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/options/:kind
pub async fn handle_get_options(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<OptionsResponse>, AppError> {
    let kind = OptionKind::parse(&kind)
        .ok_or_else(|| AppError::NotFound(format!("Unknown option list '{kind}'")))?;
    let options = state.repo.lookup_options(kind).await?;
    Ok(Json(OptionsResponse { kind, options }))
}
