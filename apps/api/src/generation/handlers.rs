//! Axum route handlers for AI drafting.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::drafts::handlers::parse_draft_id;
use crate::errors::AppError;
use crate::generation::{GenerationInput, GenerationTarget};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub target: GenerationTarget,
    pub text: String,
}

/// POST /api/v1/drafts/:draft_id/generate/:target
///
/// Drafts text from what is already saved for the draft. The result is not
/// stored; the form puts it in front of the user, who edits and saves it.
pub async fn handle_generate(
    State(state): State<AppState>,
    Path((draft_id, target)): Path<(String, String)>,
) -> Result<Json<GenerateResponse>, AppError> {
    let generator = state
        .generator
        .clone()
        .ok_or_else(|| AppError::Unavailable("AI drafting is not configured".to_string()))?;
    let draft = parse_draft_id(&draft_id)?;
    let target = GenerationTarget::parse(&target)
        .ok_or_else(|| AppError::NotFound(format!("Cannot generate '{target}'")))?;

    let input = GenerationInput::collect(state.repo.as_ref(), &draft).await?;
    let text = generator.generate(target, &input).await?;

    Ok(Json(GenerateResponse { target, text }))
}
