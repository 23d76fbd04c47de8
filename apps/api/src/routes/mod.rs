pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::drafts::handlers;
use crate::generation::handlers::handle_generate;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Drafts API
        .route("/api/v1/drafts", post(handlers::handle_create_draft))
        .route(
            "/api/v1/drafts/:draft_id/:aspect",
            get(handlers::handle_get_aspect).put(handlers::handle_put_aspect),
        )
        .route(
            "/api/v1/drafts/:draft_id/:aspect/items/:item_id",
            delete(handlers::handle_delete_item),
        )
        .route(
            "/api/v1/drafts/:draft_id/generate/:target",
            post(handle_generate),
        )
        // Lookup lists
        .route("/api/v1/options/:kind", get(handlers::handle_get_options))
        .with_state(state)
}
