use std::sync::Arc;

use crate::config::Config;
use crate::generation::TextGenerator;
use crate::store::Repository;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Chosen once at startup by `build_repository`.
    pub repo: Arc<dyn Repository>,
    /// `None` when no API key is configured; the AI-draft endpoints answer 503.
    pub generator: Option<Arc<dyn TextGenerator>>,
    pub config: Config,
}
