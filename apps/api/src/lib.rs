//! Résumé draft synchronization: draft identity, per-aspect autosave, and a
//! dual-backend persistence facade, plus the HTTP service that exposes them.

pub mod config;
pub mod drafts;
pub mod errors;
pub mod generation;
pub mod llm_client;
pub mod routes;
pub mod schema;
pub mod session;
pub mod state;
pub mod store;
