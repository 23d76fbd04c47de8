// Drafts API: stateless create/read/write of draft aspects over the configured
// repository. Autosave scheduling happens client-side in `session`.

pub mod handlers;
