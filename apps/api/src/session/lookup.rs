use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::store::{OptionKind, Repository, StoreError};

/// Reference lists fetched at most once per cache lifetime.
///
/// A failed fetch is not cached; the next caller tries again.
pub struct LookupCache {
    repo: Arc<dyn Repository>,
    prefectures: OnceCell<Arc<Vec<String>>>,
    certifications: OnceCell<Arc<Vec<String>>>,
}

impl LookupCache {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            prefectures: OnceCell::new(),
            certifications: OnceCell::new(),
        }
    }

    pub async fn get(&self, kind: OptionKind) -> Result<Arc<Vec<String>>, StoreError> {
        let cell = match kind {
            OptionKind::Prefectures => &self.prefectures,
            OptionKind::Certifications => &self.certifications,
        };
        cell.get_or_try_init(|| async { self.repo.lookup_options(kind).await.map(Arc::new) })
            .await
            .map(Arc::clone)
    }
}
