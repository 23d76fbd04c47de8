//! Draft identity: one id per draft, created lazily, at most one creation in flight.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{info, warn};

use super::id_storage::DraftIdStorage;
use crate::store::{DraftId, Repository};

/// `None` while creation runs; `Some(result)` once it has settled.
type Creation = watch::Receiver<Option<Option<DraftId>>>;

#[derive(Default)]
struct IdentityState {
    known: Option<DraftId>,
    in_flight: Option<Creation>,
}

pub struct IdentityResolver {
    repo: Arc<dyn Repository>,
    storage: Arc<dyn DraftIdStorage>,
    state: Arc<Mutex<IdentityState>>,
}

impl IdentityResolver {
    /// Rehydrates any previously stored id.
    pub fn new(repo: Arc<dyn Repository>, storage: Arc<dyn DraftIdStorage>) -> Self {
        let known = storage.read();
        if let Some(id) = &known {
            info!(draft_id = %id, "Rehydrated draft id from storage");
        }
        Self {
            repo,
            storage,
            state: Arc::new(Mutex::new(IdentityState {
                known,
                in_flight: None,
            })),
        }
    }

    /// The id if one is already known. Never creates.
    pub fn current(&self) -> Option<DraftId> {
        lock(&self.state).known.clone()
    }

    /// Returns the draft id, creating it on first use.
    ///
    /// Concurrent callers share a single creation request. `None` means the
    /// draft cannot be persisted right now; a later call tries again.
    pub async fn ensure_id(&self) -> Option<DraftId> {
        let mut rx = {
            let mut state = lock(&self.state);
            if let Some(id) = &state.known {
                return Some(id.clone());
            }
            match &state.in_flight {
                Some(rx) => rx.clone(),
                None => {
                    let rx = self.start_creation();
                    state.in_flight = Some(rx.clone());
                    rx
                }
            }
        };

        let settled = match rx.wait_for(Option::is_some).await {
            Ok(settled) => settled.as_ref().cloned().flatten(),
            // Sender dropped without settling: the creation task panicked.
            Err(_) => {
                lock(&self.state).in_flight = None;
                None
            }
        };
        settled
    }

    // Runs detached so dropping the first caller cannot strand the others.
    fn start_creation(&self) -> Creation {
        let (tx, rx) = watch::channel(None);
        let repo = Arc::clone(&self.repo);
        let storage = Arc::clone(&self.storage);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let created = match repo.create_draft().await {
                Ok(id) => {
                    if let Err(e) = storage.write(&id) {
                        warn!(draft_id = %id, error = %e, "Draft created but id could not be stored");
                    }
                    info!(draft_id = %id, "Created draft");
                    Some(id)
                }
                Err(e) => {
                    warn!(error = %e, "Draft creation failed; identity unavailable");
                    None
                }
            };

            {
                let mut state = lock(&state);
                state.in_flight = None;
                if created.is_some() {
                    state.known = created.clone();
                }
            }
            tx.send_replace(Some(created));
        });

        rx
    }
}

fn lock(state: &Mutex<IdentityState>) -> MutexGuard<'_, IdentityState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::id_storage::{FileIdStorage, MemoryIdStorage};
    use crate::session::testing::FlakyRepository;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_creation() {
        let repo = Arc::new(FlakyRepository::slow(Duration::from_millis(50)));
        let resolver = Arc::new(IdentityResolver::new(repo.clone(), Arc::new(MemoryIdStorage::new())));

        let calls: Vec<_> = (0..8)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move { resolver.ensure_id().await })
            })
            .collect();

        let mut ids = Vec::new();
        for call in calls {
            ids.push(call.await.unwrap().unwrap());
        }
        assert_eq!(repo.create_calls(), 1);
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(resolver.current(), Some(ids[0].clone()));
    }

    #[tokio::test]
    async fn test_failure_yields_none_and_later_call_retries() {
        let repo = Arc::new(FlakyRepository::failing_creates(1));
        let storage = Arc::new(MemoryIdStorage::new());
        let resolver = IdentityResolver::new(repo.clone(), storage.clone());

        assert_eq!(resolver.ensure_id().await, None);
        assert!(resolver.current().is_none());

        let id = resolver.ensure_id().await.unwrap();
        assert_eq!(repo.create_calls(), 2);
        assert_eq!(storage.read(), Some(id));
    }

    #[tokio::test]
    async fn test_known_id_skips_creation() {
        let repo = Arc::new(FlakyRepository::default());
        let id = DraftId::new("existing").unwrap();
        let resolver = IdentityResolver::new(repo.clone(), Arc::new(MemoryIdStorage::with_id(id.clone())));

        assert_eq!(resolver.ensure_id().await, Some(id));
        assert_eq!(repo.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_restart_rehydrates_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("draft-id");
        let repo = Arc::new(FlakyRepository::default());

        let first = IdentityResolver::new(repo.clone(), Arc::new(FileIdStorage::new(&path)));
        let id = first.ensure_id().await.unwrap();
        drop(first);

        let second = IdentityResolver::new(repo.clone(), Arc::new(FileIdStorage::new(&path)));
        assert_eq!(second.current(), Some(id.clone()));
        assert_eq!(second.ensure_id().await, Some(id));
        assert_eq!(repo.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_first_caller_does_not_strand_others() {
        let repo = Arc::new(FlakyRepository::slow(Duration::from_millis(50)));
        let resolver = Arc::new(IdentityResolver::new(repo.clone(), Arc::new(MemoryIdStorage::new())));

        let first = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.ensure_id().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        first.abort();

        assert!(resolver.ensure_id().await.is_some());
        assert_eq!(repo.create_calls(), 1);
    }
}
