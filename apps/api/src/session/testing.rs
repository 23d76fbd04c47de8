//! Test double: the in-memory backend with call counters, latency, and
//! scripted failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::schema::AspectKey;
use crate::store::{BackendKind, DraftId, MemoryRepository, OptionKind, Repository, StoreError};

#[derive(Default)]
pub struct FlakyRepository {
    inner: MemoryRepository,
    delay: Duration,
    create_failures: AtomicUsize,
    save_failures: AtomicUsize,
    load_failures: AtomicUsize,
    lookup_failures: AtomicUsize,
    creates: AtomicUsize,
    lookups: AtomicUsize,
    saves: Mutex<Vec<(AspectKey, Value)>>,
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn outage() -> StoreError {
    StoreError::Network("connection refused".to_string())
}

impl FlakyRepository {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing_creates(n: usize) -> Self {
        Self {
            create_failures: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    pub fn failing_saves(n: usize) -> Self {
        Self {
            save_failures: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    pub fn failing_loads(n: usize) -> Self {
        Self {
            load_failures: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    pub fn failing_lookups(n: usize) -> Self {
        Self {
            lookup_failures: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Every `save_aspect` payload for one aspect, failed ones included.
    pub fn saves_for(&self, key: AspectKey) -> Vec<Value> {
        self.saves
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn inner(&self) -> &MemoryRepository {
        &self.inner
    }

    async fn latency(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl Repository for FlakyRepository {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn create_draft(&self) -> Result<DraftId, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.latency().await;
        if take_failure(&self.create_failures) {
            return Err(outage());
        }
        self.inner.create_draft().await
    }

    async fn load_aspect(&self, draft: &DraftId, key: AspectKey) -> Result<Value, StoreError> {
        self.latency().await;
        if take_failure(&self.load_failures) {
            return Err(StoreError::Timeout);
        }
        self.inner.load_aspect(draft, key).await
    }

    async fn save_aspect(&self, draft: &DraftId, key: AspectKey, value: &Value) -> Result<Value, StoreError> {
        self.saves.lock().unwrap().push((key, value.clone()));
        self.latency().await;
        if take_failure(&self.save_failures) {
            return Err(outage());
        }
        self.inner.save_aspect(draft, key, value).await
    }

    async fn delete_item(&self, draft: &DraftId, key: AspectKey, item_id: &str) -> Result<(), StoreError> {
        self.inner.delete_item(draft, key, item_id).await
    }

    async fn lookup_options(&self, kind: OptionKind) -> Result<Vec<String>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.lookup_failures) {
            return Err(outage());
        }
        self.inner.lookup_options(kind).await
    }
}
