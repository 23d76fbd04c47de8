//! Per-aspect autosave pipeline.
//!
//! States: `idle → saving → {saved, error} → idle`. Edits are debounced, the
//! trailing value is saved, and a save whose serialized payload equals the last
//! confirmed one is skipped. A failed save never touches the snapshot, so the
//! same payload goes out again on the next edit or an explicit retry.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::schema::{AspectKey, ValidationErrors};
use crate::store::StoreError;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(800);
pub const LIST_DEBOUNCE: Duration = Duration::from_millis(1000);
pub const TEXT_DEBOUNCE: Duration = Duration::from_millis(1500);
pub const STATUS_DISPLAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveConfig {
    /// Quiet period after the last edit before a save goes out.
    pub debounce: Duration,
    /// How long `Saved`/`Error` stay visible before falling back to `Idle`.
    pub status_display: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            status_display: STATUS_DISPLAY,
        }
    }
}

impl AutosaveConfig {
    /// Free-text aspects wait longer: people pause mid-sentence.
    pub fn for_aspect(key: AspectKey) -> Self {
        let debounce = match key {
            AspectKey::SelfPr | AspectKey::Summary => TEXT_DEBOUNCE,
            k if k.is_list() => LIST_DEBOUNCE,
            _ => DEFAULT_DEBOUNCE,
        };
        Self {
            debounce,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveState {
    Idle,
    Saving,
    Saved,
    Error,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SaveError {
    #[error("draft identity is unavailable; retry later")]
    IdentityUnavailable,

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("save rejected: {0}")]
    Rejected(#[from] StoreError),

    #[error("autosave for this aspect has been closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome<T> {
    /// Persisted; carries the value as the backend stored it.
    Saved(T),
    /// Identical to the last confirmed save, nothing sent.
    Unchanged,
}

/// The one side effect the scheduler drives.
#[async_trait]
pub trait AspectSaver<T: Send + Sync>: Send + Sync {
    async fn save(&self, value: &T) -> Result<T, SaveError>;
}

struct Pipeline<T> {
    enabled: bool,
    closed: bool,
    /// Serialized form of the last value handed to `watch`.
    last_seen: Option<String>,
    /// Serialized form of the last confirmed save.
    snapshot: Option<String>,
    pending: Option<T>,
    timer: Option<(u64, JoinHandle<()>)>,
    next_ticket: u64,
    status_epoch: u64,
    last_failed: Option<T>,
}

impl<T> Pipeline<T> {
    fn cancel_timer(&mut self) {
        if let Some((_, handle)) = self.timer.take() {
            handle.abort();
        }
    }
}

struct Shared<T> {
    aspect: String,
    config: AutosaveConfig,
    saver: Arc<dyn AspectSaver<T>>,
    pipeline: Mutex<Pipeline<T>>,
    // Saves for one aspect run one at a time, in the order they were issued.
    save_lock: tokio::sync::Mutex<()>,
    status: watch::Sender<SaveState>,
}

pub struct AutosaveScheduler<T> {
    shared: Arc<Shared<T>>,
}

fn serialize<T: Serialize>(value: &T) -> Result<String, SaveError> {
    serde_json::to_string(value).map_err(|e| SaveError::Rejected(e.into()))
}

impl<T> AutosaveScheduler<T>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    /// Starts disabled; call `set_enabled(true)` once the initial load is done.
    pub fn new(aspect: impl Into<String>, config: AutosaveConfig, saver: Arc<dyn AspectSaver<T>>) -> Self {
        let (status, _) = watch::channel(SaveState::Idle);
        Self {
            shared: Arc::new(Shared {
                aspect: aspect.into(),
                config,
                saver,
                pipeline: Mutex::new(Pipeline {
                    enabled: false,
                    closed: false,
                    last_seen: None,
                    snapshot: None,
                    pending: None,
                    timer: None,
                    next_ticket: 0,
                    status_epoch: 0,
                    last_failed: None,
                }),
                save_lock: tokio::sync::Mutex::new(()),
                status,
            }),
        }
    }

    /// Seeds the snapshot with a value known to be stored (a successful load).
    pub fn prime(&self, value: &T) {
        match serialize(value) {
            Ok(serialized) => {
                let mut p = self.shared.lock();
                p.last_seen = Some(serialized.clone());
                p.snapshot = Some(serialized);
            }
            Err(e) => warn!(aspect = %self.shared.aspect, error = %e, "Could not prime autosave snapshot"),
        }
    }

    /// Autosave only runs while enabled. Disabling drops any pending edit, and
    /// the next edit is compared against what was last confirmed stored.
    pub fn set_enabled(&self, enabled: bool) {
        let mut p = self.shared.lock();
        p.enabled = enabled;
        if !enabled {
            p.cancel_timer();
            p.pending = None;
            p.last_seen = p.snapshot.clone();
        }
    }

    /// Feeds the latest value in. Restarts the quiet period when it differs
    /// from the previously seen value.
    pub fn watch(&self, value: T) {
        let serialized = match serialize(&value) {
            Ok(s) => s,
            Err(e) => {
                warn!(aspect = %self.shared.aspect, error = %e, "Dropping unserializable edit");
                return;
            }
        };

        let mut p = self.shared.lock();
        if p.closed || !p.enabled || p.last_seen.as_deref() == Some(serialized.as_str()) {
            return;
        }
        p.last_seen = Some(serialized);
        p.pending = Some(value);
        p.cancel_timer();

        p.next_ticket += 1;
        let ticket = p.next_ticket;
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(shared.config.debounce).await;
            let due = {
                let mut p = shared.lock();
                if matches!(&p.timer, Some((t, _)) if *t == ticket) {
                    // From here on the save cannot be aborted by a new edit.
                    p.timer = None;
                    p.pending.take()
                } else {
                    None
                }
            };
            if let Some(value) = due {
                // Failures are reported through the status channel.
                let _ = shared.run_save(value, false).await;
            }
        });
        p.timer = Some((ticket, handle));
    }

    /// Saves immediately, bypassing the debounce. Without `force` an unchanged
    /// value is still skipped.
    pub async fn save_now(&self, value: T, force: bool) -> Result<SaveOutcome<T>, SaveError> {
        let serialized = serialize(&value)?;
        {
            let mut p = self.shared.lock();
            if p.closed {
                return Err(SaveError::Closed);
            }
            p.cancel_timer();
            p.pending = None;
            p.last_seen = Some(serialized);
        }
        self.shared.run_save(value, force).await
    }

    /// Re-sends the payload of the last failed save, if any.
    pub async fn retry(&self) -> Result<SaveOutcome<T>, SaveError> {
        let failed = {
            let mut p = self.shared.lock();
            if p.closed {
                return Err(SaveError::Closed);
            }
            p.last_failed.take()
        };
        match failed {
            Some(value) => self.shared.run_save(value, false).await,
            None => Ok(SaveOutcome::Unchanged),
        }
    }

    /// Teardown that keeps the user's last edit: a pending debounced value is
    /// saved right away, in-flight saves are awaited, then the pipeline closes.
    pub async fn flush_and_close(&self) -> Result<SaveOutcome<T>, SaveError> {
        let pending = {
            let mut p = self.shared.lock();
            p.closed = true;
            p.cancel_timer();
            p.pending.take()
        };
        let result = match pending {
            Some(value) => self.shared.run_save(value, false).await,
            None => Ok(SaveOutcome::Unchanged),
        };
        drop(self.shared.save_lock.lock().await);
        result
    }

    /// Teardown that discards a pending edit. In-flight saves still finish.
    pub fn close(&self) {
        let mut p = self.shared.lock();
        p.closed = true;
        p.cancel_timer();
        p.pending = None;
    }

    pub fn status(&self) -> SaveState {
        *self.shared.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveState> {
        self.shared.status.subscribe()
    }

    /// True while an edit is waiting out its quiet period.
    pub fn has_pending(&self) -> bool {
        self.shared.lock().pending.is_some()
    }
}

impl<T> Shared<T>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, Pipeline<T>> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_save(self: &Arc<Self>, value: T, force: bool) -> Result<SaveOutcome<T>, SaveError> {
        let _turn = self.save_lock.lock().await;
        let serialized = serialize(&value)?;

        // Compared only now, after any earlier save for this aspect settled.
        if !force && self.lock().snapshot.as_deref() == Some(serialized.as_str()) {
            debug!(aspect = %self.aspect, "Skipping save; value unchanged since last save");
            return Ok(SaveOutcome::Unchanged);
        }

        self.publish(SaveState::Saving);
        match self.saver.save(&value).await {
            Ok(stored) => {
                {
                    let mut p = self.lock();
                    p.snapshot = Some(serialized);
                    p.last_failed = None;
                }
                debug!(aspect = %self.aspect, "Saved");
                self.publish(SaveState::Saved);
                Ok(SaveOutcome::Saved(stored))
            }
            Err(e) => {
                {
                    let mut p = self.lock();
                    // Let the same value through `watch` again.
                    if p.last_seen.as_deref() == Some(serialized.as_str()) {
                        p.last_seen = None;
                    }
                    p.last_failed = Some(value);
                }
                warn!(aspect = %self.aspect, error = %e, "Save failed");
                self.publish(SaveState::Error);
                Err(e)
            }
        }
    }

    fn publish(self: &Arc<Self>, state: SaveState) {
        let epoch = {
            let mut p = self.lock();
            p.status_epoch += 1;
            p.status_epoch
        };
        self.status.send_replace(state);

        if matches!(state, SaveState::Saved | SaveState::Error) {
            let weak: Weak<Self> = Arc::downgrade(self);
            let display = self.config.status_display;
            tokio::spawn(async move {
                tokio::time::sleep(display).await;
                if let Some(shared) = weak.upgrade() {
                    if shared.lock().status_epoch == epoch {
                        shared.status.send_replace(SaveState::Idle);
                    }
                }
            });
        }
    }
}

impl<T> Drop for AutosaveScheduler<T> {
    fn drop(&mut self) {
        let mut p = self.shared.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, handle)) = p.timer.take() {
            handle.abort();
        }
    }
}
