//! Client-side draft session.
//!
//! One `DraftSession` is what a form host holds for a draft: it resolves the
//! draft id once, loads and normalizes each aspect, and runs one autosave
//! pipeline per aspect against the configured repository.

pub mod autosave;
pub mod id_storage;
pub mod identity;
pub mod lookup;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::schema::{AspectKey, AspectRecord, NormalizationSource, ValidationErrors};
use crate::store::{DraftId, OptionKind, Repository, StoreError};

pub use autosave::{AspectSaver, AutosaveConfig, AutosaveScheduler, SaveError, SaveOutcome, SaveState};
pub use id_storage::{DraftIdStorage, FileIdStorage, MemoryIdStorage};
pub use identity::IdentityResolver;
pub use lookup::LookupCache;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Send even when the value equals the last confirmed save.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Stored data was found and normalized.
    Found { source: NormalizationSource },
    /// Nothing stored yet. The normal state of a new draft.
    New,
    /// The fetch failed; the record is the default so editing can continue.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Loaded {
    pub record: AspectRecord,
    pub outcome: LoadOutcome,
}

/// Persists one aspect under the session's draft id, creating the id on demand.
struct RepositorySaver {
    key: AspectKey,
    repo: Arc<dyn Repository>,
    identity: Arc<IdentityResolver>,
}

#[async_trait]
impl AspectSaver<AspectRecord> for RepositorySaver {
    async fn save(&self, record: &AspectRecord) -> Result<AspectRecord, SaveError> {
        let draft = self
            .identity
            .ensure_id()
            .await
            .ok_or(SaveError::IdentityUnavailable)?;
        let stored = self
            .repo
            .save_aspect(&draft, self.key, &record.to_value())
            .await?;
        Ok(AspectRecord::normalize(self.key, &stored).value)
    }
}

pub struct DraftSession {
    repo: Arc<dyn Repository>,
    identity: Arc<IdentityResolver>,
    schedulers: HashMap<AspectKey, AutosaveScheduler<AspectRecord>>,
    loaded: Mutex<HashSet<AspectKey>>,
    lookups: LookupCache,
}

impl DraftSession {
    pub fn new(repo: Arc<dyn Repository>, storage: Arc<dyn DraftIdStorage>) -> Self {
        Self::with_config(repo, storage, AutosaveConfig::for_aspect)
    }

    pub fn with_config(
        repo: Arc<dyn Repository>,
        storage: Arc<dyn DraftIdStorage>,
        config: impl Fn(AspectKey) -> AutosaveConfig,
    ) -> Self {
        let identity = Arc::new(IdentityResolver::new(Arc::clone(&repo), storage));
        let schedulers = AspectKey::ALL
            .iter()
            .map(|&key| {
                let saver: Arc<dyn AspectSaver<AspectRecord>> = Arc::new(RepositorySaver {
                    key,
                    repo: Arc::clone(&repo),
                    identity: Arc::clone(&identity),
                });
                (key, AutosaveScheduler::new(key.as_str(), config(key), saver))
            })
            .collect();

        Self {
            lookups: LookupCache::new(Arc::clone(&repo)),
            repo,
            identity,
            schedulers,
            loaded: Mutex::new(HashSet::new()),
        }
    }

    pub async fn ensure_id(&self) -> Option<DraftId> {
        self.identity.ensure_id().await
    }

    /// The draft id if one exists yet.
    pub fn draft_id(&self) -> Option<DraftId> {
        self.identity.current()
    }

    fn scheduler(&self, key: AspectKey) -> &AutosaveScheduler<AspectRecord> {
        // Built for every key in `with_config`.
        &self.schedulers[&key]
    }

    fn is_loaded(&self, key: AspectKey) -> bool {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
    }

    fn mark_loaded(&self, key: AspectKey, record: &AspectRecord) {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        self.scheduler(key).set_enabled(record.validate().is_ok());
    }

    /// Fetches and normalizes an aspect. Never creates a draft id and never fails:
    /// a missing or unreadable aspect comes back as the default record.
    pub async fn load(&self, key: AspectKey) -> Loaded {
        let Some(draft) = self.identity.current() else {
            let record = AspectRecord::default_for(key);
            self.mark_loaded(key, &record);
            return Loaded {
                record,
                outcome: LoadOutcome::New,
            };
        };

        let (record, outcome) = match self.repo.load_aspect(&draft, key).await {
            Ok(raw) => {
                let normalized = AspectRecord::normalize(key, &raw);
                let source = normalized.source;
                let mut record = normalized.value;
                record.canonicalize();
                self.scheduler(key).prime(&record);
                (record, LoadOutcome::Found { source })
            }
            Err(e) if e.is_not_found() => (AspectRecord::default_for(key), LoadOutcome::New),
            Err(e) => {
                warn!(draft_id = %draft, aspect = %key, error = %e, "Load failed; continuing with an empty record");
                (AspectRecord::default_for(key), LoadOutcome::Failed(e.to_string()))
            }
        };

        debug!(draft_id = %draft, aspect = %key, outcome = ?outcome, "Loaded aspect");
        self.mark_loaded(key, &record);
        Loaded { record, outcome }
    }

    /// The autosave path: call on every change. Returns the canonical record,
    /// or the field errors that keep it from being saved.
    pub fn edit(&self, record: AspectRecord) -> Result<AspectRecord, ValidationErrors> {
        let mut record = record;
        record.canonicalize();
        let key = record.key();
        let scheduler = self.scheduler(key);

        if let Err(errors) = record.validate() {
            scheduler.set_enabled(false);
            return Err(errors);
        }
        scheduler.set_enabled(self.is_loaded(key));
        scheduler.watch(record.clone());
        Ok(record)
    }

    /// Explicit save ("next step"). Validation runs before anything is sent.
    pub async fn save(
        &self,
        record: AspectRecord,
        options: SaveOptions,
    ) -> Result<SaveOutcome<AspectRecord>, SaveError> {
        let mut record = record;
        record.canonicalize();
        record.validate()?;
        self.scheduler(record.key())
            .save_now(record, options.force)
            .await
    }

    pub async fn retry(&self, key: AspectKey) -> Result<SaveOutcome<AspectRecord>, SaveError> {
        self.scheduler(key).retry().await
    }

    pub async fn delete_item(&self, key: AspectKey, item_id: &str) -> Result<(), SaveError> {
        let draft = self
            .identity
            .current()
            .ok_or(SaveError::IdentityUnavailable)?;
        self.repo.delete_item(&draft, key, item_id).await?;
        debug!(draft_id = %draft, aspect = %key, item_id, "Deleted item");
        Ok(())
    }

    pub fn save_state(&self, key: AspectKey) -> SaveState {
        self.scheduler(key).status()
    }

    pub fn subscribe(&self, key: AspectKey) -> watch::Receiver<SaveState> {
        self.scheduler(key).subscribe()
    }

    pub async fn lookup_options(&self, kind: OptionKind) -> Result<Arc<Vec<String>>, StoreError> {
        self.lookups.get(kind).await
    }

    /// Flushes every aspect's pending edit and closes the session. Returns the
    /// aspects whose final save failed.
    pub async fn close(&self) -> Vec<(AspectKey, SaveError)> {
        let mut failures = Vec::new();
        for key in AspectKey::ALL {
            if let Err(e) = self.scheduler(key).flush_and_close().await {
                failures.push((key, e));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EducationItem, Entries, Summary};
    use crate::store::MemoryRepository;
    use serde_json::json;
    use std::time::Duration;
    use testing::FlakyRepository;

    fn summary(text: &str) -> AspectRecord {
        AspectRecord::Summary(Summary { text: text.into() })
    }

    fn school(name: &str, present: bool, end: &str) -> EducationItem {
        EducationItem {
            school_name: name.into(),
            start_date: "2016-04".into(),
            end_date: end.into(),
            present,
            ..Default::default()
        }
    }

    fn session(repo: &Arc<FlakyRepository>) -> DraftSession {
        let repo: Arc<dyn Repository> = repo.clone();
        DraftSession::new(repo, Arc::new(MemoryIdStorage::new()))
    }

    #[tokio::test]
    async fn test_load_without_id_is_new_and_creates_nothing() {
        let repo = Arc::new(FlakyRepository::default());
        let s = session(&repo);

        let loaded = s.load(AspectKey::BasicInfo).await;
        assert_eq!(loaded.outcome, LoadOutcome::New);
        assert_eq!(loaded.record, AspectRecord::default_for(AspectKey::BasicInfo));
        assert_eq!(repo.create_calls(), 0);
        assert!(s.draft_id().is_none());
    }

    #[tokio::test]
    async fn test_first_save_creates_id_and_reads_back() {
        let repo = Arc::new(FlakyRepository::default());
        let s = session(&repo);

        s.save(summary("Backend engineer"), SaveOptions::default()).await.unwrap();
        assert_eq!(repo.create_calls(), 1);
        assert!(s.draft_id().is_some());

        let loaded = s.load(AspectKey::Summary).await;
        assert_eq!(loaded.record, summary("Backend engineer"));
        assert_eq!(
            loaded.outcome,
            LoadOutcome::Found { source: NormalizationSource::Canonical }
        );
    }

    #[tokio::test]
    async fn test_invalid_record_is_never_sent() {
        let repo = Arc::new(FlakyRepository::default());
        let s = session(&repo);
        let too_long = summary(&"x".repeat(401));

        let err = s.save(too_long.clone(), SaveOptions::default()).await.unwrap_err();
        assert!(matches!(err, SaveError::Validation(ref v) if v.fields.contains_key("text")));
        assert!(s.edit(too_long).is_err());
        assert!(repo.saves_for(AspectKey::Summary).is_empty());
        assert_eq!(repo.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_present_item_is_saved_without_end_date() {
        let repo = Arc::new(FlakyRepository::default());
        let s = session(&repo);
        let record = AspectRecord::Education(Entries(vec![school("Kyoto Univ.", true, "2020-03")]));

        s.save(record, SaveOptions::default()).await.unwrap();
        let sent = repo.saves_for(AspectKey::Education);
        assert_eq!(sent[0][0]["endDate"], "");
        assert_eq!(sent[0][0]["present"], true);
    }

    #[tokio::test]
    async fn test_list_save_returns_assigned_ids() {
        let repo = Arc::new(FlakyRepository::default());
        let s = session(&repo);
        let record = AspectRecord::Education(Entries(vec![school("A", false, "2020-03")]));

        let outcome = s.save(record, SaveOptions::default()).await.unwrap();
        let SaveOutcome::Saved(AspectRecord::Education(items)) = outcome else {
            panic!("expected saved education, got {outcome:?}");
        };
        assert!(items.items()[0].id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_before_load_do_not_autosave() {
        let repo = Arc::new(FlakyRepository::default());
        let s = session(&repo);

        s.edit(summary("typed too early")).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(repo.saves_for(AspectKey::Summary).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_after_load_autosave_trailing_value() {
        let repo = Arc::new(FlakyRepository::default());
        let s = session(&repo);
        s.load(AspectKey::Summary).await;

        s.edit(summary("B")).unwrap();
        s.edit(summary("Ba")).unwrap();
        s.edit(summary("Backend")).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(repo.saves_for(AspectKey::Summary), vec![json!({ "text": "Backend" })]);
        assert_eq!(repo.create_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_restored_after_invalid_edit_is_saved() {
        let repo = Arc::new(FlakyRepository::default());
        let s = session(&repo);
        s.load(AspectKey::Summary).await;

        s.edit(summary("Backend")).unwrap();
        assert!(s.edit(summary(&"x".repeat(401))).is_err());
        s.edit(summary("Backend")).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(repo.saves_for(AspectKey::Summary), vec![json!({ "text": "Backend" })]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_autosave_refires_on_identical_edit() {
        let repo = Arc::new(FlakyRepository::failing_saves(1));
        let s = session(&repo);
        s.load(AspectKey::Summary).await;

        s.edit(summary("Backend")).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(s.save_state(AspectKey::Summary), SaveState::Error);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(s.save_state(AspectKey::Summary), SaveState::Idle);

        s.edit(summary("Backend")).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(s.save_state(AspectKey::Summary), SaveState::Saved);
        assert_eq!(repo.saves_for(AspectKey::Summary).len(), 2);
        let loaded = s.load(AspectKey::Summary).await;
        assert_eq!(loaded.record, summary("Backend"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aspects_share_one_created_id() {
        let repo = Arc::new(FlakyRepository::slow(Duration::from_millis(100)));
        let s = session(&repo);

        let (a, b) = tokio::join!(
            s.save(summary("one"), SaveOptions::default()),
            s.save(
                AspectRecord::Education(Entries(vec![school("A", false, "2020-03")])),
                SaveOptions::default()
            ),
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(repo.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_identity_failure_blocks_save_then_recovers() {
        let repo = Arc::new(FlakyRepository::failing_creates(1));
        let s = session(&repo);

        let err = s.save(summary("x"), SaveOptions::default()).await.unwrap_err();
        assert_eq!(err, SaveError::IdentityUnavailable);
        assert_eq!(s.save_state(AspectKey::Summary), SaveState::Error);

        let retried = s.retry(AspectKey::Summary).await.unwrap();
        assert_eq!(retried, SaveOutcome::Saved(summary("x")));
    }

    #[tokio::test]
    async fn test_failed_load_falls_back_to_default() {
        let repo = Arc::new(FlakyRepository::failing_loads(1));
        let storage = Arc::new(MemoryIdStorage::with_id(DraftId::new("d1").unwrap()));
        let repo_dyn: Arc<dyn Repository> = repo.clone();
        let s = DraftSession::new(repo_dyn, storage);

        let loaded = s.load(AspectKey::Status).await;
        assert!(matches!(loaded.outcome, LoadOutcome::Failed(_)));
        assert_eq!(loaded.record, AspectRecord::default_for(AspectKey::Status));
    }

    #[tokio::test]
    async fn test_legacy_stored_shape_is_normalized_on_load() {
        let repo = Arc::new(FlakyRepository::default());
        let draft = DraftId::new("d1").unwrap();
        repo.inner()
            .save_aspect(&draft, AspectKey::Education, &json!([{ "school": "Osaka Univ.", "start": "2015/4", "end": "現在" }]))
            .await
            .unwrap();
        let repo_dyn: Arc<dyn Repository> = repo.clone();
        let s = DraftSession::new(repo_dyn, Arc::new(MemoryIdStorage::with_id(draft)));

        let loaded = s.load(AspectKey::Education).await;
        let AspectRecord::Education(entries) = &loaded.record else {
            panic!("expected education, got {:?}", loaded.record);
        };
        let item = &entries.items()[0];
        assert_eq!(item.school_name, "Osaka Univ.");
        assert_eq!(item.start_date, "2015-04");
        assert!(item.present);
        assert_eq!(item.end_date, "");
        assert_eq!(loaded.outcome, LoadOutcome::Found { source: NormalizationSource::Permissive });
    }

    #[tokio::test(start_paused = true)]
    async fn test_loaded_value_is_not_resaved() {
        let repo = Arc::new(FlakyRepository::default());
        let draft = DraftId::new("d1").unwrap();
        repo.inner()
            .save_aspect(&draft, AspectKey::Summary, &json!({ "text": "stored" }))
            .await
            .unwrap();
        let repo_dyn: Arc<dyn Repository> = repo.clone();
        let s = DraftSession::new(repo_dyn, Arc::new(MemoryIdStorage::with_id(draft)));

        let loaded = s.load(AspectKey::Summary).await;
        s.edit(loaded.record).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(repo.saves_for(AspectKey::Summary).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_pending_edits() {
        let repo = Arc::new(FlakyRepository::default());
        let s = session(&repo);
        s.load(AspectKey::Summary).await;

        s.edit(summary("unsaved")).unwrap();
        assert!(s.close().await.is_empty());
        assert_eq!(repo.saves_for(AspectKey::Summary), vec![json!({ "text": "unsaved" })]);
    }

    #[tokio::test]
    async fn test_delete_item_requires_an_id() {
        let repo = Arc::new(FlakyRepository::default());
        let s = session(&repo);
        assert_eq!(
            s.delete_item(AspectKey::Education, "x").await,
            Err(SaveError::IdentityUnavailable)
        );
    }

    #[tokio::test]
    async fn test_delete_item_removes_from_store() {
        let repo = Arc::new(FlakyRepository::default());
        let s = session(&repo);
        let outcome = s
            .save(
                AspectRecord::Education(Entries(vec![school("A", false, "2020-03"), school("B", false, "2021-03")])),
                SaveOptions::default(),
            )
            .await
            .unwrap();
        let SaveOutcome::Saved(AspectRecord::Education(items)) = outcome else {
            panic!("expected saved education");
        };
        let first = items.items()[0].id.clone().unwrap();

        s.delete_item(AspectKey::Education, &first).await.unwrap();
        let AspectRecord::Education(left) = s.load(AspectKey::Education).await.record else {
            panic!("expected education");
        };
        assert_eq!(left.len(), 1);
        assert_eq!(left.items()[0].school_name, "B");
    }

    #[tokio::test]
    async fn test_lookup_options_are_cached_per_session() {
        let repo = Arc::new(FlakyRepository::default());
        let s = session(&repo);
        s.lookup_options(OptionKind::Certifications).await.unwrap();
        s.lookup_options(OptionKind::Certifications).await.unwrap();
        assert_eq!(repo.lookup_calls(), 1);
    }

    #[tokio::test]
    async fn test_works_against_plain_memory_backend() {
        let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let s = DraftSession::new(repo, Arc::new(MemoryIdStorage::new()));
        s.save(summary("hello"), SaveOptions { force: true }).await.unwrap();
        assert_eq!(s.load(AspectKey::Summary).await.record, summary("hello"));
    }
}
