//! Job orchestration.
//!
//! The orchestrator owns the in-memory gallery, the job registry and the
//! generator forms. Every submitted prompt runs as its own spawned task, so a
//! slow or failing entry never holds up its siblings. Video jobs leave a
//! pending operation in the archive while they poll, which is what
//! [`Orchestrator::recover_pending`] resumes after a restart.

mod flows;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::archive::ArchiveStore;
use crate::config::StudioConfig;
use crate::credentials::CredentialProvider;
use crate::db::DatabaseError;
use crate::error::{AtelierError, ValidationError};
use crate::gateway::Gateway;
use crate::jobs::{BackgroundJob, JobEvent, JobRegistry};
use crate::model::{GalleryItem, ImageModel, ImageQuality, InlineImage, MediaKind};
use crate::reconcile::{tentative_apply, Reconciliation};
use crate::request::{EditRequest, ImageBatch, VideoBatch};

/// Tunables taken from the studio configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub image_removal_delay: Duration,
    pub video_removal_delay: Duration,
    /// Downloaded videos go here when set; otherwise they are kept inline.
    pub media_directory: Option<PathBuf>,
    pub event_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&StudioConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &StudioConfig) -> Self {
        Self {
            image_removal_delay: config.jobs.image_removal_delay(),
            video_removal_delay: config.jobs.video_removal_delay(),
            media_directory: config.media_directory.clone(),
            event_capacity: config.jobs.event_capacity,
        }
    }
}

/// Gallery change notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ArchiveEvent {
    /// A new result was prepended.
    Added { item: GalleryItem },
    /// An item changed in place.
    Updated { item: GalleryItem },
    /// An item was deleted.
    Removed { id: String },
    /// The whole list was replaced from the store.
    Reloaded { count: usize },
}

/// How a spawned job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        job_id: String,
        item: GalleryItem,
    },
    Failed {
        job_id: String,
        reason: String,
        /// The service rejected the credential.
        auth_required: bool,
    },
}

impl JobOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            JobOutcome::Completed { job_id, .. } | JobOutcome::Failed { job_id, .. } => job_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}

/// Handles of the jobs started by one submission.
pub struct Submission {
    jobs: Vec<(String, JoinHandle<JobOutcome>)>,
}

impl Submission {
    fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    fn push(&mut self, job_id: String, handle: JoinHandle<JobOutcome>) {
        self.jobs.push((job_id, handle));
    }

    /// Ids of the started jobs, in prompt order.
    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Waits for every job. Outcomes are in prompt order.
    pub async fn join(self) -> Vec<JobOutcome> {
        let (ids, handles): (Vec<_>, Vec<_>) = self.jobs.into_iter().unzip();
        futures_util::future::join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(result, job_id)| match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("Job {} task aborted: {}", job_id, e);
                    JobOutcome::Failed {
                        job_id,
                        reason: e.to_string(),
                        auth_required: false,
                    }
                }
            })
            .collect()
    }
}

struct Inner {
    registry: JobRegistry,
    archive: Arc<dyn ArchiveStore>,
    gateway: Gateway,
    credentials: Arc<dyn CredentialProvider>,
    gallery: RwLock<Vec<GalleryItem>>,
    /// Held from the in-memory change of the gallery until its write or
    /// reload has finished, so a reload never drops another job's
    /// unconfirmed item.
    gallery_writes: Mutex<()>,
    latest: RwLock<Option<GalleryItem>>,
    image_form: RwLock<Option<ImageBatch>>,
    video_form: RwLock<Option<VideoBatch>>,
    settings: OrchestratorSettings,
    archive_events: broadcast::Sender<ArchiveEvent>,
}

/// Coordinates submissions, recovery and the in-memory gallery.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Orchestrator state lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Orchestrator state lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl Orchestrator {
    pub fn new(
        archive: Arc<dyn ArchiveStore>,
        gateway: Gateway,
        credentials: Arc<dyn CredentialProvider>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (archive_events, _) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                registry: JobRegistry::new(settings.event_capacity),
                archive,
                gateway,
                credentials,
                gallery: RwLock::new(Vec::new()),
                gallery_writes: Mutex::new(()),
                latest: RwLock::new(None),
                image_form: RwLock::new(None),
                video_form: RwLock::new(None),
                settings,
                archive_events,
            }),
        }
    }

    // ─── Startup ────────────────────────────────────────────────────────────

    /// Loads the archive into memory, then resumes every pending video.
    pub async fn start(&self) -> Result<Submission, AtelierError> {
        let count = self.load_archive()?;
        log::info!("Loaded {} gallery items", count);
        Ok(self.recover_pending()?)
    }

    /// Replaces the in-memory gallery with the store's contents.
    pub fn load_archive(&self) -> Result<usize, DatabaseError> {
        let _writes = self.gallery_writes();
        let items = self.inner.archive.list_gallery_items()?;
        let count = items.len();
        *write_lock(&self.inner.gallery) = items;
        self.emit(ArchiveEvent::Reloaded { count });
        Ok(count)
    }

    /// Asks for a credential once when none is active. Returns whether one is
    /// active afterwards.
    pub async fn ensure_credential(&self) -> bool {
        if self.inner.credentials.has_active_credential().await {
            return true;
        }
        log::info!("No active credential, asking the host to select one");
        self.inner.credentials.prompt_credential_selection().await;
        self.inner.credentials.has_active_credential().await
    }

    // ─── Forms and regeneration ─────────────────────────────────────────────

    /// Stores the image form that regeneration resubmits.
    pub fn set_image_form(&self, batch: ImageBatch) {
        *write_lock(&self.inner.image_form) = Some(batch);
    }

    pub fn set_video_form(&self, batch: VideoBatch) {
        *write_lock(&self.inner.video_form) = Some(batch);
    }

    pub fn image_form(&self) -> Option<ImageBatch> {
        read_lock(&self.inner.image_form).clone()
    }

    pub fn video_form(&self) -> Option<VideoBatch> {
        read_lock(&self.inner.video_form).clone()
    }

    /// Resubmits the form currently configured for the item's media kind.
    ///
    /// This does not replay the item's stored metadata: whatever the form
    /// holds now is what gets generated.
    pub fn regenerate(&self, item: &GalleryItem) -> Result<Submission, ValidationError> {
        match item.kind {
            MediaKind::Image => {
                let batch = self.image_form().ok_or(ValidationError::NoActiveForm {
                    kind: MediaKind::Image,
                })?;
                self.submit_images(batch)
            }
            MediaKind::Video => {
                let batch = self.video_form().ok_or(ValidationError::NoActiveForm {
                    kind: MediaKind::Video,
                })?;
                self.submit_videos(batch)
            }
        }
    }

    /// Builds an edit of an archived image.
    pub fn edit_request_for(
        &self,
        item_id: &str,
        instruction: &str,
        mask: InlineImage,
        model: ImageModel,
        quality: ImageQuality,
    ) -> Result<EditRequest, ValidationError> {
        let item = self
            .find_item(item_id)
            .ok_or_else(|| ValidationError::UnknownItem {
                id: item_id.to_string(),
            })?;
        EditRequest::from_item(&item, instruction, mask, model, quality)
    }

    // ─── Gallery ────────────────────────────────────────────────────────────

    /// Newest-first snapshot of the in-memory gallery.
    pub fn gallery(&self) -> Vec<GalleryItem> {
        read_lock(&self.inner.gallery).clone()
    }

    /// Gallery without hidden items.
    pub fn visible_gallery(&self) -> Vec<GalleryItem> {
        read_lock(&self.inner.gallery)
            .iter()
            .filter(|i| !i.is_hidden)
            .cloned()
            .collect()
    }

    pub fn find_item(&self, id: &str) -> Option<GalleryItem> {
        read_lock(&self.inner.gallery)
            .iter()
            .find(|i| i.id == id)
            .cloned()
    }

    /// Most recent result produced in this session.
    pub fn latest(&self) -> Option<GalleryItem> {
        read_lock(&self.inner.latest).clone()
    }

    /// Flips an item's hidden flag.
    ///
    /// The change is visible immediately. If the store rejects it, the whole
    /// gallery is reloaded from the store.
    pub fn toggle_hidden(
        &self,
        id: &str,
    ) -> Result<Reconciliation<GalleryItem, DatabaseError>, ValidationError> {
        let _writes = self.gallery_writes();
        let archive = Arc::clone(&self.inner.archive);
        let result = tentative_apply(
            &self.inner.gallery,
            |items| {
                let item = items.iter_mut().find(|i| i.id == id)?;
                item.is_hidden = !item.is_hidden;
                Some(item.clone())
            },
            |item| archive.put_gallery_item(item),
            || archive.list_gallery_items(),
        );

        match &result {
            Reconciliation::Skipped => {
                return Err(ValidationError::UnknownItem { id: id.to_string() })
            }
            Reconciliation::Committed(item) => {
                self.sync_latest(item);
                self.emit(ArchiveEvent::Updated { item: item.clone() });
            }
            Reconciliation::Reverted { error } => {
                log::warn!("Failed to persist visibility of {}, reloaded: {}", id, error);
                self.emit_reloaded();
            }
            Reconciliation::Diverged {
                error,
                reload_error,
            } => {
                log::error!(
                    "Failed to persist visibility of {} ({}) and to reload the gallery ({})",
                    id,
                    error,
                    reload_error
                );
            }
        }
        Ok(result)
    }

    /// Deletes an item from the gallery and the store.
    pub fn delete_item(
        &self,
        id: &str,
    ) -> Result<Reconciliation<String, DatabaseError>, ValidationError> {
        let _writes = self.gallery_writes();
        let archive = Arc::clone(&self.inner.archive);
        let result = tentative_apply(
            &self.inner.gallery,
            |items| {
                let pos = items.iter().position(|i| i.id == id)?;
                Some(items.remove(pos).id)
            },
            |id| archive.delete_gallery_item(id),
            || archive.list_gallery_items(),
        );

        match &result {
            Reconciliation::Skipped => {
                return Err(ValidationError::UnknownItem { id: id.to_string() })
            }
            Reconciliation::Committed(id) => {
                let mut latest = write_lock(&self.inner.latest);
                if latest.as_ref().is_some_and(|l| &l.id == id) {
                    *latest = None;
                }
                drop(latest);
                self.emit(ArchiveEvent::Removed { id: id.clone() });
            }
            Reconciliation::Reverted { error } => {
                log::warn!("Failed to delete {}, reloaded: {}", id, error);
                self.emit_reloaded();
            }
            Reconciliation::Diverged {
                error,
                reload_error,
            } => {
                log::error!(
                    "Failed to delete {} ({}) and to reload the gallery ({})",
                    id,
                    error,
                    reload_error
                );
            }
        }
        Ok(result)
    }

    // ─── Jobs ───────────────────────────────────────────────────────────────

    /// Newest-first snapshot of tracked jobs.
    pub fn jobs(&self) -> Vec<BackgroundJob> {
        self.inner.registry.snapshot()
    }

    pub fn job(&self, id: &str) -> Option<BackgroundJob> {
        self.inner.registry.get(id)
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.inner.registry
    }

    pub fn subscribe_jobs(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.registry.subscribe()
    }

    pub fn subscribe_archive(&self) -> broadcast::Receiver<ArchiveEvent> {
        self.inner.archive_events.subscribe()
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    fn gallery_writes(&self) -> MutexGuard<'_, ()> {
        match self.inner.gallery_writes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Gallery write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Runs `f` against the archive on the blocking thread pool.
    async fn with_archive<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&dyn ArchiveStore) -> Result<T, DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let archive = Arc::clone(&self.inner.archive);
        tokio::task::spawn_blocking(move || f(archive.as_ref()))
            .await
            .map_err(|e| DatabaseError::TaskFailed(e.to_string()))?
    }

    fn emit(&self, event: ArchiveEvent) {
        let _ = self.inner.archive_events.send(event);
    }

    fn emit_reloaded(&self) {
        let count = read_lock(&self.inner.gallery).len();
        self.emit(ArchiveEvent::Reloaded { count });
    }

    fn sync_latest(&self, item: &GalleryItem) {
        let mut latest = write_lock(&self.inner.latest);
        if let Some(current) = latest.as_mut() {
            if current.id == item.id {
                *current = item.clone();
            }
        }
    }

    /// [`Self::record_result`] on the blocking thread pool.
    async fn record_result_blocking(&self, item: GalleryItem) {
        let this = self.clone();
        let id = item.id.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || this.record_result(&item)).await {
            log::error!("Recording result {} did not finish: {}", id, e);
        }
    }

    /// Prepends a finished result and persists it. A rejected write reloads
    /// the gallery; it never fails the job.
    fn record_result(&self, item: &GalleryItem) {
        let _writes = self.gallery_writes();
        *write_lock(&self.inner.latest) = Some(item.clone());

        let archive = Arc::clone(&self.inner.archive);
        let result = tentative_apply(
            &self.inner.gallery,
            |items| {
                items.insert(0, item.clone());
                Some(())
            },
            |_| archive.put_gallery_item(item),
            || archive.list_gallery_items(),
        );

        match result {
            Reconciliation::Committed(()) => {
                self.emit(ArchiveEvent::Added { item: item.clone() });
            }
            Reconciliation::Reverted { error } => {
                log::warn!("Failed to archive result {}, reloaded: {}", item.id, error);
                self.emit_reloaded();
            }
            Reconciliation::Diverged {
                error,
                reload_error,
            } => {
                log::error!(
                    "Failed to archive result {} ({}) and to reload the gallery ({})",
                    item.id,
                    error,
                    reload_error
                );
                self.emit(ArchiveEvent::Added { item: item.clone() });
            }
            Reconciliation::Skipped => {}
        }
    }

    fn schedule_removal(&self, job_id: &str, delay: Duration) {
        let this = self.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.inner.registry.remove(&job_id);
        });
    }

    async fn clear_pending(&self, job_id: &str) {
        let id = job_id.to_string();
        if let Err(e) = self
            .with_archive(move |archive| archive.delete_pending_operation(&id))
            .await
        {
            log::warn!("Failed to delete pending operation {}: {}", job_id, e);
        }
    }
}
