//! Shared fixtures for atelier integration tests.
//!
//! - `ScriptedRemote`: a `RemoteService` whose answers are queued by the test
//! - `CountingCredentials`: records how often re-selection was requested
//! - `FlakyArchive`: a SQLite archive whose gallery writes can be made to fail
//! - `Harness`: an orchestrator wired over all of the above

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use atelier::archive::{ArchiveStore, SqliteArchive};
use atelier::credentials::CredentialProvider;
use atelier::db::{Database, DatabaseError};
use atelier::gateway::{
    DownloadedMedia, ImageConfig, OperationStatus, Part, PollSettings, RemoteError, VideoSubmission,
};
use atelier::model::{
    AspectRatio, GalleryItem, GenerationMetadata, ImageMetadata, ImageModel, ImageQuality,
    InlineImage, MediaKind, MediaSource, PendingOperation,
};
use atelier::{Gateway, Orchestrator, OrchestratorSettings, RemoteService, ScenePrompt};

/// Prompts containing this marker are rejected by [`ScriptedRemote`].
pub const FAIL_MARKER: &str = "[fail]";

pub fn png(data: &str) -> InlineImage {
    InlineImage::new(data, "image/png")
}

/// Remote service driven by queued responses.
///
/// Unscripted image calls return one inline PNG, except that any call whose
/// text mentions `[fail]` is rejected with HTTP 500. Unscripted polls report
/// the operation done with a download link.
#[derive(Default)]
pub struct ScriptedRemote {
    image_results: Mutex<VecDeque<Result<Vec<Part>, RemoteError>>>,
    poll_results: Mutex<VecDeque<Result<OperationStatus, RemoteError>>>,
    /// When set, every call fails with this error.
    fail_all: Mutex<Option<RemoteError>>,
    /// When set, each poll waits for a permit.
    poll_gate: Mutex<Option<Arc<Semaphore>>>,
    /// Remaining not-done answers per operation name.
    held: Mutex<HashMap<String, usize>>,
    /// Downloads whose link contains one of these fragments fail.
    broken_downloads: Mutex<Vec<String>>,
    pub image_calls: Mutex<Vec<Vec<Part>>>,
    pub submissions: Mutex<Vec<VideoSubmission>>,
    pub polled: Mutex<Vec<String>>,
}

impl ScriptedRemote {
    pub fn push_image(&self, result: Result<Vec<Part>, RemoteError>) {
        self.image_results.lock().unwrap().push_back(result);
    }

    pub fn push_poll(&self, result: Result<OperationStatus, RemoteError>) {
        self.poll_results.lock().unwrap().push_back(result);
    }

    pub fn fail_everything_with(&self, error: RemoteError) {
        *self.fail_all.lock().unwrap() = Some(error);
    }

    /// Holds polls until the returned semaphore gets permits.
    pub fn gate_polls(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.poll_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Makes `name` report not-done for its next `polls` polls.
    pub fn hold_operation(&self, name: &str, polls: usize) {
        self.held.lock().unwrap().insert(name.to_string(), polls);
    }

    /// Fails every download whose link contains `fragment` with HTTP 500.
    pub fn break_downloads_containing(&self, fragment: &str) {
        self.broken_downloads
            .lock()
            .unwrap()
            .push(fragment.to_string());
    }

    /// How often `name` was polled.
    pub fn polls_of(&self, name: &str) -> usize {
        self.polled
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.as_str() == name)
            .count()
    }

    /// Text of the last part of every image call, in call order.
    pub fn scene_texts(&self) -> Vec<String> {
        self.image_calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|parts| match parts.last() {
                Some(Part::Text(t)) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    fn failure(&self) -> Option<RemoteError> {
        self.fail_all.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteService for ScriptedRemote {
    async fn generate_content(
        &self,
        _model: ImageModel,
        parts: &[Part],
        _config: &ImageConfig,
    ) -> Result<Vec<Part>, RemoteError> {
        self.image_calls.lock().unwrap().push(parts.to_vec());
        if let Some(e) = self.failure() {
            return Err(e);
        }
        if parts
            .iter()
            .any(|p| matches!(p, Part::Text(t) if t.contains(FAIL_MARKER)))
        {
            return Err(RemoteError::new(Some(500), "internal error"));
        }
        self.image_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![Part::Inline(png("GENERATED"))]))
    }

    async fn submit_video(&self, submission: &VideoSubmission) -> Result<OperationStatus, RemoteError> {
        if let Some(e) = self.failure() {
            return Err(e);
        }
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(submission.clone());
        Ok(OperationStatus::pending(format!(
            "operations/video-{}",
            submissions.len()
        )))
    }

    async fn poll_operation(&self, name: &str) -> Result<OperationStatus, RemoteError> {
        let gate = self.poll_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        self.polled.lock().unwrap().push(name.to_string());
        if let Some(e) = self.failure() {
            return Err(e);
        }
        if let Some(remaining) = self.held.lock().unwrap().get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(OperationStatus::pending(name));
            }
        }
        self.poll_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(OperationStatus {
                    name: name.to_string(),
                    done: true,
                    video_uri: Some(format!("https://files.example/{}.mp4", name)),
                    error: None,
                })
            })
    }

    async fn download(&self, uri: &str) -> Result<DownloadedMedia, RemoteError> {
        if let Some(e) = self.failure() {
            return Err(e);
        }
        if self
            .broken_downloads
            .lock()
            .unwrap()
            .iter()
            .any(|fragment| uri.contains(fragment.as_str()))
        {
            return Err(RemoteError::new(Some(500), "storage unavailable"));
        }
        Ok(DownloadedMedia {
            bytes: format!("VIDEO:{}", uri).into_bytes(),
            mime_type: "video/mp4".to_string(),
        })
    }
}

/// Credential provider that counts re-selection prompts.
pub struct CountingCredentials {
    active: AtomicBool,
    prompts: AtomicUsize,
}

impl CountingCredentials {
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for CountingCredentials {
    async fn has_active_credential(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn prompt_credential_selection(&self) {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
    }
}

/// SQLite archive whose gallery writes fail while `reject_writes` is set,
/// or for items whose prompt contains `reject_prompts_containing`.
pub struct FlakyArchive {
    inner: SqliteArchive,
    pub reject_writes: AtomicBool,
    pub reject_prompts_containing: Mutex<Option<String>>,
}

impl FlakyArchive {
    pub fn new(inner: SqliteArchive) -> Self {
        Self {
            inner,
            reject_writes: AtomicBool::new(false),
            reject_prompts_containing: Mutex::new(None),
        }
    }

    fn check(&self) -> Result<(), DatabaseError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        Ok(())
    }
}

impl ArchiveStore for FlakyArchive {
    fn put_gallery_item(&self, item: &GalleryItem) -> Result<(), DatabaseError> {
        self.check()?;
        let marker = self.reject_prompts_containing.lock().unwrap().clone();
        if marker.is_some_and(|m| item.prompt.contains(&m)) {
            return Err(DatabaseError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        self.inner.put_gallery_item(item)
    }

    fn list_gallery_items(&self) -> Result<Vec<GalleryItem>, DatabaseError> {
        self.inner.list_gallery_items()
    }

    fn delete_gallery_item(&self, id: &str) -> Result<(), DatabaseError> {
        self.check()?;
        self.inner.delete_gallery_item(id)
    }

    fn put_pending_operation(&self, op: &PendingOperation) -> Result<(), DatabaseError> {
        self.inner.put_pending_operation(op)
    }

    fn list_pending_operations(&self) -> Result<Vec<PendingOperation>, DatabaseError> {
        self.inner.list_pending_operations()
    }

    fn delete_pending_operation(&self, id: &str) -> Result<(), DatabaseError> {
        self.inner.delete_pending_operation(id)
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Settings that keep finished jobs listed for the duration of a test.
pub fn sticky_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        image_removal_delay: Duration::from_secs(600),
        video_removal_delay: Duration::from_secs(600),
        media_directory: None,
        event_capacity: 256,
    }
}

pub fn fast_poll() -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(1),
        max_consecutive_failures: None,
    }
}

/// Orchestrator over an in-memory archive and a scripted remote.
pub struct Harness {
    pub remote: Arc<ScriptedRemote>,
    pub credentials: Arc<CountingCredentials>,
    pub archive: Arc<FlakyArchive>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(sticky_settings(), fast_poll())
    }

    pub fn with_settings(settings: OrchestratorSettings, poll: PollSettings) -> Self {
        let db = Database::open_in_memory().expect("in-memory database");
        Self::over(SqliteArchive::new(db), settings, poll)
    }

    /// Builds a harness over an existing archive, e.g. to simulate a restart.
    pub fn over(archive: SqliteArchive, settings: OrchestratorSettings, poll: PollSettings) -> Self {
        let remote = Arc::new(ScriptedRemote::default());
        let credentials = Arc::new(CountingCredentials::new(true));
        let archive = Arc::new(FlakyArchive::new(archive));
        let gateway = Gateway::new(remote.clone(), poll);
        let orchestrator = Orchestrator::new(
            archive.clone(),
            gateway,
            credentials.clone(),
            settings,
        );
        Self {
            remote,
            credentials,
            archive,
            orchestrator,
        }
    }
}

/// An archived image item with the given prompt and timestamp offset.
pub fn image_item(prompt: &str, seconds_ago: i64) -> GalleryItem {
    let mut item = GalleryItem::new(
        MediaKind::Image,
        MediaSource::from(png("STORED")),
        prompt,
        AspectRatio::Square,
        GenerationMetadata::Image(ImageMetadata {
            aspect_ratio: AspectRatio::Square,
            model: ImageModel::Flash,
            quality: ImageQuality::OneK,
            style: None,
            scene: ScenePrompt::new(prompt),
            identity_refs: vec![],
            background_ref: None,
            base_image: None,
        }),
    );
    item.timestamp = item.timestamp - chrono::Duration::seconds(seconds_ago);
    item
}
