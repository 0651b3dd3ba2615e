use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;

use super::{JobOutcome, Orchestrator, Submission};
use crate::db::DatabaseError;
use crate::error::ValidationError;
use crate::gateway::{DownloadedMedia, GatewayError, VideoProgress};
use crate::jobs::{BackgroundJob, JobKind, JobPatch};
use crate::model::{
    EditMetadata, GalleryItem, GenerationMetadata, ImageMetadata, MediaKind,
    MediaSource, OperationKind, PendingOperation, VideoMetadata,
};
use crate::request::{EditRequest, ImageBatch, ScenePrompt, VideoBatch, VideoRequest};

const AUTH_REQUIRED_MESSAGE: &str = "Authentication required";
const GENERATION_FAILED_MESSAGE: &str = "Generation failed";
const EDIT_FAILED_MESSAGE: &str = "Edit failed";
const RECOVERY_FAILED_MESSAGE: &str = "Recovery failed";

/// Progress cap while a video is still polling.
const POLLING_PROGRESS_CEILING: u8 = 95;
const POLLING_PROGRESS_STEP: u8 = 5;
const RECOVERED_PROGRESS: u8 = 50;

fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Labels a job uses for its terminal states.
struct Terminal {
    completed: String,
    failed: &'static str,
    removal_delay: Duration,
}

/// Feeds poll progress of a fresh video job into the registry and records
/// the operation handle as soon as it exists.
struct SubmittedVideoProgress<'a> {
    orchestrator: &'a Orchestrator,
    job_id: &'a str,
    index: usize,
    request: &'a VideoRequest,
}

#[async_trait]
impl<'a> VideoProgress for SubmittedVideoProgress<'a> {
    fn on_progress(&self, message: &str) {
        let text = format!("[{}] {}", self.index, message);
        self.orchestrator
            .inner
            .registry
            .update_with(self.job_id, |job| {
                JobPatch::message(text).with_progress(
                    job.progress
                        .saturating_add(POLLING_PROGRESS_STEP)
                        .min(POLLING_PROGRESS_CEILING),
                )
            });
    }

    async fn on_operation_started(&self, operation_name: &str) {
        let op = PendingOperation::for_video(self.job_id, operation_name, self.request);
        let result = self
            .orchestrator
            .with_archive(move |archive| archive.put_pending_operation(&op))
            .await;
        if let Err(e) = result {
            log::error!(
                "Failed to record pending operation {} for job {}: {}",
                operation_name,
                self.job_id,
                e
            );
        }
    }
}

/// Progress of a resumed video job.
struct RecoveredVideoProgress<'a> {
    orchestrator: &'a Orchestrator,
    job_id: &'a str,
}

impl VideoProgress for RecoveredVideoProgress<'_> {
    fn on_progress(&self, message: &str) {
        self.orchestrator.inner.registry.update(
            self.job_id,
            JobPatch::message(format!("Recovered: {}", message))
                .with_progress(RECOVERED_PROGRESS),
        );
    }
}

impl Orchestrator {
    // ─── Submission ─────────────────────────────────────────────────────────

    /// Starts one image job per non-blank prompt.
    ///
    /// The batch also becomes the current image form. Must be called from
    /// within a Tokio runtime.
    pub fn submit_images(&self, batch: ImageBatch) -> Result<Submission, ValidationError> {
        batch.validate()?;
        self.set_image_form(batch.clone());

        let scenes = batch.scenes();
        let total = scenes.len();
        let mut submission = Submission::new();

        for (i, scene) in scenes.into_iter().enumerate() {
            let job_id = new_job_id();
            self.inner.registry.create(BackgroundJob::running(
                &job_id,
                JobKind::Image,
                &format!("Generating scene #{} of {}...", i + 1, total),
                10,
            ));

            let this = self.clone();
            let batch = batch.clone();
            let id = job_id.clone();
            let handle =
                tokio::spawn(async move { this.run_image_job(id, i + 1, batch, scene).await });
            submission.push(job_id, handle);
        }

        log::info!("Submitted {} image jobs", submission.len());
        Ok(submission)
    }

    /// Starts one video job per non-blank prompt, all sharing the batch's
    /// frames and settings.
    pub fn submit_videos(&self, batch: VideoBatch) -> Result<Submission, ValidationError> {
        batch.validate()?;
        self.set_video_form(batch.clone());

        let requests = batch.requests();
        let total = requests.len();
        let mut submission = Submission::new();

        for (i, request) in requests.into_iter().enumerate() {
            let job_id = new_job_id();
            self.inner.registry.create(BackgroundJob::running(
                &job_id,
                JobKind::Video,
                &format!("Preparing video #{} of {}...", i + 1, total),
                5,
            ));

            let this = self.clone();
            let id = job_id.clone();
            let handle =
                tokio::spawn(async move { this.run_video_job(id, i + 1, request).await });
            submission.push(job_id, handle);
        }

        log::info!("Submitted {} video jobs", submission.len());
        Ok(submission)
    }

    /// Starts a masked edit.
    pub fn submit_edit(&self, request: EditRequest) -> Result<Submission, ValidationError> {
        request.validate()?;

        let job_id = new_job_id();
        self.inner.registry.create(BackgroundJob::running(
            &job_id,
            JobKind::Edit,
            "Applying smart edit...",
            10,
        ));

        let this = self.clone();
        let id = job_id.clone();
        let handle = tokio::spawn(async move { this.run_edit_job(id, request).await });

        let mut submission = Submission::new();
        submission.push(job_id, handle);
        Ok(submission)
    }

    /// Resumes every pending video operation not already tracked.
    ///
    /// Operations of unknown kinds are left in the store untouched.
    pub fn recover_pending(&self) -> Result<Submission, DatabaseError> {
        let mut submission = Submission::new();

        for op in self.inner.archive.list_pending_operations()? {
            if op.kind != OperationKind::Video {
                log::info!(
                    "Skipping pending operation {} of unsupported kind {}",
                    op.id,
                    op.kind.as_str()
                );
                continue;
            }

            let job = BackgroundJob::running(
                &op.id,
                JobKind::Video,
                "Recovering previous operation...",
                RECOVERED_PROGRESS,
            );
            if !self.inner.registry.create(job) {
                log::debug!("Pending operation {} is already being tracked", op.id);
                continue;
            }

            log::info!("Recovering video operation {}", op.operation_name);
            let this = self.clone();
            let job_id = op.id.clone();
            let handle = tokio::spawn(async move { this.run_recovery_job(op).await });
            submission.push(job_id, handle);
        }

        Ok(submission)
    }

    // ─── Job bodies ─────────────────────────────────────────────────────────

    async fn run_image_job(
        self,
        job_id: String,
        index: usize,
        batch: ImageBatch,
        scene: ScenePrompt,
    ) -> JobOutcome {
        let terminal = Terminal {
            completed: format!("Scene #{} complete!", index),
            failed: GENERATION_FAILED_MESSAGE,
            removal_delay: self.inner.settings.image_removal_delay,
        };

        let request = batch.request_for(&scene);
        match self.inner.gateway.generate_image(&request).await {
            Ok(image) => {
                let prompt = scene.text.clone();
                let item = GalleryItem::new(
                    MediaKind::Image,
                    MediaSource::from(image),
                    &prompt,
                    batch.aspect_ratio,
                    GenerationMetadata::Image(ImageMetadata {
                        aspect_ratio: batch.aspect_ratio,
                        model: batch.model,
                        quality: batch.quality,
                        style: batch.style.clone(),
                        scene,
                        identity_refs: batch.identity_refs.clone(),
                        background_ref: batch.background_ref.clone(),
                        base_image: batch.base_image.clone(),
                    }),
                );
                self.succeed(&job_id, item, terminal).await
            }
            Err(e) => self.fail(&job_id, e.into(), terminal).await,
        }
    }

    async fn run_edit_job(self, job_id: String, request: EditRequest) -> JobOutcome {
        let terminal = Terminal {
            completed: "Edit complete!".to_string(),
            failed: EDIT_FAILED_MESSAGE,
            removal_delay: self.inner.settings.image_removal_delay,
        };

        match self
            .inner
            .gateway
            .generate_image(&request.to_image_request())
            .await
        {
            Ok(image) => {
                let item = GalleryItem::new(
                    MediaKind::Image,
                    MediaSource::from(image),
                    &request.instruction,
                    request.aspect_ratio,
                    GenerationMetadata::Edit(EditMetadata {
                        instruction: request.instruction.clone(),
                        model: request.model,
                        quality: request.quality,
                        base_image: request.source,
                        mask: request.mask,
                        parent: request.parent_metadata.map(Box::new),
                    }),
                );
                self.succeed(&job_id, item, terminal).await
            }
            Err(e) => self.fail(&job_id, e.into(), terminal).await,
        }
    }

    async fn run_video_job(self, job_id: String, index: usize, request: VideoRequest) -> JobOutcome {
        let terminal = Terminal {
            completed: format!("Video #{} complete!", index),
            failed: GENERATION_FAILED_MESSAGE,
            removal_delay: self.inner.settings.video_removal_delay,
        };

        let progress = SubmittedVideoProgress {
            orchestrator: &self,
            job_id: &job_id,
            index,
            request: &request,
        };
        let result = self
            .inner
            .gateway
            .generate_video(&request, None, &progress)
            .await;

        match result {
            Ok(media) => {
                let item = self.video_item(media, &request).await;
                self.succeed(&job_id, item, terminal).await
            }
            Err(e) => self.fail(&job_id, e.into(), terminal).await,
        }
    }

    async fn run_recovery_job(self, op: PendingOperation) -> JobOutcome {
        let terminal = Terminal {
            completed: "Video complete!".to_string(),
            failed: RECOVERY_FAILED_MESSAGE,
            removal_delay: self.inner.settings.video_removal_delay,
        };

        let Some(request) = op.video_request() else {
            log::error!(
                "Pending operation {} has unreadable parameters, dropping it",
                op.id
            );
            return self
                .fail(
                    &op.id,
                    FailureCause::Other("stored request parameters are unreadable".to_string()),
                    terminal,
                )
                .await;
        };

        let progress = RecoveredVideoProgress {
            orchestrator: &self,
            job_id: &op.id,
        };
        let result = self
            .inner
            .gateway
            .generate_video(&request, Some(&op.operation_name), &progress)
            .await;

        match result {
            Ok(media) => {
                let item = self.video_item(media, &request).await;
                self.succeed(&op.id, item, terminal).await
            }
            Err(e) => self.fail(&op.id, e.into(), terminal).await,
        }
    }

    // ─── Terminal transitions ───────────────────────────────────────────────

    async fn succeed(&self, job_id: &str, item: GalleryItem, terminal: Terminal) -> JobOutcome {
        self.record_result_blocking(item.clone()).await;
        self.inner
            .registry
            .update(job_id, JobPatch::completed(terminal.completed));
        self.clear_pending(job_id).await;
        self.schedule_removal(job_id, terminal.removal_delay);

        log::info!("Job {} produced {}", job_id, item.id);
        JobOutcome::Completed {
            job_id: job_id.to_string(),
            item,
        }
    }

    async fn fail(&self, job_id: &str, cause: FailureCause, terminal: Terminal) -> JobOutcome {
        let auth_required = matches!(cause, FailureCause::Gateway(GatewayError::ApiKeyExpired));
        let reason = cause.to_string();

        if auth_required {
            log::warn!("Job {}: credential rejected by the service", job_id);
            self.inner.credentials.prompt_credential_selection().await;
            self.inner
                .registry
                .update(job_id, JobPatch::failed(AUTH_REQUIRED_MESSAGE));
        } else {
            log::error!("Job {} failed: {}", job_id, reason);
            self.inner
                .registry
                .update(job_id, JobPatch::failed(terminal.failed).with_error(&reason));
        }

        self.clear_pending(job_id).await;
        self.schedule_removal(job_id, terminal.removal_delay);

        JobOutcome::Failed {
            job_id: job_id.to_string(),
            reason,
            auth_required,
        }
    }

    // ─── Media ──────────────────────────────────────────────────────────────

    /// Builds the gallery item for a downloaded video, writing the bytes to
    /// the media directory when one is configured.
    async fn video_item(&self, media: DownloadedMedia, request: &VideoRequest) -> GalleryItem {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&media.bytes);
        let mut item = GalleryItem::new(
            MediaKind::Video,
            MediaSource::Inline {
                mime_type: media.mime_type.clone(),
                data: encoded,
            },
            &request.prompt,
            request.aspect_ratio,
            GenerationMetadata::Video(VideoMetadata {
                request: request.clone(),
            }),
        );

        if let Some(dir) = &self.inner.settings.media_directory {
            match write_media(dir, &item.id, &media).await {
                Ok(uri) => {
                    item.media = MediaSource::Uri {
                        uri,
                        mime_type: media.mime_type.clone(),
                    }
                }
                Err(e) => log::warn!(
                    "Failed to write video {} to {}, keeping it inline: {}",
                    item.id,
                    dir.display(),
                    e
                ),
            }
        }
        item
    }
}

/// Why a job ended in failure.
enum FailureCause {
    Gateway(GatewayError),
    Other(String),
}

impl From<GatewayError> for FailureCause {
    fn from(e: GatewayError) -> Self {
        FailureCause::Gateway(e)
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Gateway(e) => write!(f, "{}", e),
            FailureCause::Other(message) => f.write_str(message),
        }
    }
}

/// File extension for a video MIME type, e.g. `video/mp4` to `mp4`.
fn extension_for(mime_type: &str) -> &str {
    mime_type
        .split(';')
        .next()
        .and_then(|m| m.split('/').nth(1))
        .map(str::trim)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("bin")
}

async fn write_media(dir: &Path, id: &str, media: &DownloadedMedia) -> std::io::Result<String> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.{}", id, extension_for(&media.mime_type)));
    tokio::fs::write(&path, &media.bytes).await?;

    let path = std::path::absolute(&path)?;
    Ok(reqwest::Url::from_file_path(&path)
        .map(|url| url.to_string())
        .unwrap_or_else(|()| format!("file://{}", path.display())))
}
