//! Generation gateway.
//!
//! Turns domain requests into calls on a [`RemoteService`] and normalizes
//! what comes back. Image calls are a single round trip. Video calls submit
//! a long-running operation (or resume an existing one) and poll it at a fixed
//! interval until the service reports it done, then fetch the result.

pub mod client;
pub mod error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{
    AspectRatio, ImageModel, ImageQuality, InlineImage, VideoModel, VideoQuality,
};
use crate::request::{ImageRequest, VideoRequest};

pub use client::GeminiClient;
pub use error::{GatewayError, RemoteError, Result};

/// Wire prompt used when a video request reaches the gateway without text.
pub const DEFAULT_VIDEO_PROMPT: &str = "Create a smooth cinematic video with natural motion";

/// Rotating status lines shown while a video operation is polled.
pub const POLL_MESSAGES: [&str; 4] = [
    "Analyzing scene composition...",
    "Computing object motion...",
    "AI rendering in progress...",
    "Final encoding...",
];

const REQUESTING_MESSAGE: &str = "Requesting video generation...";
const RECOVERING_MESSAGE: &str = "Recovering previous operation...";

/// One typed content part of an image generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Inline(InlineImage),
}

impl Part {
    fn text(s: impl Into<String>) -> Self {
        Part::Text(s.into())
    }
}

/// Output settings of an image generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageConfig {
    pub aspect_ratio: AspectRatio,
    /// Only set for models that accept a size tier.
    pub image_size: Option<ImageQuality>,
}

/// A video generation call as it goes over the wire, constraints applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSubmission {
    pub model: VideoModel,
    pub prompt: String,
    pub image: InlineImage,
    pub last_frame: Option<InlineImage>,
    /// Subject references, sent as `asset` references.
    pub reference_images: Vec<InlineImage>,
    pub aspect_ratio: AspectRatio,
    pub resolution: VideoQuality,
}

/// Server-side state of a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    pub name: String,
    pub done: bool,
    /// Locator of the generated video once done.
    pub video_uri: Option<String>,
    /// Failure reported by the operation itself.
    pub error: Option<String>,
}

impl OperationStatus {
    /// Status of an operation known only by name.
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            video_uri: None,
            error: None,
        }
    }
}

/// Fetched result bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Call boundary to the remote generation service.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Runs one synchronous content generation and returns the response parts.
    async fn generate_content(
        &self,
        model: ImageModel,
        parts: &[Part],
        config: &ImageConfig,
    ) -> std::result::Result<Vec<Part>, RemoteError>;

    /// Starts a video generation and returns its operation handle.
    async fn submit_video(
        &self,
        submission: &VideoSubmission,
    ) -> std::result::Result<OperationStatus, RemoteError>;

    /// Queries an operation by name.
    async fn poll_operation(&self, name: &str) -> std::result::Result<OperationStatus, RemoteError>;

    /// Fetches the bytes behind a result locator.
    async fn download(&self, uri: &str) -> std::result::Result<DownloadedMedia, RemoteError>;
}

/// Receives progress from a video generation.
///
/// `on_progress` is called from inside the poll loop and must not block.
#[async_trait]
pub trait VideoProgress: Send + Sync {
    fn on_progress(&self, message: &str);

    /// Called with the handle of a freshly submitted operation before the
    /// first poll. Not called when resuming. Polling waits for it to return.
    async fn on_operation_started(&self, _operation_name: &str) {}
}

/// Progress sink that drops everything.
pub struct NoopProgress;

impl VideoProgress for NoopProgress {
    fn on_progress(&self, _message: &str) {}
}

/// Poll loop tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Consecutive failed polls tolerated before giving up. `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_consecutive_failures: None,
        }
    }
}

/// Request shaping and result normalization over a [`RemoteService`].
#[derive(Clone)]
pub struct Gateway {
    remote: Arc<dyn RemoteService>,
    poll: PollSettings,
}

impl Gateway {
    pub fn new(remote: Arc<dyn RemoteService>, poll: PollSettings) -> Self {
        Self { remote, poll }
    }

    pub fn poll_settings(&self) -> PollSettings {
        self.poll
    }

    /// Generates (or edits) one image and returns the first inline payload.
    pub async fn generate_image(&self, request: &ImageRequest) -> Result<InlineImage> {
        let parts = image_parts(request);
        let config = ImageConfig {
            aspect_ratio: request.aspect_ratio,
            image_size: request
                .model
                .supports_image_size()
                .then_some(request.quality),
        };

        log::debug!(
            "Generating image with {} ({} parts)",
            request.model.as_str(),
            parts.len()
        );
        let response = self
            .remote
            .generate_content(request.model, &parts, &config)
            .await?;

        response
            .into_iter()
            .find_map(|part| match part {
                Part::Inline(image) => Some(image),
                Part::Text(_) => None,
            })
            .ok_or(GatewayError::NoImageInResult)
    }

    /// Generates one video.
    ///
    /// With `resume` set, submission is skipped and polling starts on the
    /// given operation. Otherwise the new handle is handed to
    /// [`VideoProgress::on_operation_started`] before polling begins.
    pub async fn generate_video(
        &self,
        request: &VideoRequest,
        resume: Option<&str>,
        progress: &dyn VideoProgress,
    ) -> Result<DownloadedMedia> {
        let mut status = match resume {
            Some(name) => {
                progress.on_progress(RECOVERING_MESSAGE);
                OperationStatus::pending(name)
            }
            None => {
                progress.on_progress(REQUESTING_MESSAGE);
                let submission = effective_submission(request);
                let status = self.remote.submit_video(&submission).await?;
                log::info!("Video operation started: {}", status.name);
                progress.on_operation_started(&status.name).await;
                status
            }
        };

        let mut tick = 0usize;
        let mut failures = 0u32;
        while !status.done {
            tokio::time::sleep(self.poll.interval).await;
            progress.on_progress(POLL_MESSAGES[tick % POLL_MESSAGES.len()]);
            tick += 1;

            match self.remote.poll_operation(&status.name).await {
                Ok(next) => {
                    failures = 0;
                    status = next;
                }
                Err(e) if e.is_auth_expired() => return Err(GatewayError::ApiKeyExpired),
                Err(e) => {
                    failures += 1;
                    log::warn!(
                        "Polling {} failed ({} in a row), retrying: {}",
                        status.name,
                        failures,
                        e
                    );
                    if let Some(max) = self.poll.max_consecutive_failures {
                        if failures > max {
                            return Err(GatewayError::PollingAbandoned {
                                operation_name: status.name,
                                failures,
                            });
                        }
                    }
                }
            }
        }

        if let Some(message) = status.error {
            return Err(RemoteError::new(None, message).into());
        }
        let uri = status.video_uri.ok_or(GatewayError::MissingResultLink)?;

        self.remote
            .download(&uri)
            .await
            .map_err(|e| GatewayError::DownloadFailed {
                message: e.to_string(),
            })
    }
}

/// Builds the ordered part list for an image request.
///
/// Base canvas first (inpainting when a mask is present, variation
/// otherwise), then composition, environment and identity references, and
/// the scene text last.
pub fn image_parts(request: &ImageRequest) -> Vec<Part> {
    let mut parts = Vec::new();

    if let Some(base) = &request.base_image {
        match &request.mask {
            Some(mask) => {
                parts.push(Part::text("TASK: IMAGE EDITING (INPAINTING)"));
                parts.push(Part::text("[ORIGINAL IMAGE TO MODIFY]"));
                parts.push(Part::Inline(base.clone()));
                parts.push(Part::text(
                    "[MASK IMAGE] The white pixels in this mask indicate the area that MUST be replaced or added to. The black pixels MUST remain unchanged.",
                ));
                parts.push(Part::Inline(mask.clone()));
            }
            None => {
                parts.push(Part::text("TASK: IMAGE VARIATION / EVOLUTION"));
                parts.push(Part::text(
                    "[BASE CANVAS] Create a new image heavily inspired by this one.",
                ));
                parts.push(Part::Inline(base.clone()));
            }
        }
    }

    if let Some(composition) = &request.composition_ref {
        parts.push(Part::text(
            "[COMPOSITION REFERENCE] Match the layout and composition of this image.",
        ));
        parts.push(Part::Inline(composition.clone()));
    }

    if let Some(background) = &request.background_ref {
        parts.push(Part::text(
            "[ENVIRONMENT REFERENCE] Use the background/lighting/atmosphere from this image.",
        ));
        parts.push(Part::Inline(background.clone()));
    }

    for (i, identity) in request.identity_refs.iter().enumerate() {
        parts.push(Part::Text(format!(
            "[SUBJECT IDENTITY #{}] Maintain the visual identity of this person/object.",
            i + 1
        )));
        parts.push(Part::Inline(identity.clone()));
    }

    parts.push(Part::Text(format!(
        "SCENE TO GENERATE: {}\n\nPlease generate a highly detailed, professional cinematic result.",
        request.prompt
    )));
    parts
}

/// Applies the service's model constraints to a video request.
///
/// The quality model only accepts subject references at 720p and 16:9.
pub fn effective_submission(request: &VideoRequest) -> VideoSubmission {
    let constrained =
        request.model == VideoModel::Quality && !request.reference_images.is_empty();
    let (resolution, aspect_ratio) = if constrained {
        (VideoQuality::Hd, AspectRatio::Landscape)
    } else {
        (request.resolution, request.aspect_ratio)
    };

    let prompt = if request.prompt.trim().is_empty() {
        DEFAULT_VIDEO_PROMPT.to_string()
    } else {
        request.prompt.clone()
    };

    VideoSubmission {
        model: request.model,
        prompt,
        image: request.start_frame.clone(),
        last_frame: request.end_frame.clone(),
        reference_images: request.reference_images.clone(),
        aspect_ratio,
        resolution,
    }
}
