//! Domain types shared by the archive, gateway and orchestrator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::{ScenePrompt, VideoRequest};

/// Output aspect ratio tag understood by the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    ThreeByFour,
    #[serde(rename = "4:3")]
    FourByThree,
    #[serde(rename = "21:9")]
    UltraWide,
    #[serde(rename = "9:21")]
    UltraTall,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
            AspectRatio::ThreeByFour => "3:4",
            AspectRatio::FourByThree => "4:3",
            AspectRatio::UltraWide => "21:9",
            AspectRatio::UltraTall => "9:21",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "16:9" => Ok(AspectRatio::Landscape),
            "9:16" => Ok(AspectRatio::Portrait),
            "1:1" => Ok(AspectRatio::Square),
            "3:4" => Ok(AspectRatio::ThreeByFour),
            "4:3" => Ok(AspectRatio::FourByThree),
            "21:9" => Ok(AspectRatio::UltraWide),
            "9:21" => Ok(AspectRatio::UltraTall),
            other => Err(format!("unknown aspect ratio '{}'", other)),
        }
    }
}

/// Image generation models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageModel {
    #[serde(rename = "gemini-2.5-flash-image")]
    Flash,
    #[serde(rename = "gemini-3-pro-image-preview")]
    Pro,
}

impl ImageModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageModel::Flash => "gemini-2.5-flash-image",
            ImageModel::Pro => "gemini-3-pro-image-preview",
        }
    }

    /// Only the pro model accepts an explicit output size tier.
    pub fn supports_image_size(&self) -> bool {
        matches!(self, ImageModel::Pro)
    }
}

/// Video generation models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoModel {
    #[serde(rename = "veo-3.1-fast-generate-preview")]
    Fast,
    #[serde(rename = "veo-3.1-generate-preview")]
    Quality,
}

impl VideoModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoModel::Fast => "veo-3.1-fast-generate-preview",
            VideoModel::Quality => "veo-3.1-generate-preview",
        }
    }
}

/// Output size tier for image models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageQuality {
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl ImageQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageQuality::OneK => "1K",
            ImageQuality::TwoK => "2K",
            ImageQuality::FourK => "4K",
        }
    }
}

/// Output resolution for video models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoQuality {
    #[serde(rename = "720p")]
    Hd,
    #[serde(rename = "1080p")]
    FullHd,
}

impl VideoQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoQuality::Hd => "720p",
            VideoQuality::FullHd => "1080p",
        }
    }
}

/// Kind of media held by a gallery item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "IMAGE",
            MediaKind::Video => "VIDEO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IMAGE" => Some(MediaKind::Image),
            "VIDEO" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// A base64-encoded image with its MIME type, as exchanged with the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineImage {
    pub data: String,
    pub mime_type: String,
}

impl InlineImage {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Parses a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (mime_type, data) = rest.split_once(";base64,")?;
        if mime_type.is_empty() || data.is_empty() {
            return None;
        }
        Some(Self::new(data, mime_type))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Where a gallery item's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum MediaSource {
    /// Base64 payload stored alongside the record.
    Inline { mime_type: String, data: String },
    /// External locator (file or remote URI).
    Uri { mime_type: String, uri: String },
}

impl MediaSource {
    pub fn mime_type(&self) -> &str {
        match self {
            MediaSource::Inline { mime_type, .. } | MediaSource::Uri { mime_type, .. } => {
                mime_type
            }
        }
    }

    /// Returns the payload as an inline image when it is stored inline.
    pub fn as_inline_image(&self) -> Option<InlineImage> {
        match self {
            MediaSource::Inline { mime_type, data } => {
                Some(InlineImage::new(data.clone(), mime_type.clone()))
            }
            MediaSource::Uri { .. } => None,
        }
    }
}

impl From<InlineImage> for MediaSource {
    fn from(image: InlineImage) -> Self {
        MediaSource::Inline {
            mime_type: image.mime_type,
            data: image.data,
        }
    }
}

/// Everything that shaped an image generation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub aspect_ratio: AspectRatio,
    pub model: ImageModel,
    pub quality: ImageQuality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub scene: ScenePrompt,
    #[serde(default)]
    pub identity_refs: Vec<InlineImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_ref: Option<InlineImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image: Option<InlineImage>,
}

/// Everything that shaped a video generation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub request: VideoRequest,
}

/// Everything that shaped an inpainting edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMetadata {
    pub instruction: String,
    pub model: ImageModel,
    pub quality: ImageQuality,
    pub base_image: InlineImage,
    pub mask: InlineImage,
    /// Metadata of the item the edit started from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<GenerationMetadata>>,
}

/// Provenance snapshot recorded with every gallery item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GenerationMetadata {
    Image(ImageMetadata),
    Video(VideoMetadata),
    Edit(EditMetadata),
}

/// A completed, durably archived generation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryItem {
    pub id: String,
    pub kind: MediaKind,
    pub media: MediaSource,
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    pub metadata: GenerationMetadata,
    #[serde(default)]
    pub is_hidden: bool,
}

impl GalleryItem {
    /// Creates a new visible item with a fresh id and the current timestamp.
    pub fn new(
        kind: MediaKind,
        media: MediaSource,
        prompt: &str,
        aspect_ratio: AspectRatio,
        metadata: GenerationMetadata,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            media,
            timestamp: Utc::now(),
            prompt: prompt.to_string(),
            aspect_ratio,
            metadata,
            is_hidden: false,
        }
    }
}

/// Kind of remote operation recorded for resumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    Video,
    /// A kind written by a newer build; never resumed.
    Other(String),
}

impl OperationKind {
    pub fn as_str(&self) -> &str {
        match self {
            OperationKind::Video => "VIDEO",
            OperationKind::Other(kind) => kind,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "VIDEO" => OperationKind::Video,
            other => OperationKind::Other(other.to_string()),
        }
    }
}

/// Durable marker for a video generation still running server-side.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    /// Equal to the owning job's id.
    pub id: String,
    /// Handle returned by the generation service.
    pub operation_name: String,
    pub kind: OperationKind,
    /// Raw request parameters, kept as JSON so unknown kinds survive a round trip.
    pub params: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl PendingOperation {
    /// Records a submitted video request under the given job id.
    pub fn for_video(job_id: &str, operation_name: &str, request: &VideoRequest) -> Self {
        Self {
            id: job_id.to_string(),
            operation_name: operation_name.to_string(),
            kind: OperationKind::Video,
            params: serde_json::to_value(request).unwrap_or(serde_json::Value::Null),
            timestamp: Utc::now(),
        }
    }

    /// Decodes the stored parameters as a video request.
    pub fn video_request(&self) -> Option<VideoRequest> {
        serde_json::from_value(self.params.clone()).ok()
    }
}
