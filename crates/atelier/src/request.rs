//! Generation requests, one record per request kind.
//!
//! Batches are what the caller submits; each non-empty prompt entry in a batch
//! becomes one [`ImageRequest`] or [`VideoRequest`] and one independent job.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::{
    AspectRatio, GalleryItem, GenerationMetadata, ImageModel, ImageQuality, InlineImage,
    MediaKind, VideoModel, VideoQuality,
};

/// One scene description of an image batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenePrompt {
    pub text: String,
    /// Layout/composition guide for this scene only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition_ref: Option<InlineImage>,
}

impl ScenePrompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            composition_ref: None,
        }
    }

    pub fn with_composition_ref(mut self, image: InlineImage) -> Self {
        self.composition_ref = Some(image);
        self
    }

    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A fully shaped single image generation (or edit) call.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    /// Text sent to the model, style prefix included.
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    pub model: ImageModel,
    pub quality: ImageQuality,
    /// Image to modify; inpainting when `mask` is set, variation otherwise.
    pub base_image: Option<InlineImage>,
    pub mask: Option<InlineImage>,
    pub composition_ref: Option<InlineImage>,
    pub background_ref: Option<InlineImage>,
    pub identity_refs: Vec<InlineImage>,
}

/// A single video generation call. Also the persisted `params` of a pending operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRequest {
    #[serde(default)]
    pub prompt: String,
    pub start_frame: InlineImage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_frame: Option<InlineImage>,
    #[serde(default)]
    pub reference_images: Vec<InlineImage>,
    pub aspect_ratio: AspectRatio,
    pub model: VideoModel,
    pub resolution: VideoQuality,
}

/// Image batch as configured in the generator form.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    pub prompts: Vec<ScenePrompt>,
    pub style: Option<String>,
    pub aspect_ratio: AspectRatio,
    pub model: ImageModel,
    pub quality: ImageQuality,
    pub identity_refs: Vec<InlineImage>,
    pub background_ref: Option<InlineImage>,
    pub base_image: Option<InlineImage>,
}

impl ImageBatch {
    /// Creates a batch with default model settings and no references.
    pub fn new(prompts: Vec<ScenePrompt>) -> Self {
        Self {
            prompts,
            style: None,
            aspect_ratio: AspectRatio::Landscape,
            model: ImageModel::Pro,
            quality: ImageQuality::TwoK,
            identity_refs: vec![],
            background_ref: None,
            base_image: None,
        }
    }

    /// Fails when no prompt entry has any text.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompts.iter().all(ScenePrompt::is_blank) {
            return Err(ValidationError::EmptyPrompt {
                kind: MediaKind::Image,
            });
        }
        Ok(())
    }

    /// Non-blank prompt entries in submission order.
    pub fn scenes(&self) -> Vec<ScenePrompt> {
        self.prompts.iter().filter(|p| !p.is_blank()).cloned().collect()
    }

    /// Shapes the gateway request for one scene of this batch.
    pub fn request_for(&self, scene: &ScenePrompt) -> ImageRequest {
        let prompt = match self.style.as_deref().map(str::trim) {
            Some(style) if !style.is_empty() => format!("(Style: {}) {}", style, scene.text),
            _ => scene.text.clone(),
        };

        ImageRequest {
            prompt,
            aspect_ratio: self.aspect_ratio,
            model: self.model,
            quality: self.quality,
            base_image: self.base_image.clone(),
            mask: None,
            composition_ref: scene.composition_ref.clone(),
            background_ref: self.background_ref.clone(),
            identity_refs: self.identity_refs.clone(),
        }
    }
}

/// Video batch as configured in the generator form.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoBatch {
    pub prompts: Vec<String>,
    pub start_frame: InlineImage,
    pub end_frame: Option<InlineImage>,
    pub reference_images: Vec<InlineImage>,
    pub aspect_ratio: AspectRatio,
    pub model: VideoModel,
    pub resolution: VideoQuality,
}

impl VideoBatch {
    pub fn new(prompts: Vec<String>, start_frame: InlineImage) -> Self {
        Self {
            prompts,
            start_frame,
            end_frame: None,
            reference_images: vec![],
            aspect_ratio: AspectRatio::Landscape,
            model: VideoModel::Fast,
            resolution: VideoQuality::FullHd,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompts.iter().all(|p| p.trim().is_empty()) {
            return Err(ValidationError::EmptyPrompt {
                kind: MediaKind::Video,
            });
        }
        if self.start_frame.data.is_empty() {
            return Err(ValidationError::MissingStartFrame);
        }
        Ok(())
    }

    /// One request per non-blank prompt, in submission order.
    pub fn requests(&self) -> Vec<VideoRequest> {
        self.prompts
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|prompt| VideoRequest {
                prompt: prompt.clone(),
                start_frame: self.start_frame.clone(),
                end_frame: self.end_frame.clone(),
                reference_images: self.reference_images.clone(),
                aspect_ratio: self.aspect_ratio,
                model: self.model,
                resolution: self.resolution,
            })
            .collect()
    }
}

/// Masked edit of an archived image.
#[derive(Debug, Clone, PartialEq)]
pub struct EditRequest {
    pub instruction: String,
    pub source: InlineImage,
    pub mask: InlineImage,
    pub aspect_ratio: AspectRatio,
    pub model: ImageModel,
    pub quality: ImageQuality,
    pub parent_metadata: Option<GenerationMetadata>,
}

impl EditRequest {
    /// Builds an edit of `item`, which must be an inline image.
    pub fn from_item(
        item: &GalleryItem,
        instruction: &str,
        mask: InlineImage,
        model: ImageModel,
        quality: ImageQuality,
    ) -> Result<Self, ValidationError> {
        let source = match (item.kind, item.media.as_inline_image()) {
            (MediaKind::Image, Some(image)) => image,
            _ => {
                return Err(ValidationError::NotEditable {
                    id: item.id.clone(),
                })
            }
        };

        Ok(Self {
            instruction: instruction.to_string(),
            source,
            mask,
            aspect_ratio: item.aspect_ratio,
            model,
            quality,
            parent_metadata: Some(item.metadata.clone()),
        })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.instruction.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt {
                kind: MediaKind::Image,
            });
        }
        Ok(())
    }

    pub fn to_image_request(&self) -> ImageRequest {
        ImageRequest {
            prompt: self.instruction.clone(),
            aspect_ratio: self.aspect_ratio,
            model: self.model,
            quality: self.quality,
            base_image: Some(self.source.clone()),
            mask: Some(self.mask.clone()),
            composition_ref: None,
            background_ref: None,
            identity_refs: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImageMetadata, MediaSource};

    fn png() -> InlineImage {
        InlineImage::new("AAAA", "image/png")
    }

    #[test]
    fn test_image_batch_rejects_blank_prompts() {
        let batch = ImageBatch::new(vec![ScenePrompt::new("  "), ScenePrompt::new("")]);
        assert!(matches!(
            batch.validate(),
            Err(ValidationError::EmptyPrompt {
                kind: MediaKind::Image
            })
        ));
    }

    #[test]
    fn test_image_batch_skips_blank_entries() {
        let batch = ImageBatch::new(vec![
            ScenePrompt::new("a"),
            ScenePrompt::new(" "),
            ScenePrompt::new("b"),
        ]);
        batch.validate().unwrap();
        let texts: Vec<_> = batch.scenes().into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_style_prefix() {
        let mut batch = ImageBatch::new(vec![ScenePrompt::new("a red bicycle")]);
        let scene = batch.scenes().remove(0);
        assert_eq!(batch.request_for(&scene).prompt, "a red bicycle");

        batch.style = Some("Cinematic".to_string());
        assert_eq!(
            batch.request_for(&scene).prompt,
            "(Style: Cinematic) a red bicycle"
        );
    }

    #[test]
    fn test_scene_composition_ref_is_per_scene() {
        let batch = ImageBatch::new(vec![
            ScenePrompt::new("a").with_composition_ref(png()),
            ScenePrompt::new("b"),
        ]);
        let scenes = batch.scenes();
        assert!(batch.request_for(&scenes[0]).composition_ref.is_some());
        assert!(batch.request_for(&scenes[1]).composition_ref.is_none());
    }

    #[test]
    fn test_video_batch_validation() {
        let batch = VideoBatch::new(vec!["".into()], png());
        assert!(matches!(
            batch.validate(),
            Err(ValidationError::EmptyPrompt {
                kind: MediaKind::Video
            })
        ));

        let batch = VideoBatch::new(vec!["pan left".into()], InlineImage::new("", "image/png"));
        assert!(matches!(
            batch.validate(),
            Err(ValidationError::MissingStartFrame)
        ));

        let batch = VideoBatch::new(vec!["pan left".into(), " ".into(), "zoom".into()], png());
        batch.validate().unwrap();
        assert_eq!(batch.requests().len(), 2);
    }

    #[test]
    fn test_edit_request_from_video_item_is_rejected() {
        let item = GalleryItem::new(
            MediaKind::Video,
            MediaSource::Uri {
                mime_type: "video/mp4".into(),
                uri: "file:///tmp/v.mp4".into(),
            },
            "clip",
            AspectRatio::Landscape,
            GenerationMetadata::Image(ImageMetadata {
                aspect_ratio: AspectRatio::Landscape,
                model: ImageModel::Flash,
                quality: ImageQuality::OneK,
                style: None,
                scene: ScenePrompt::new("clip"),
                identity_refs: vec![],
                background_ref: None,
                base_image: None,
            }),
        );
        let result = EditRequest::from_item(&item, "add a hat", png(), ImageModel::Pro, ImageQuality::TwoK);
        assert!(matches!(result, Err(ValidationError::NotEditable { .. })));
    }

    #[test]
    fn test_edit_request_shapes_inpaint() {
        let edit = EditRequest {
            instruction: "add a hat".into(),
            source: png(),
            mask: InlineImage::new("MASK", "image/png"),
            aspect_ratio: AspectRatio::Square,
            model: ImageModel::Pro,
            quality: ImageQuality::TwoK,
            parent_metadata: None,
        };
        edit.validate().unwrap();
        let req = edit.to_image_request();
        assert_eq!(req.base_image, Some(png()));
        assert_eq!(req.mask.unwrap().data, "MASK");
    }
}
