//! REST client for the Generative Language API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    DownloadedMedia, ImageConfig, OperationStatus, Part, RemoteError, RemoteService,
    VideoSubmission,
};
use crate::model::{ImageModel, InlineImage};

/// Default connect timeout for HTTP requests (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error body carried into an error message.
const MAX_ERROR_BODY_LENGTH: usize = 200;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// [`RemoteService`] over HTTPS.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl GeminiClient {
    /// Creates a client for `base_url` (for example
    /// `https://generativelanguage.googleapis.com/v1beta`).
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        request_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        Url::parse(base_url)
            .map_err(|e| RemoteError::new(None, format!("Invalid base URL '{}': {}", base_url, e)))?;
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| RemoteError::new(None, format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, RemoteError> {
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn get_json(&self, url: &str) -> Result<Value, RemoteError> {
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }
}

#[async_trait]
impl RemoteService for GeminiClient {
    async fn generate_content(
        &self,
        model: ImageModel,
        parts: &[Part],
        config: &ImageConfig,
    ) -> Result<Vec<Part>, RemoteError> {
        let url = self.model_url(model.as_str(), "generateContent");
        let body = generate_content_body(parts, config);
        let value = self.post_json(&url, &body).await?;

        let response: GenerateContentResponse = serde_json::from_value(value)
            .map_err(|e| RemoteError::new(None, format!("Malformed response: {}", e)))?;
        Ok(response.into_parts())
    }

    async fn submit_video(
        &self,
        submission: &VideoSubmission,
    ) -> Result<OperationStatus, RemoteError> {
        let url = self.model_url(submission.model.as_str(), "predictLongRunning");
        let value = self.post_json(&url, &video_body(submission)).await?;
        parse_operation(value)
    }

    async fn poll_operation(&self, name: &str) -> Result<OperationStatus, RemoteError> {
        let url = format!("{}/{}", self.base_url, name.trim_start_matches('/'));
        let value = self.get_json(&url).await?;
        parse_operation(value)
    }

    async fn download(&self, uri: &str) -> Result<DownloadedMedia, RemoteError> {
        let mut url = Url::parse(uri)
            .map_err(|e| RemoteError::new(None, format!("Invalid download link: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());

        let response = self.client.get(url).send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::new(
                Some(status.as_u16()),
                "video download was refused",
            ));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "video/mp4".to_string());
        let bytes = response.bytes().await.map_err(transport_error)?;

        Ok(DownloadedMedia {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }
}

// ─── Wire shapes ────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<WireInlineData>,
}

impl From<&Part> for WirePart {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text(text) => WirePart {
                text: Some(text.clone()),
                inline_data: None,
            },
            Part::Inline(image) => WirePart {
                text: None,
                inline_data: Some(WireInlineData {
                    mime_type: image.mime_type.clone(),
                    data: image.data.clone(),
                }),
            },
        }
    }
}

#[derive(Deserialize, Default)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize)]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireContent>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
}

impl GenerateContentResponse {
    fn into_parts(self) -> Vec<Part> {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| match (p.inline_data, p.text) {
                        (Some(data), _) => {
                            Some(Part::Inline(InlineImage::new(data.data, data.mime_type)))
                        }
                        (None, Some(text)) => Some(Part::Text(text)),
                        (None, None) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn generate_content_body(parts: &[Part], config: &ImageConfig) -> Value {
    let parts: Vec<WirePart> = parts.iter().map(WirePart::from).collect();
    let mut image_config = json!({ "aspectRatio": config.aspect_ratio.as_str() });
    if let Some(size) = config.image_size {
        image_config["imageSize"] = json!(size.as_str());
    }
    json!({
        "contents": [{ "parts": parts }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
            "imageConfig": image_config,
        },
    })
}

fn wire_image(image: &InlineImage) -> Value {
    json!({ "bytesBase64Encoded": image.data, "mimeType": image.mime_type })
}

fn video_body(submission: &VideoSubmission) -> Value {
    let mut instance = json!({
        "prompt": submission.prompt,
        "image": wire_image(&submission.image),
    });
    if let Some(last) = &submission.last_frame {
        instance["lastFrame"] = wire_image(last);
    }
    if !submission.reference_images.is_empty() {
        instance["referenceImages"] = Value::Array(
            submission
                .reference_images
                .iter()
                .map(|img| json!({ "image": wire_image(img), "referenceType": "asset" }))
                .collect(),
        );
    }

    json!({
        "instances": [instance],
        "parameters": {
            "sampleCount": 1,
            "aspectRatio": submission.aspect_ratio.as_str(),
            "resolution": submission.resolution.as_str(),
        },
    })
}

fn parse_operation(value: Value) -> Result<OperationStatus, RemoteError> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteError::new(None, "Operation response has no name"))?
        .to_string();
    let done = value.get("done").and_then(Value::as_bool).unwrap_or(false);
    let video_uri = value
        .pointer("/response/generateVideoResponse/generatedSamples/0/video/uri")
        .and_then(Value::as_str)
        .map(str::to_string);
    let error = value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(OperationStatus {
        name,
        done,
        video_uri,
        error,
    })
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    RemoteError::new(e.status().map(|s| s.as_u16()), e.to_string())
}

async fn read_json(response: Response) -> Result<Value, RemoteError> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| truncate(&body));
        return Err(RemoteError::new(Some(status.as_u16()), message));
    }

    serde_json::from_str(&body)
        .map_err(|e| RemoteError::new(None, format!("Malformed response: {}", e)))
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        Some((idx, _)) => format!("{}... (truncated)", &body[..idx]),
        None => body.to_string(),
    }
}
