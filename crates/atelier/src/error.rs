use std::path::PathBuf;
use thiserror::Error;

use crate::model::MediaKind;

#[derive(Error, Debug)]
pub enum AtelierError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Generation error: {0}")]
    Gateway(#[from] crate::gateway::GatewayError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Input problems caught before any job is created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Enter at least one {} prompt", kind_label(.kind))]
    EmptyPrompt { kind: MediaKind },

    #[error("Upload a start frame before generating a video")]
    MissingStartFrame,

    #[error("Gallery item '{id}' is not an inline image and cannot be edited")]
    NotEditable { id: String },

    #[error("No {} form is configured to regenerate from", kind_label(.kind))]
    NoActiveForm { kind: MediaKind },

    #[error("Gallery item '{id}' not found")]
    UnknownItem { id: String },
}

fn kind_label(kind: &MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "image",
        MediaKind::Video => "video",
    }
}

pub type Result<T> = std::result::Result<T, AtelierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages() {
        let err = ValidationError::EmptyPrompt {
            kind: MediaKind::Video,
        };
        assert_eq!(err.to_string(), "Enter at least one video prompt");

        let err: AtelierError = ValidationError::UnknownItem { id: "x".into() }.into();
        assert_eq!(err.to_string(), "Validation error: Gallery item 'x' not found");
    }
}
