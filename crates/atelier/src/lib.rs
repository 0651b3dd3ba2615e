pub mod archive;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod model;
pub mod orchestrator;
pub mod reconcile;
pub mod request;
pub mod secrets;
pub mod telemetry;

pub use archive::{ArchiveStore, SqliteArchive};
pub use config::{load_config, StudioConfig};
pub use credentials::{CredentialProvider, StaticCredentials};
pub use db::{Database, DatabaseError};
pub use error::{AtelierError, ConfigError, Result, ValidationError};
pub use gateway::{Gateway, GatewayError, GeminiClient, PollSettings, RemoteService};
pub use jobs::{BackgroundJob, JobEvent, JobKind, JobPatch, JobRegistry, JobStatus};
pub use model::{GalleryItem, GenerationMetadata, InlineImage, MediaKind, MediaSource};
pub use orchestrator::{ArchiveEvent, JobOutcome, Orchestrator, OrchestratorSettings, Submission};
pub use request::{EditRequest, ImageBatch, ScenePrompt, VideoBatch, VideoRequest};
pub use secrets::{SecretError, SecretSource};
pub use telemetry::{init_logging, LogFormat};
