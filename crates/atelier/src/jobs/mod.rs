//! In-memory tracking of generation jobs.
//!
//! Jobs live only as long as the process. A video job's durable counterpart is
//! its pending operation in the archive.

mod registry;

use serde::{Deserialize, Serialize};

pub use registry::JobRegistry;

/// What a job produces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Image,
    Video,
    Edit,
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Declared for completeness; jobs are registered already running.
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Progress tracker for one in-flight generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundJob {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Human-readable progress text.
    pub message: String,
    /// Percentage in `0..=100`.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackgroundJob {
    /// A job in the running state.
    pub fn running(id: &str, kind: JobKind, message: &str, progress: u8) -> Self {
        Self {
            id: id.to_string(),
            kind,
            status: JobStatus::Running,
            message: message.to_string(),
            progress: progress.min(100),
            error: None,
        }
    }

    fn apply(&mut self, patch: JobPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(message) = patch.message {
            self.message = message;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress.min(100);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
    }
}

/// Partial update of a job. `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub message: Option<String>,
    pub progress: Option<u8>,
    pub error: Option<String>,
}

impl JobPatch {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Terminal success.
    pub fn completed(message: impl Into<String>) -> Self {
        Self::message(message)
            .with_status(JobStatus::Completed)
            .with_progress(100)
    }

    /// Terminal failure without error detail.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::message(message).with_status(JobStatus::Failed)
    }
}

/// Registry change notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEvent {
    Created { job: BackgroundJob },
    Updated { job: BackgroundJob },
    Removed { id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_applies_only_set_fields() {
        let mut job = BackgroundJob::running("j", JobKind::Image, "start", 10);
        job.apply(JobPatch::message("halfway"));
        assert_eq!(job.message, "halfway");
        assert_eq!(job.progress, 10);
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut job = BackgroundJob::running("j", JobKind::Video, "start", 250);
        assert_eq!(job.progress, 100);
        job.apply(JobPatch::default().with_progress(180));
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_failed_patch_keeps_progress() {
        let mut job = BackgroundJob::running("j", JobKind::Edit, "start", 10);
        job.apply(JobPatch::failed("Edit failed").with_error("boom"));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert_eq!(job.progress, 10);
    }

    #[test]
    fn test_event_serialization() {
        let event = JobEvent::Removed { id: "j".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "removed");
        assert_eq!(json["id"], "j");
    }
}
