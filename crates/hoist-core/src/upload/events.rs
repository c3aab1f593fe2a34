//! Upload events - discriminated union for all task state changes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::errors::TransportFailure;
use super::types::{TaskId, UploadStatus};

/// Progress of a task, delivered on the progress channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Task identifier.
    pub task_id: TaskId,
    /// Current status (enqueued or running).
    pub status: UploadStatus,
    /// Percentage sent, 0-100.
    pub progress: u8,
    /// Caller tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// A task finished with a success status code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedEvent {
    /// Task identifier.
    pub task_id: TaskId,
    /// HTTP status code answered by the server.
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// Response body text.
    pub message: String,
    /// Response headers.
    pub headers: IndexMap<String, String>,
    /// Caller tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// A task failed or was cancelled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEvent {
    /// Task identifier.
    pub task_id: TaskId,
    /// `Failed` or `Cancelled`.
    pub status: UploadStatus,
    /// HTTP status code, or 500 for local failures.
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// Error category.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Diagnostic context.
    pub details: Vec<String>,
    /// Caller tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl FailedEvent {
    /// Build a failure event from a transport failure.
    #[must_use]
    pub fn from_failure(
        task_id: TaskId,
        status: UploadStatus,
        failure: TransportFailure,
        tag: Option<String>,
    ) -> Self {
        Self {
            task_id,
            status,
            status_code: failure.status_code,
            code: failure.code,
            message: failure.message,
            details: failure.details,
            tag,
        }
    }
}

/// Single discriminated union for everything the manager reports.
///
/// Progress events go to the progress channel; completed and failed events
/// go to the result channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Progress update.
    Progress(ProgressEvent),
    /// Successful completion.
    Completed(CompletedEvent),
    /// Failure or cancellation acknowledgment.
    Failed(FailedEvent),
}

impl TaskEvent {
    /// Create a progress event.
    pub fn progress(
        task_id: TaskId,
        status: UploadStatus,
        progress: u8,
        tag: Option<String>,
    ) -> Self {
        Self::Progress(ProgressEvent {
            task_id,
            status,
            progress: progress.min(100),
            tag,
        })
    }

    /// The task this event belongs to.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        match self {
            Self::Progress(e) => &e.task_id,
            Self::Completed(e) => &e.task_id,
            Self::Failed(e) => &e.task_id,
        }
    }

    /// Status carried by this event.
    #[must_use]
    pub const fn status(&self) -> UploadStatus {
        match self {
            Self::Progress(e) => e.status,
            Self::Completed(_) => UploadStatus::Completed,
            Self::Failed(e) => e.status,
        }
    }

    /// Whether this event reports a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }

    /// Flat payload as delivered on the host event channels.
    ///
    /// ```text
    /// progress: { task_id, status, progress }
    /// success:  { task_id, status: 3, message, statusCode, headers }
    /// failure:  { task_id, status, statusCode, code, message, details }
    /// ```
    #[must_use]
    pub fn to_payload(&self) -> Value {
        let mut payload = match self {
            Self::Progress(e) => json!({
                "task_id": e.task_id,
                "status": e.status,
                "progress": e.progress,
            }),
            Self::Completed(e) => json!({
                "task_id": e.task_id,
                "status": UploadStatus::Completed,
                "message": e.message,
                "statusCode": e.status_code,
                "headers": e.headers,
            }),
            Self::Failed(e) => json!({
                "task_id": e.task_id,
                "status": e.status,
                "statusCode": e.status_code,
                "code": e.code,
                "message": e.message,
                "details": e.details,
            }),
        };
        if let (Some(tag), Some(map)) = (self.tag(), payload.as_object_mut()) {
            map.insert("tag".to_string(), Value::String(tag.to_string()));
        }
        payload
    }

    fn tag(&self) -> Option<&str> {
        match self {
            Self::Progress(e) => e.tag.as_deref(),
            Self::Completed(e) => e.tag.as_deref(),
            Self::Failed(e) => e.tag.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_payload_shape() {
        let event = TaskEvent::progress(TaskId::new("t-1"), UploadStatus::Running, 42, None);
        assert_eq!(
            event.to_payload(),
            json!({"task_id": "t-1", "status": 2, "progress": 42})
        );
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_progress_is_clamped() {
        let event = TaskEvent::progress(TaskId::new("t-1"), UploadStatus::Running, 250, None);
        assert_eq!(event.to_payload()["progress"], 100);
    }

    #[test]
    fn test_completed_payload_shape() {
        let mut headers = IndexMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        let event = TaskEvent::Completed(CompletedEvent {
            task_id: TaskId::new("t-2"),
            status_code: 201,
            message: "created".to_string(),
            headers,
            tag: Some("avatar".to_string()),
        });

        let payload = event.to_payload();
        assert_eq!(payload["status"], 3);
        assert_eq!(payload["statusCode"], 201);
        assert_eq!(payload["message"], "created");
        assert_eq!(payload["headers"]["content-type"], "text/plain");
        assert_eq!(payload["tag"], "avatar");
        assert_eq!(event.status(), UploadStatus::Completed);
    }

    #[test]
    fn test_failed_payload_from_failure() {
        let failure = TransportFailure::http_status(503, "unavailable")
            .with_details(vec!["upstream down".to_string()]);
        let event = TaskEvent::Failed(FailedEvent::from_failure(
            TaskId::new("t-3"),
            UploadStatus::Failed,
            failure,
            None,
        ));

        assert_eq!(
            event.to_payload(),
            json!({
                "task_id": "t-3",
                "status": 4,
                "statusCode": 503,
                "code": "upload_error",
                "message": "unavailable",
                "details": ["upstream down"],
            })
        );
        assert!(event.is_terminal());
    }

    #[test]
    fn test_event_serde_roundtrip() {
        let event = TaskEvent::Failed(FailedEvent::from_failure(
            TaskId::new("t-4"),
            UploadStatus::Cancelled,
            TransportFailure::cancelled(),
            None,
        ));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"failed""#));
        let parsed: TaskEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
