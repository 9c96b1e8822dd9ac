use serde::Serialize;

use crate::dispatch::async_poll::PollOutcome;
use crate::dispatch::{Attachment, JobState, JobStatusSnapshot};
use crate::parsers::CodeBlock;

/// Message returned while the upstream job has not finished.
pub const STILL_PROCESSING: &str = "still processing";

/// Reply of the buffered adapter. An unfinished job is still `success: true`;
/// callers re-poll based on `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferedResponse {
    pub success: bool,
    pub message: String,
    pub status: String,
}

impl BufferedResponse {
    pub fn completed(content: String) -> Self {
        Self {
            success: true,
            message: content,
            status: JobState::Completed.as_str().to_string(),
        }
    }

    /// `last` is the last observed state, if any iteration got that far.
    pub fn still_processing(last: Option<JobState>) -> Self {
        Self {
            success: true,
            message: STILL_PROCESSING.to_string(),
            status: last.unwrap_or(JobState::Running).as_str().to_string(),
        }
    }

    pub fn from_outcome(outcome: &PollOutcome) -> Self {
        match outcome {
            PollOutcome::Completed(snapshot) if snapshot.is_final() => {
                Self::completed(snapshot.content.clone().unwrap_or_default())
            }
            PollOutcome::Completed(snapshot) => Self::still_processing(Some(snapshot.state)),
            PollOutcome::Terminated { last, .. } => {
                Self::still_processing(last.as_ref().map(|s| s.state))
            }
        }
    }
}

/// Reply of the single-shot status endpoint: the normalized snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub status: JobState,
    pub message: String,
    pub content: Option<String>,
    pub attachments: Vec<Attachment>,
    pub waited_seconds: Option<f64>,
    /// Upstream payload as received.
    pub data: serde_json::Value,
}

impl From<JobStatusSnapshot> for StatusResponse {
    fn from(snapshot: JobStatusSnapshot) -> Self {
        let message = if snapshot.is_final() {
            snapshot.content.clone().unwrap_or_default()
        } else {
            STILL_PROCESSING.to_string()
        };
        Self {
            success: true,
            status: snapshot.state,
            message,
            content: snapshot.content,
            attachments: snapshot.attachments,
            waited_seconds: snapshot.waited_seconds,
            data: snapshot.raw,
        }
    }
}

/// One event on the streaming channel, serialized as
/// `{ "type": ..., "message": ..., ...fields }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status {
        message: String,
        thread_id: String,
    },
    Progress {
        message: String,
        attempt: u32,
    },
    ApiResponse {
        message: String,
        status: JobState,
        #[serde(skip_serializing_if = "Option::is_none")]
        waited_seconds: Option<f64>,
    },
    Running {
        message: String,
        elapsed_seconds: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        waited_seconds: Option<f64>,
    },
    Warning {
        message: String,
        attempt: u32,
    },
    Info {
        message: String,
        attempt: u32,
    },
    Error {
        message: String,
        attempt: u32,
        recoverable: bool,
    },
    Content {
        message: String,
        content: String,
    },
    Files {
        message: String,
        files: Vec<Attachment>,
    },
    Code {
        message: String,
        blocks: Vec<CodeBlock>,
    },
    Complete {
        message: String,
        content: String,
        attachments: Vec<Attachment>,
    },
    Done {
        message: String,
    },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Progress { .. } => "progress",
            Self::ApiResponse { .. } => "api_response",
            Self::Running { .. } => "running",
            Self::Warning { .. } => "warning",
            Self::Info { .. } => "info",
            Self::Error { .. } => "error",
            Self::Content { .. } => "content",
            Self::Files { .. } => "files",
            Self::Code { .. } => "code",
            Self::Complete { .. } => "complete",
            Self::Done { .. } => "done",
        }
    }

    /// Serialize for the wire. Falls back to a hand-built error event so a
    /// serialization failure never silently drops an event.
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                let escaped = e.to_string().replace('\\', "\\\\").replace('"', "\\\"");
                format!(
                    r#"{{"type":"error","message":"event serialization failed: {escaped}","recoverable":true}}"#
                )
            }
        }
    }
}
