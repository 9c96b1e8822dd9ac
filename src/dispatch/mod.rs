pub mod async_poll;
pub mod upstream;

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::error::BridgeError;

/// Identifies one upstream unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub thread_id: String,
    pub project_id: String,
    /// Caller's own record (e.g. a tender id). Only used for side effects
    /// after completion, never sent upstream.
    pub correlation_id: Option<String>,
}

impl JobHandle {
    /// Build a handle from caller-supplied identifiers. Both ids must be
    /// present and non-blank before any polling begins.
    pub fn new(
        thread_id: Option<String>,
        project_id: Option<String>,
    ) -> Result<Self, BridgeError> {
        let thread_id = required("threadId", thread_id)?;
        let project_id = required("projectId", project_id)?;
        Ok(Self {
            thread_id,
            project_id,
            correlation_id: None,
        })
    }

    pub fn with_correlation(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id.filter(|c| !c.trim().is_empty());
        self
    }
}

pub(crate) fn required(field: &str, value: Option<String>) -> Result<String, BridgeError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(BridgeError::Validation(format!("{field} is required"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Completed,
    Failed,
    Unknown,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

/// A file descriptor attached to an upstream response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Inline file content, present when `include_file_content` was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// The normalized result of one upstream status check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusSnapshot {
    pub state: JobState,
    pub content: Option<String>,
    pub attachments: Vec<Attachment>,
    /// Upstream-reported elapsed time. Advisory only.
    pub waited_seconds: Option<f64>,
    /// Original upstream payload, kept for diagnostics.
    pub raw: serde_json::Value,
}

impl JobStatusSnapshot {
    pub fn unknown(raw: serde_json::Value) -> Self {
        Self {
            state: JobState::Unknown,
            content: None,
            attachments: Vec::new(),
            waited_seconds: None,
            raw,
        }
    }

    /// A snapshot is final only when it is `completed` and carries content.
    pub fn is_final(&self) -> bool {
        self.state == JobState::Completed
            && self.content.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

/// Per-call parameters passed through to the upstream status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Server-side wait hint (`timeout` query parameter).
    pub wait_hint: Duration,
    pub realtime: bool,
    pub include_file_content: bool,
}

/// The two upstream operations the bridge depends on. `UpstreamClient` is the
/// production implementation; tests drive the poller with scripted fakes.
pub trait JobApi: Send + Sync {
    /// Append `prompt` to the job's conversation. Not idempotent: callers
    /// must invoke this at most once per logical follow-up.
    fn submit(
        &self,
        handle: &JobHandle,
        prompt: &str,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// One read-only status check. Malformed upstream output degrades to
    /// `JobState::Unknown`; only transport-level failures are errors.
    fn fetch_status(
        &self,
        handle: &JobHandle,
        options: &FetchOptions,
    ) -> impl Future<Output = Result<JobStatusSnapshot, BridgeError>> + Send;
}
