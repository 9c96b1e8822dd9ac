use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, Response, header};

use crate::config::UpstreamConfig;
use crate::dispatch::{FetchOptions, JobApi, JobHandle, JobStatusSnapshot};
use crate::error::BridgeError;
use crate::parsers;

/// Max status response body size (4MB). Final proposals can be large.
pub const MAX_STATUS_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Max bytes of an upstream error body kept for diagnostics.
pub const MAX_ERROR_BODY_BYTES: usize = 2 * 1024;

/// Slack added on top of the upstream wait hint before the client gives up
/// on a status request.
const STATUS_REQUEST_GRACE: Duration = Duration::from_secs(15);

/// Timeout for the one-time submit request.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);

const API_KEY_HEADER: &str = "X-API-Key";

/// HTTP client for the upstream AI service's thread response endpoint.
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| BridgeError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn response_url(&self, thread_id: &str) -> String {
        format!("{}/threads/{thread_id}/response", self.base_url)
    }

    /// Send exactly one follow-up prompt. Never retried here or by callers:
    /// a duplicate submit produces a duplicate AI response upstream.
    pub async fn submit(&self, handle: &JobHandle, prompt: &str) -> Result<(), BridgeError> {
        let response = self
            .client
            .post(self.response_url(&handle.thread_id))
            .query(&[("project_id", handle.project_id.as_str())])
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(SUBMIT_TIMEOUT)
            .form(&[("prompt", prompt)])
            .send()
            .await
            .map_err(|e| BridgeError::Submission {
                status: None,
                message: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await;
            tracing::warn!(
                thread_id = handle.thread_id,
                status = status.as_u16(),
                "upstream rejected follow-up submission"
            );
            return Err(BridgeError::Submission {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        tracing::info!(
            thread_id = handle.thread_id,
            project_id = handle.project_id,
            prompt_chars = prompt.chars().count(),
            "follow-up submitted"
        );
        Ok(())
    }

    /// One read-only status check. Transport failures and non-2xx statuses
    /// are errors; anything wrong with the body itself yields `Unknown`.
    pub async fn fetch_status(
        &self,
        handle: &JobHandle,
        options: &FetchOptions,
    ) -> Result<JobStatusSnapshot, BridgeError> {
        let wait_secs = options.wait_hint.as_secs().to_string();
        let response = self
            .client
            .get(self.response_url(&handle.thread_id))
            .query(&[
                ("project_id", handle.project_id.as_str()),
                ("timeout", wait_secs.as_str()),
                ("realtime", bool_param(options.realtime)),
                ("include_file_content", bool_param(options.include_file_content)),
            ])
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(options.wait_hint + STATUS_REQUEST_GRACE)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await;
            return Err(BridgeError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match read_limited(response, MAX_STATUS_RESPONSE_BYTES).await? {
            Limited::Complete(body) => body,
            Limited::Truncated(_) => {
                tracing::warn!(
                    thread_id = handle.thread_id,
                    limit = MAX_STATUS_RESPONSE_BYTES,
                    "status response too large, treating as unknown"
                );
                return Ok(JobStatusSnapshot::unknown(serde_json::Value::Null));
            }
        };

        Ok(parsers::normalize(content_type.as_deref(), &body))
    }
}

impl JobApi for UpstreamClient {
    async fn submit(&self, handle: &JobHandle, prompt: &str) -> Result<(), BridgeError> {
        UpstreamClient::submit(self, handle, prompt).await
    }

    async fn fetch_status(
        &self,
        handle: &JobHandle,
        options: &FetchOptions,
    ) -> Result<JobStatusSnapshot, BridgeError> {
        UpstreamClient::fetch_status(self, handle, options).await
    }
}

fn bool_param(v: bool) -> &'static str {
    if v { "true" } else { "false" }
}

/// Body read up to a byte limit.
enum Limited {
    Complete(Vec<u8>),
    /// The body exceeded the limit; holds the first `limit` bytes. Nothing
    /// past the limit is read.
    Truncated(Vec<u8>),
}

/// Read a body chunk by chunk, stopping at `limit` instead of buffering the
/// whole thing first.
async fn read_limited(response: Response, limit: usize) -> Result<Limited, BridgeError> {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > limit {
            let room = limit - body.len();
            body.extend_from_slice(&chunk[..room]);
            return Ok(Limited::Truncated(body));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Limited::Complete(body))
}

/// Best-effort read of an error body, truncated for logs and diagnostics.
async fn read_error_body(response: Response) -> String {
    let bytes = match read_limited(response, MAX_ERROR_BODY_BYTES).await {
        Ok(Limited::Complete(bytes) | Limited::Truncated(bytes)) => bytes,
        Err(_) => Vec::new(),
    };
    String::from_utf8_lossy(&bytes).into_owned()
}
