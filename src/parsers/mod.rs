pub mod event_stream;

use serde::Serialize;
use serde_json::Value;

use crate::dispatch::{Attachment, JobState, JobStatusSnapshot};

/// Where the final content may live in an upstream status payload, in
/// priority order. The first field holding non-empty content wins.
pub const CONTENT_FIELDS: [ContentField; 3] = [
    ContentField {
        name: "response.content",
        pointer: "/response/content",
    },
    ContentField {
        name: "content",
        pointer: "/content",
    },
    ContentField {
        name: "message",
        pointer: "/message",
    },
];

/// Attachment lists, same priority rule as `CONTENT_FIELDS`.
const ATTACHMENT_POINTERS: [&str; 2] = ["/response/files", "/files"];

/// Cap on the body text kept in `raw` when the payload could not be parsed.
const RAW_PREVIEW_CHARS: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentField {
    pub name: &'static str,
    pub pointer: &'static str,
}

/// How a status response body should be read, decided by its content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    EventStream,
    Unsupported,
}

impl BodyKind {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(ct) = content_type else {
            return Self::Unsupported;
        };
        let essence = ct
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence == "application/json" || essence.ends_with("+json") {
            Self::Json
        } else if essence.ends_with("event-stream") {
            Self::EventStream
        } else {
            Self::Unsupported
        }
    }
}

/// A fenced code block found in completed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub code: String,
}

/// Normalize one status response body into a snapshot. Never fails:
/// unsupported content types and unparsable bodies yield `JobState::Unknown`.
pub fn normalize(content_type: Option<&str>, body: &[u8]) -> JobStatusSnapshot {
    match BodyKind::from_content_type(content_type) {
        BodyKind::Json => parse_json(body),
        BodyKind::EventStream => {
            match event_stream::last_data_payload(body) {
                Some(payload) => parse_json(payload.as_bytes()),
                None => {
                    tracing::debug!("event-stream status body has no data events");
                    JobStatusSnapshot::unknown(raw_preview(body))
                }
            }
        }
        BodyKind::Unsupported => {
            tracing::debug!(
                content_type = content_type.unwrap_or("<none>"),
                "unsupported status content type"
            );
            JobStatusSnapshot::unknown(raw_preview(body))
        }
    }
}

fn parse_json(body: &[u8]) -> JobStatusSnapshot {
    match serde_json::from_slice::<Value>(body) {
        Ok(v) if v.is_object() => classify(v),
        Ok(v) => {
            tracing::debug!("status payload is not a JSON object");
            JobStatusSnapshot::unknown(v)
        }
        Err(e) => {
            tracing::debug!("status payload is not valid JSON: {e}");
            JobStatusSnapshot::unknown(raw_preview(body))
        }
    }
}

/// Map a parsed upstream payload to a snapshot.
///
/// `"completed"` only counts when content is present; otherwise the job is
/// treated as still running. `"failed"` maps to `Failed`. Anything else,
/// including a missing status, is `Running`.
pub fn classify(raw: Value) -> JobStatusSnapshot {
    let content = extract_content(&raw);
    let status = raw
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase());

    let state = match status.as_deref() {
        Some("completed") if content.is_some() => JobState::Completed,
        Some("failed") => JobState::Failed,
        _ => JobState::Running,
    };

    JobStatusSnapshot {
        state,
        content,
        attachments: extract_attachments(&raw),
        waited_seconds: waited_seconds(&raw),
        raw,
    }
}

/// Pull the content out of a payload, checking `CONTENT_FIELDS` in order.
pub fn extract_content(raw: &Value) -> Option<String> {
    CONTENT_FIELDS
        .iter()
        .find_map(|field| raw.pointer(field.pointer).and_then(content_text))
}

/// Render one candidate content value as text. Strings are used as-is,
/// block arrays are joined by their `text` fields, other structured values
/// are kept as compact JSON. Blank or empty values count as absent.
fn content_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => return None,
        Value::Array(items) => {
            let parts: Vec<&str> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.as_str()),
                    other => other.get("text").and_then(Value::as_str),
                })
                .collect();
            if parts.is_empty() {
                value.to_string()
            } else {
                parts.join("\n")
            }
        }
        Value::Object(map) if map.is_empty() => return None,
        Value::Object(map) => match map.get("text").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => value.to_string(),
        },
        Value::Null | Value::Bool(_) | Value::Number(_) => return None,
    };
    (!text.trim().is_empty()).then_some(text)
}

pub fn extract_attachments(raw: &Value) -> Vec<Attachment> {
    let Some(files) = ATTACHMENT_POINTERS
        .iter()
        .find_map(|p| raw.pointer(p).and_then(Value::as_array))
    else {
        return Vec::new();
    };

    files
        .iter()
        .enumerate()
        .filter_map(|(i, file)| match file {
            Value::String(name) if !name.trim().is_empty() => Some(Attachment {
                name: name.clone(),
                url: None,
                mime_type: None,
                content: None,
            }),
            Value::Object(_) => {
                let name = first_str(file, &["name", "filename", "file_name"])
                    .unwrap_or_else(|| format!("attachment-{}", i + 1));
                Some(Attachment {
                    name,
                    url: first_str(file, &["url", "download_url"]),
                    mime_type: first_str(file, &["mime_type", "content_type"]),
                    content: first_str(file, &["content"]),
                })
            }
            _ => None,
        })
        .collect()
}

fn first_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn waited_seconds(raw: &Value) -> Option<f64> {
    let secs: f64 = match raw.get("waited_seconds")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

fn raw_preview(body: &[u8]) -> Value {
    let text = String::from_utf8_lossy(body);
    Value::String(text.chars().take(RAW_PREVIEW_CHARS).collect())
}

/// Collect closed fenced code blocks (```lang ... ```). An unterminated
/// trailing fence is ignored.
pub fn extract_code_blocks(content: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(Option<String>, Vec<&str>)> = None;

    for line in content.lines() {
        let fence = line.trim_start().strip_prefix("```");
        match (open.take(), fence) {
            (None, Some(info)) => {
                let lang = info.trim();
                let language = (!lang.is_empty()).then(|| lang.to_string());
                open = Some((language, Vec::new()));
            }
            (None, None) => {}
            (Some((language, lines)), Some(rest)) if rest.trim().is_empty() => {
                blocks.push(CodeBlock {
                    language,
                    code: lines.join("\n"),
                });
            }
            (Some((language, mut lines)), _) => {
                lines.push(line);
                open = Some((language, lines));
            }
        }
    }

    blocks
}
