use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::store::now_ms;

/// Atomic counter for unique audit filenames within one millisecond.
static AUDIT_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditPhase {
    Before,
    After,
}

impl AuditPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

/// Writes before/after snapshots of each generation as JSON files.
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Persist to `{dir}/{timestamp}_{seq}_{record}_{phase}.json`.
    pub async fn record<T: Serialize>(
        &self,
        phase: AuditPhase,
        record_id: &str,
        payload: &T,
    ) -> Result<PathBuf, std::io::Error> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let seq = AUDIT_COUNTER.fetch_add(1, Ordering::Relaxed);
        let filename = format!(
            "{}_{seq}_{}_{}.json",
            now_ms(),
            sanitize_component(record_id),
            phase.as_str()
        );
        let path = self.dir.join(&filename);

        let entry = serde_json::json!({
            "phase": phase,
            "record_id": record_id,
            "recorded_at_ms": now_ms(),
            "payload": payload,
        });
        let json = serde_json::to_string_pretty(&entry).map_err(std::io::Error::other)?;

        // Atomic write: temp file + rename prevents partial reads
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, json.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        Ok(path)
    }

    /// Audit failures never fail the request they describe.
    pub async fn record_or_warn<T: Serialize>(&self, phase: AuditPhase, record_id: &str, payload: &T) {
        if let Err(e) = self.record(phase, record_id, payload).await {
            tracing::warn!(
                record_id,
                phase = phase.as_str(),
                "failed to write audit snapshot: {e}"
            );
        }
    }
}

/// Only allows alphanumeric, `-`, `_` in filename components.
pub fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
