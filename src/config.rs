use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::async_poll::{self, Cadence};
use crate::error::BridgeError;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_AUDIT_DIR: &str = ".tenderbridge/audit";

/// Env var naming an optional TOML file with `[poll]` overrides.
pub const CONFIG_FILE_ENV: &str = "TENDERBRIDGE_CONFIG";

/// Upstream AI service endpoint and credential.
#[derive(Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: String,
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Poll cadence settings as they appear in the TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollSettings {
    pub standard_pause_secs: u64,
    pub failed_pause_secs: u64,
    pub wait_hint_secs: u64,
    pub single_shot_wait_hint_secs: u64,
    /// Operator ceiling for buffered sessions. None = poll until completed.
    pub session_ceiling_secs: Option<u64>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            standard_pause_secs: async_poll::STANDARD_PAUSE.as_secs(),
            failed_pause_secs: async_poll::FAILED_PAUSE.as_secs(),
            wait_hint_secs: async_poll::WAIT_HINT.as_secs(),
            single_shot_wait_hint_secs: async_poll::SINGLE_SHOT_WAIT_HINT.as_secs(),
            session_ceiling_secs: None,
        }
    }
}

impl PollSettings {
    pub fn cadence(&self) -> Cadence {
        Cadence {
            standard_pause: Duration::from_secs(self.standard_pause_secs),
            failed_pause: Duration::from_secs(self.failed_pause_secs),
            wait_hint: Duration::from_secs(self.wait_hint_secs),
            single_shot_wait_hint: Duration::from_secs(self.single_shot_wait_hint_secs),
            session_ceiling: self.session_ceiling_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    poll: PollSettings,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub listen_addr: String,
    pub audit_dir: PathBuf,
    pub poll: PollSettings,
}

impl Config {
    /// Load from the process environment, merging the optional TOML file.
    /// Called once by the process bootstrap; a missing credential or endpoint
    /// is fatal there, never a per-request error.
    pub fn load() -> Result<Self, BridgeError> {
        let poll = match env::var(CONFIG_FILE_ENV).ok().filter(|p| !p.trim().is_empty()) {
            Some(path) => load_file(Path::new(&path))?.poll,
            None => PollSettings::default(),
        };
        Self::from_lookup(|key| env::var(key).ok(), poll)
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F, mut poll: PollSettings) -> Result<Self, BridgeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("UPSTREAM_API_KEY").ok_or_else(|| {
            BridgeError::Configuration("UPSTREAM_API_KEY is not set".to_string())
        })?;
        let base_url = get("UPSTREAM_BASE_URL").ok_or_else(|| {
            BridgeError::Configuration("UPSTREAM_BASE_URL is not set".to_string())
        })?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(BridgeError::Configuration(format!(
                "UPSTREAM_BASE_URL must be an http(s) URL, got {base_url:?}"
            )));
        }

        if let Some(raw) = get("TENDERBRIDGE_SESSION_CEILING_SECS") {
            let secs = raw.parse::<u64>().map_err(|_| {
                BridgeError::Configuration(format!(
                    "TENDERBRIDGE_SESSION_CEILING_SECS must be a whole number of seconds, got {raw:?}"
                ))
            })?;
            poll.session_ceiling_secs = Some(secs);
        }

        if poll.session_ceiling_secs == Some(0) {
            return Err(BridgeError::Configuration(
                "session ceiling must be at least one second; leave it unset for no ceiling"
                    .to_string(),
            ));
        }

        if poll.standard_pause_secs == 0 || poll.failed_pause_secs == 0 {
            return Err(BridgeError::Configuration(
                "poll pauses must be at least one second".to_string(),
            ));
        }

        Ok(Config {
            upstream: UpstreamConfig { base_url, api_key },
            listen_addr: get("TENDERBRIDGE_LISTEN").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            audit_dir: get("TENDERBRIDGE_AUDIT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIT_DIR)),
            poll,
        })
    }
}

fn load_file(path: &Path) -> Result<FileConfig, BridgeError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    parse_file(&text)
        .map_err(|e| BridgeError::Configuration(format!("invalid {}: {e}", path.display())))
}

fn parse_file(text: &str) -> Result<FileConfig, toml::de::Error> {
    toml::from_str(text)
}

/// Parse `[poll]` settings from TOML text.
pub fn poll_settings_from_toml(text: &str) -> Result<PollSettings, BridgeError> {
    parse_file(text)
        .map(|f| f.poll)
        .map_err(|e| BridgeError::Configuration(format!("invalid config: {e}")))
}
