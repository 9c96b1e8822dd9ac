use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::dispatch::Attachment;
use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TenderStatus {
    Submitted,
    UnderReview,
    ProposalDrafted,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenderMessage {
    pub role: MessageRole,
    pub content: String,
    pub thread_id: String,
    pub created_at_ms: u64,
}

impl TenderMessage {
    pub fn new(role: MessageRole, content: String, thread_id: &str) -> Self {
        Self {
            role,
            content,
            thread_id: thread_id.to_string(),
            created_at_ms: now_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalDraft {
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub thread_id: String,
    pub generated_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenderRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TenderStatus,
    pub proposal: Option<ProposalDraft>,
    pub messages: Vec<TenderMessage>,
}

impl TenderRecord {
    pub fn new(id: &str, title: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            status: TenderStatus::Submitted,
            proposal: None,
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ProposalDrafted,
    FollowUpAnswered,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub tender_id: String,
    pub kind: NotificationKind,
    pub message: String,
}

/// The relational store that owns tenders, proposals, messages and
/// notifications. The bridge only reads and updates through this seam.
#[async_trait]
pub trait TenderStore: Send + Sync {
    async fn get_tender(&self, id: &str) -> Result<Option<TenderRecord>, BridgeError>;

    /// Store the draft and move the tender to `ProposalDrafted`.
    async fn save_proposal_draft(&self, id: &str, draft: ProposalDraft) -> Result<(), BridgeError>;

    async fn append_message(&self, id: &str, message: TenderMessage) -> Result<(), BridgeError>;

    async fn notify(&self, notification: Notification) -> Result<(), BridgeError>;
}

/// Process-local store used by the binary and tests.
#[derive(Default)]
pub struct InMemoryTenderStore {
    tenders: Mutex<HashMap<String, TenderRecord>>,
    notifications: Mutex<Vec<Notification>>,
}

impl InMemoryTenderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: TenderRecord) {
        self.tenders.lock().await.insert(record.id.clone(), record);
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().await.clone()
    }
}

#[async_trait]
impl TenderStore for InMemoryTenderStore {
    async fn get_tender(&self, id: &str) -> Result<Option<TenderRecord>, BridgeError> {
        Ok(self.tenders.lock().await.get(id).cloned())
    }

    async fn save_proposal_draft(&self, id: &str, draft: ProposalDraft) -> Result<(), BridgeError> {
        let mut tenders = self.tenders.lock().await;
        let tender = tenders
            .get_mut(id)
            .ok_or_else(|| BridgeError::NotFound(format!("tender {id}")))?;
        tender.proposal = Some(draft);
        tender.status = TenderStatus::ProposalDrafted;
        Ok(())
    }

    async fn append_message(&self, id: &str, message: TenderMessage) -> Result<(), BridgeError> {
        let mut tenders = self.tenders.lock().await;
        let tender = tenders
            .get_mut(id)
            .ok_or_else(|| BridgeError::NotFound(format!("tender {id}")))?;
        tender.messages.push(message);
        Ok(())
    }

    async fn notify(&self, notification: Notification) -> Result<(), BridgeError> {
        self.notifications.lock().await.push(notification);
        Ok(())
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
