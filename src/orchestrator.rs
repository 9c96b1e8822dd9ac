use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditLog, AuditPhase};
use crate::channel::buffered;
use crate::dispatch::async_poll::{Cadence, PollOutcome, PollSession};
use crate::dispatch::{JobApi, JobHandle};
use crate::error::BridgeError;
use crate::response::BufferedResponse;
use crate::store::{
    MessageRole, Notification, NotificationKind, ProposalDraft, TenderMessage, TenderRecord,
    TenderStore, now_ms,
};

/// Coordinates one generation: submit once, poll to completion, audit the
/// before/after state and feed the result back into the tender record.
pub struct Orchestrator<A> {
    api: Arc<A>,
    store: Arc<dyn TenderStore>,
    audit: AuditLog,
    cadence: Cadence,
    shutdown: CancellationToken,
}

impl<A: JobApi> Orchestrator<A> {
    pub fn new(
        api: Arc<A>,
        store: Arc<dyn TenderStore>,
        audit: AuditLog,
        cadence: Cadence,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            api,
            store,
            audit,
            cadence,
            shutdown,
        }
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Send a follow-up prompt on an existing thread and wait for the answer.
    ///
    /// When the handle carries a tender id, the exchange is recorded on that
    /// tender. Store failures at that point are logged only: the answer is
    /// already in hand and the caller still gets it.
    pub async fn follow_up(
        &self,
        handle: JobHandle,
        prompt: &str,
    ) -> Result<BufferedResponse, BridgeError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(BridgeError::Validation("prompt is required".to_string()));
        }
        let tender_id = handle.correlation_id.clone();

        if let Some(id) = &tender_id {
            self.audit
                .record_or_warn(
                    AuditPhase::Before,
                    id,
                    &json!({
                        "operation": "follow_up",
                        "thread_id": handle.thread_id,
                        "project_id": handle.project_id,
                        "prompt": prompt,
                    }),
                )
                .await;
        }

        let mut session = PollSession::for_follow_up(handle);
        session.submit(self.api.as_ref(), prompt).await?;

        if let Some(id) = &tender_id {
            let message = TenderMessage::new(
                MessageRole::User,
                prompt.to_string(),
                &session.handle().thread_id,
            );
            if let Err(e) = self.store.append_message(id, message).await {
                tracing::error!(tender_id = id, "failed to record follow-up prompt: {e}");
            }
        }

        let (outcome, response) = buffered::poll_to_response(
            self.api.as_ref(),
            &mut session,
            &self.cadence,
            &self.shutdown,
        )
        .await;

        if let Some(id) = &tender_id {
            if let PollOutcome::Completed(snapshot) = &outcome {
                self.record_answer(id, &session, snapshot.content.clone().unwrap_or_default())
                    .await;
            }
            self.audit
                .record_or_warn(AuditPhase::After, id, &outcome_summary(&session, &outcome))
                .await;
        }

        Ok(response)
    }

    async fn record_answer(&self, tender_id: &str, session: &PollSession, content: String) {
        let message = TenderMessage::new(MessageRole::Assistant, content, &session.handle().thread_id);
        if let Err(e) = self.store.append_message(tender_id, message).await {
            tracing::error!(tender_id, "failed to record follow-up answer: {e}");
            return;
        }
        let notification = Notification {
            tender_id: tender_id.to_string(),
            kind: NotificationKind::FollowUpAnswered,
            message: "The AI assistant answered a follow-up question".to_string(),
        };
        if let Err(e) = self.store.notify(notification).await {
            tracing::warn!(tender_id, "failed to send notification: {e}");
        }
    }

    /// Generate a proposal draft for a tender and save it.
    ///
    /// Unlike `follow_up`, failing to save the draft is an error: saving it is
    /// the point of the operation.
    pub async fn generate_proposal(
        &self,
        tender_id: &str,
        handle: JobHandle,
        prompt: Option<String>,
    ) -> Result<BufferedResponse, BridgeError> {
        let tender = self
            .store
            .get_tender(tender_id)
            .await?
            .ok_or_else(|| BridgeError::NotFound(format!("tender {tender_id}")))?;

        let prompt = prompt
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| proposal_prompt(&tender));

        self.audit
            .record_or_warn(
                AuditPhase::Before,
                tender_id,
                &json!({
                    "operation": "generate_proposal",
                    "thread_id": handle.thread_id,
                    "project_id": handle.project_id,
                    "prompt": prompt,
                    "tender": tender,
                }),
            )
            .await;

        let handle = handle.with_correlation(Some(tender_id.to_string()));
        let mut session = PollSession::for_follow_up(handle);
        session.submit(self.api.as_ref(), &prompt).await?;

        let (outcome, response) = buffered::poll_to_response(
            self.api.as_ref(),
            &mut session,
            &self.cadence,
            &self.shutdown,
        )
        .await;

        self.audit
            .record_or_warn(AuditPhase::After, tender_id, &outcome_summary(&session, &outcome))
            .await;

        if let PollOutcome::Completed(snapshot) = outcome {
            let draft = ProposalDraft {
                content: snapshot.content.unwrap_or_default(),
                attachments: snapshot.attachments,
                thread_id: session.handle().thread_id.clone(),
                generated_at_ms: now_ms(),
            };
            self.store
                .save_proposal_draft(tender_id, draft)
                .await
                .map_err(|e| BridgeError::Store(e.to_string()))?;

            tracing::info!(
                tender_id,
                attempts = session.attempt_count(),
                "proposal draft saved"
            );

            let notification = Notification {
                tender_id: tender_id.to_string(),
                kind: NotificationKind::ProposalDrafted,
                message: format!("A proposal draft is ready for \"{}\"", tender.title),
            };
            if let Err(e) = self.store.notify(notification).await {
                tracing::warn!(tender_id, "failed to send notification: {e}");
            }
        }

        Ok(response)
    }
}

/// Default prompt when the caller does not supply one.
pub fn proposal_prompt(tender: &TenderRecord) -> String {
    format!(
        "Draft a complete proposal responding to the tender \"{}\".\n\nTender description:\n{}",
        tender.title, tender.description
    )
}

fn outcome_summary(session: &PollSession, outcome: &PollOutcome) -> serde_json::Value {
    match outcome {
        PollOutcome::Completed(snapshot) => json!({
            "session_id": session.id().to_string(),
            "attempts": session.attempt_count(),
            "elapsed_ms": session.elapsed().as_millis() as u64,
            "state": snapshot.state,
            "content": snapshot.content,
            "attachments": snapshot.attachments,
        }),
        PollOutcome::Terminated { last, reason } => json!({
            "session_id": session.id().to_string(),
            "attempts": session.attempt_count(),
            "elapsed_ms": session.elapsed().as_millis() as u64,
            "terminated": format!("{reason:?}").to_lowercase(),
            "state": last.as_ref().map(|s| s.state),
        }),
    }
}
