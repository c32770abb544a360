//! Reply generation for turns the agent decided to answer.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::composer::State;
use crate::model::{Completion, ModelClass, ReplyContent};
use crate::turn::Turn;

/// One audit record: who, where, what kind, and a JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: String,
    pub user_id: String,
    pub room_id: String,
    pub body: serde_json::Value,
}

/// Best-effort audit sink. Failures are reported to the caller, who logs
/// them and carries on.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

pub struct ResponseGenerator {
    completion: Arc<dyn Completion>,
    audit: Arc<dyn AuditLog>,
}

impl ResponseGenerator {
    pub fn new(completion: Arc<dyn Completion>, audit: Arc<dyn AuditLog>) -> Self {
        Self { completion, audit }
    }

    /// Produce reply content for `turn` from the rendered `context`.
    ///
    /// `Ok(None)` when the model yields nothing or only whitespace; callers
    /// must not deliver in that case.
    pub async fn generate(
        &self,
        turn: &Turn,
        state: &State,
        context: &str,
    ) -> Result<Option<ReplyContent>> {
        let reply = self
            .completion
            .generate(context, ModelClass::Small)
            .await
            .context("Reply completion failed")?;

        let reply = match reply {
            Some(reply) if !reply.text.trim().is_empty() => reply,
            _ => {
                tracing::error!(
                    "No response from completion for turn {} ({})",
                    turn.id,
                    state.agent_name
                );
                return Ok(None);
            }
        };

        let event = AuditEvent {
            kind: "response".to_string(),
            user_id: turn.user_id.clone(),
            room_id: turn.room_id.clone(),
            body: serde_json::json!({
                "message": turn,
                "context": context,
                "response": &reply,
            }),
        };
        if let Err(e) = self.audit.record(event).await {
            tracing::warn!("Failed to write response audit for turn {}: {}", turn.id, e);
        }

        Ok(Some(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{turn, FailingAudit, RecordingAudit, StubCompletion};

    #[tokio::test]
    async fn successful_reply_is_audited_as_a_response() {
        let audit = Arc::new(RecordingAudit::default());
        let generator =
            ResponseGenerator::new(Arc::new(StubCompletion::new(Some("hello there"))), audit.clone());
        let source = turn("room", "alice", "hi", 1);

        let reply = generator
            .generate(&source, &State::default(), "ctx")
            .await
            .unwrap()
            .expect("reply");

        assert_eq!(reply.text, "hello there");
        let events = audit.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "response");
        assert_eq!(events[0].user_id, "alice");
        assert_eq!(events[0].room_id, "room");
        assert_eq!(events[0].body["context"], "ctx");
        assert_eq!(events[0].body["response"]["text"], "hello there");
        assert_eq!(events[0].body["message"]["id"], source.id.as_str());
    }

    #[tokio::test]
    async fn missing_or_blank_completion_is_no_reply() {
        for stub in [StubCompletion::new(None), StubCompletion::new(Some("  \n"))] {
            let audit = Arc::new(RecordingAudit::default());
            let generator = ResponseGenerator::new(Arc::new(stub), audit.clone());

            let reply = generator
                .generate(&turn("room", "alice", "hi", 1), &State::default(), "ctx")
                .await
                .unwrap();

            assert!(reply.is_none());
            assert!(audit.events.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn audit_failure_does_not_drop_the_reply() {
        let generator = ResponseGenerator::new(
            Arc::new(StubCompletion::new(Some("still here"))),
            Arc::new(FailingAudit),
        );

        let reply = generator
            .generate(&turn("room", "alice", "hi", 1), &State::default(), "ctx")
            .await
            .unwrap();

        assert_eq!(reply.map(|r| r.text).as_deref(), Some("still here"));
    }
}
