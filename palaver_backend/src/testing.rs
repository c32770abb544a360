//! Stub collaborators shared by unit tests.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::channel::{Channel, DeliveryReceipt, OutboundMessage};
use crate::generator::{AuditEvent, AuditLog};
use crate::model::{Classifier, Completion, ModelClass, ReplyContent};
use crate::store::TurnStore;
use crate::turn::{Content, Turn};

pub fn turn(room: &str, user: &str, text: &str, at: i64) -> Turn {
    Turn::new(room, user, "agent-1", Content::text(text), at)
}

/// Classifier that always answers with the same token and keeps the contexts it saw.
pub struct StubClassifier {
    token: String,
    pub contexts: Mutex<Vec<(String, ModelClass)>>,
}

impl StubClassifier {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            contexts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    async fn decide(&self, context: &str, model_class: ModelClass) -> Result<String> {
        self.contexts
            .lock()
            .unwrap()
            .push((context.to_string(), model_class));
        Ok(self.token.clone())
    }
}

pub struct FailingClassifier;

#[async_trait]
impl Classifier for FailingClassifier {
    async fn decide(&self, _context: &str, _model_class: ModelClass) -> Result<String> {
        anyhow::bail!("classifier unavailable")
    }
}

pub struct StubCompletion {
    reply: Option<String>,
    pub calls: Mutex<usize>,
}

impl StubCompletion {
    pub fn new(reply: Option<&str>) -> Self {
        Self {
            reply: reply.map(str::to_string),
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Completion for StubCompletion {
    async fn generate(
        &self,
        _context: &str,
        _model_class: ModelClass,
    ) -> Result<Option<ReplyContent>> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.reply.as_ref().map(|text| ReplyContent {
            text: text.clone(),
            action: None,
        }))
    }
}

/// Channel that records every send; optionally fails on the n-th send (0-based).
pub struct RecordingChannel {
    pub sent: Mutex<Vec<OutboundMessage>>,
    fail_at: Option<usize>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_at: None,
        }
    }

    pub fn failing_at(index: usize) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_at: Some(index),
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    async fn send(&self, message: OutboundMessage) -> Result<DeliveryReceipt> {
        let mut sent = self.sent.lock().unwrap();
        if self.fail_at == Some(sent.len()) {
            anyhow::bail!("send rejected");
        }
        let index = sent.len();
        let receipt = DeliveryReceipt {
            id: (1000 + index).to_string(),
            timestamp: 1_700_000_000_000 + index as i64,
            text: message.text.clone(),
        };
        sent.push(message);
        Ok(receipt)
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    pub events: Mutex<Vec<AuditEvent>>,
}

#[async_trait]
impl AuditLog for RecordingAudit {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

pub struct FailingAudit;

#[async_trait]
impl AuditLog for FailingAudit {
    async fn record(&self, _event: AuditEvent) -> Result<()> {
        anyhow::bail!("audit log offline")
    }
}

pub struct FailingStore;

#[async_trait]
impl TurnStore for FailingStore {
    async fn read_room(&self, _room_id: &str) -> Result<Vec<Turn>> {
        anyhow::bail!("store unreachable")
    }

    async fn append(&self, _turn: Turn) -> Result<bool> {
        anyhow::bail!("store unreachable")
    }
}
