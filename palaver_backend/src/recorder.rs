//! Writing delivered and received messages back into the turn store.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::channel::DeliveryReceipt;
use crate::model::ReplyContent;
use crate::store::TurnStore;
use crate::turn::{turn_id_for, zero_embedding, Content, Turn};

/// A message that arrived over a channel, before it becomes a turn.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub room_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub text: String,
    pub source: String,
    /// Channel-native message id
    pub external_id: Option<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

pub struct TurnRecorder {
    store: Arc<dyn TurnStore>,
    agent_id: String,
}

impl TurnRecorder {
    pub fn new(store: Arc<dyn TurnStore>, agent_id: String) -> Self {
        Self { store, agent_id }
    }

    /// Record a reply after every chunk of it was delivered.
    ///
    /// Receipts exist only for a fully delivered reply, so the stored text is
    /// the reply itself rather than its chunks. The turn id derives from the
    /// last receipt and the agent id, so recording the same delivery twice
    /// stores one turn.
    pub async fn record_reply(
        &self,
        source: &Turn,
        reply: &ReplyContent,
        receipts: &[DeliveryReceipt],
    ) -> Result<Turn> {
        let last = receipts
            .last()
            .context("Refusing to record a reply without delivery receipts")?;

        let turn = Turn {
            id: turn_id_for(&format!("{}-{}", last.timestamp, last.id), &self.agent_id),
            room_id: source.room_id.clone(),
            user_id: self.agent_id.clone(),
            agent_id: self.agent_id.clone(),
            content: Content {
                text: reply.text.clone(),
                action: reply.action.clone(),
                source: source.content.source.clone(),
                in_reply_to: Some(source.id.clone()),
                user_name: None,
                external_id: Some(last.id.clone()),
            },
            created_at: last.timestamp,
            embedding: zero_embedding(),
        };

        let inserted = self
            .store
            .append(turn.clone())
            .await
            .with_context(|| format!("Failed to record reply to turn {}", source.id))?;
        if !inserted {
            tracing::debug!("Reply turn {} was already recorded", turn.id);
        }
        Ok(turn)
    }

    /// Record an inbound message. `None` when it was already stored.
    ///
    /// Channel timestamps may only have second resolution, so the channel
    /// message id joins the seed when there is one.
    pub async fn record_received(&self, message: ReceivedMessage) -> Result<Option<Turn>> {
        let seed = match message.external_id.as_deref() {
            Some(external_id) => format!("{}-{}", message.timestamp, external_id),
            None => message.timestamp.to_string(),
        };
        let turn = Turn {
            id: turn_id_for(&seed, &message.user_id),
            room_id: message.room_id,
            user_id: message.user_id,
            agent_id: self.agent_id.clone(),
            content: Content {
                text: message.text,
                action: None,
                source: Some(message.source),
                in_reply_to: None,
                user_name: message.user_name,
                external_id: message.external_id,
            },
            created_at: message.timestamp,
            embedding: zero_embedding(),
        };

        let inserted = self
            .store
            .append(turn.clone())
            .await
            .context("Failed to record received message")?;
        Ok(inserted.then_some(turn))
    }
}
