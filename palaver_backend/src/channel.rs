//! Outbound delivery of replies.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunker::split_message;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub room_id: String,
    pub text: String,
    /// Channel-native id of the message this one replies to
    pub reply_to: Option<String>,
}

/// Confirmation that the channel accepted a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub text: String,
}

#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<DeliveryReceipt>;
}

/// Split `text` to `limit` and send the chunks strictly in order.
///
/// Only the first chunk carries `reply_to`. The first failed send stops the
/// sequence; chunks already sent are not retracted.
pub async fn deliver_in_chunks(
    channel: &dyn Channel,
    room_id: &str,
    text: &str,
    reply_to: Option<&str>,
    limit: usize,
) -> Result<Vec<DeliveryReceipt>> {
    let chunks = split_message(text, limit);
    let total = chunks.len();
    let mut receipts = Vec::with_capacity(total);

    for (i, chunk) in chunks.into_iter().enumerate() {
        let message = OutboundMessage {
            room_id: room_id.to_string(),
            text: chunk,
            reply_to: if i == 0 {
                reply_to.map(str::to_string)
            } else {
                None
            },
        };

        let receipt = channel.send(message).await.with_context(|| {
            format!(
                "Failed to send chunk {} of {} to {} ({} already delivered)",
                i + 1,
                total,
                room_id,
                receipts.len()
            )
        })?;
        tracing::debug!("Delivered chunk {}/{} to {} as {}", i + 1, total, room_id, receipt.id);
        receipts.push(receipt);
    }

    Ok(receipts)
}
