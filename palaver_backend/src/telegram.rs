//! Telegram Bot API integration.
//!
//! Outbound: [`TelegramChannel`] delivers reply chunks with `sendMessage`.
//! Inbound: [`spawn_listener`] long-polls `getUpdates` and records messages
//! from the reply chat as turns, which the poller then picks up.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::channel::{Channel, DeliveryReceipt, OutboundMessage};
use crate::http_client::build_http_client_with_timeout;
use crate::recorder::{ReceivedMessage, TurnRecorder};
use crate::turn::{room_id_for_chat, user_id_for};

pub const SOURCE: &str = "telegram";

const LONG_POLL_SECS: u64 = 30;

// ─── Telegram API types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    /// Unix seconds
    pub date: i64,
    pub chat: TelegramChat,
    pub from: Option<TelegramUser>,
    pub text: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: Option<String>,
    pub username: Option<String>,
}

fn api_base(token: &str) -> String {
    format!("https://api.telegram.org/bot{}", token)
}

// ─── Outbound ────────────────────────────────────────────────────────────────

pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
}

impl TelegramChannel {
    pub fn new(token: &str) -> Result<Self> {
        Ok(Self {
            client: build_http_client_with_timeout(Some(Duration::from_secs(30)))?,
            api_base: api_base(token),
        })
    }
}

/// `sendMessage` body for one outbound message.
fn send_message_payload(message: &OutboundMessage) -> Result<serde_json::Value> {
    let chat_id: i64 = message
        .room_id
        .trim()
        .parse()
        .with_context(|| format!("Invalid Telegram chat id {:?}", message.room_id))?;

    let mut payload = serde_json::json!({ "chat_id": chat_id, "text": message.text });
    if let Some(reply_to) = message.reply_to.as_deref() {
        match reply_to.parse::<i64>() {
            Ok(message_id) => {
                payload["reply_parameters"] = serde_json::json!({
                    "message_id": message_id,
                    "allow_sending_without_reply": true
                });
            }
            Err(_) => tracing::warn!("Telegram: ignoring non-numeric reply_to {:?}", reply_to),
        }
    }
    Ok(payload)
}

#[async_trait]
impl Channel for TelegramChannel {
    async fn send(&self, message: OutboundMessage) -> Result<DeliveryReceipt> {
        let payload = send_message_payload(&message)?;
        let url = format!("{}/sendMessage", self.api_base);

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("Telegram sendMessage request failed")?;
        let status = resp.status();
        let body: TelegramResponse<TelegramMessage> = resp
            .json()
            .await
            .with_context(|| format!("Telegram sendMessage returned unreadable body (HTTP {})", status))?;

        if !body.ok {
            anyhow::bail!(
                "Telegram sendMessage failed: HTTP {} {}",
                status,
                body.description.unwrap_or_default()
            );
        }
        let sent = body
            .result
            .context("Telegram sendMessage returned no message")?;

        tracing::debug!("Telegram: sent message {} to chat {}", sent.message_id, sent.chat.id);
        Ok(DeliveryReceipt {
            id: sent.message_id.to_string(),
            timestamp: sent.date * 1000,
            text: message.text,
        })
    }
}

// ─── Inbound ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// The only group chat whose messages are recorded
    pub allowed_chat_id: i64,
    /// Drop private chats with the bot instead of recording them in their
    /// own room
    pub ignore_direct_messages: bool,
}

/// Convert an incoming message into a turn candidate, or `None` when it
/// should not enter the conversation.
pub fn received_from_message(
    msg: TelegramMessage,
    settings: &ListenerSettings,
) -> Option<ReceivedMessage> {
    if msg.chat.kind == "private" {
        if settings.ignore_direct_messages {
            tracing::debug!("Telegram: ignoring direct message in chat {}", msg.chat.id);
            return None;
        }
    } else if msg.chat.id != settings.allowed_chat_id {
        tracing::debug!("Telegram: ignoring message from chat {}", msg.chat.id);
        return None;
    }

    let text = msg
        .text
        .or(msg.caption)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())?;
    let from = msg.from?;
    if from.is_bot {
        return None;
    }

    Some(ReceivedMessage {
        room_id: room_id_for_chat(msg.chat.id),
        user_id: user_id_for(from.id),
        user_name: from.username.or(from.first_name),
        text,
        source: SOURCE.to_string(),
        external_id: Some(msg.message_id.to_string()),
        timestamp: msg.date * 1000,
    })
}

/// Spawn the long-polling listener task.
pub fn spawn_listener(
    token: &str,
    recorder: TurnRecorder,
    settings: ListenerSettings,
) -> Result<JoinHandle<()>> {
    let client =
        build_http_client_with_timeout(Some(Duration::from_secs(LONG_POLL_SECS + 10)))?;
    let api_base = api_base(token);

    Ok(tokio::spawn(async move {
        tracing::info!(
            "Telegram listener active (chat: {}, ignore_direct_messages: {})",
            settings.allowed_chat_id,
            settings.ignore_direct_messages
        );
        run_listener(client, api_base, recorder, settings).await;
    }))
}

async fn run_listener(
    client: reqwest::Client,
    api_base: String,
    recorder: TurnRecorder,
    settings: ListenerSettings,
) {
    let mut offset: i64 = 0;

    loop {
        let updates = match poll_updates(&client, &api_base, offset).await {
            Some(u) => u,
            None => continue,
        };

        for update in updates {
            offset = update.update_id + 1;

            let Some(received) = update
                .message
                .and_then(|msg| received_from_message(msg, &settings))
            else {
                continue;
            };

            tracing::info!("Telegram [{}]: {:?}", received.room_id, received.text);
            match recorder.record_received(received).await {
                Ok(Some(turn)) => tracing::debug!("Telegram: recorded turn {}", turn.id),
                Ok(None) => tracing::debug!("Telegram: message already recorded"),
                Err(e) => tracing::error!("Telegram: failed to store message: {:#}", e),
            }
        }
    }
}

async fn poll_updates(
    client: &reqwest::Client,
    api_base: &str,
    offset: i64,
) -> Option<Vec<Update>> {
    let url = format!("{}/getUpdates", api_base);
    let params = serde_json::json!({
        "offset": offset,
        "timeout": LONG_POLL_SECS,
        "allowed_updates": ["message"]
    });

    let resp = match client.post(&url).json(&params).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Telegram getUpdates error: {}", e);
            tokio::time::sleep(Duration::from_secs(5)).await;
            return None;
        }
    };

    let body: TelegramResponse<Vec<Update>> = match resp.json().await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("Telegram getUpdates parse error: {}", e);
            tokio::time::sleep(Duration::from_secs(5)).await;
            return None;
        }
    };

    if !body.ok {
        tracing::warn!(
            "Telegram API returned ok=false: {}",
            body.description.unwrap_or_default()
        );
        tokio::time::sleep(Duration::from_secs(10)).await;
        return None;
    }

    Some(body.result.unwrap_or_default())
}
