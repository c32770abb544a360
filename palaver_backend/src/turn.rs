//! Conversation turns: one immutable message in a room's history.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Width of the embedding every stored turn carries.
pub const EMBEDDING_DIMENSIONS: usize = 1536;

/// Namespace for deterministic turn and room ids.
/// Ids derived from the same seed survive restarts and retries unchanged.
const PALAVER_NS: Uuid = Uuid::from_bytes([
    0x3f, 0x1c, 0x8e, 0x52, 0x9a, 0x47, 0x5d, 0x0b,
    0xb6, 0x2e, 0x71, 0xc4, 0x05, 0xd8, 0x9f, 0x63,
]);

/// Text payload of a turn plus optional metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Channel the turn arrived from or was delivered to (e.g. "telegram")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Id of the turn this one answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    /// Display name of the author, when the channel provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Channel-native message id (used for reply-to references)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub room_id: String,
    /// Author of the turn: a human participant or the agent itself
    pub user_id: String,
    pub agent_id: String,
    pub content: Content,
    /// Milliseconds since the Unix epoch, taken from the originating event
    pub created_at: i64,
    pub embedding: Vec<f32>,
}

impl Turn {
    /// Build a turn whose id is derived from its timestamp and author.
    pub fn new(
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
        content: Content,
        created_at: i64,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            id: turn_id_for(&created_at.to_string(), &user_id),
            room_id: room_id.into(),
            user_id,
            agent_id: agent_id.into(),
            content,
            created_at,
            embedding: zero_embedding(),
        }
    }

    pub fn text(&self) -> &str {
        &self.content.text
    }
}

/// Placeholder embedding for turns that never take part in semantic search.
pub fn zero_embedding() -> Vec<f32> {
    vec![0.0; EMBEDDING_DIMENSIONS]
}

/// Stable UUID for an arbitrary seed string.
pub fn derive_id(seed: &str) -> String {
    Uuid::new_v5(&PALAVER_NS, seed.as_bytes()).to_string()
}

/// Turn id from a source timestamp and the originator's id.
pub fn turn_id_for(timestamp: &str, originator: &str) -> String {
    derive_id(&format!("{}-{}", timestamp, originator))
}

/// Room id for a channel-native chat id.
pub fn room_id_for_chat(chat_id: i64) -> String {
    derive_id(&chat_id.to_string())
}

/// User id for a channel-native user id.
pub fn user_id_for(channel_user_id: i64) -> String {
    derive_id(&format!("user:{}", channel_user_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_ids_are_deterministic_per_timestamp_and_author() {
        let a = Turn::new("room", "alice", "agent", Content::text("hi"), 1_700_000_000_000);
        let b = Turn::new("room", "alice", "agent", Content::text("other text"), 1_700_000_000_000);
        let c = Turn::new("room", "bob", "agent", Content::text("hi"), 1_700_000_000_000);

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.embedding.len(), EMBEDDING_DIMENSIONS);
        assert!(a.embedding.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn chat_rooms_map_to_stable_ids() {
        assert_eq!(room_id_for_chat(-4540792649), room_id_for_chat(-4540792649));
        assert_ne!(room_id_for_chat(1), room_id_for_chat(2));
        assert_ne!(room_id_for_chat(7), user_id_for(7));
    }

    #[test]
    fn content_metadata_is_omitted_when_absent() {
        let json = serde_json::to_string(&Content::text("hello")).unwrap();
        assert_eq!(json, r#"{"text":"hello"}"#);
    }
}
