//! Composition of conversation state into rendered model contexts.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex_lite::{Captures, Regex};

use crate::config::CharacterConfig;
use crate::store::TurnStore;
use crate::templates::{resolve_template, TemplateKind};
use crate::turn::Turn;

/// Everything a template can refer to for one turn.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub agent_id: String,
    pub agent_name: String,
    pub bio: String,
    pub lore: String,
    pub role: String,
    pub rules: String,
    pub message_examples: String,
    pub room_id: String,
    pub user_id: String,
    /// Text of the turn being handled
    pub current_post: String,
    /// Formatted recent history, one message per line
    pub recent_messages: String,
    pub recent_turns: Vec<Turn>,
    /// Latest non-empty history line, filled in by the decision stage
    pub last_message: String,
}

impl State {
    /// Placeholder name → value.
    pub fn values(&self) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        for (key, value) in [
            ("agentId", &self.agent_id),
            ("agentName", &self.agent_name),
            ("bio", &self.bio),
            ("lore", &self.lore),
            ("role", &self.role),
            ("rules", &self.rules),
            ("messageExamples", &self.message_examples),
            ("characterMessageExamples", &self.message_examples),
            ("roomId", &self.room_id),
            ("userId", &self.user_id),
            ("currentPost", &self.current_post),
            ("recentMessages", &self.recent_messages),
            ("lastMessage", &self.last_message),
        ] {
            values.insert(key.to_string(), value.clone());
        }
        values
    }
}

/// Builds [`State`] for a turn and renders it through named templates.
#[async_trait]
pub trait ContextComposer: Send + Sync {
    /// Fresh state seeded with `turn`.
    async fn compose(&self, turn: &Turn) -> Result<State>;

    /// Render `state` through the template resolved for `kind`.
    async fn render_template(&self, state: &State, kind: TemplateKind) -> Result<String>;

    /// Re-read the room's history into `state`.
    async fn refresh_recent_history(&self, state: State) -> Result<State>;
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("valid placeholder regex"))
}

/// Substitute `{{key}}` slots; unknown keys render as empty text.
pub fn render(template: &str, values: &BTreeMap<String, String>) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures<'_>| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Composer backed by the turn store and the configured character.
pub struct TemplateComposer {
    store: Arc<dyn TurnStore>,
    character: CharacterConfig,
    agent_id: String,
    recent_message_count: usize,
}

impl TemplateComposer {
    pub fn new(
        store: Arc<dyn TurnStore>,
        character: CharacterConfig,
        agent_id: String,
        recent_message_count: usize,
    ) -> Self {
        Self {
            store,
            character,
            agent_id,
            recent_message_count: recent_message_count.max(1),
        }
    }

    async fn recent_turns(&self, room_id: &str) -> Result<Vec<Turn>> {
        let mut turns = self
            .store
            .read_room(room_id)
            .await
            .with_context(|| format!("Failed to read history for room {}", room_id))?;
        let skip = turns.len().saturating_sub(self.recent_message_count);
        Ok(turns.split_off(skip))
    }

    fn author_name<'a>(&'a self, turn: &'a Turn) -> &'a str {
        if turn.user_id == self.agent_id {
            &self.character.name
        } else {
            turn.content.user_name.as_deref().unwrap_or("user")
        }
    }

    /// One line per turn: `(seq) [author-id] name: text`.
    fn format_recent_messages(&self, turns: &[Turn]) -> String {
        let mut formatted = String::new();
        for (i, turn) in turns.iter().enumerate() {
            let short_id: String = turn.user_id.chars().take(8).collect();
            let text = turn.text().replace(['\r', '\n'], " ");
            formatted.push_str(&format!(
                "({}) [{}] {}: {}\n",
                i + 1,
                short_id,
                self.author_name(turn),
                text.trim()
            ));
        }
        formatted
    }
}

#[async_trait]
impl ContextComposer for TemplateComposer {
    async fn compose(&self, turn: &Turn) -> Result<State> {
        let recent_turns = self.recent_turns(&turn.room_id).await?;
        Ok(State {
            agent_id: self.agent_id.clone(),
            agent_name: self.character.name.clone(),
            bio: self.character.bio.clone(),
            lore: self.character.lore.clone(),
            role: self.character.role.clone(),
            rules: self.character.rules.clone(),
            message_examples: self.character.message_examples.clone(),
            room_id: turn.room_id.clone(),
            user_id: turn.user_id.clone(),
            current_post: turn.text().to_string(),
            recent_messages: self.format_recent_messages(&recent_turns),
            recent_turns,
            last_message: String::new(),
        })
    }

    async fn render_template(&self, state: &State, kind: TemplateKind) -> Result<String> {
        let template = resolve_template(&self.character.templates, kind);
        Ok(render(&template, &state.values()))
    }

    async fn refresh_recent_history(&self, mut state: State) -> Result<State> {
        let recent_turns = self.recent_turns(&state.room_id).await?;
        state.recent_messages = self.format_recent_messages(&recent_turns);
        state.recent_turns = recent_turns;
        Ok(state)
    }
}
