use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::chunker::MAX_MESSAGE_LENGTH;
use crate::poller::BacklogPolicy;
use crate::turn::{derive_id, room_id_for_chat};

/// Per-character template overrides.
///
/// Lookups go channel-specific override first, then the character's generic
/// override, then the built-in default.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TemplateOverrides {
    #[serde(default)]
    pub telegram_should_respond: Option<String>,
    #[serde(default)]
    pub should_respond: Option<String>,
    #[serde(default)]
    pub telegram_message_handler: Option<String>,
    #[serde(default)]
    pub message_handler: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterConfig {
    #[serde(default = "default_character_name")]
    pub name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub lore: String,
    /// Role the agent plays in the room (e.g. a seat in a game)
    #[serde(default)]
    pub role: String,
    /// Domain rules the agent must follow (game rules, house rules, ...)
    #[serde(default)]
    pub rules: String,
    #[serde(default)]
    pub message_examples: String,
    #[serde(default)]
    pub templates: TemplateOverrides,
}

fn default_character_name() -> String {
    "Palaver".to_string()
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            name: default_character_name(),
            bio: String::new(),
            lore: String::new(),
            role: String::new(),
            rules: String::new(),
            message_examples: String::new(),
            templates: TemplateOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PalaverConfig {
    // LLM configuration (OpenAI-compatible: Ollama, LM Studio, vLLM, OpenAI, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default)]
    pub model_small: Option<String>,
    #[serde(default)]
    pub model_medium: Option<String>,
    #[serde(default)]
    pub model_large: Option<String>,

    // Agent identity; empty means "derived from the character name"
    #[serde(default)]
    pub agent_id: String,

    // Rooms
    /// Room watched for new turns. Empty means "the room of `reply_chat_id`".
    #[serde(default)]
    pub watched_room_id: String,
    /// Outbound chat replies are delivered to.
    #[serde(default)]
    pub reply_chat_id: String,

    // Polling and delivery
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub backlog_policy: BacklogPolicy,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "default_recent_message_count")]
    pub recent_message_count: usize,
    /// Send the first chunk of a reply as a reply to the source message
    #[serde(default)]
    pub reply_to_source: bool,

    // Telegram
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub ignore_direct_messages: bool,
    #[serde(default = "default_true")]
    pub enable_inbound_listener: bool,

    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default)]
    pub character: CharacterConfig,
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_message_length() -> usize {
    MAX_MESSAGE_LENGTH
}

fn default_recent_message_count() -> usize {
    32
}

fn default_true() -> bool {
    true
}

fn default_database_path() -> String {
    "palaver.db".to_string()
}

impl Default for PalaverConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            model_small: None,
            model_medium: None,
            model_large: None,
            agent_id: String::new(),
            watched_room_id: String::new(),
            reply_chat_id: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            backlog_policy: BacklogPolicy::default(),
            max_message_length: default_max_message_length(),
            recent_message_count: default_recent_message_count(),
            reply_to_source: false,
            telegram_bot_token: None,
            ignore_direct_messages: false,
            enable_inbound_listener: true,
            database_path: default_database_path(),
            character: CharacterConfig::default(),
        }
    }
}

impl PalaverConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("palaver_config.toml")
    }

    /// Load config from palaver_config.toml (next to executable), falling back to env vars
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<PalaverConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("LLM_API_URL") {
            config.llm_api_url = url;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            config.llm_model = model;
        }

        if let Ok(model) = env::var("LLM_MODEL_SMALL") {
            config.model_small = Some(model);
        }

        if let Ok(key) = env::var("LLM_API_KEY") {
            config.llm_api_key = Some(key);
        }

        if let Ok(room) = env::var("PALAVER_WATCHED_ROOM_ID") {
            config.watched_room_id = room.trim().to_string();
        }

        if let Ok(chat) = env::var("PALAVER_REPLY_CHAT_ID") {
            config.reply_chat_id = chat.trim().to_string();
        }

        if let Ok(interval) = env::var("PALAVER_POLL_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                config.poll_interval_ms = ms;
            }
        }

        if let Ok(path) = env::var("PALAVER_DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = path;
            }
        }

        if let Ok(enabled) = env::var("PALAVER_IGNORE_DIRECT_MESSAGES") {
            config.ignore_direct_messages = enabled.eq_ignore_ascii_case("1")
                || enabled.eq_ignore_ascii_case("true")
                || enabled.eq_ignore_ascii_case("yes");
        }

        if let Ok(name) = env::var("AGENT_NAME") {
            config.character.name = name;
        }

        config
    }

    /// Agent id, derived from the character name when not configured.
    pub fn agent_id(&self) -> String {
        if self.agent_id.trim().is_empty() {
            derive_id(&format!("agent:{}", self.character.name))
        } else {
            self.agent_id.trim().to_string()
        }
    }

    /// Room the poller watches.
    pub fn watched_room(&self) -> Result<String> {
        if !self.watched_room_id.trim().is_empty() {
            return Ok(self.watched_room_id.trim().to_string());
        }
        let chat_id: i64 = self
            .reply_chat_id
            .trim()
            .parse()
            .with_context(|| {
                format!(
                    "watched_room_id is unset and reply_chat_id {:?} is not a chat id",
                    self.reply_chat_id
                )
            })?;
        Ok(room_id_for_chat(chat_id))
    }

    /// Telegram token: config first, then `TELEGRAM_BOT_TOKEN_<NAME>`, then
    /// `TELEGRAM_BOT_TOKEN`.
    pub fn telegram_token(&self) -> Option<String> {
        if let Some(token) = self
            .telegram_bot_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            return Some(token.to_string());
        }
        let per_character = format!("TELEGRAM_BOT_TOKEN_{}", self.character.name);
        [per_character.as_str(), "TELEGRAM_BOT_TOKEN"]
            .iter()
            .filter_map(|key| env::var(key).ok())
            .map(|t| t.trim().to_string())
            .find(|t| !t.is_empty())
    }
}
