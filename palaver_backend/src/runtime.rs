use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::channel::Channel;
use crate::composer::{ContextComposer, TemplateComposer};
use crate::config::PalaverConfig;
use crate::database::PalaverDatabase;
use crate::decision::ResponseDecisionEngine;
use crate::events::EventSender;
use crate::generator::{AuditLog, ResponseGenerator};
use crate::llm_client::LlmClient;
use crate::model::{Classifier, Completion};
use crate::pipeline::{PipelineSettings, TurnHandler, TurnPipeline};
use crate::poller::ConversationPoller;
use crate::recorder::TurnRecorder;
use crate::store::TurnStore;
use crate::telegram::{self, ListenerSettings, TelegramChannel};

/// A fully wired orchestrator.
pub struct PalaverRuntime {
    pub config: PalaverConfig,
    pub agent_id: String,
    pub store: Arc<dyn TurnStore>,
    pub poller: ConversationPoller,
}

/// Wires the orchestrator from config. Collaborators left unset are built
/// from config: SQLite for the store and audit log, the OpenAI-compatible
/// client for both model roles, Telegram for delivery.
pub struct PalaverRuntimeBuilder {
    config: PalaverConfig,
    event_tx: EventSender,
    store: Option<Arc<dyn TurnStore>>,
    audit: Option<Arc<dyn AuditLog>>,
    classifier: Option<Arc<dyn Classifier>>,
    completion: Option<Arc<dyn Completion>>,
    channel: Option<Arc<dyn Channel>>,
}

impl PalaverRuntimeBuilder {
    pub fn new(config: PalaverConfig, event_tx: EventSender) -> Self {
        Self {
            config,
            event_tx,
            store: None,
            audit: None,
            classifier: None,
            completion: None,
            channel: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn TurnStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_completion(mut self, completion: Arc<dyn Completion>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn build(self) -> Result<PalaverRuntime> {
        let config = self.config;
        let agent_id = config.agent_id();
        let room_id = config.watched_room()?;
        if config.reply_chat_id.trim().is_empty() {
            anyhow::bail!("reply_chat_id is not configured");
        }

        let (store, audit) = match (self.store, self.audit) {
            (Some(store), Some(audit)) => (store, audit),
            (store, audit) => {
                let db = Arc::new(
                    PalaverDatabase::new(&config.database_path).with_context(|| {
                        format!("Failed to open database {}", config.database_path)
                    })?,
                );
                (
                    store.unwrap_or_else(|| db.clone() as Arc<dyn TurnStore>),
                    audit.unwrap_or_else(|| db.clone() as Arc<dyn AuditLog>),
                )
            }
        };

        let (classifier, completion) = match (self.classifier, self.completion) {
            (Some(classifier), Some(completion)) => (classifier, completion),
            (classifier, completion) => {
                let llm = Arc::new(LlmClient::from_config(&config)?);
                tracing::info!("LLM: {} (model: {})", config.llm_api_url, config.llm_model);
                (
                    classifier.unwrap_or_else(|| llm.clone() as Arc<dyn Classifier>),
                    completion.unwrap_or_else(|| llm.clone() as Arc<dyn Completion>),
                )
            }
        };

        let channel = match self.channel {
            Some(channel) => channel,
            None => {
                let token = config
                    .telegram_token()
                    .context("No Telegram bot token configured")?;
                Arc::new(TelegramChannel::new(&token)?) as Arc<dyn Channel>
            }
        };

        let composer: Arc<dyn ContextComposer> = Arc::new(TemplateComposer::new(
            store.clone(),
            config.character.clone(),
            agent_id.clone(),
            config.recent_message_count,
        ));

        let pipeline = Arc::new(TurnPipeline::new(
            composer.clone(),
            ResponseDecisionEngine::new(composer, classifier),
            ResponseGenerator::new(completion, audit),
            channel,
            TurnRecorder::new(store.clone(), agent_id.clone()),
            PipelineSettings {
                reply_chat_id: config.reply_chat_id.trim().to_string(),
                max_message_length: config.max_message_length,
                reply_to_source: config.reply_to_source,
            },
            self.event_tx.clone(),
        ));

        let poller = ConversationPoller::new(
            store.clone(),
            pipeline as Arc<dyn TurnHandler>,
            room_id,
            Duration::from_millis(config.poll_interval_ms.max(1)),
            self.event_tx,
        )
        .with_backlog_policy(config.backlog_policy);

        tracing::info!(
            "Runtime ready: agent {} ({}) watching {} and replying to {}",
            config.character.name,
            agent_id,
            poller.room_id(),
            config.reply_chat_id
        );

        Ok(PalaverRuntime {
            config,
            agent_id,
            store,
            poller,
        })
    }
}

impl PalaverRuntime {
    pub fn bootstrap(config: PalaverConfig, event_tx: EventSender) -> Result<Self> {
        PalaverRuntimeBuilder::new(config, event_tx).build()
    }

    /// Start the inbound listener (when enabled) and poll forever.
    pub async fn run(self) -> Result<()> {
        let _listener = self.spawn_listener()?;
        self.poller.run().await;
        Ok(())
    }

    fn spawn_listener(&self) -> Result<Option<tokio::task::JoinHandle<()>>> {
        if !self.config.enable_inbound_listener {
            return Ok(None);
        }
        let Some(token) = self.config.telegram_token() else {
            tracing::warn!("Inbound listener enabled but no Telegram token is configured");
            return Ok(None);
        };
        let allowed_chat_id: i64 = self
            .config
            .reply_chat_id
            .trim()
            .parse()
            .with_context(|| {
                format!("reply_chat_id {:?} is not a Telegram chat id", self.config.reply_chat_id)
            })?;
        let inbound_room = crate::turn::room_id_for_chat(allowed_chat_id);
        if inbound_room != self.poller.room_id() {
            tracing::warn!(
                "Inbound messages land in room {} but the poller watches {}",
                inbound_room,
                self.poller.room_id()
            );
        }

        let handle = telegram::spawn_listener(
            &token,
            TurnRecorder::new(self.store.clone(), self.agent_id.clone()),
            ListenerSettings {
                allowed_chat_id,
                ignore_direct_messages: self.config.ignore_direct_messages,
            },
        )?;
        Ok(Some(handle))
    }
}
