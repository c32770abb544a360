//! The per-turn pipeline: decide, generate, deliver, record.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::channel::{deliver_in_chunks, Channel};
use crate::composer::ContextComposer;
use crate::decision::ResponseDecisionEngine;
use crate::events::{emit, EventSender, OrchestratorEvent};
use crate::generator::ResponseGenerator;
use crate::recorder::TurnRecorder;
use crate::templates::TemplateKind;
use crate::turn::Turn;

/// Receiver of turns dispatched by the poller.
///
/// Implementations own their error handling; nothing propagates back to
/// the poll loop.
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn handle(&self, turn: Turn);
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The classifier did not choose to respond
    Ignored,
    /// The model produced nothing; nothing was sent or recorded
    NoReply,
    Delivered { chunks: usize, recorded: Turn },
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Outbound chat replies are delivered to
    pub reply_chat_id: String,
    pub max_message_length: usize,
    /// Attach the source turn's channel message id to the first chunk
    pub reply_to_source: bool,
}

pub struct TurnPipeline {
    composer: Arc<dyn ContextComposer>,
    decision: ResponseDecisionEngine,
    generator: ResponseGenerator,
    channel: Arc<dyn Channel>,
    recorder: TurnRecorder,
    settings: PipelineSettings,
    event_tx: EventSender,
}

impl TurnPipeline {
    pub fn new(
        composer: Arc<dyn ContextComposer>,
        decision: ResponseDecisionEngine,
        generator: ResponseGenerator,
        channel: Arc<dyn Channel>,
        recorder: TurnRecorder,
        settings: PipelineSettings,
        event_tx: EventSender,
    ) -> Self {
        Self {
            composer,
            decision,
            generator,
            channel,
            recorder,
            settings,
            event_tx,
        }
    }

    pub async fn process(&self, turn: &Turn) -> Result<PipelineOutcome> {
        let state = self
            .composer
            .compose(turn)
            .await
            .context("Failed to compose state")?;
        let state = self
            .composer
            .refresh_recent_history(state)
            .await
            .context("Failed to refresh recent history")?;

        let respond = self.decision.should_respond(turn, &state).await?;
        emit(
            &self.event_tx,
            OrchestratorEvent::Decision {
                turn_id: turn.id.clone(),
                respond,
            },
        );
        if !respond {
            return Ok(PipelineOutcome::Ignored);
        }

        let context = self
            .composer
            .render_template(&state, TemplateKind::MessageHandler)
            .await
            .context("Failed to render reply context")?;

        let Some(reply) = self.generator.generate(turn, &state, &context).await? else {
            return Ok(PipelineOutcome::NoReply);
        };

        let reply_to = if self.settings.reply_to_source {
            turn.content.external_id.as_deref()
        } else {
            None
        };
        let receipts = deliver_in_chunks(
            self.channel.as_ref(),
            &self.settings.reply_chat_id,
            &reply.text,
            reply_to,
            self.settings.max_message_length,
        )
        .await?;

        let recorded = self.recorder.record_reply(turn, &reply, &receipts).await?;
        Ok(PipelineOutcome::Delivered {
            chunks: receipts.len(),
            recorded,
        })
    }
}

#[async_trait]
impl TurnHandler for TurnPipeline {
    async fn handle(&self, turn: Turn) {
        match self.process(&turn).await {
            Ok(PipelineOutcome::Ignored) => {
                tracing::debug!("Not responding to turn {}", turn.id);
            }
            Ok(PipelineOutcome::NoReply) => {
                tracing::warn!("No reply generated for turn {}", turn.id);
                emit(
                    &self.event_tx,
                    OrchestratorEvent::NoReply {
                        turn_id: turn.id.clone(),
                    },
                );
            }
            Ok(PipelineOutcome::Delivered { chunks, recorded }) => {
                tracing::info!(
                    "Replied to turn {} in {} chunk(s), recorded as {}",
                    turn.id,
                    chunks,
                    recorded.id
                );
                emit(
                    &self.event_tx,
                    OrchestratorEvent::ReplyDelivered {
                        turn_id: turn.id.clone(),
                        chunks,
                        recorded_turn_id: recorded.id,
                    },
                );
            }
            Err(e) => {
                tracing::error!("Pipeline failed for turn {}: {:#}", turn.id, e);
                emit(
                    &self.event_tx,
                    OrchestratorEvent::PipelineFailed {
                        turn_id: turn.id.clone(),
                        error: format!("{:#}", e),
                    },
                );
            }
        }
    }
}
