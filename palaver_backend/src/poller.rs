//! Watching a room for new turns and dispatching them to the pipeline.
//!
//! The poller keeps a process-local cursor: the number of turns already
//! observed in the room. On the first observation it only initializes the
//! cursor, so history that existed before startup is never replayed. After
//! that, each tick that sees growth dispatches the turn at the old cursor
//! index and jumps the cursor to the new count. With the default
//! [`BacklogPolicy::CursorOnly`] at most one turn is handled per tick; turns
//! that arrive together behind it are skipped.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::events::{emit, EventSender, OrchestratorEvent};
use crate::pipeline::TurnHandler;
use crate::store::TurnStore;

/// What to do when several turns arrive between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BacklogPolicy {
    /// Dispatch only the turn at the old cursor index
    #[default]
    CursorOnly,
    /// Dispatch every turn from the old cursor up to the new count
    DrainAll,
}

/// Count of turns already observed in the watched room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    observed: usize,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.observed
    }

    /// Advance to `count` and return the indices to dispatch.
    ///
    /// A count at or below the cursor changes nothing. The very first
    /// advance initializes without dispatching.
    pub fn advance(&mut self, count: usize, policy: BacklogPolicy) -> Range<usize> {
        let previous = self.observed;
        if count <= previous {
            return previous..previous;
        }
        self.observed = count;

        if previous == 0 {
            return count..count;
        }
        match policy {
            BacklogPolicy::CursorOnly => previous..previous + 1,
            BacklogPolicy::DrainAll => previous..count,
        }
    }
}

pub struct ConversationPoller {
    store: Arc<dyn TurnStore>,
    handler: Arc<dyn TurnHandler>,
    room_id: String,
    interval: Duration,
    policy: BacklogPolicy,
    cursor: Cursor,
    event_tx: EventSender,
}

impl ConversationPoller {
    pub fn new(
        store: Arc<dyn TurnStore>,
        handler: Arc<dyn TurnHandler>,
        room_id: String,
        interval: Duration,
        event_tx: EventSender,
    ) -> Self {
        Self {
            store,
            handler,
            room_id,
            interval,
            policy: BacklogPolicy::default(),
            cursor: Cursor::new(),
            event_tx,
        }
    }

    pub fn with_backlog_policy(mut self, policy: BacklogPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// One observation of the room.
    ///
    /// Returns the handles of the pipelines spawned for new turns; the poll
    /// loop drops them without awaiting.
    pub async fn tick(&mut self) -> Result<Vec<JoinHandle<()>>> {
        let turns = self
            .store
            .read_room(&self.room_id)
            .await
            .with_context(|| format!("Failed to read room {}", self.room_id))?;

        let previous = self.cursor.position();
        let count = turns.len();
        let dispatch = self.cursor.advance(count, self.policy);

        if count > previous {
            tracing::debug!("Room {} grew from {} to {} turns", self.room_id, previous, count);
            if previous == 0 {
                tracing::info!(
                    "Watching room {} from {} existing turn(s)",
                    self.room_id,
                    count
                );
                emit(
                    &self.event_tx,
                    OrchestratorEvent::CursorInitialized {
                        room_id: self.room_id.clone(),
                        count,
                    },
                );
            } else if dispatch.end < count {
                tracing::warn!(
                    "Skipping {} turn(s) that arrived in the same poll interval",
                    count - dispatch.end
                );
                emit(
                    &self.event_tx,
                    OrchestratorEvent::BacklogSkipped {
                        from_index: dispatch.end,
                        count: count - dispatch.end,
                    },
                );
            }
        }

        let mut handles = Vec::with_capacity(dispatch.len());
        for index in dispatch {
            let turn = turns[index].clone();
            tracing::info!("Dispatching turn {} at index {}", turn.id, index);
            emit(
                &self.event_tx,
                OrchestratorEvent::TurnDispatched {
                    index,
                    turn_id: turn.id.clone(),
                },
            );
            let handler = self.handler.clone();
            handles.push(tokio::spawn(async move { handler.handle(turn).await }));
        }
        Ok(handles)
    }

    /// Poll forever. Store failures are logged and retried on the next tick.
    pub async fn run(mut self) {
        tracing::info!(
            "Conversation poller starting (room: {}, interval: {:?}, backlog: {:?})",
            self.room_id,
            self.interval,
            self.policy
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                tracing::warn!("Poll failed: {:#}", e);
                emit(&self.event_tx, OrchestratorEvent::PollFailed(format!("{:#}", e)));
            }
        }
    }
}
