//! Append-only turn storage, partitioned by room.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::turn::Turn;

/// Shared conversation log.
///
/// Turns of a room come back in append order, which is the order the
/// orchestrator's cursor indexes into. Appends are serialized by the
/// implementation; callers hold no locks of their own.
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// All turns stored for `room_id`, oldest first.
    async fn read_room(&self, room_id: &str) -> Result<Vec<Turn>>;

    /// Append a turn. Returns `false` (and stores nothing) when a turn with
    /// the same id already exists.
    async fn append(&self, turn: Turn) -> Result<bool>;
}

/// Process-local store, used by tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryTurnStore {
    turns: Mutex<Vec<Turn>>,
}

impl InMemoryTurnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_turns(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns),
        }
    }

    fn lock_turns(&self) -> Result<std::sync::MutexGuard<'_, Vec<Turn>>> {
        self.turns
            .lock()
            .map_err(|e| anyhow::anyhow!("Turn store lock poisoned: {}", e))
    }
}

#[async_trait]
impl TurnStore for InMemoryTurnStore {
    async fn read_room(&self, room_id: &str) -> Result<Vec<Turn>> {
        let turns = self.lock_turns()?;
        Ok(turns
            .iter()
            .filter(|turn| turn.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn append(&self, turn: Turn) -> Result<bool> {
        let mut turns = self.lock_turns()?;
        if turns.iter().any(|existing| existing.id == turn.id) {
            return Ok(false);
        }
        turns.push(turn);
        Ok(true)
    }
}
