use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use crate::generator::{AuditEvent, AuditLog};
use crate::store::TurnStore;
use crate::turn::{Content, Turn};

/// SQLite persistence for turns and audit logs.
pub struct PalaverDatabase {
    conn: Mutex<Connection>,
}

impl PalaverDatabase {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {:?}", path))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS turns (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                room_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                embedding BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_turns_room ON turns(room_id, seq);

            CREATE TABLE IF NOT EXISTS logs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                user_id TEXT NOT NULL,
                room_id TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )
        .context("Failed to create schema")?;
        Ok(())
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// Turns of one room in append order.
    pub fn get_room_turns(&self, room_id: &str) -> Result<Vec<Turn>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, room_id, user_id, agent_id, content, created_at, embedding
             FROM turns WHERE room_id = ?1 ORDER BY seq ASC",
        )?;

        let rows = stmt
            .query_map([room_id], |row| {
                let content: String = row.get(4)?;
                let embedding: Vec<u8> = row.get(6)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    content,
                    row.get::<_, i64>(5)?,
                    embedding,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, room_id, user_id, agent_id, content, created_at, embedding)| {
                    let content: Content = serde_json::from_str(&content)
                        .with_context(|| format!("Corrupt content for turn {}", id))?;
                    Ok(Turn {
                        id,
                        room_id,
                        user_id,
                        agent_id,
                        content,
                        created_at,
                        embedding: decode_embedding(&embedding),
                    })
                },
            )
            .collect()
    }

    /// Insert a turn; `false` if its id is already present.
    pub fn insert_turn(&self, turn: &Turn) -> Result<bool> {
        let content = serde_json::to_string(&turn.content).context("Failed to encode content")?;
        let conn = self.lock_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO turns (id, room_id, user_id, agent_id, content, created_at, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                turn.id,
                turn.room_id,
                turn.user_id,
                turn.agent_id,
                content,
                turn.created_at,
                encode_embedding(&turn.embedding),
            ],
        )?;
        Ok(inserted > 0)
    }

    // ========================================================================
    // Audit logs
    // ========================================================================

    pub fn add_log(&self, event: &AuditEvent) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let body = serde_json::to_string(&event.body).context("Failed to encode log body")?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO logs (id, kind, user_id, room_id, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                event.kind,
                event.user_id,
                event.room_id,
                body,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(id)
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[async_trait]
impl TurnStore for PalaverDatabase {
    async fn read_room(&self, room_id: &str) -> Result<Vec<Turn>> {
        self.get_room_turns(room_id)
    }

    async fn append(&self, turn: Turn) -> Result<bool> {
        self.insert_turn(&turn)
    }
}

#[async_trait]
impl AuditLog for PalaverDatabase {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.add_log(&event)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::EMBEDDING_DIMENSIONS;

    fn temp_db() -> (tempfile::TempDir, PalaverDatabase) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = PalaverDatabase::new(dir.path().join("palaver.db")).expect("db init");
        (dir, db)
    }

    #[tokio::test]
    async fn turns_roundtrip_in_append_order() {
        let (_dir, db) = temp_db();
        let mut content = Content::text("night falls");
        content.user_name = Some("reubenhe".to_string());
        content.external_id = Some("311".to_string());
        let first = Turn::new("room", "host", "agent-1", content, 2_000);
        // Earlier timestamp, appended later: append order wins.
        let second = Turn::new("room", "alice", "agent-1", Content::text("hi"), 1_000);
        let other = Turn::new("elsewhere", "bob", "agent-1", Content::text("yo"), 1_500);

        assert!(db.append(first.clone()).await.unwrap());
        assert!(db.append(second.clone()).await.unwrap());
        assert!(db.append(other).await.unwrap());

        let room = db.read_room("room").await.unwrap();
        assert_eq!(room, vec![first, second]);
        assert_eq!(room[0].embedding.len(), EMBEDDING_DIMENSIONS);
        assert_eq!(db.read_room("elsewhere").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_turn_ids_are_ignored() {
        let (_dir, db) = temp_db();
        let turn = Turn::new("room", "host", "agent-1", Content::text("once"), 1);

        assert!(db.append(turn.clone()).await.unwrap());
        assert!(!db.append(turn).await.unwrap());
        assert_eq!(db.read_room("room").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn turns_survive_reopening_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("palaver.db");
        {
            let db = PalaverDatabase::new(&path).unwrap();
            db.append(Turn::new("room", "host", "agent-1", Content::text("persisted"), 1))
                .await
                .unwrap();
        }
        let db = PalaverDatabase::new(&path).unwrap();
        let room = db.read_room("room").await.unwrap();
        assert_eq!(room.len(), 1);
        assert_eq!(room[0].text(), "persisted");
    }

    #[tokio::test]
    async fn audit_events_are_stored_per_room() {
        let (_dir, db) = temp_db();
        db.record(AuditEvent {
            kind: "response".to_string(),
            user_id: "alice".to_string(),
            room_id: "room".to_string(),
            body: serde_json::json!({"context": "ctx", "response": {"text": "hi"}}),
        })
        .await
        .unwrap();

        let conn = db.lock_conn().unwrap();
        let (kind, room_id, body): (String, String, String) = conn
            .query_row("SELECT kind, room_id, body FROM logs", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(kind, "response");
        assert_eq!(room_id, "room");
        assert_eq!(body["response"]["text"], "hi");
    }
}
