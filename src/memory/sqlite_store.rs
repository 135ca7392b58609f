//! SQLite 聊天记录存储（rusqlite，同步）
//!
//! 单表 messages：id 自增、owner_id 区分日志、payload 为 JSON、timestamp 为 UTC。

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::message::{Message, MessageStore, Payload, StoreError};

pub struct SqliteMessageStore {
    conn: Mutex<Connection>,
}

impl SqliteMessageStore {
    /// 打开（或创建）数据库文件
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_owner ON messages(owner_id, id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query(&self, sql: &str, owner: &str, arg: i64) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![owner, arg], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, DateTime<Utc>>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, owner_id, sender_id, payload, timestamp) = row?;
            out.push(Message {
                id,
                owner_id,
                sender_id,
                payload: serde_json::from_str(&payload)?,
                timestamp,
            });
        }
        Ok(out)
    }
}

impl MessageStore for SqliteMessageStore {
    fn append(&self, owner: &str, sender: &str, payload: Payload) -> Result<Message, StoreError> {
        let json = serde_json::to_string(&payload)?;
        let timestamp = Utc::now();
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO messages (owner_id, sender_id, payload, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![owner, sender, json, timestamp],
        )?;
        Ok(Message {
            id: conn.last_insert_rowid(),
            owner_id: owner.to_string(),
            sender_id: sender.to_string(),
            payload,
            timestamp,
        })
    }

    fn recent(&self, owner: &str, n: usize) -> Result<Vec<Message>, StoreError> {
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let mut rows = self.query(
            "SELECT id, owner_id, sender_id, payload, timestamp FROM messages
             WHERE owner_id = ?1 ORDER BY id DESC LIMIT ?2",
            owner,
            limit,
        )?;
        rows.reverse();
        Ok(rows)
    }

    fn since(&self, owner: &str, since_id: i64) -> Result<Vec<Message>, StoreError> {
        self.query(
            "SELECT id, owner_id, sender_id, payload, timestamp FROM messages
             WHERE owner_id = ?1 AND id > ?2 ORDER BY id ASC",
            owner,
            since_id,
        )
    }

    fn delete_owner(&self, owner: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute("DELETE FROM messages WHERE owner_id = ?1", params![owner])?;
        Ok(())
    }
}
