//! 聊天记录：不可变消息与存储抽象
//!
//! 每个角色、每个群组各自拥有一条日志（owner_id）；核心只追加与按区间读取。

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 用户发言的 sender_id
pub const USER_SENDER: &str = "user";
/// 系统提示（入群 / 退群 / 错误）的 sender_id
pub const SYSTEM_SENDER: &str = "system";

/// 消息内容（以 JSON 形式落库）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(rename = "type")]
    pub kind: String,
    pub text_content: String,
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text_content: text.into(),
        }
    }

    /// 系统提示（错误提示、成员变动），不属于任何角色的台词
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            kind: "system".to_string(),
            text_content: text.into(),
        }
    }
}

/// 单条消息；id 在整个存储内单调递增
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub owner_id: String,
    pub sender_id: String,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn text(&self) -> &str {
        &self.payload.text_content
    }

    pub fn is_from_user(&self) -> bool {
        self.sender_id == USER_SENDER
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Payload JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// 消息存储：追加、取最近 N 条（升序）、取某 id 之后的全部（升序）
pub trait MessageStore: Send + Sync {
    fn append(&self, owner: &str, sender: &str, payload: Payload) -> Result<Message, StoreError>;

    fn recent(&self, owner: &str, n: usize) -> Result<Vec<Message>, StoreError>;

    fn since(&self, owner: &str, since_id: i64) -> Result<Vec<Message>, StoreError>;

    /// 删除某个 owner 的整条日志
    fn delete_owner(&self, owner: &str) -> Result<(), StoreError>;
}

/// 进程内存储（测试与无盘运行）
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    inner: Mutex<InMemoryInner>,
}

#[derive(Debug, Default)]
struct InMemoryInner {
    next_id: i64,
    logs: HashMap<String, Vec<Message>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for InMemoryMessageStore {
    fn append(&self, owner: &str, sender: &str, payload: Payload) -> Result<Message, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        inner.next_id += 1;
        let message = Message {
            id: inner.next_id,
            owner_id: owner.to_string(),
            sender_id: sender.to_string(),
            payload,
            timestamp: Utc::now(),
        };
        inner
            .logs
            .entry(owner.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    fn recent(&self, owner: &str, n: usize) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let log = inner.logs.get(owner).map(Vec::as_slice).unwrap_or(&[]);
        let start = log.len().saturating_sub(n);
        Ok(log[start..].to_vec())
    }

    fn since(&self, owner: &str, since_id: i64) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .logs
            .get(owner)
            .map(|log| log.iter().filter(|m| m.id > since_id).cloned().collect())
            .unwrap_or_default())
    }

    fn delete_owner(&self, owner: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        inner.logs.remove(owner);
        Ok(())
    }
}
