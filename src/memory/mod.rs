//! 记忆层：聊天记录存储（内存 / SQLite）与两级记忆整理

pub mod consolidation;
pub mod message;
pub mod sqlite_store;

pub use consolidation::{extract_knowledge, ConsolidationOutcome, MemoryOwner, MemoryPipeline};
pub use message::{
    InMemoryMessageStore, Message, MessageStore, Payload, StoreError, SYSTEM_SENDER, USER_SENDER,
};
pub use sqlite_store::SqliteMessageStore;
