//! 对外事件：供 UI / 通知层订阅（broadcast channel）

use serde::Serialize;

use crate::core::action::ActionKind;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompanionEvent {
    /// 某条日志新增消息
    MessageAppended {
        owner_id: String,
        sender_id: String,
        message_id: i64,
        text: String,
    },
    /// 闸门占用，请求被丢弃
    ActionDropped { kind: ActionKind },
    /// 动作失败（已记录日志，无副作用）
    ActionFailed { kind: ActionKind, error: String },
    IntimacyChanged {
        character_id: String,
        score: f64,
        level: u8,
    },
    Farewell { character_id: String },
    /// Tier 1 摘要写入
    MemorySummarized { owner_id: String, summary: String },
    /// 情境摘要更新
    ContextUpdated { owner_id: String, summary: String },
    /// 群聊循环结束
    GroupLoopFinished {
        group_id: String,
        turns: usize,
        reason: String,
    },
}
