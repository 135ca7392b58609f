//! 动作执行错误
//!
//! 错误只在所属动作内部传播：自主行为的失败记录日志后丢弃，用户直接对话的失败会写入一条本地化提示。

use thiserror::Error;

use crate::capture::CaptureError;
use crate::llm::LlmError;
use crate::memory::StoreError;
use crate::relationship::RosterError;

#[derive(Error, Debug)]
pub enum ActionError {
    /// 缺少凭据：在任何网络请求之前中止
    #[error("Missing credential for backend '{0}'")]
    MissingCredential(String),

    #[error("Backend error: {0}")]
    Backend(#[from] LlmError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Character {0} is off or locked")]
    Inactive(String),

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Cancelled")]
    Cancelled,
}
