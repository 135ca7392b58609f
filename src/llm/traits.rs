//! 生成后端抽象
//!
//! 所有后端（Gemini / OpenAI 兼容 / Ollama / Mock）实现 LlmClient：complete 接收带角色的消息序列（可附图），
//! generate 为单提示词 + 可选截图的便捷入口。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 发往后端的一条消息；image 为 PNG 字节
#[derive(Clone, Debug)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub image: Option<Vec<u8>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            image: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            image: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }
}

/// 后端调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request timed out")]
    Timeout,

    #[error("Empty response from backend")]
    EmptyResponse,

    #[error("Unsupported input: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::ApiError(e.to_string())
        }
    }
}

/// 生成后端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回首个候选的文本
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// 单提示词（可附截图）生成
    async fn generate(&self, prompt: &str, image: Option<&[u8]>) -> Result<String, LlmError> {
        let mut message = ChatMessage::user(prompt);
        if let Some(bytes) = image {
            message = message.with_image(bytes.to_vec());
        }
        self.complete(std::slice::from_ref(&message)).await
    }

    /// 是否具备调用所需的凭据；为 false 时调用方应在发起网络请求前中止
    fn has_credentials(&self) -> bool {
        true
    }

    fn name(&self) -> &str;
}
