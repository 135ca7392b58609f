//! 本地 Ollama 客户端（/api/chat，非流式）

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, LlmClient, LlmError, Role};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: Vec<WireMessage>,
}

#[derive(Serialize)]
struct WireMessage {
    role: Role,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn new(base_url: Option<&str>, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
        }
    }

    fn wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
        let engine = base64::engine::general_purpose::STANDARD;
        messages
            .iter()
            .map(|m| WireMessage {
                role: m.role,
                content: m.content.clone(),
                images: m.image.as_ref().map(|img| vec![engine.encode(img)]),
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            stream: false,
            messages: Self::wire_messages(messages),
        };
        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ChatResponse = resp.json().await?;
        match parsed.message {
            Some(m) if !m.content.trim().is_empty() => Ok(m.content),
            _ => Err(LlmError::EmptyResponse),
        }
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let msgs = vec![
            ChatMessage::system("s"),
            ChatMessage::user("u").with_image(vec![1, 2, 3]),
        ];
        let request = ChatRequest {
            model: "llava",
            stream: false,
            messages: OllamaClient::wire_messages(&msgs),
        };
        let v = serde_json::to_value(&request).unwrap();
        assert_eq!(v["stream"], false);
        assert_eq!(v["messages"][0]["role"], "system");
        assert!(v["messages"][0].get("images").is_none());
        assert_eq!(v["messages"][1]["images"][0], "AQID");
    }
}
