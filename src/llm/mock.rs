//! Mock 生成后端（用于测试与无 Key 运行）
//!
//! 按脚本依次返回预置回复；脚本耗尽后回显最后一条 User 消息。记录每次请求，并统计并发中的调用数。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{ChatMessage, LlmClient, LlmError, Role};

/// 脚本化 Mock 客户端
#[derive(Debug)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    credentials: bool,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            credentials: true,
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// 预置一组按顺序返回的回复
    pub fn with_responses<I, S>(self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for r in responses {
            self.push_response(r);
        }
        self
    }

    /// 每次调用前等待
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 模拟缺少 API Key
    pub fn without_credentials(mut self) -> Self {
        self.credentials = false;
        self
    }

    pub fn push_response(&self, response: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(response.into()));
        }
    }

    pub fn push_error(&self, error: LlmError) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(error));
        }
    }

    /// 已收到的请求次数
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 全部请求的消息快照
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// 最近一次请求的拼接文本
    pub fn last_prompt(&self) -> Option<String> {
        self.requests.lock().ok().and_then(|r| {
            r.last().map(|msgs| {
                msgs.iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        })
    }

    /// 观测到的最大并发调用数
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        if let Ok(mut reqs) = self.requests.lock() {
            reqs.push(messages.to_vec());
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(result) => result,
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                Ok(format!("Echo from Mock: {}", last_user))
            }
        }
    }

    fn has_credentials(&self) -> bool {
        self.credentials
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_echo() {
        let mock = MockLlmClient::new().with_responses(["first"]);
        mock.push_error(LlmError::Timeout);
        assert_eq!(mock.generate("hi", None).await.unwrap(), "first");
        assert_eq!(mock.generate("hi", None).await, Err(LlmError::Timeout));
        assert_eq!(
            mock.generate("again", None).await.unwrap(),
            "Echo from Mock: again"
        );
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.last_prompt().as_deref(), Some("again"));
    }

    #[tokio::test]
    async fn test_generate_attaches_image() {
        let mock = MockLlmClient::new();
        mock.generate("look", Some(&[1, 2, 3])).await.unwrap();
        let reqs = mock.requests();
        assert_eq!(reqs[0][0].image.as_deref(), Some(&[1u8, 2, 3][..]));
    }
}
