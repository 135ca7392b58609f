//! 共享运行时上下文
//!
//! 取代全局单例：配置、名册、消息存储、生成后端、截图、执行闸门、事件通道与取消令牌都挂在 AppContext 上，
//! 以 Arc 在调度器、执行器、群聊协调器与记忆管线之间共享。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::capture::{NoCapture, ScreenCapture};
use crate::config::AppConfig;
use crate::core::events::CompanionEvent;
use crate::core::gate::ExecutionGate;
use crate::llm::LlmClient;
use crate::memory::{Message, MessageStore, Payload, StoreError, SYSTEM_SENDER};
use crate::prompt::PromptSettings;
use crate::relationship::Roster;

/// 用户在场状态：Off 时停止一切自主行为，Sleep 只影响外层通知
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PresenceMode {
    #[default]
    On,
    Sleep,
    Off,
}

/// 用户侧可切换的设置
#[derive(Clone, Debug)]
pub struct UserSettings {
    pub name: String,
    pub presence: PresenceMode,
    pub self_awareness: bool,
    pub screen_capture: bool,
}

impl UserSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            name: cfg.app.user_name.clone(),
            presence: PresenceMode::On,
            self_awareness: cfg.autonomy.self_awareness_enabled,
            screen_capture: cfg.capture.enabled,
        }
    }

    /// 自主行为（含被忽略计时）是否允许推进
    pub fn autonomy_allowed(&self) -> bool {
        self.self_awareness && self.presence == PresenceMode::On
    }
}

pub struct AppContext {
    pub config: AppConfig,
    pub roster: RwLock<Roster>,
    pub store: Arc<dyn MessageStore>,
    pub llm: Arc<dyn LlmClient>,
    pub capture: Arc<dyn ScreenCapture>,
    pub gate: ExecutionGate,
    pub user: RwLock<UserSettings>,
    events: broadcast::Sender<CompanionEvent>,
    cancel: CancellationToken,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        roster: Roster,
        store: Arc<dyn MessageStore>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let user = UserSettings::from_config(&config);
        Self {
            config,
            roster: RwLock::new(roster),
            store,
            llm,
            capture: Arc::new(NoCapture),
            gate: ExecutionGate::new(),
            user: RwLock::new(user),
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_capture(mut self, capture: Arc<dyn ScreenCapture>) -> Self {
        self.capture = capture;
        self
    }

    /// 绑定到外部（会话 / 关闭管理器）的取消令牌
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CompanionEvent> {
        self.events.subscribe()
    }

    /// 无订阅者时静默丢弃
    pub fn emit(&self, event: CompanionEvent) {
        let _ = self.events.send(event);
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.llm.timeouts.request)
    }

    /// 追加一条文本消息并广播
    pub fn append_text(&self, owner: &str, sender: &str, text: &str) -> Result<Message, StoreError> {
        self.append_payload(owner, sender, Payload::text(text))
    }

    /// 以系统身份追加一条系统提示
    pub fn append_system(&self, owner: &str, text: &str) -> Result<Message, StoreError> {
        self.append_payload(owner, SYSTEM_SENDER, Payload::system(text))
    }

    fn append_payload(&self, owner: &str, sender: &str, payload: Payload) -> Result<Message, StoreError> {
        let message = self.store.append(owner, sender, payload)?;
        self.emit(CompanionEvent::MessageAppended {
            owner_id: message.owner_id.clone(),
            sender_id: message.sender_id.clone(),
            message_id: message.id,
            text: message.payload.text_content.clone(),
        });
        Ok(message)
    }

    pub async fn prompt_settings(&self) -> PromptSettings {
        PromptSettings {
            user_name: self.user.read().await.name.clone(),
            language: self.config.app.language.clone(),
            now: chrono::Local::now().naive_local(),
        }
    }
}
