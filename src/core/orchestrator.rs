//! 编排器：主控循环
//!
//! 负责：按节拍推进等待计时与自主调度器、把产出的动作交给执行器、处理用户直接对话与群聊消息，
//! 并在后台运行记忆整理。所有状态都挂在共享的 AppContext 上。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use tokio::sync::Mutex;

use crate::autonomy::{AutonomyScheduler, TickInput};
use crate::config::AppConfig;
use crate::core::action::{commit_solo_line, Action, ActionExecutor, ActionOutcome, Dispatch, Speaker};
use crate::core::context::{AppContext, PresenceMode};
use crate::core::error::ActionError;
use crate::core::events::CompanionEvent;
use crate::core::generation::generate_line;
use crate::llm::{GeminiClient, LlmClient, MockLlmClient, OllamaClient, OpenAiClient};
use crate::memory::{MemoryOwner, MemoryPipeline, USER_SENDER};
use crate::prompt;
use crate::relationship::{RosterError, WaitOutcome};

/// 直接对话时带入提示词的历史条数
const DIRECT_HISTORY: usize = 20;

/// 根据配置选择生成后端（Gemini / OpenAI 兼容 / Ollama / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let llm = &cfg.llm;
    let base = llm.base_url.as_deref();
    let key = llm.api_key.as_deref();
    match llm.provider.to_lowercase().as_str() {
        "gemini" => {
            tracing::info!("Using Gemini backend ({})", llm.model);
            Arc::new(GeminiClient::new(base, &llm.model, key))
        }
        "openai" => {
            tracing::info!("Using OpenAI-compatible backend ({})", llm.model);
            Arc::new(OpenAiClient::new(base, &llm.model, key))
        }
        "ollama" => {
            tracing::info!("Using Ollama backend ({})", llm.model);
            Arc::new(OllamaClient::new(base, &llm.model))
        }
        "mock" => Arc::new(MockLlmClient::new()),
        other => {
            tracing::warn!("Unknown provider '{}', using Mock backend", other);
            Arc::new(MockLlmClient::new())
        }
    }
}

pub struct Orchestrator {
    ctx: Arc<AppContext>,
    executor: ActionExecutor,
    scheduler: Mutex<AutonomyScheduler>,
    memory: MemoryPipeline,
}

impl Orchestrator {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let scheduler = AutonomyScheduler::new(ctx.config.autonomy.clone());
        Self {
            executor: ActionExecutor::new(Arc::clone(&ctx)),
            memory: MemoryPipeline::new(Arc::clone(&ctx)),
            scheduler: Mutex::new(scheduler),
            ctx,
        }
    }

    /// 替换调度器（测试中注入固定种子）
    pub fn with_scheduler(mut self, scheduler: AutonomyScheduler) -> Self {
        self.scheduler = Mutex::new(scheduler);
        self
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    pub fn memory(&self) -> &MemoryPipeline {
        &self.memory
    }

    pub async fn set_presence(&self, presence: PresenceMode) {
        tracing::info!("Presence set to {:?}", presence);
        self.ctx.user.write().await.presence = presence;
    }

    pub async fn set_self_awareness(&self, enabled: bool) {
        self.ctx.user.write().await.self_awareness = enabled;
    }

    pub async fn set_screen_capture(&self, enabled: bool) {
        self.ctx.user.write().await.screen_capture = enabled;
    }

    /// 推进所有角色的等待计时，返回需要发出的"被忽略"台词
    async fn tick_reply_waits(&self, dt: Duration) -> Vec<Action> {
        let cfg = &self.ctx.config.relationship;
        let mut roster = self.ctx.roster.write().await;
        let mut actions = Vec::new();
        for character in roster.characters.values_mut() {
            let before = character.intimacy_score;
            let outcome = character.tick_reply_wait(dt, cfg.base_wait(), cfg.ignore_penalty);
            if character.intimacy_score != before {
                self.ctx.emit(CompanionEvent::IntimacyChanged {
                    character_id: character.id.clone(),
                    score: character.intimacy_score,
                    level: character.intimacy_level(),
                });
            }
            let farewell = match outcome {
                WaitOutcome::NotWaiting | WaitOutcome::Pending => continue,
                WaitOutcome::Rearmed { ignore_count } => {
                    tracing::info!("{} ignored {} time(s)", character.name, ignore_count);
                    false
                }
                WaitOutcome::Farewell => {
                    tracing::info!("{} gave up waiting and says farewell", character.name);
                    self.ctx.emit(CompanionEvent::Farewell {
                        character_id: character.id.clone(),
                    });
                    true
                }
            };
            if character.can_chat() {
                actions.push(Action::IgnoredResponse {
                    character_id: character.id.clone(),
                    farewell,
                });
            }
        }
        actions
    }

    /// 一次节拍：等待计时（仅在自主行为允许时）→ 调度器 → 执行器
    pub async fn tick(&self, dt: Duration, now: NaiveDateTime) -> Vec<Dispatch> {
        let user = self.ctx.user.read().await.clone();
        let mut actions = Vec::new();
        if user.autonomy_allowed() {
            actions.extend(self.tick_reply_waits(dt).await);
        }

        {
            let roster = self.ctx.roster.read().await;
            let mut scheduler = self.scheduler.lock().await;
            actions.extend(scheduler.tick(TickInput {
                dt,
                now,
                self_awareness: user.self_awareness,
                presence: user.presence,
                screen_capture: user.screen_capture,
                roster: &roster,
            }));
        }

        actions
            .into_iter()
            .map(|action| self.executor.dispatch(action))
            .collect()
    }

    /// 用户直接对某角色发言。不经过执行闸门；失败时写入一条错误提示代替回复
    pub async fn send_user_message(&self, character_id: &str, text: &str) -> Result<ActionOutcome, ActionError> {
        {
            let mut roster = self.ctx.roster.write().await;
            let character = roster.character_mut(character_id)?;
            if !character.can_chat() {
                return Err(ActionError::Inactive(character_id.to_string()));
            }
            let before = character.intimacy_score;
            character.on_user_message(self.ctx.config.relationship.reply_reward);
            if character.intimacy_score != before {
                self.ctx.emit(CompanionEvent::IntimacyChanged {
                    character_id: character_id.to_string(),
                    score: character.intimacy_score,
                    level: character.intimacy_level(),
                });
            }
        }
        self.scheduler.lock().await.note_user_interaction();
        self.ctx.append_text(character_id, USER_SENDER, text)?;

        match self.reply_to_user(character_id).await {
            Ok(outcome) => {
                self.memory
                    .spawn_context_refresh(MemoryOwner::Character(character_id.to_string()));
                Ok(outcome)
            }
            Err(ActionError::Cancelled) => Err(ActionError::Cancelled),
            Err(e) => {
                tracing::warn!("Reply from {} failed: {}", character_id, e);
                if let Err(store_err) = self
                    .ctx
                    .append_system(character_id, &self.ctx.config.app.error_message)
                {
                    tracing::warn!("Failed to record error message: {}", store_err);
                }
                Err(e)
            }
        }
    }

    async fn reply_to_user(&self, character_id: &str) -> Result<ActionOutcome, ActionError> {
        let history = self.ctx.store.recent(character_id, DIRECT_HISTORY)?;
        let settings = self.ctx.prompt_settings().await;
        let context = {
            let roster = self.ctx.roster.read().await;
            let me = roster
                .character(character_id)
                .ok_or_else(|| RosterError::UnknownCharacter(character_id.to_string()))?;
            let group = me.group_id.as_deref().and_then(|g| roster.group(g));
            prompt::build_context_prompt(&settings, me, group, &roster, &history)
        };

        let parsed = generate_line(
            &self.ctx,
            character_id,
            prompt::with_task(context, prompt::reply_task()),
            None,
        )
        .await?;
        let message_id = commit_solo_line(&self.ctx, character_id, &parsed, false, true).await?;
        Ok(ActionOutcome::Spoke {
            character_id: character_id.to_string(),
            message_id,
            text: parsed.text,
            farewell: parsed.farewell,
        })
    }

    /// 用户在群里发言：先落库，再以用户为发起者启动群聊（闸门占用时只落库）
    pub async fn send_group_message(&self, group_id: &str, text: &str) -> Result<Dispatch, ActionError> {
        if self.ctx.roster.read().await.group(group_id).is_none() {
            return Err(RosterError::UnknownGroup(group_id.to_string()).into());
        }
        self.scheduler.lock().await.note_user_interaction();
        self.ctx.append_text(group_id, USER_SENDER, text)?;
        Ok(self.executor.dispatch(Action::GroupConversation {
            group_id: group_id.to_string(),
            initiator: Speaker::User,
            opening_topic: None,
        }))
    }

    /// 主循环：固定节拍驱动，直到取消令牌触发
    pub async fn run(self: Arc<Self>) {
        let cancel = self.ctx.cancel_token();
        let memory_ticker = self.memory.spawn_ticker();
        let period = Duration::from_millis(self.ctx.config.app.tick_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last = Instant::now();

        tracing::info!("Companion loop started (tick {:?})", period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last);
                    last = now;
                    self.tick(dt, chrono::Local::now().naive_local()).await;
                }
            }
        }

        if let Err(e) = memory_ticker.await {
            tracing::debug!("Memory ticker join error: {}", e);
        }
        tracing::info!("Companion loop stopped");
    }
}
