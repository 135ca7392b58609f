//! 自主动作与执行器
//!
//! 调度器和编排器产出 Action，ActionExecutor 先过执行闸门，拿到 GatePermit 后在独立任务中执行；
//! 闸门被占用时请求直接丢弃。动作内部的失败只记录日志并广播 ActionFailed，不会传回节拍循环。

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::core::context::AppContext;
use crate::core::error::ActionError;
use crate::core::events::CompanionEvent;
use crate::core::gate::GatePermit;
use crate::core::generation::{apply_reply_effects, generate_line};
use crate::group::{GroupCoordinator, LoopReport};
use crate::prompt;
use crate::relationship::{ParsedReply, RosterError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    TextEvent,
    VisionEvent,
    IgnoredResponse,
    GroupConversation,
}

/// 群聊发起者
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Speaker {
    User,
    Character(String),
}

impl Speaker {
    pub fn character_id(&self) -> Option<&str> {
        match self {
            Speaker::User => None,
            Speaker::Character(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// 按话题主动说一句（时段问候、随机事件）
    TextEvent { character_id: String, topic: String },
    /// 截图后对屏幕内容做出反应
    VisionEvent { character_id: String },
    /// 等待回复超时后的"被忽略"台词；farewell 为 true 时是告别
    IgnoredResponse { character_id: String, farewell: bool },
    GroupConversation {
        group_id: String,
        initiator: Speaker,
        opening_topic: Option<String>,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::TextEvent { .. } => ActionKind::TextEvent,
            Action::VisionEvent { .. } => ActionKind::VisionEvent,
            Action::IgnoredResponse { .. } => ActionKind::IgnoredResponse,
            Action::GroupConversation { .. } => ActionKind::GroupConversation,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Spoke {
        character_id: String,
        /// 解析后文本为空时不落库
        message_id: Option<i64>,
        text: String,
        farewell: bool,
    },
    Group(LoopReport),
}

/// dispatch 的结果：已启动（可 await 句柄）或因闸门占用被丢弃
pub enum Dispatch {
    Started(JoinHandle<Result<ActionOutcome, ActionError>>),
    Dropped(ActionKind),
}

impl Dispatch {
    pub fn is_started(&self) -> bool {
        matches!(self, Dispatch::Started(_))
    }
}

/// 单句台词的参数
struct LineRequest {
    character_id: String,
    task: String,
    image: Option<Vec<u8>>,
    history_window: usize,
    mark_responded: bool,
    start_wait: bool,
    allow_farewelled: bool,
}

#[derive(Clone)]
pub struct ActionExecutor {
    ctx: Arc<AppContext>,
}

impl ActionExecutor {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// 过闸门后在后台执行；permit 随任务结束释放
    pub fn dispatch(&self, action: Action) -> Dispatch {
        let kind = action.kind();
        let Some(permit) = self.ctx.gate.try_acquire(kind) else {
            self.ctx.emit(CompanionEvent::ActionDropped { kind });
            return Dispatch::Dropped(kind);
        };

        let executor = self.clone();
        Dispatch::Started(tokio::spawn(async move {
            let result = executor.execute(&permit, action).await;
            match &result {
                Err(ActionError::Cancelled) => {
                    tracing::debug!("{:?} cancelled", kind);
                }
                Err(e) => {
                    tracing::warn!("{:?} failed: {}", kind, e);
                    executor.ctx.emit(CompanionEvent::ActionFailed {
                        kind,
                        error: e.to_string(),
                    });
                }
                Ok(_) => {}
            }
            drop(permit);
            result
        }))
    }

    /// 在已持有闸门的前提下执行动作
    pub async fn execute(&self, permit: &GatePermit, action: Action) -> Result<ActionOutcome, ActionError> {
        match action {
            Action::TextEvent { character_id, topic } => {
                self.speak(LineRequest {
                    character_id,
                    task: prompt::topic_task(&topic),
                    image: None,
                    history_window: 0,
                    mark_responded: true,
                    start_wait: true,
                    allow_farewelled: false,
                })
                .await
            }
            Action::VisionEvent { character_id } => {
                self.ensure_can_speak(&character_id, false).await?;
                let image = self.capture().await?;
                self.speak(LineRequest {
                    character_id,
                    task: prompt::vision_task().to_string(),
                    image: Some(image),
                    history_window: 0,
                    mark_responded: true,
                    start_wait: true,
                    allow_farewelled: false,
                })
                .await
            }
            Action::IgnoredResponse {
                character_id,
                farewell,
            } => {
                self.speak(LineRequest {
                    character_id,
                    task: prompt::ignored_task(farewell).to_string(),
                    image: None,
                    history_window: self.ctx.config.group.personal_history_window,
                    mark_responded: true,
                    start_wait: false,
                    allow_farewelled: true,
                })
                .await
            }
            Action::GroupConversation {
                group_id,
                initiator,
                opening_topic,
            } => {
                let report = GroupCoordinator::new(Arc::clone(&self.ctx))
                    .run(permit, &group_id, initiator, opening_topic)
                    .await?;
                Ok(ActionOutcome::Group(report))
            }
        }
    }

    async fn capture(&self) -> Result<Vec<u8>, ActionError> {
        let cancel = self.ctx.cancel_token();
        tokio::select! {
            _ = cancel.cancelled() => Err(ActionError::Cancelled),
            res = self.ctx.capture.capture_screen() => Ok(res?),
        }
    }

    /// 告别后的角色只允许发"被忽略"类台词
    async fn ensure_can_speak(&self, character_id: &str, allow_farewelled: bool) -> Result<(), ActionError> {
        let roster = self.ctx.roster.read().await;
        let character = roster
            .character(character_id)
            .ok_or_else(|| RosterError::UnknownCharacter(character_id.to_string()))?;
        let ok = if allow_farewelled {
            character.can_chat()
        } else {
            character.is_group_candidate()
        };
        if ok {
            Ok(())
        } else {
            Err(ActionError::Inactive(character_id.to_string()))
        }
    }

    async fn speak(&self, req: LineRequest) -> Result<ActionOutcome, ActionError> {
        self.ensure_can_speak(&req.character_id, req.allow_farewelled).await?;

        let history = if req.history_window > 0 {
            self.ctx.store.recent(&req.character_id, req.history_window)?
        } else {
            Vec::new()
        };
        let settings = self.ctx.prompt_settings().await;
        let context = {
            let roster = self.ctx.roster.read().await;
            let me = roster
                .character(&req.character_id)
                .ok_or_else(|| RosterError::UnknownCharacter(req.character_id.clone()))?;
            let group = me.group_id.as_deref().and_then(|g| roster.group(g));
            prompt::build_context_prompt(&settings, me, group, &roster, &history)
        };

        let parsed = generate_line(
            &self.ctx,
            &req.character_id,
            prompt::with_task(context, &req.task),
            req.image,
        )
        .await?;
        let message_id = commit_solo_line(
            &self.ctx,
            &req.character_id,
            &parsed,
            req.mark_responded,
            req.start_wait,
        )
        .await?;

        Ok(ActionOutcome::Spoke {
            character_id: req.character_id,
            message_id,
            text: parsed.text,
            farewell: parsed.farewell,
        })
    }
}

/// 提交一句 1:1 台词：落库、应用标签副作用、更新等待状态；已告别的角色不再开始等待
pub(crate) async fn commit_solo_line(
    ctx: &AppContext,
    character_id: &str,
    parsed: &ParsedReply,
    mark_responded: bool,
    start_wait: bool,
) -> Result<Option<i64>, ActionError> {
    let message_id = if parsed.text.is_empty() {
        tracing::debug!("Reply for {} was empty after tag stripping", character_id);
        None
    } else {
        Some(ctx.append_text(character_id, character_id, &parsed.text)?.id)
    };

    apply_reply_effects(ctx, character_id, parsed).await?;

    let mut roster = ctx.roster.write().await;
    let character = roster.character_mut(character_id)?;
    if mark_responded {
        character.has_responded = true;
    }
    if start_wait && !character.has_said_farewell {
        character.start_waiting_for_reply(ctx.config.relationship.base_wait());
    }
    Ok(message_id)
}
