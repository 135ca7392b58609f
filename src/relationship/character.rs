//! 角色状态与关系状态机
//!
//! 状态流转：Idle → WaitingForReply → {Idle（用户回复）, 忽略升级 → Farewell}。
//! 等待计时由外部节拍推进（tick_reply_wait），不依赖真实时钟，便于测试。

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::tags::ParsedReply;

pub const INTIMACY_MIN: f64 = -100.0;
pub const INTIMACY_MAX: f64 = 100.0;

/// 角色模式：Off 禁止一切对话；Sleep 只禁止自主行为
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CharacterMode {
    Off,
    #[default]
    Activated,
    Sleep,
}

/// 角色设定（写入提示词）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Persona {
    pub gender: String,
    pub personality: String,
    /// 自由文本的深度设定
    pub setting: String,
}

/// 一次回复等待：已过时间与超时阈值
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReplyWait {
    pub elapsed: Duration,
    pub timeout: Duration,
}

/// tick_reply_wait 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    NotWaiting,
    Pending,
    /// 超时且未到上限：已重新计时
    Rearmed { ignore_count: u32 },
    /// 达到忽略上限：进入告别
    Farewell,
}

/// 单个角色的全部状态
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CharacterState {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub persona: Persona,
    #[serde(default)]
    pub mode: CharacterMode,
    /// 锁定的角色强制为 Off
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub intimacy_score: f64,
    #[serde(default)]
    pub ignore_count: u32,
    #[serde(default = "default_max_ignore_count")]
    pub max_ignore_count: u32,
    #[serde(default)]
    pub is_waiting_for_reply: bool,
    #[serde(default)]
    pub has_said_farewell: bool,
    /// 自主发言后置位，用户再次发言时清除
    #[serde(default)]
    pub has_responded: bool,
    #[serde(default)]
    pub last_summarized_message_id: i64,
    #[serde(default)]
    pub long_term_memories: Vec<String>,
    #[serde(default)]
    pub knowledge_library: BTreeMap<String, String>,
    #[serde(default)]
    pub current_context_summary: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(skip)]
    pub reply_wait: Option<ReplyWait>,
}

fn default_max_ignore_count() -> u32 {
    2
}

/// 亲密度分数到 1–10 等级的固定阈值表
pub fn intimacy_level_for(score: f64) -> u8 {
    match score {
        s if s >= 81.0 => 10,
        s if s >= 61.0 => 9,
        s if s >= 41.0 => 8,
        s if s >= 21.0 => 7,
        s if s >= 1.0 => 6,
        s if s >= -20.0 => 5,
        s if s >= -40.0 => 4,
        s if s >= -60.0 => 3,
        s if s >= -80.0 => 2,
        _ => 1,
    }
}

impl CharacterState {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            persona: Persona::default(),
            mode: CharacterMode::Activated,
            locked: false,
            intimacy_score: 0.0,
            ignore_count: 0,
            max_ignore_count: default_max_ignore_count(),
            is_waiting_for_reply: false,
            has_said_farewell: false,
            has_responded: false,
            last_summarized_message_id: 0,
            long_term_memories: Vec::new(),
            knowledge_library: BTreeMap::new(),
            current_context_summary: String::new(),
            group_id: None,
            reply_wait: None,
        }
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = persona;
        self
    }

    pub fn with_mode(mut self, mode: CharacterMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_ignore_count(mut self, max: u32) -> Self {
        self.max_ignore_count = max;
        self
    }

    pub fn intimacy_level(&self) -> u8 {
        intimacy_level_for(self.intimacy_score)
    }

    /// 锁定 / 解锁；锁定时强制 Off
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
        if locked {
            self.mode = CharacterMode::Off;
        }
    }

    pub fn can_chat(&self) -> bool {
        self.mode != CharacterMode::Off && !self.locked
    }

    /// 可作为自主行为的发言者
    pub fn is_autonomy_candidate(&self) -> bool {
        self.mode == CharacterMode::Activated
            && !self.locked
            && !self.has_responded
            && !self.has_said_farewell
    }

    /// 可参与群聊轮转
    pub fn is_group_candidate(&self) -> bool {
        self.mode == CharacterMode::Activated && !self.locked && !self.has_said_farewell
    }

    /// 叠加亲密度变化并夹到 [-100, 100]；非有限值忽略。返回变化前后的等级
    pub fn apply_intimacy_change(&mut self, delta: f64) -> (u8, u8) {
        let before = self.intimacy_level();
        if delta.is_finite() {
            self.intimacy_score = (self.intimacy_score + delta).clamp(INTIMACY_MIN, INTIMACY_MAX);
        }
        (before, self.intimacy_level())
    }

    /// 开始等待用户回复，超时为 (ignore_count + 1) × base_wait
    pub fn start_waiting_for_reply(&mut self, base_wait: Duration) {
        self.is_waiting_for_reply = true;
        self.reply_wait = Some(ReplyWait {
            elapsed: Duration::ZERO,
            timeout: base_wait * (self.ignore_count + 1),
        });
    }

    /// 推进等待计时；超时则累加忽略次数、扣亲密度，并重新计时或进入告别
    pub fn tick_reply_wait(&mut self, dt: Duration, base_wait: Duration, penalty: f64) -> WaitOutcome {
        if !self.is_waiting_for_reply {
            self.reply_wait = None;
            return WaitOutcome::NotWaiting;
        }
        let wait = self.reply_wait.get_or_insert(ReplyWait {
            elapsed: Duration::ZERO,
            timeout: base_wait * (self.ignore_count + 1),
        });
        wait.elapsed += dt;
        if wait.elapsed < wait.timeout {
            return WaitOutcome::Pending;
        }

        self.ignore_count += 1;
        self.apply_intimacy_change(penalty);

        if self.ignore_count >= self.max_ignore_count {
            self.has_said_farewell = true;
            self.is_waiting_for_reply = false;
            self.reply_wait = None;
            WaitOutcome::Farewell
        } else {
            self.start_waiting_for_reply(base_wait);
            WaitOutcome::Rearmed {
                ignore_count: self.ignore_count,
            }
        }
    }

    /// 用户向该角色发言。返回此前是否在等待（等待中回复会加亲密度）
    pub fn on_user_message(&mut self, reply_reward: f64) -> bool {
        let was_waiting = self.is_waiting_for_reply;
        self.has_responded = false;
        if was_waiting {
            self.apply_intimacy_change(reply_reward);
        }
        self.is_waiting_for_reply = false;
        self.reply_wait = None;
        self.ignore_count = 0;
        self.has_said_farewell = false;
        was_waiting
    }

    /// 将解析出的标签副作用应用到状态
    pub fn apply_reply(&mut self, reply: &ParsedReply) {
        if let Some(delta) = reply.intimacy_delta {
            self.apply_intimacy_change(delta);
        }
        if reply.farewell {
            self.has_said_farewell = true;
            self.is_waiting_for_reply = false;
            self.reply_wait = None;
            self.ignore_count = 0;
        }
    }
}
