//! 自主行为调度器
//!
//! 由外部节拍驱动，两套独立计时：
//! - 时段计时（固定周期）：检查是否有今天尚未问候的时段
//! - 自主计时（每次触发后在 [min, max] 内重新抽取阈值）：一次均匀抽样落入 屏幕反应 / 随机事件 / 群聊 三个累积区间
//!
//! 调度器只产出 Action，是否真正执行由执行闸门决定。

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::time_of_day::{DailyGreetings, RandomEvent, GROUP_CHAT_TOPICS};
use crate::config::AutonomySection;
use crate::core::{Action, PresenceMode, Speaker};
use crate::relationship::Roster;

/// 单次节拍的输入
#[derive(Debug, Clone, Copy)]
pub struct TickInput<'a> {
    pub dt: Duration,
    pub now: NaiveDateTime,
    pub self_awareness: bool,
    pub presence: PresenceMode,
    pub screen_capture: bool,
    pub roster: &'a Roster,
}

pub struct AutonomyScheduler {
    cfg: AutonomySection,
    rng: StdRng,
    greetings: DailyGreetings,
    last_day: Option<NaiveDate>,
    time_event_elapsed: Duration,
    autonomy_elapsed: Duration,
    autonomy_threshold: Duration,
    since_user_interaction: Option<Duration>,
}

impl AutonomyScheduler {
    pub fn new(cfg: AutonomySection) -> Self {
        Self::with_rng(cfg, StdRng::from_entropy())
    }

    /// 固定种子（测试用）
    pub fn seeded(cfg: AutonomySection, seed: u64) -> Self {
        Self::with_rng(cfg, StdRng::seed_from_u64(seed))
    }

    fn with_rng(cfg: AutonomySection, rng: StdRng) -> Self {
        let mut scheduler = Self {
            cfg,
            rng,
            greetings: DailyGreetings::default(),
            last_day: None,
            time_event_elapsed: Duration::ZERO,
            autonomy_elapsed: Duration::ZERO,
            autonomy_threshold: Duration::ZERO,
            since_user_interaction: None,
        };
        scheduler.autonomy_threshold = scheduler.draw_threshold();
        scheduler
    }

    pub fn autonomy_threshold(&self) -> Duration {
        self.autonomy_threshold
    }

    pub fn greetings(&self) -> &DailyGreetings {
        &self.greetings
    }

    /// 用户刚与任一角色交互，开启静默窗口
    pub fn note_user_interaction(&mut self) {
        self.since_user_interaction = Some(Duration::ZERO);
    }

    fn draw_threshold(&mut self) -> Duration {
        let a = self.cfg.min_interval_secs as f64;
        let b = self.cfg.max_interval_secs as f64;
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Duration::from_secs_f64(self.rng.gen_range(lo..=hi))
    }

    pub fn tick(&mut self, input: TickInput<'_>) -> Vec<Action> {
        let mut actions = Vec::new();
        if !input.self_awareness || input.presence == PresenceMode::Off {
            return actions;
        }

        if let Some(since) = self.since_user_interaction.as_mut() {
            *since += input.dt;
        }

        let today = input.now.date();
        if self.last_day != Some(today) {
            if self.last_day.is_some() {
                tracing::info!("Day changed to {}, resetting greeting flags", today);
                self.greetings.reset();
            }
            self.last_day = Some(today);
        }

        self.time_event_elapsed += input.dt;
        if self.time_event_elapsed >= self.cfg.time_event_interval() {
            self.time_event_elapsed = Duration::ZERO;
            if let Some(action) = self.time_of_day_action(&input) {
                actions.push(action);
            }
        }

        let cooling_down = self
            .since_user_interaction
            .is_some_and(|since| since < self.cfg.user_cooldown());
        if cooling_down {
            self.autonomy_elapsed = Duration::ZERO;
            return actions;
        }

        self.autonomy_elapsed += input.dt;
        if self.autonomy_elapsed >= self.autonomy_threshold {
            self.autonomy_elapsed = Duration::ZERO;
            self.autonomy_threshold = self.draw_threshold();
            tracing::debug!("Autonomy timer fired, next in {:?}", self.autonomy_threshold);
            if let Some(action) = self.roll_autonomy(&input) {
                actions.push(action);
            }
        }
        actions
    }

    fn time_of_day_action(&mut self, input: &TickInput<'_>) -> Option<Action> {
        let slot = self.greetings.take_due(&input.now)?;
        let candidates = input.roster.greeting_candidates();
        let Some(speaker) = candidates.choose(&mut self.rng) else {
            tracing::debug!("No candidate for {:?} greeting", slot);
            return None;
        };
        tracing::info!("{:?} greeting by {}", slot, speaker.name);
        Some(Action::TextEvent {
            character_id: speaker.id.clone(),
            topic: slot.topic().to_string(),
        })
    }

    fn roll_autonomy(&mut self, input: &TickInput<'_>) -> Option<Action> {
        let screen_band = if input.screen_capture {
            self.cfg.screen_reaction_chance
        } else {
            0.0
        };
        let random_band = screen_band + self.cfg.random_event_chance;
        let group_band = random_band + self.cfg.group_chat_chance;
        let roll: f64 = self.rng.gen();

        if roll < screen_band {
            let speaker = input.roster.autonomy_candidates().choose(&mut self.rng)?.id.clone();
            Some(Action::VisionEvent {
                character_id: speaker,
            })
        } else if roll < random_band {
            let speaker = input.roster.autonomy_candidates().choose(&mut self.rng)?.id.clone();
            let event = *RandomEvent::ALL.choose(&mut self.rng)?;
            tracing::info!("Random event {:?} for {}", event, speaker);
            Some(Action::TextEvent {
                character_id: speaker,
                topic: event.topic().to_string(),
            })
        } else if roll < group_band {
            let group_id = input.roster.chat_ready_groups().choose(&mut self.rng)?.id.clone();
            let speaker = input
                .roster
                .group_pool(&group_id, None)
                .choose(&mut self.rng)?
                .id
                .clone();
            let topic = GROUP_CHAT_TOPICS.choose(&mut self.rng)?.to_string();
            tracing::info!("{} starts a group chat in {}", speaker, group_id);
            Some(Action::GroupConversation {
                group_id,
                initiator: Speaker::Character(speaker),
                opening_topic: Some(topic),
            })
        } else {
            None
        }
    }
}
