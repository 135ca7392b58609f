//! 群聊协调器
//!
//! 每一轮：取最近群聊记录 → 计算发言池（排除上一位发言者）→ 让协调提示词选出下一位 →
//! 生成台词 → 按长度延时后落库 → 随机间隔后进入下一轮。
//! 轮数受 max_loop_turns 限制；空池、NONE、无法解析都视为自然结束，不是错误。
//! 整个循环在调用方持有的 GatePermit 之下顺序执行。

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::generation::{apply_reply_effects, call_prompt, generate_line, pause};
use crate::core::{ActionError, AppContext, CompanionEvent, GatePermit, Speaker};
use crate::group::decision::{parse_decision, resolve_speaker};
use crate::memory::{MemoryOwner, MemoryPipeline, Message};
use crate::prompt;
use crate::relationship::{ParsedReply, RosterError};

/// 循环结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEnd {
    MaxTurns,
    EmptyPool,
    /// 协调器回答 NONE 或没有给出 decision
    NoDecision,
    /// 决策无法映射到候选
    Unresolved,
}

impl LoopEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopEnd::MaxTurns => "max_turns",
            LoopEnd::EmptyPool => "empty_pool",
            LoopEnd::NoDecision => "no_decision",
            LoopEnd::Unresolved => "unresolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopReport {
    pub group_id: String,
    /// 协调器选出的发言轮数（开场白不计）
    pub turns: usize,
    pub end: LoopEnd,
    pub speakers: Vec<String>,
}

pub struct GroupCoordinator {
    ctx: Arc<AppContext>,
    rng: StdRng,
}

impl GroupCoordinator {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(ctx: Arc<AppContext>, seed: u64) -> Self {
        Self {
            ctx,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn turn_gap(&mut self) -> Duration {
        let cfg = &self.ctx.config.group;
        let (lo, hi) = if cfg.min_turn_gap_ms <= cfg.max_turn_gap_ms {
            (cfg.min_turn_gap_ms, cfg.max_turn_gap_ms)
        } else {
            (cfg.max_turn_gap_ms, cfg.min_turn_gap_ms)
        };
        Duration::from_millis(self.rng.gen_range(lo..=hi))
    }

    /// 群聊记录与某角色个人记录合并，按消息 id 排序
    fn combined_history(&self, group_id: &str, character_id: &str) -> Result<Vec<Message>, ActionError> {
        let cfg = &self.ctx.config.group;
        let mut history = self.ctx.store.recent(group_id, cfg.history_window)?;
        history.extend(self.ctx.store.recent(character_id, cfg.personal_history_window)?);
        history.sort_by_key(|m| m.id);
        Ok(history)
    }

    /// 生成一句群聊台词（未提交）；任务由调用方给出
    async fn group_line(
        &self,
        group_id: &str,
        character_id: &str,
        task: String,
    ) -> Result<ParsedReply, ActionError> {
        let history = self.combined_history(group_id, character_id)?;
        let settings = self.ctx.prompt_settings().await;
        let context = {
            let roster = self.ctx.roster.read().await;
            let me = roster
                .character(character_id)
                .ok_or_else(|| RosterError::UnknownCharacter(character_id.to_string()))?;
            prompt::build_context_prompt(&settings, me, roster.group(group_id), &roster, &history)
        };
        generate_line(&self.ctx, character_id, prompt::with_task(context, &task), None).await
    }

    /// 提交一句群聊台词：应用标签副作用后落库，空台词不落库
    async fn commit(&self, group_id: &str, character_id: &str, parsed: &ParsedReply) -> Result<(), ActionError> {
        apply_reply_effects(&self.ctx, character_id, parsed).await?;
        if parsed.text.is_empty() {
            tracing::debug!("Empty group line from {}, not persisted", character_id);
            return Ok(());
        }
        self.ctx.append_text(group_id, character_id, &parsed.text)?;
        Ok(())
    }

    /// 运行一次群聊。无论循环如何结束（包括出错或被取消）都会广播 GroupLoopFinished
    /// 并请求刷新群聊记忆，然后才返回结果
    pub async fn run(
        &mut self,
        _permit: &GatePermit,
        group_id: &str,
        initiator: Speaker,
        opening_topic: Option<String>,
    ) -> Result<LoopReport, ActionError> {
        if self.ctx.roster.read().await.group(group_id).is_none() {
            return Err(RosterError::UnknownGroup(group_id.to_string()).into());
        }

        let mut speakers = Vec::new();
        let result = self
            .run_turns(group_id, initiator, opening_topic, &mut speakers)
            .await;
        let reason = match &result {
            Ok(end) => end.as_str(),
            Err(ActionError::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        tracing::info!(
            "Group conversation in {} finished after {} turns ({})",
            group_id,
            speakers.len(),
            reason
        );
        self.ctx.emit(CompanionEvent::GroupLoopFinished {
            group_id: group_id.to_string(),
            turns: speakers.len(),
            reason: reason.to_string(),
        });
        MemoryPipeline::new(Arc::clone(&self.ctx)).spawn_context_refresh(MemoryOwner::Group(group_id.to_string()));

        let end = result?;
        Ok(LoopReport {
            group_id: group_id.to_string(),
            turns: speakers.len(),
            end,
            speakers,
        })
    }

    async fn run_turns(
        &mut self,
        group_id: &str,
        initiator: Speaker,
        opening_topic: Option<String>,
        speakers: &mut Vec<String>,
    ) -> Result<LoopEnd, ActionError> {
        let user_name = self.ctx.user.read().await.name.clone();
        let max_turns = self.ctx.config.group.max_loop_turns;

        let mut last_speaker = initiator;
        let mut last_text = self
            .ctx
            .store
            .recent(group_id, 1)?
            .pop()
            .map(|m| m.payload.text_content)
            .unwrap_or_default();

        if let (Some(topic), Speaker::Character(id)) = (opening_topic.as_deref(), &last_speaker) {
            let id = id.clone();
            let opener = self
                .group_line(group_id, &id, prompt::group_opener_task(topic))
                .await?;
            self.commit(group_id, &id, &opener).await?;
            if !opener.text.is_empty() {
                last_text = opener.text;
            }
        }

        for turn in 0..max_turns {
            let history = self.ctx.store.recent(group_id, self.ctx.config.group.history_window)?;
            let user_spoke_last = last_speaker == Speaker::User;

            let policy_prompt = {
                let roster = self.ctx.roster.read().await;
                let group = roster
                    .group(group_id)
                    .ok_or_else(|| RosterError::UnknownGroup(group_id.to_string()))?;
                let pool = roster.group_pool(group_id, last_speaker.character_id());
                if pool.is_empty() {
                    return Ok(LoopEnd::EmptyPool);
                }
                prompt::coordinator_prompt(group, &pool, &history, &roster, &user_name, user_spoke_last)
            };

            let decision = parse_decision(&call_prompt(&self.ctx, policy_prompt, None).await?);
            let Some(choice) = decision.choice else {
                tracing::info!("Coordinator ended the conversation in {}", group_id);
                return Ok(LoopEnd::NoDecision);
            };
            let (speaker_id, speaker_name) = {
                let roster = self.ctx.roster.read().await;
                let pool = roster.group_pool(group_id, last_speaker.character_id());
                match resolve_speaker(&choice, &pool) {
                    Some(c) => (c.id.clone(), c.name.clone()),
                    None => {
                        tracing::info!("Coordinator chose unknown speaker '{}'", choice);
                        return Ok(LoopEnd::Unresolved);
                    }
                }
            };
            tracing::debug!(
                "Turn {} in {}: {} ({})",
                turn + 1,
                group_id,
                speaker_name,
                decision.reason.as_deref().unwrap_or("no reason")
            );

            let final_turn = turn + 1 == max_turns;
            let last_name = match &last_speaker {
                Speaker::User => user_name.clone(),
                Speaker::Character(id) => {
                    let roster = self.ctx.roster.read().await;
                    roster.display_name(id).unwrap_or(id.as_str()).to_string()
                }
            };
            let last = (!last_text.is_empty()).then_some((last_name.as_str(), last_text.as_str()));
            let task = prompt::group_turn_task(final_turn, last);

            let line = self.group_line(group_id, &speaker_id, task).await?;
            pause(&self.ctx, self.ctx.config.group.pacing_for(&line.text)).await?;
            self.commit(group_id, &speaker_id, &line).await?;

            speakers.push(speaker_id.clone());
            last_speaker = Speaker::Character(speaker_id);
            if !line.text.is_empty() {
                last_text = line.text;
            }

            if !final_turn {
                let gap = self.turn_gap();
                pause(&self.ctx, gap).await?;
            }
        }

        Ok(LoopEnd::MaxTurns)
    }
}
