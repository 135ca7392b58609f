//! 记忆整理管线
//!
//! 两级整理，基于水位线（last_summarized_message_id）增量处理：
//! - Tier 1：水位线之后的消息达到阈值才摘要；空结果或"无可摘要"哨兵不推进水位线，下次连同新消息一起重试
//! - Tier 2：仅在 Tier 1 成功后，从摘要中抽取事实键值并合并（后写覆盖）
//!
//! 另有轻量的情境摘要：每次对话结束后用最近几条消息生成一句话，覆盖 current_context_summary。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::core::generation::call_prompt;
use crate::core::{ActionError, AppContext, CompanionEvent};
use crate::memory::Message;
use crate::prompt;
use crate::relationship::{Roster, RosterError};

/// 记忆归属：角色或群组
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemoryOwner {
    Character(String),
    Group(String),
}

impl MemoryOwner {
    pub fn id(&self) -> &str {
        match self {
            MemoryOwner::Character(id) | MemoryOwner::Group(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsolidationOutcome {
    /// 待处理消息不足阈值
    BelowThreshold { pending: usize },
    /// 后端认为无可摘要；水位线保持不动
    NothingToSummarize { pending: usize },
    Summarized {
        summary: String,
        watermark: i64,
        facts: usize,
    },
}

/// 从回复中提取 JSON 对象并展平为字符串键值；空键、空值丢弃
pub fn extract_knowledge(raw: &str) -> BTreeMap<String, String> {
    let trimmed = raw.trim();
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            &trimmed[start..=end]
        } else {
            return BTreeMap::new();
        }
    } else {
        return BTreeMap::new();
    };

    let Ok(map) = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(json_str) else {
        tracing::debug!("Knowledge extraction returned non-JSON output");
        return BTreeMap::new();
    };

    map.into_iter()
        .filter_map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            let key = k.trim().to_string();
            let value = value.trim().to_string();
            (!key.is_empty() && !value.is_empty()).then_some((key, value))
        })
        .collect()
}

#[derive(Clone)]
pub struct MemoryPipeline {
    ctx: Arc<AppContext>,
}

impl MemoryPipeline {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    fn is_sentinel(&self, summary: &str) -> bool {
        let normalized = summary.trim_matches(|c: char| !c.is_alphanumeric());
        normalized.is_empty()
            || normalized.eq_ignore_ascii_case(self.ctx.config.memory.nothing_sentinel.trim())
    }

    fn owner_name(roster: &Roster, owner: &MemoryOwner) -> Result<(String, i64), RosterError> {
        match owner {
            MemoryOwner::Character(id) => roster
                .character(id)
                .map(|c| (c.name.clone(), c.last_summarized_message_id))
                .ok_or_else(|| RosterError::UnknownCharacter(id.clone())),
            MemoryOwner::Group(id) => roster
                .group(id)
                .map(|g| (g.name.clone(), g.last_summarized_message_id))
                .ok_or_else(|| RosterError::UnknownGroup(id.clone())),
        }
    }

    /// 对单个角色或群组执行一次两级整理
    pub async fn consolidate(&self, owner: &MemoryOwner) -> Result<ConsolidationOutcome, ActionError> {
        let threshold = self.ctx.config.memory.chunk_threshold.max(1);
        let user_name = self.ctx.user.read().await.name.clone();

        let (name, request, chunk_end, pending) = {
            let roster = self.ctx.roster.read().await;
            let (name, watermark) = Self::owner_name(&roster, owner)?;
            let messages: Vec<Message> = self.ctx.store.since(owner.id(), watermark)?;
            if messages.len() < threshold {
                return Ok(ConsolidationOutcome::BelowThreshold {
                    pending: messages.len(),
                });
            }
            let transcript = prompt::render_transcript(&messages, &roster, &user_name, None);
            let sentinel = &self.ctx.config.memory.nothing_sentinel;
            let request = match owner {
                MemoryOwner::Character(_) => {
                    prompt::character_summary_prompt(&name, &transcript, sentinel)
                }
                MemoryOwner::Group(_) => prompt::group_summary_prompt(&name, &transcript, sentinel),
            };
            let chunk_end = messages.last().map(|m| m.id).unwrap_or(watermark);
            (name, request, chunk_end, messages.len())
        };

        let raw = call_prompt(&self.ctx, request, None).await?;
        let summary = raw.trim().to_string();
        if self.is_sentinel(&summary) {
            tracing::debug!("Nothing to summarize for {} ({} pending)", name, pending);
            return Ok(ConsolidationOutcome::NothingToSummarize { pending });
        }

        {
            let mut roster = self.ctx.roster.write().await;
            match owner {
                MemoryOwner::Character(id) => {
                    let character = roster.character_mut(id)?;
                    character.long_term_memories.push(summary.clone());
                    character.last_summarized_message_id =
                        character.last_summarized_message_id.max(chunk_end);
                    let group_id = character.group_id.clone();
                    if let Some(group) = group_id.and_then(|g| roster.groups.get_mut(&g)) {
                        group
                            .long_term_memories
                            .push(format!("(personal) {}: {}", name, summary));
                    }
                }
                MemoryOwner::Group(id) => {
                    let group = roster.group_mut(id)?;
                    group.long_term_memories.push(summary.clone());
                    group.last_summarized_message_id = group.last_summarized_message_id.max(chunk_end);
                }
            }
        }
        tracing::info!("Summarized {} messages for {}", pending, name);
        self.ctx.emit(CompanionEvent::MemorySummarized {
            owner_id: owner.id().to_string(),
            summary: summary.clone(),
        });

        let facts = match call_prompt(&self.ctx, prompt::knowledge_prompt(&name, &summary), None).await {
            Ok(raw) => self.merge_knowledge(owner, extract_knowledge(&raw)).await?,
            Err(e) => {
                tracing::warn!("Knowledge extraction failed for {}: {}", name, e);
                0
            }
        };

        Ok(ConsolidationOutcome::Summarized {
            summary,
            watermark: chunk_end,
            facts,
        })
    }

    async fn merge_knowledge(
        &self,
        owner: &MemoryOwner,
        facts: BTreeMap<String, String>,
    ) -> Result<usize, ActionError> {
        let count = facts.len();
        if count == 0 {
            return Ok(0);
        }
        let mut roster = self.ctx.roster.write().await;
        let library = match owner {
            MemoryOwner::Character(id) => &mut roster.character_mut(id)?.knowledge_library,
            MemoryOwner::Group(id) => &mut roster.group_mut(id)?.knowledge_library,
        };
        library.extend(facts);
        Ok(count)
    }

    /// 用最近的消息生成一句情境摘要；无消息或空结果时不改动
    pub async fn refresh_context(&self, owner: &MemoryOwner) -> Result<Option<String>, ActionError> {
        let user_name = self.ctx.user.read().await.name.clone();
        let messages = self
            .ctx
            .store
            .recent(owner.id(), self.ctx.config.memory.context_window)?;
        if messages.is_empty() {
            return Ok(None);
        }
        let transcript = {
            let roster = self.ctx.roster.read().await;
            prompt::render_transcript(&messages, &roster, &user_name, None)
        };

        let raw = call_prompt(&self.ctx, prompt::context_summary_prompt(&transcript), None).await?;
        let summary = raw.trim().to_string();
        if summary.is_empty() {
            return Ok(None);
        }

        {
            let mut roster = self.ctx.roster.write().await;
            match owner {
                MemoryOwner::Character(id) => {
                    roster.character_mut(id)?.current_context_summary = summary.clone()
                }
                MemoryOwner::Group(id) => roster.group_mut(id)?.current_context_summary = summary.clone(),
            }
        }
        self.ctx.emit(CompanionEvent::ContextUpdated {
            owner_id: owner.id().to_string(),
            summary: summary.clone(),
        });
        Ok(Some(summary))
    }

    /// 一次完整整理：先所有角色，再所有群组，顺序执行；单个失败只影响该实体
    pub async fn run_pass(&self) -> Vec<(MemoryOwner, Result<ConsolidationOutcome, ActionError>)> {
        let owners: Vec<MemoryOwner> = {
            let roster = self.ctx.roster.read().await;
            roster
                .characters
                .keys()
                .cloned()
                .map(MemoryOwner::Character)
                .chain(roster.groups.keys().cloned().map(MemoryOwner::Group))
                .collect()
        };

        let mut results = Vec::with_capacity(owners.len());
        for owner in owners {
            let result = self.consolidate(&owner).await;
            let cancelled = matches!(result, Err(ActionError::Cancelled));
            if let (Err(e), false) = (&result, cancelled) {
                tracing::warn!("Memory consolidation failed for {}: {}", owner.id(), e);
            }
            results.push((owner, result));
            if cancelled {
                break;
            }
        }
        results
    }

    /// 后台定时整理，直到取消
    pub fn spawn_ticker(&self) -> JoinHandle<()> {
        let pipeline = self.clone();
        let cancel = self.ctx.cancel_token();
        let period = Duration::from_secs(self.ctx.config.memory.interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        pipeline.run_pass().await;
                    }
                }
            }
            tracing::debug!("Memory ticker stopped");
        })
    }

    /// 对话结束后的情境刷新（不等待结果）
    pub fn spawn_context_refresh(&self, owner: MemoryOwner) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.refresh_context(&owner).await {
                tracing::debug!("Context refresh for {} skipped: {}", owner.id(), e);
            }
        })
    }
}
