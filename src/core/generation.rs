//! 单次后端调用与单角色台词生成
//!
//! 所有生成请求都经过 call_backend：缺少凭据时在网络请求前中止，带请求超时，并与取消令牌竞争；
//! 被取消的结果直接丢弃。

use std::time::Duration;

use crate::core::context::AppContext;
use crate::core::error::ActionError;
use crate::core::events::CompanionEvent;
use crate::llm::{ChatMessage, LlmError};
use crate::relationship::{parse_reply, ParsedReply};

pub async fn call_backend(ctx: &AppContext, messages: Vec<ChatMessage>) -> Result<String, ActionError> {
    if !ctx.llm.has_credentials() {
        return Err(ActionError::MissingCredential(ctx.llm.name().to_string()));
    }
    let cancel = ctx.cancel_token();
    tokio::select! {
        _ = cancel.cancelled() => Err(ActionError::Cancelled),
        res = tokio::time::timeout(ctx.request_timeout(), ctx.llm.complete(&messages)) => match res {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(LlmError::Timeout.into()),
        },
    }
}

/// 单提示词（可附图）调用
pub async fn call_prompt(
    ctx: &AppContext,
    prompt: String,
    image: Option<Vec<u8>>,
) -> Result<String, ActionError> {
    let mut message = ChatMessage::user(prompt);
    if let Some(bytes) = image {
        message = message.with_image(bytes);
    }
    call_backend(ctx, vec![message]).await
}

/// 生成一句台词：调用后端并解析标签。标签副作用与持久化都由调用方在确认提交时执行
pub async fn generate_line(
    ctx: &AppContext,
    character_id: &str,
    prompt: String,
    image: Option<Vec<u8>>,
) -> Result<ParsedReply, ActionError> {
    let raw = call_prompt(ctx, prompt, image).await?;
    tracing::debug!("Raw reply for {}: {} chars", character_id, raw.len());
    Ok(parse_reply(&raw))
}

/// 把台词标签的副作用（亲密度变化、告别）写回角色状态
pub(crate) async fn apply_reply_effects(
    ctx: &AppContext,
    character_id: &str,
    parsed: &ParsedReply,
) -> Result<(), ActionError> {
    let mut roster = ctx.roster.write().await;
    let character = roster.character_mut(character_id)?;
    let before = character.intimacy_score;
    character.apply_reply(parsed);

    if character.intimacy_score != before {
        ctx.emit(CompanionEvent::IntimacyChanged {
            character_id: character_id.to_string(),
            score: character.intimacy_score,
            level: character.intimacy_level(),
        });
    }
    if parsed.farewell {
        tracing::info!("{} said farewell", character.name);
        ctx.emit(CompanionEvent::Farewell {
            character_id: character_id.to_string(),
        });
    }
    Ok(())
}

/// 可取消的等待
pub async fn pause(ctx: &AppContext, duration: Duration) -> Result<(), ActionError> {
    let cancel = ctx.cancel_token();
    tokio::select! {
        _ = cancel.cancelled() => Err(ActionError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
