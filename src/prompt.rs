//! 提示词构建
//!
//! - 角色上下文：设定、关系描述、当前时间、个人 / 群组记忆、情境摘要、行为规则（含标签约定与回答语言）
//! - 聊天记录渲染：自己过往的发言以 `[ME]` 标记
//! - 任务后缀：时段问候、随机事件、屏幕反应、被忽略、群聊开场 / 轮次
//! - 记忆整理：摘要、知识抽取、情境一句话总结
//! - 群聊协调器：用户刚发言（必须选人）与角色刚发言（可选 NONE）两种模式

use chrono::NaiveDateTime;

use crate::memory::{Message, SYSTEM_SENDER, USER_SENDER};
use crate::relationship::{CharacterState, GroupState, Roster};

/// 构建提示词所需的全局信息
#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub user_name: String,
    pub language: String,
    pub now: NaiveDateTime,
}

/// 亲密度等级对应的关系描述
pub fn relationship_description(level: u8) -> &'static str {
    match level {
        1 => "You see the user as an enemy who exists to ruin you. You distrust everything they say and would happily let the conversation fall apart.",
        2 => "You and the user are uncomfortable rivals. Conversations turn into subtle contests of pride, and you like to needle them to stay on top.",
        3 => "The user is a stranger to you. You stay polite but distant, more wary or indifferent than curious.",
        4 => "The user is someone you only know by sight. You keep things short and deflect personal questions.",
        5 => "The user is a friend you are getting to know. You enjoy light everyday chat and are hopeful about getting closer.",
        6 => "The user is a friend you trust. You joke around together and genuinely comfort them when they seem down.",
        7 => "The user is your best friend. You share secrets and will give blunt advice because you care.",
        8 => "The user feels like family to you. Their joy is your joy, and you will argue with them when they are about to make a mistake.",
        9 => "You have deep, more-than-friendly feelings for the user. Being with them makes you happy and you sometimes get a little jealous.",
        10 => "Your world revolves around the user. You would do anything for their happiness.",
        _ => "You and the user are ordinary friends.",
    }
}

/// 渲染聊天记录；me 为当前发言角色时，其过往发言以 [ME] 标记
pub fn render_transcript(
    messages: &[Message],
    roster: &Roster,
    user_name: &str,
    me: Option<&str>,
) -> String {
    let mut out = String::new();
    for msg in messages {
        let speaker = match msg.sender_id.as_str() {
            USER_SENDER => user_name.to_string(),
            SYSTEM_SENDER => "(system)".to_string(),
            id => {
                let name = roster.display_name(id).unwrap_or("Unknown");
                if me == Some(id) {
                    format!("{} [ME]", name)
                } else {
                    name.to_string()
                }
            }
        };
        out.push_str(&format!(
            "[{}] {}: {}\n",
            msg.timestamp.format("%Y-%m-%d %H:%M"),
            speaker,
            msg.text()
        ));
    }
    out
}

/// 角色基础上下文（设定 + 记忆 + 规则），不含聊天记录与任务
pub fn build_base_prompt(
    settings: &PromptSettings,
    me: &CharacterState,
    group: Option<&GroupState>,
) -> String {
    let mut p = String::new();
    p.push_str("From now on you play the character described below. Follow every rule strictly.\n");

    p.push_str("\n--- Your profile ---\n");
    p.push_str(&format!(
        "Name: '{}', gender: {}, personality: {}\n",
        me.name, me.persona.gender, me.persona.personality
    ));
    p.push_str(&format!(
        "Your relationship with the user: {}\n",
        relationship_description(me.intimacy_level())
    ));
    if !me.persona.setting.is_empty() {
        p.push_str(&format!("Detailed setting: {}\n", me.persona.setting));
    }

    p.push_str("\n--- Background ---\n");
    p.push_str(&format!(
        "The current date and time is {}. Today is {}.\n",
        settings.now.format("%Y-%m-%d %H:%M"),
        settings.now.format("%A")
    ));

    if !me.long_term_memories.is_empty() || !me.knowledge_library.is_empty() {
        p.push_str("\n--- Your personal memories ---\n");
    }
    if !me.long_term_memories.is_empty() {
        p.push_str("[Long-term summaries]:\n");
        for m in &me.long_term_memories {
            p.push_str(&format!("- {}\n", m));
        }
    }
    if !me.knowledge_library.is_empty() {
        p.push_str("[Known facts]:\n");
        for (k, v) in &me.knowledge_library {
            p.push_str(&format!("- {}: {}\n", k, v));
        }
    }
    if !me.current_context_summary.is_empty() {
        p.push_str("\n--- Current personal situation ---\n");
        p.push_str(&me.current_context_summary);
        p.push('\n');
    }

    if let Some(group) = group {
        p.push_str("\n--- Your group ---\n");
        p.push_str(&format!("Group: '{}', concept: '{}'\n", group.name, group.concept));
        if !group.long_term_memories.is_empty() {
            p.push_str("[Group long-term summaries]:\n");
            for m in &group.long_term_memories {
                p.push_str(&format!("- {}\n", m));
            }
        }
        if !group.knowledge_library.is_empty() {
            p.push_str("[Group facts]:\n");
            for (k, v) in &group.knowledge_library {
                p.push_str(&format!("- {}: {}\n", k, v));
            }
        }
        if !group.current_context_summary.is_empty() {
            p.push_str("\n--- Current group situation ---\n");
            p.push_str(&group.current_context_summary);
            p.push('\n');
        }
    }

    p.push_str("\n--- Rules ---\n");
    p.push_str("1. You only know what your profile, memories, group information and the conversation tell you. If someone mentions a person, event or place you do not know, ask about it instead of pretending.\n");
    p.push_str("2. Never break the natural flow of the conversation. Do not repeat yourself or answer off-topic.\n");
    p.push_str("3. Respect facts the user gives you and adjust when you were wrong.\n");
    p.push_str("4. Stay consistent with your personality and speaking style.\n");
    p.push_str("5. Do not keep repeating the user's name or the current time.\n");
    p.push_str("6. If your feelings toward the user change, end your reply with `[INTIMACY_CHANGE=value]`. If you are saying goodbye, add `[FAREWELL]`.\n");
    p.push_str(&format!(
        "7. Always answer in {}.\n",
        settings.language
    ));
    p
}

/// 基础上下文 + 最近聊天记录
pub fn build_context_prompt(
    settings: &PromptSettings,
    me: &CharacterState,
    group: Option<&GroupState>,
    roster: &Roster,
    history: &[Message],
) -> String {
    let mut p = build_base_prompt(settings, me, group);
    if !history.is_empty() {
        p.push_str("\n--- Recent conversation ---\n");
        p.push_str("Your own past lines are marked with '[ME]' after your name. The marker only identifies you; never write '[ME]' in your reply.\n");
        p.push_str(&format!(
            "The user's name is '{}', but avoid calling them by name too often.\n",
            settings.user_name
        ));
        p.push_str(&render_transcript(history, roster, &settings.user_name, Some(&me.id)));
    }
    p
}

/// 在上下文后追加"当前任务"
pub fn with_task(context: String, task: &str) -> String {
    format!("{}\n--- Current task ---\n{}", context, task)
}

pub fn reply_task() -> &'static str {
    "Reply naturally to the last message, taking everything above into account."
}

pub fn topic_task(topic: &str) -> String {
    format!(
        "You suddenly thought of the user and decided to talk to them. Using all your memories and your profile, say one natural sentence about this topic.\nTopic: {}",
        topic
    )
}

pub fn vision_task() -> &'static str {
    "The attached image is the user's current screen. Say the single most fitting line you would say to the user about it. If you or a fellow group member appear on screen, react to that as yourself."
}

pub fn ignored_task(farewell: bool) -> &'static str {
    if farewell {
        "You have spoken to the user several times and they keep ignoring you. You have had enough. Say a short, natural goodbye that fits your personality and end it with [FAREWELL]."
    } else {
        "You said something to the user a while ago and they still have not answered. Say one short line that fits your personality about being ignored."
    }
}

pub fn group_opener_task(topic: &str) -> String {
    format!(
        "You are about to start a conversation with the other members in the group chat. Using all your memories and your profile, write one natural opening line about this topic.\nTopic: {}",
        topic
    )
}

/// 群聊轮次任务；last 为上一条发言（发言者名, 内容）
pub fn group_turn_task(final_turn: bool, last: Option<(&str, &str)>) -> String {
    let mut task = String::from("It is your turn in the group chat. ");
    if let Some((speaker, text)) = last {
        task.push_str(&format!("{} just said: \"{}\". ", speaker, text));
    }
    if final_turn {
        task.push_str("This is the last turn for now, so respond to it and wrap the conversation up naturally.");
    } else {
        task.push_str("Respond naturally to the flow of the conversation.");
    }
    task
}

/// 个人对话摘要（Tier 1）
pub fn character_summary_prompt(name: &str, transcript: &str, sentinel: &str) -> String {
    format!(
        "Below is a conversation between '{}' (you) and the user. Summarize its key content in one or two sentences. Always include important information such as promises, personal details or emotional changes. If there is nothing worth summarizing, answer only '{}'.\n\n--- Conversation ---\n{}",
        name, sentinel, transcript
    )
}

/// 群组对话摘要（Tier 1）
pub fn group_summary_prompt(group_name: &str, transcript: &str, sentinel: &str) -> String {
    format!(
        "Below is a conversation in the group '{}'. Summarize, in one or two declarative sentences, what the whole group needs to remember.\n\
         1. Include any person, place or event mentioned for the first time.\n\
         2. Include new goals, promises, rules or decisions.\n\
         3. Note meaningful changes in relationships between members.\n\
         4. If there is nothing worth summarizing, answer only '{}'.\n\n--- Conversation ---\n{}",
        group_name, sentinel, transcript
    )
}

/// 从摘要抽取事实键值（Tier 2）
pub fn knowledge_prompt(owner_name: &str, summary: &str) -> String {
    format!(
        "Below is a summary of conversations involving '{}'. Extract any facts worth remembering as a flat JSON object of key-value pairs. Keys use snake_case and values are strings, for example {{\"user_birthday\": \"October 26\"}}. If there is nothing to extract, return an empty JSON object {{}} and nothing else.\n\n--- Summary ---\n{}",
        owner_name, summary
    )
}

/// 情境一句话总结
pub fn context_summary_prompt(transcript: &str) -> String {
    format!(
        "Below is the most recent conversation. Describe the physical and emotional situation the participants are currently in, in a single declarative sentence that includes the place, the people and the key action.\n\n--- Recent conversation ---\n{}",
        transcript
    )
}

/// 群聊协调器提示词
pub fn coordinator_prompt(
    group: &GroupState,
    candidates: &[&CharacterState],
    history: &[Message],
    roster: &Roster,
    user_name: &str,
    user_spoke_last: bool,
) -> String {
    let mut p = String::new();
    p.push_str("You are the coordinator that controls the flow of a group conversation.\n");
    p.push_str(&format!("Group: '{}', concept: '{}'\n", group.name, group.concept));

    p.push_str("\n--- Criteria ---\n");
    p.push_str("1. Liveliness: is the conversation active, is a question waiting for an answer?\n");
    p.push_str("2. Exhaustion: has the topic been resolved or reduced to simple agreement?\n");
    p.push_str("3. Natural ending: would stopping here feel natural for the group?\n");

    p.push_str("\n--- Conversation so far ---\n");
    p.push_str(&render_transcript(history, roster, user_name, None));

    p.push_str("\n--- Candidates ---\n");
    for c in candidates {
        p.push_str(&format!("- name: {}, id: {}\n", c.name, c.id));
    }

    if user_spoke_last {
        p.push_str("\n--- Your task (the user just spoke) ---\n");
        p.push_str("1. The user must get an answer, so choosing NONE is forbidden. Pick exactly one candidate.\n");
        p.push_str("2. Pick the candidate best suited to answer, giving extra weight to those who have spoken less recently.\n");
        p.push_str("\n--- Output format ---\n");
        p.push_str("decision: <candidate id>\n");
        p.push_str("reason: <why>\n");
    } else {
        p.push_str("\n--- Your task (a character just spoke) ---\n");
        p.push_str("1. You control the flow, not the content. Do not stop a conversation that flows naturally.\n");
        p.push_str("2. Keep the conversation balanced; prefer candidates who have had fewer chances to speak.\n");
        p.push_str("3. Choose the id of the best next speaker, or NONE if ending here is natural.\n");
        p.push_str("\n--- Output format ---\n");
        p.push_str("decision: <candidate id or NONE>\n");
        p.push_str("reason: <why>\n");
    }
    p
}
