//! 协调器输出解析
//!
//! 期望格式：
//! ```text
//! decision: <id|NONE>
//! reason: <text>
//! ```
//! 解析永不报错：缺失、NONE、无法匹配候选都视为"结束本轮群聊"。

use std::sync::OnceLock;

use regex::Regex;

use crate::relationship::CharacterState;

static DECISION_RE: OnceLock<Regex> = OnceLock::new();
static REASON_RE: OnceLock<Regex> = OnceLock::new();

fn field_re(cell: &'static OnceLock<Regex>, key: &str) -> &'static Regex {
    cell.get_or_init(|| {
        Regex::new(&format!(r"(?im)^[\s\-*_>#`]*{}[\s*_`]*[:：]\s*(.*)$", key)).unwrap()
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Decision {
    /// None 表示 NONE 或缺失
    pub choice: Option<String>,
    pub reason: Option<String>,
}

fn clean(value: &str) -> String {
    value
        .trim_matches(|c: char| c.is_whitespace() || "[]<>*`'\"".contains(c))
        .to_string()
}

pub fn parse_decision(raw: &str) -> Decision {
    let capture = |re: &Regex| {
        re.captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| clean(m.as_str()))
            .filter(|v| !v.is_empty())
    };
    let choice = capture(field_re(&DECISION_RE, "decision"))
        .filter(|v| !v.eq_ignore_ascii_case("none"));
    let reason = capture(field_re(&REASON_RE, "reason"));
    Decision { choice, reason }
}

/// 将决策文本映射到候选：先精确匹配 id，再按显示名（区分大小写）子串匹配，多个命中时取最长的名字
pub fn resolve_speaker<'a>(choice: &str, pool: &[&'a CharacterState]) -> Option<&'a CharacterState> {
    if let Some(c) = pool.iter().find(|c| c.id == choice) {
        return Some(*c);
    }
    pool.iter()
        .filter(|c| !c.name.is_empty() && choice.contains(c.name.as_str()))
        .max_by_key(|c| c.name.chars().count())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Vec<CharacterState> {
        vec![
            CharacterState::new("p_1", "Ann"),
            CharacterState::new("p_2", "Annabel"),
            CharacterState::new("p_3", "Bo"),
        ]
    }

    #[test]
    fn test_parse_id_and_reason() {
        let d = parse_decision("decision: p_3\nreason: Bo was asked directly.");
        assert_eq!(d.choice.as_deref(), Some("p_3"));
        assert_eq!(d.reason.as_deref(), Some("Bo was asked directly."));
    }

    #[test]
    fn test_parse_none_and_missing() {
        assert_eq!(parse_decision("Decision: NONE\nReason: done").choice, None);
        assert_eq!(parse_decision("decision: [none]").choice, None);
        assert_eq!(parse_decision("I think we should stop.").choice, None);
        assert_eq!(parse_decision("").choice, None);
    }

    #[test]
    fn test_parse_tolerates_markdown() {
        let d = parse_decision("**Decision:** `p_1`\n- reason: fairness");
        assert_eq!(d.choice.as_deref(), Some("p_1"));
        assert_eq!(d.reason.as_deref(), Some("fairness"));
    }

    #[test]
    fn test_resolve_by_id_then_name() {
        let states = pool();
        let refs: Vec<&CharacterState> = states.iter().collect();
        assert_eq!(resolve_speaker("p_2", &refs).unwrap().id, "p_2");
        assert_eq!(resolve_speaker("Bo (p_9)", &refs).unwrap().id, "p_3");
        assert_eq!(resolve_speaker("Annabel", &refs).unwrap().id, "p_2");
        assert!(resolve_speaker("bo", &refs).is_none());
        assert!(resolve_speaker("unknown", &refs).is_none());
    }
}
