//! 群组状态：成员列表与群组级记忆

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupState {
    pub id: String,
    pub name: String,
    /// 群组概念 / 主题
    #[serde(default)]
    pub concept: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
    #[serde(default)]
    pub last_summarized_message_id: i64,
    #[serde(default)]
    pub long_term_memories: Vec<String>,
    #[serde(default)]
    pub knowledge_library: BTreeMap<String, String>,
    #[serde(default)]
    pub current_context_summary: String,
}

impl GroupState {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            concept: String::new(),
            member_ids: Vec::new(),
            last_summarized_message_id: 0,
            long_term_memories: Vec::new(),
            knowledge_library: BTreeMap::new(),
            current_context_summary: String::new(),
        }
    }

    pub fn with_concept(mut self, concept: impl Into<String>) -> Self {
        self.concept = concept.into();
        self
    }

    pub fn has_member(&self, character_id: &str) -> bool {
        self.member_ids.iter().any(|m| m == character_id)
    }
}
