//! 角色与群组名册
//!
//! 维护"一个角色至多属于一个群组"的约束；删除会级联清理群组成员关系与聊天记录。

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::character::CharacterState;
use super::group::GroupState;
use crate::memory::{MessageStore, Payload, StoreError, SYSTEM_SENDER};

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("Unknown character: {0}")]
    UnknownCharacter(String),

    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 全部角色与群组（按 id 有序）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Roster {
    #[serde(default)]
    pub characters: BTreeMap<String, CharacterState>,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupState>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 快照加载；文件不存在时返回空名册
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn character(&self, id: &str) -> Option<&CharacterState> {
        self.characters.get(id)
    }

    pub fn character_mut(&mut self, id: &str) -> Result<&mut CharacterState, RosterError> {
        self.characters
            .get_mut(id)
            .ok_or_else(|| RosterError::UnknownCharacter(id.to_string()))
    }

    pub fn group(&self, id: &str) -> Option<&GroupState> {
        self.groups.get(id)
    }

    pub fn group_mut(&mut self, id: &str) -> Result<&mut GroupState, RosterError> {
        self.groups
            .get_mut(id)
            .ok_or_else(|| RosterError::UnknownGroup(id.to_string()))
    }

    /// 插入（或替换）角色
    pub fn insert_character(&mut self, character: CharacterState) {
        self.characters.insert(character.id.clone(), character);
    }

    /// 以新生成的 id 创建角色
    pub fn create_character(&mut self, name: &str, max_ignore_count: u32) -> String {
        let id = format!("char_{}", uuid::Uuid::new_v4().simple());
        self.insert_character(
            CharacterState::new(id.clone(), name).with_max_ignore_count(max_ignore_count),
        );
        id
    }

    /// 删除角色：移出群组并删除其聊天记录。先完成存储操作，失败时名册保持不变
    pub fn delete_character(&mut self, id: &str, store: &dyn MessageStore) -> Result<(), RosterError> {
        let character = self
            .characters
            .get(id)
            .ok_or_else(|| RosterError::UnknownCharacter(id.to_string()))?;
        let name = character.name.clone();
        let group_id = character
            .group_id
            .clone()
            .filter(|g| self.groups.contains_key(g));

        if let Some(group_id) = &group_id {
            post_notice(store, group_id, format!("{} left the group.", name))?;
        }
        store.delete_owner(id)?;

        if let Some(group) = group_id.and_then(|g| self.groups.get_mut(&g)) {
            group.member_ids.retain(|m| m != id);
        }
        self.characters.remove(id);
        tracing::info!("Deleted character {} ({})", name, id);
        Ok(())
    }

    pub fn create_group(&mut self, name: &str, concept: &str) -> String {
        let id = format!("group_{}", uuid::Uuid::new_v4().simple());
        self.groups
            .insert(id.clone(), GroupState::new(id.clone(), name).with_concept(concept));
        id
    }

    /// 删除群组：成员的 group_id 清空，群聊记录删除
    pub fn delete_group(&mut self, id: &str, store: &dyn MessageStore) -> Result<(), RosterError> {
        if !self.groups.contains_key(id) {
            return Err(RosterError::UnknownGroup(id.to_string()));
        }
        store.delete_owner(id)?;

        if let Some(group) = self.groups.remove(id) {
            for member in &group.member_ids {
                if let Some(c) = self.characters.get_mut(member) {
                    c.group_id = None;
                }
            }
            tracing::info!("Deleted group {} ({})", group.name, id);
        }
        Ok(())
    }

    /// 将角色加入群组；若已属于其他群组则先移出。通知消息全部写入成功后才修改成员关系
    pub fn add_member(
        &mut self,
        group_id: &str,
        character_id: &str,
        store: &dyn MessageStore,
    ) -> Result<(), RosterError> {
        if !self.groups.contains_key(group_id) {
            return Err(RosterError::UnknownGroup(group_id.to_string()));
        }
        let character = self
            .characters
            .get(character_id)
            .ok_or_else(|| RosterError::UnknownCharacter(character_id.to_string()))?;
        let name = character.name.clone();
        let previous = character
            .group_id
            .clone()
            .filter(|g| self.groups.get(g).is_some_and(|group| group.has_member(character_id)));

        if previous.as_deref() == Some(group_id) {
            return Ok(());
        }
        if let Some(other) = &previous {
            post_notice(store, other, format!("{} left the group.", name))?;
        }
        post_notice(store, group_id, format!("{} joined the group.", name))?;

        if let Some(other) = &previous {
            self.group_mut(other)?.member_ids.retain(|m| m != character_id);
        }
        self.group_mut(group_id)?.member_ids.push(character_id.to_string());
        self.character_mut(character_id)?.group_id = Some(group_id.to_string());
        Ok(())
    }

    pub fn remove_member(
        &mut self,
        group_id: &str,
        character_id: &str,
        store: &dyn MessageStore,
    ) -> Result<(), RosterError> {
        if !self.group_mut(group_id)?.has_member(character_id) {
            return Ok(());
        }
        let name = self
            .character(character_id)
            .ok_or_else(|| RosterError::UnknownCharacter(character_id.to_string()))?
            .name
            .clone();
        post_notice(store, group_id, format!("{} left the group.", name))?;

        self.group_mut(group_id)?.member_ids.retain(|m| m != character_id);
        self.character_mut(character_id)?.group_id = None;
        Ok(())
    }

    /// 自主行为候选（Activated、未锁定、未待回复、未告别）
    pub fn autonomy_candidates(&self) -> Vec<&CharacterState> {
        self.characters
            .values()
            .filter(|c| c.is_autonomy_candidate())
            .collect()
    }

    /// 时段问候候选：不看 has_responded
    pub fn greeting_candidates(&self) -> Vec<&CharacterState> {
        self.characters
            .values()
            .filter(|c| c.is_group_candidate())
            .collect()
    }

    /// 群聊发言池：排除紧邻的上一位发言者
    pub fn group_pool(&self, group_id: &str, exclude: Option<&str>) -> Vec<&CharacterState> {
        let Some(group) = self.groups.get(group_id) else {
            return Vec::new();
        };
        group
            .member_ids
            .iter()
            .filter(|id| Some(id.as_str()) != exclude)
            .filter_map(|id| self.characters.get(id))
            .filter(|c| c.is_group_candidate())
            .collect()
    }

    /// 可以发起自主群聊的群组（至少两名成员）
    pub fn chat_ready_groups(&self) -> Vec<&GroupState> {
        self.groups
            .values()
            .filter(|g| g.member_ids.len() >= 2)
            .collect()
    }

    pub fn display_name(&self, sender_id: &str) -> Option<&str> {
        self.characters.get(sender_id).map(|c| c.name.as_str())
    }
}

/// 群组成员变动的系统通知
fn post_notice(store: &dyn MessageStore, group_id: &str, text: String) -> Result<(), StoreError> {
    store.append(group_id, SYSTEM_SENDER, Payload::system(text))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMessageStore;

    fn roster_with(names: &[&str]) -> Roster {
        let mut r = Roster::new();
        for n in names {
            r.insert_character(CharacterState::new(*n, *n));
        }
        r
    }

    #[test]
    fn test_member_moves_between_groups() {
        let store = InMemoryMessageStore::new();
        let mut r = roster_with(&["a", "b"]);
        let g1 = r.create_group("one", "");
        let g2 = r.create_group("two", "");

        r.add_member(&g1, "a", &store).unwrap();
        r.add_member(&g2, "a", &store).unwrap();

        assert!(!r.group(&g1).unwrap().has_member("a"));
        assert!(r.group(&g2).unwrap().has_member("a"));
        assert_eq!(r.character("a").unwrap().group_id.as_deref(), Some(g2.as_str()));

        let g1_log = store.recent(&g1, 10).unwrap();
        assert_eq!(g1_log.len(), 2);
        assert_eq!(g1_log[1].text(), "a left the group.");
        assert_eq!(g1_log[1].sender_id, SYSTEM_SENDER);
    }

    #[test]
    fn test_delete_group_cascades() {
        let store = InMemoryMessageStore::new();
        let mut r = roster_with(&["a", "b"]);
        let g = r.create_group("g", "friends");
        r.add_member(&g, "a", &store).unwrap();
        r.add_member(&g, "b", &store).unwrap();

        r.delete_group(&g, &store).unwrap();
        assert!(r.character("a").unwrap().group_id.is_none());
        assert!(store.recent(&g, 10).unwrap().is_empty());
        assert!(matches!(r.delete_group(&g, &store), Err(RosterError::UnknownGroup(_))));
    }

    #[test]
    fn test_delete_character_leaves_group() {
        let store = InMemoryMessageStore::new();
        let mut r = roster_with(&["a", "b"]);
        let g = r.create_group("g", "");
        r.add_member(&g, "a", &store).unwrap();
        store.append("a", "a", Payload::text("hi")).unwrap();

        r.delete_character("a", &store).unwrap();
        assert!(r.group(&g).unwrap().member_ids.is_empty());
        assert!(store.recent("a", 10).unwrap().is_empty());
    }

    #[test]
    fn test_group_pool_excludes_previous_and_ineligible() {
        let store = InMemoryMessageStore::new();
        let mut r = roster_with(&["a", "b", "c"]);
        let g = r.create_group("g", "");
        for id in ["a", "b", "c"] {
            r.add_member(&g, id, &store).unwrap();
        }
        r.character_mut("c").unwrap().has_said_farewell = true;

        let pool: Vec<_> = r.group_pool(&g, Some("a")).iter().map(|c| c.id.clone()).collect();
        assert_eq!(pool, ["b"]);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("roster.json");
        let mut r = roster_with(&["a"]);
        r.character_mut("a").unwrap().long_term_memories.push("likes tea".into());
        r.save(&path).unwrap();

        let loaded = Roster::load(&path).unwrap();
        assert_eq!(loaded.character("a").unwrap().long_term_memories, ["likes tea"]);
        assert!(Roster::load(&dir.path().join("missing.json")).unwrap().characters.is_empty());
    }

    /// 只接受指定 owner 写入的存储，其余操作一律失败
    struct FailingStore {
        inner: InMemoryMessageStore,
        writable: String,
    }

    impl MessageStore for FailingStore {
        fn append(
            &self,
            owner_id: &str,
            sender_id: &str,
            payload: Payload,
        ) -> Result<crate::memory::Message, StoreError> {
            if owner_id != self.writable {
                return Err(StoreError::Poisoned);
            }
            self.inner.append(owner_id, sender_id, payload)
        }

        fn recent(&self, owner_id: &str, limit: usize) -> Result<Vec<crate::memory::Message>, StoreError> {
            self.inner.recent(owner_id, limit)
        }

        fn since(&self, owner_id: &str, after_id: i64) -> Result<Vec<crate::memory::Message>, StoreError> {
            self.inner.since(owner_id, after_id)
        }

        fn delete_owner(&self, _owner_id: &str) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }
    }

    #[test]
    fn test_failed_store_leaves_roster_untouched() {
        let mut r = roster_with(&["a"]);
        let g1 = r.create_group("one", "");
        let g2 = r.create_group("two", "");
        let inner = InMemoryMessageStore::new();
        r.add_member(&g1, "a", &inner).unwrap();

        // 离开 g1 的通知能写入，加入 g2 的通知失败：成员关系不能只改一半
        let store = FailingStore {
            inner,
            writable: g1.clone(),
        };
        assert!(r.add_member(&g2, "a", &store).is_err());
        assert!(r.group(&g1).unwrap().has_member("a"));
        assert!(!r.group(&g2).unwrap().has_member("a"));
        assert_eq!(r.character("a").unwrap().group_id.as_deref(), Some(g1.as_str()));

        assert!(r.delete_character("a", &store).is_err());
        assert!(r.character("a").is_some());
        assert!(r.group(&g1).unwrap().has_member("a"));

        assert!(r.delete_group(&g1, &store).is_err());
        assert!(r.group(&g1).is_some());
        assert_eq!(r.character("a").unwrap().group_id.as_deref(), Some(g1.as_str()));
    }
}
