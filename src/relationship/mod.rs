//! 关系层：角色状态机、群组、名册与回复标签

pub mod character;
pub mod group;
pub mod roster;
pub mod tags;

pub use character::{
    intimacy_level_for, CharacterMode, CharacterState, Persona, ReplyWait, WaitOutcome,
};
pub use group::GroupState;
pub use roster::{Roster, RosterError};
pub use tags::{parse_reply, ParsedReply};
