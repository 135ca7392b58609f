//! 群聊：协调器输出解析与轮转循环

pub mod coordinator;
pub mod decision;

pub use coordinator::{GroupCoordinator, LoopEnd, LoopReport};
pub use decision::{parse_decision, resolve_speaker, Decision};
