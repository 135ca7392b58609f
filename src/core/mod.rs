//! 核心编排层：动作与执行闸门、共享上下文、后端调用、事件、会话监管与关闭、主控循环

pub mod action;
pub mod context;
pub mod error;
pub mod events;
pub mod gate;
pub mod generation;
pub mod orchestrator;
pub mod session_supervisor;
pub mod shutdown;

pub use action::{Action, ActionExecutor, ActionKind, ActionOutcome, Dispatch, Speaker};
pub use context::{AppContext, PresenceMode, UserSettings};
pub use error::ActionError;
pub use events::CompanionEvent;
pub use gate::{ExecutionGate, GatePermit};
pub use orchestrator::{create_llm_from_config, Orchestrator};
pub use session_supervisor::SessionSupervisor;
pub use shutdown::{install_signal_handlers, RosterSnapshotCleanup, ShutdownCoordinator, ShutdownReason};
