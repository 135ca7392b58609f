//! 自主行为：时段问候、随机事件、屏幕反应与自主群聊的调度

pub mod scheduler;
pub mod time_of_day;

pub use scheduler::{AutonomyScheduler, TickInput};
pub use time_of_day::{DailyGreetings, HourRange, RandomEvent, TimeOfDay, GROUP_CHAT_TOPICS};
