//! Companion - 桌面陪伴角色的自主行为核心
//!
//! 模块划分：
//! - **autonomy**: 时段问候、随机事件与自主行为调度器
//! - **capture**: 屏幕截图接口
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 执行闸门、动作执行器、共享上下文、事件、会话监管与主控循环
//! - **group**: 群聊协调器与决策解析
//! - **llm**: 生成后端抽象与实现（Gemini / OpenAI 兼容 / Ollama / Mock）
//! - **memory**: 消息存储（内存 / SQLite）与记忆整理管线
//! - **prompt**: 提示词构建
//! - **relationship**: 角色状态机、标签协议、群组与名册

pub mod autonomy;
pub mod capture;
pub mod config;
pub mod core;
pub mod group;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod prompt;
pub mod relationship;
