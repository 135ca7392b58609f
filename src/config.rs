//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COMPANION__*` 覆盖（双下划线表示嵌套，如 `COMPANION__LLM__PROVIDER=ollama`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub autonomy: AutonomySection,
    pub capture: CaptureSection,
    pub relationship: RelationshipSection,
    pub group: GroupSection,
    pub memory: MemorySection,
}

/// [app] 段：用户信息、数据目录、主循环节拍
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    #[serde(default = "default_user_name")]
    pub user_name: String,
    /// 数据目录（聊天库所在），未设置时用 ./data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// 角色与群组快照（JSON）
    pub roster_path: Option<PathBuf>,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// 回复语言，写入提示词
    #[serde(default = "default_language")]
    pub language: String,
    /// 用户直接对话失败时写入聊天记录的提示
    #[serde(default = "default_error_message")]
    pub error_message: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            user_name: default_user_name(),
            data_dir: default_data_dir(),
            roster_path: None,
            tick_interval_ms: default_tick_interval_ms(),
            language: default_language(),
            error_message: default_error_message(),
        }
    }
}

fn default_user_name() -> String {
    "User".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_language() -> String {
    "English".to_string()
}

fn default_error_message() -> String {
    "Something went wrong. Please check your API key, network connection or local model settings.".to_string()
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：gemini / openai / ollama / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取 GEMINI_API_KEY / OPENAI_API_KEY
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [autonomy] 段：自主行为计时与各类行为的概率带
#[derive(Debug, Clone, Deserialize)]
pub struct AutonomySection {
    #[serde(default = "default_true")]
    pub self_awareness_enabled: bool,
    /// 时段问候检查周期（秒）
    #[serde(default = "default_time_event_interval")]
    pub time_event_interval_secs: u64,
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,
    /// 用户最近交互后的静默窗口（秒）
    #[serde(default = "default_user_cooldown")]
    pub user_cooldown_secs: u64,
    #[serde(default = "default_screen_reaction_chance")]
    pub screen_reaction_chance: f64,
    #[serde(default = "default_random_event_chance")]
    pub random_event_chance: f64,
    #[serde(default = "default_group_chat_chance")]
    pub group_chat_chance: f64,
}

impl Default for AutonomySection {
    fn default() -> Self {
        Self {
            self_awareness_enabled: true,
            time_event_interval_secs: default_time_event_interval(),
            min_interval_secs: default_min_interval(),
            max_interval_secs: default_max_interval(),
            user_cooldown_secs: default_user_cooldown(),
            screen_reaction_chance: default_screen_reaction_chance(),
            random_event_chance: default_random_event_chance(),
            group_chat_chance: default_group_chat_chance(),
        }
    }
}

impl AutonomySection {
    pub fn time_event_interval(&self) -> Duration {
        Duration::from_secs(self.time_event_interval_secs)
    }

    pub fn user_cooldown(&self) -> Duration {
        Duration::from_secs(self.user_cooldown_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_time_event_interval() -> u64 {
    60
}

fn default_min_interval() -> u64 {
    1800
}

fn default_max_interval() -> u64 {
    3600
}

fn default_user_cooldown() -> u64 {
    300
}

fn default_screen_reaction_chance() -> f64 {
    0.2
}

fn default_random_event_chance() -> f64 {
    0.3
}

fn default_group_chat_chance() -> f64 {
    0.2
}

/// [capture] 段：屏幕截图来源
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CaptureSection {
    /// 是否允许视觉反应
    #[serde(default)]
    pub enabled: bool,
    /// 由外部截图程序写入的图片文件
    pub image_path: Option<PathBuf>,
}

/// [relationship] 段：等待回复与忽略惩罚
#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipSection {
    #[serde(default = "default_base_wait")]
    pub base_wait_secs: u64,
    #[serde(default = "default_max_ignore_count")]
    pub max_ignore_count: u32,
    #[serde(default = "default_ignore_penalty")]
    pub ignore_penalty: f64,
    #[serde(default = "default_reply_reward")]
    pub reply_reward: f64,
}

impl Default for RelationshipSection {
    fn default() -> Self {
        Self {
            base_wait_secs: default_base_wait(),
            max_ignore_count: default_max_ignore_count(),
            ignore_penalty: default_ignore_penalty(),
            reply_reward: default_reply_reward(),
        }
    }
}

impl RelationshipSection {
    pub fn base_wait(&self) -> Duration {
        Duration::from_secs(self.base_wait_secs)
    }
}

fn default_base_wait() -> u64 {
    300
}

fn default_max_ignore_count() -> u32 {
    2
}

fn default_ignore_penalty() -> f64 {
    -5.0
}

fn default_reply_reward() -> f64 {
    2.0
}

/// [group] 段：群聊轮数、上下文窗口与节奏
#[derive(Debug, Clone, Deserialize)]
pub struct GroupSection {
    #[serde(default = "default_max_loop_turns")]
    pub max_loop_turns: usize,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_personal_history_window")]
    pub personal_history_window: usize,
    /// 每字符的"打字"延迟
    #[serde(default = "default_pacing_ms_per_char")]
    pub pacing_ms_per_char: u64,
    #[serde(default = "default_min_pacing_ms")]
    pub min_pacing_ms: u64,
    #[serde(default = "default_max_pacing_ms")]
    pub max_pacing_ms: u64,
    #[serde(default = "default_min_turn_gap_ms")]
    pub min_turn_gap_ms: u64,
    #[serde(default = "default_max_turn_gap_ms")]
    pub max_turn_gap_ms: u64,
}

impl Default for GroupSection {
    fn default() -> Self {
        Self {
            max_loop_turns: default_max_loop_turns(),
            history_window: default_history_window(),
            personal_history_window: default_personal_history_window(),
            pacing_ms_per_char: default_pacing_ms_per_char(),
            min_pacing_ms: default_min_pacing_ms(),
            max_pacing_ms: default_max_pacing_ms(),
            min_turn_gap_ms: default_min_turn_gap_ms(),
            max_turn_gap_ms: default_max_turn_gap_ms(),
        }
    }
}

impl GroupSection {
    /// 与发言长度成正比的停顿，限制在 [min_pacing_ms, max_pacing_ms]
    pub fn pacing_for(&self, text: &str) -> Duration {
        let raw = self
            .pacing_ms_per_char
            .saturating_mul(text.chars().count() as u64);
        let lo = self.min_pacing_ms.min(self.max_pacing_ms);
        Duration::from_millis(raw.clamp(lo, self.max_pacing_ms))
    }
}

fn default_max_loop_turns() -> usize {
    3
}

fn default_history_window() -> usize {
    20
}

fn default_personal_history_window() -> usize {
    10
}

fn default_pacing_ms_per_char() -> u64 {
    30
}

fn default_min_pacing_ms() -> u64 {
    500
}

fn default_max_pacing_ms() -> u64 {
    4000
}

fn default_min_turn_gap_ms() -> u64 {
    1000
}

fn default_max_turn_gap_ms() -> u64 {
    2500
}

/// [memory] 段：整理周期、分块阈值、哨兵文本
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_memory_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_nothing_sentinel")]
    pub nothing_sentinel: String,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            interval_secs: default_memory_interval(),
            chunk_threshold: default_chunk_threshold(),
            context_window: default_context_window(),
            nothing_sentinel: default_nothing_sentinel(),
        }
    }
}

fn default_memory_interval() -> u64 {
    300
}

fn default_chunk_threshold() -> usize {
    20
}

fn default_context_window() -> usize {
    10
}

fn default_nothing_sentinel() -> String {
    "nothing to summarize".to_string()
}

/// 从 config 目录加载配置，环境变量 COMPANION__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 COMPANION__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COMPANION")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.relationship.max_ignore_count, 2);
        assert_eq!(cfg.relationship.base_wait(), Duration::from_secs(300));
        assert_eq!(cfg.group.max_loop_turns, 3);
        assert_eq!(cfg.memory.chunk_threshold, 20);
        assert_eq!(cfg.autonomy.time_event_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[group]\nmax_loop_turns = 5\n[llm]\nprovider = \"mock\"\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.group.max_loop_turns, 5);
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.group.history_window, 20);
    }

    #[test]
    fn test_pacing_is_clamped() {
        let g = GroupSection::default();
        assert_eq!(g.pacing_for(""), Duration::from_millis(500));
        assert_eq!(g.pacing_for(&"x".repeat(1000)), Duration::from_millis(4000));
        assert_eq!(g.pacing_for(&"x".repeat(50)), Duration::from_millis(1500));
    }
}
