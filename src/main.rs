//! Companion - 无头运行入口
//!
//! 初始化日志、加载配置与角色名册、打开聊天库、选择生成后端，运行节拍循环直到收到关闭信号，
//! 退出前保存名册快照。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use companion::capture::FileCapture;
use companion::config::{load_config, AppConfig};
use companion::core::{
    create_llm_from_config, install_signal_handlers, AppContext, Orchestrator, RosterSnapshotCleanup,
    SessionSupervisor, ShutdownCoordinator,
};
use companion::memory::SqliteMessageStore;
use companion::observability;
use companion::relationship::Roster;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    std::fs::create_dir_all(&cfg.app.data_dir)
        .with_context(|| format!("Failed to create data dir {}", cfg.app.data_dir.display()))?;
    let roster_path = cfg
        .app
        .roster_path
        .clone()
        .unwrap_or_else(|| cfg.app.data_dir.join("roster.json"));
    let roster = Roster::load(&roster_path).context("Failed to load roster")?;
    tracing::info!(
        "Loaded {} characters and {} groups",
        roster.characters.len(),
        roster.groups.len()
    );

    let store = SqliteMessageStore::open(cfg.app.data_dir.join("chat.db"))
        .context("Failed to open chat database")?;
    let llm = create_llm_from_config(&cfg);

    let session = Arc::new(SessionSupervisor::new());
    install_signal_handlers(&session);

    let capture_path = cfg.capture.image_path.clone();
    let mut ctx = AppContext::new(cfg, roster, Arc::new(store), llm).with_cancel_token(session.cancel_token());
    if let Some(path) = capture_path {
        ctx = ctx.with_capture(Arc::new(FileCapture::new(path)));
    }
    let ctx = Arc::new(ctx);

    let mut cleanup = ShutdownCoordinator::new();
    cleanup.register(RosterSnapshotCleanup::new(Arc::clone(&ctx), roster_path));

    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&ctx)));
    orchestrator.run().await;

    cleanup.run_cleanup().await;
    Ok(())
}
