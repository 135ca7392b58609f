//! 优雅关闭
//!
//! 收到 Ctrl+C / SIGTERM 时结束会话：节拍循环、群聊轮转、后台整理都在下一个挂起点退出，
//! 被取消的生成结果直接丢弃。随后依次执行注册的清理任务（保存角色名册快照等）。

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::context::AppContext;
use crate::core::session_supervisor::SessionSupervisor;

/// 单个清理任务的时限
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupted,
    /// SIGTERM
    Terminated,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupted => write!(f, "interrupted"),
            ShutdownReason::Terminated => write!(f, "terminated"),
        }
    }
}

/// 安装系统信号处理器，信号到达时结束会话
pub fn install_signal_handlers(session: &Arc<SessionSupervisor>) {
    let on_ctrl_c = Arc::clone(session);
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            on_ctrl_c.cancel(ShutdownReason::Interrupted);
        }
    });

    #[cfg(unix)]
    {
        let on_term = Arc::clone(session);
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                on_term.cancel(ShutdownReason::Terminated);
            }
        });
    }
}

#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理任务，单个任务有超时
#[derive(Default)]
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Box<dyn ShutdownCleanup>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Box::new(task));
    }

    pub async fn run_cleanup(&self) {
        tracing::info!("Running {} cleanup tasks", self.cleanup_tasks.len());
        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(CLEANUP_TIMEOUT, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!("Cleanup '{}' done", name),
                Ok(Err(e)) => tracing::warn!("Cleanup '{}' failed: {}", name, e),
                Err(_) => tracing::warn!("Cleanup '{}' timed out after {:?}", name, CLEANUP_TIMEOUT),
            }
        }
    }
}

/// 把角色名册（亲密度、记忆、水位线等）写回 JSON 快照
pub struct RosterSnapshotCleanup {
    ctx: Arc<AppContext>,
    path: PathBuf,
}

impl RosterSnapshotCleanup {
    pub fn new(ctx: Arc<AppContext>, path: impl Into<PathBuf>) -> Self {
        Self {
            ctx,
            path: path.into(),
        }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for RosterSnapshotCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.ctx.roster.read().await.save(&self.path)
    }

    fn name(&self) -> &'static str {
        "RosterSnapshot"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::llm::MockLlmClient;
    use crate::memory::InMemoryMessageStore;
    use crate::relationship::{CharacterState, Roster};

    #[tokio::test]
    async fn test_roster_snapshot_cleanup_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");

        let mut roster = Roster::new();
        roster.insert_character(CharacterState::new("ann", "Ann"));
        let ctx = Arc::new(AppContext::new(
            AppConfig::default(),
            roster,
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(MockLlmClient::new()),
        ));
        ctx.roster.write().await.character_mut("ann").unwrap().intimacy_score = 12.0;

        let mut coordinator = ShutdownCoordinator::new();
        coordinator.register(RosterSnapshotCleanup::new(Arc::clone(&ctx), &path));
        coordinator.run_cleanup().await;

        let loaded = Roster::load(&path).unwrap();
        assert_eq!(loaded.character("ann").unwrap().intimacy_score, 12.0);
    }

    #[tokio::test]
    async fn test_failing_cleanup_does_not_stop_later_tasks() {
        struct Broken;

        #[async_trait::async_trait]
        impl ShutdownCleanup for Broken {
            async fn cleanup(&self) -> anyhow::Result<()> {
                anyhow::bail!("disk full")
            }

            fn name(&self) -> &'static str {
                "Broken"
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        let ctx = Arc::new(AppContext::new(
            AppConfig::default(),
            Roster::new(),
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(MockLlmClient::new()),
        ));

        let mut coordinator = ShutdownCoordinator::new();
        coordinator.register(Broken);
        coordinator.register(RosterSnapshotCleanup::new(ctx, &path));
        coordinator.run_cleanup().await;
        assert!(path.exists());
    }
}
