//! 会话监管：生命周期与取消
//!
//! 持有会话级 CancellationToken；AppContext 共享同一个令牌，所有后端调用、节奏延时、截图都与之竞争。
//! 取消会话时节拍循环停止，进行中的动作在下一个挂起点返回 Cancelled，结果丢弃。

use tokio_util::sync::CancellationToken;

use crate::core::shutdown::ShutdownReason;

#[derive(Debug, Default)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 结束会话；重复调用只记录第一次
    pub fn cancel(&self, reason: ShutdownReason) {
        if self.cancel_token.is_cancelled() {
            return;
        }
        tracing::info!("Session stopping: {}", reason);
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reaches_context_token() {
        let session = SessionSupervisor::new();
        let token = session.cancel_token();
        assert!(!token.is_cancelled());

        session.cancel(ShutdownReason::Interrupted);
        session.cancel(ShutdownReason::Terminated);
        assert!(token.is_cancelled());
    }
}
