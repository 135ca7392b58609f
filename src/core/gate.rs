//! 单飞执行闸门
//!
//! 所有角色、所有类型的自主动作共享一个 busy 标志：占用时新请求直接丢弃（不排队、不重试）。
//! 标志由 GatePermit 持有，Drop 时释放，任何退出路径（成功、失败、取消、panic 展开）都会归还。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::action::ActionKind;

#[derive(Debug, Clone, Default)]
pub struct ExecutionGate {
    busy: Arc<AtomicBool>,
}

impl ExecutionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试占用；已被占用时记录日志并返回 None
    pub fn try_acquire(&self, kind: ActionKind) -> Option<GatePermit> {
        match self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                tracing::debug!("Execution gate acquired for {:?}", kind);
                Some(GatePermit {
                    busy: Arc::clone(&self.busy),
                    kind,
                })
            }
            Err(_) => {
                tracing::info!("Execution gate busy, dropping {:?} request", kind);
                None
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// 闸门占用凭证
#[derive(Debug)]
pub struct GatePermit {
    busy: Arc<AtomicBool>,
    kind: ActionKind,
}

impl GatePermit {
    pub fn kind(&self) -> ActionKind {
        self.kind
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        tracing::debug!("Execution gate released by {:?}", self.kind);
    }
}
