// ==========================================
// 订单导入管道 - 运行上下文
// ==========================================
// 职责: 单次导入调用的运行期状态（run_id / 取消令牌 / 整体时限）
// 生命周期: 每次调用新建，贯穿整条管道
// ==========================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    cancel: CancellationToken,
    timed_out: Arc<AtomicBool>,
    // 调用方指定的整体时限（None 时使用配置值）
    run_timeout: Option<Duration>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self::with_cancel_token(CancellationToken::new())
    }

    /// 使用调用方持有的取消令牌（如 Ctrl-C 处理器）
    pub fn with_cancel_token(cancel: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            cancel,
            timed_out: Arc::new(AtomicBool::new(false)),
            run_timeout: None,
        }
    }

    /// 指定本次调用的整体时限
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 请求取消：在途批次跑完，不再派发新批次
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 是否因整体时限而停止
    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// 启动整体时限计时器
    ///
    /// # 说明
    /// - 到期后标记超时并触发取消令牌
    /// - 返回的守卫被 drop 时计时器随之停止
    pub fn arm_deadline(&self, timeout: Duration) -> DeadlineGuard {
        let cancel = self.cancel.clone();
        let timed_out = Arc::clone(&self.timed_out);
        let run_id = self.run_id.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    timed_out.store(true, Ordering::SeqCst);
                    cancel.cancel();
                    tracing::warn!(run_id = %run_id, timeout_ms = timeout.as_millis() as u64, "导入超过整体时限，停止派发");
                }
                _ = cancel.cancelled() => {}
            }
        });

        DeadlineGuard { handle }
    }
}

/// 整体时限守卫
pub struct DeadlineGuard {
    handle: JoinHandle<()>,
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_marks_timeout_and_cancels() {
        let ctx = RunContext::new();
        let _guard = ctx.arm_deadline(Duration::from_millis(10));

        ctx.cancel_token().cancelled().await;
        assert!(ctx.is_cancelled());
        assert!(ctx.is_timed_out());
    }

    #[tokio::test]
    async fn test_manual_cancel_is_not_timeout() {
        let ctx = RunContext::new();
        let _guard = ctx.arm_deadline(Duration::from_secs(60));

        ctx.cancel();
        assert!(ctx.is_cancelled());
        assert!(!ctx.is_timed_out());
    }

    #[test]
    fn test_caller_run_timeout() {
        assert_eq!(RunContext::new().run_timeout(), None);
        let ctx = RunContext::new().with_run_timeout(Duration::from_secs(5));
        assert_eq!(ctx.run_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunContext::new().run_id(), RunContext::new().run_id());
    }
}
