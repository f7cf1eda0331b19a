//! 会话监管：中断管理
//!
//! 持有 CancellationToken，用户 Ctrl+C 时取消当前 advance 与等待中的输入。

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct SessionSupervisor {
    /// 用户 Cancel 时触发
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 触发取消（用户 Ctrl+C）
    pub fn cancel(&self) {
        tracing::info!("interrupt received, cancelling");
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_reaches_handed_out_tokens() {
        let supervisor = SessionSupervisor::new();
        let token = supervisor.cancel_token();
        assert!(!token.is_cancelled());
        supervisor.cancel();
        token.cancelled().await;
        assert!(supervisor.cancel_token().is_cancelled());
    }
}
