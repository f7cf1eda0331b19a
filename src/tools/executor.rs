//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，invoke(tool_name, args) 在超时内调用 registry.invoke，
//! 超时返回 ToolError::TimedOut；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::ToolError;
use crate::tools::ToolRegistry;

/// 工具执行器：对每次调用施加超时并记录审计日志
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub async fn invoke(&self, tool_name: &str, args: &[String]) -> Result<String, ToolError> {
        let start = Instant::now();
        let result = match timeout(self.timeout, self.registry.invoke(tool_name, args)).await {
            Ok(r) => r,
            Err(_) => Err(ToolError::TimedOut(self.timeout.as_secs())),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::Blocked(_)) => "blocked",
            Err(ToolError::TimedOut(_)) => "timeout",
            Err(ToolError::NotFound(_)) => "not_found",
            Err(ToolError::InvalidArguments(_)) => "invalid_arguments",
            Err(ToolError::Failed(_)) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(args),
        });
        tracing::info!(audit = %audit, "tool");

        result
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &[String]) -> String {
    let s = serde_json::to_string(args).unwrap_or_default();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "Never finishes in time"
        }

        async fn execute(&self, _args: &[String]) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_executor_times_out() {
        let mut reg = ToolRegistry::new();
        reg.register(Sleepy);
        let exec = ToolExecutor::new(reg, 1);
        let err = exec.invoke("sleepy", &[]).await.unwrap_err();
        assert_eq!(err, ToolError::TimedOut(1));
    }
}
