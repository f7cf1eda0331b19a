//! 子进程执行抽象
//!
//! 所有需要派生进程的工具都经由 CommandRunner；生产实现为 SystemRunner（tokio::process，带超时、kill_on_drop），
//! 测试可替换为记录调用的实现，以证明被拦截的命令从未派生进程。

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::ToolError;

/// 一次进程执行的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// 直接执行 program + args（不经过 shell）
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ToolError>;

    /// 经 `sh -c` 执行一整行命令
    async fn run_shell(&self, command: &str, timeout: Duration) -> Result<CommandOutput, ToolError> {
        self.run("sh", &["-c".to_string(), command.to_string()], timeout)
            .await
    }
}

/// 基于 tokio::process 的真实执行器
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ToolError> {
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| ToolError::TimedOut(timeout.as_secs()))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ToolError::Failed(format!("command not found: {program}"))
                }
                std::io::ErrorKind::PermissionDenied => {
                    ToolError::Failed(format!("permission denied: {program}"))
                }
                _ => ToolError::Failed(format!("execution failed: {e}")),
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_system_runner_captures_stdout() {
        let out = SystemRunner
            .run_shell("echo hello", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_system_runner_missing_program() {
        let err = SystemRunner
            .run("definitely-not-a-real-binary-xyz", &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
    }

    #[tokio::test]
    async fn test_system_runner_timeout() {
        let err = SystemRunner
            .run_shell("sleep 5", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::TimedOut(_)));
    }
}
