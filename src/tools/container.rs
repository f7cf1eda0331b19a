//! 容器状态：`docker inspect` 摘要

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::ToolError;
use crate::tools::registry::expect_args;
use crate::tools::{CommandRunner, Tool};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Inspect {
    name: String,
    #[serde(default)]
    restart_count: u64,
    state: InspectState,
    config: InspectConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    #[serde(default)]
    exit_code: i64,
    #[serde(default)]
    error: String,
    #[serde(default)]
    started_at: String,
    #[serde(default)]
    health: Option<InspectHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHealth {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
}

/// 把 `docker inspect` 的 JSON 数组整理成可读摘要
pub fn summarize_inspect(raw: &str) -> Result<String, ToolError> {
    let items: Vec<Inspect> = serde_json::from_str(raw)
        .map_err(|e| ToolError::Failed(format!("unexpected docker inspect output: {e}")))?;
    let Some(c) = items.first() else {
        return Err(ToolError::Failed("docker inspect returned no containers".into()));
    };
    let mut out = format!(
        "Container: {}\nImage: {}\nStatus: {}\nStarted: {}\nRestarts: {}",
        c.name.trim_start_matches('/'),
        c.config.image,
        c.state.status,
        c.state.started_at,
        c.restart_count
    );
    if let Some(h) = &c.state.health {
        out.push_str(&format!("\nHealth: {}", h.status));
    }
    if c.state.status != "running" {
        out.push_str(&format!("\nExit code: {}", c.state.exit_code));
    }
    if !c.state.error.is_empty() {
        out.push_str(&format!("\nError: {}", c.state.error));
    }
    Ok(out)
}

pub struct ContainerTool {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl ContainerTool {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout_secs: u64) -> Self {
        Self {
            runner,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl Tool for ContainerTool {
    fn name(&self) -> &str {
        "check_container_status"
    }

    fn description(&self) -> &str {
        "Inspect a Docker container (state, image, restarts, health)"
    }

    fn usage(&self) -> String {
        "check_container_status(container_id_or_name)".to_string()
    }

    async fn execute(&self, args: &[String]) -> Result<String, ToolError> {
        let args = expect_args(self.name(), args, 1, 1)?;
        let out = self
            .runner
            .run(
                "docker",
                &["inspect".to_string(), args[0].trim().to_string()],
                self.timeout,
            )
            .await?;
        if !out.success() {
            return Err(ToolError::Failed(format!(
                "docker inspect failed: {}",
                out.stderr.trim()
            )));
        }
        summarize_inspect(&out.stdout)
    }
}
