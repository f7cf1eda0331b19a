//! 服务状态探测：systemd → docker（运行中）→ docker（全部）→ kubernetes，命中即停

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::ToolError;
use crate::tools::registry::expect_args;
use crate::tools::{CommandRunner, Tool};

const MAX_SERVICES_PER_CALL: usize = 8;

/// 单个服务的探测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ServiceStatus {
    pub name: String,
    pub status: String,
    pub running: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceStatus {
    fn not_found(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: "not_found".to_string(),
            running: false,
            message: format!("Service '{name}' not found via systemd, docker or kubernetes"),
            error: Some("not found".to_string()),
        }
    }

    pub fn is_failing(&self) -> bool {
        !self.running || self.status == "error" || self.status == "not_found"
    }
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

async fn probe_systemd(
    runner: &dyn CommandRunner,
    name: &str,
    timeout: Duration,
) -> Option<ServiceStatus> {
    let out = runner
        .run(
            "systemctl",
            &args(&["show", name, "--property=LoadState,ActiveState,SubState"]),
            timeout,
        )
        .await
        .ok()?;
    if !out.success() {
        return None;
    }
    let field = |key: &str| {
        out.stdout
            .lines()
            .find_map(|l| l.strip_prefix(key).and_then(|v| v.strip_prefix('=')))
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };
    let load = field("LoadState");
    if load.is_empty() || load == "not-found" {
        return None;
    }
    let active = field("ActiveState");
    let sub = field("SubState");
    let running = active == "active";
    Some(ServiceStatus {
        name: name.to_string(),
        status: if active.is_empty() { "unknown".to_string() } else { active.clone() },
        running,
        message: format!("systemd unit {name}: {active} ({sub})"),
        error: if active == "failed" {
            Some(format!("unit entered failed state ({sub})"))
        } else {
            None
        },
    })
}

async fn probe_docker(
    runner: &dyn CommandRunner,
    name: &str,
    timeout: Duration,
    include_stopped: bool,
) -> Option<ServiceStatus> {
    let mut argv = args(&["ps"]);
    if include_stopped {
        argv.push("-a".to_string());
    }
    argv.extend(args(&[
        "--filter",
        &format!("name={name}"),
        "--format",
        "{{.Names}}\t{{.Status}}",
    ]));
    let out = runner.run("docker", &argv, timeout).await.ok()?;
    if !out.success() {
        return None;
    }
    let line = out.stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (container, state) = line.split_once('\t').unwrap_or((line, ""));
    let running = state.starts_with("Up");
    Some(ServiceStatus {
        name: name.to_string(),
        status: if running { "running" } else { "exited" }.to_string(),
        running,
        message: format!("container {container}: {state}"),
        error: if running { None } else { Some(state.to_string()) },
    })
}

async fn probe_kubernetes(
    runner: &dyn CommandRunner,
    name: &str,
    timeout: Duration,
) -> Option<ServiceStatus> {
    let out = runner
        .run(
            "kubectl",
            &args(&["get", "pods", "--all-namespaces", "--no-headers"]),
            timeout,
        )
        .await
        .ok()?;
    if !out.success() {
        return None;
    }
    // NAMESPACE NAME READY STATUS RESTARTS AGE
    let pods: Vec<(String, String)> = out
        .stdout
        .lines()
        .filter_map(|l| {
            let cols: Vec<&str> = l.split_whitespace().collect();
            (cols.len() >= 4 && cols[1].contains(name))
                .then(|| (cols[1].to_string(), cols[3].to_string()))
        })
        .collect();
    if pods.is_empty() {
        return None;
    }
    let unhealthy: Vec<&(String, String)> = pods.iter().filter(|(_, s)| s != "Running").collect();
    let running = unhealthy.is_empty();
    Some(ServiceStatus {
        name: name.to_string(),
        status: if running {
            "running".to_string()
        } else {
            unhealthy[0].1.to_lowercase()
        },
        running,
        message: format!(
            "{} pod(s): {}",
            pods.len(),
            pods.iter()
                .map(|(p, s)| format!("{p}={s}"))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        error: (!running).then(|| format!("{} pod(s) not running", unhealthy.len())),
    })
}

/// 按 systemd、docker、docker -a、kubectl 的顺序探测，全部未命中时返回 not_found
pub async fn probe_service(
    runner: &dyn CommandRunner,
    name: &str,
    timeout: Duration,
) -> ServiceStatus {
    if let Some(s) = probe_systemd(runner, name, timeout).await {
        return s;
    }
    if let Some(s) = probe_docker(runner, name, timeout, false).await {
        return s;
    }
    if let Some(s) = probe_docker(runner, name, timeout, true).await {
        return s;
    }
    if let Some(s) = probe_kubernetes(runner, name, timeout).await {
        return s;
    }
    tracing::debug!(service = %name, "service not found by any probe");
    ServiceStatus::not_found(name)
}

pub struct ServiceTool {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl ServiceTool {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout_secs: u64) -> Self {
        Self {
            runner,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl Tool for ServiceTool {
    fn name(&self) -> &str {
        "check_service_status"
    }

    fn description(&self) -> &str {
        "Report whether a service is running (systemd, docker or kubernetes)"
    }

    fn usage(&self) -> String {
        "check_service_status(service_name)".to_string()
    }

    async fn execute(&self, args: &[String]) -> Result<String, ToolError> {
        let args = expect_args(self.name(), args, 1, MAX_SERVICES_PER_CALL)?;
        let mut statuses = Vec::with_capacity(args.len());
        for name in args {
            statuses.push(probe_service(self.runner.as_ref(), name.trim(), self.timeout).await);
        }
        let body = if statuses.len() == 1 {
            serde_json::to_string_pretty(&statuses[0])
        } else {
            serde_json::to_string_pretty(&statuses)
        };
        body.map_err(|e| ToolError::Failed(format!("serialize service status: {e}")))
    }
}
