//! 系统资源检查：CPU、内存、磁盘使用率（sysinfo）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

use crate::core::ToolError;
use crate::tools::registry::expect_args;
use crate::tools::Tool;

/// 资源使用摘要，百分比均为格式化字符串（如 "42.5%"）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceStatus {
    pub cpu_usage: String,
    pub memory_usage: String,
    pub disk_usage: String,
}

/// 单个挂载点
#[derive(Debug, Clone, PartialEq)]
pub struct DiskUsage {
    pub mount_point: String,
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl DiskUsage {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.total_bytes as f64 * 100.0
        }
    }
}

/// 一次完整采样
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
    pub cpu_percent: f32,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disks: Vec<DiskUsage>,
}

impl ResourceSnapshot {
    pub fn memory_percent(&self) -> f64 {
        if self.memory_total == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_total as f64 * 100.0
        }
    }

    /// 根分区优先，否则取使用率最高的挂载点
    pub fn primary_disk(&self) -> Option<&DiskUsage> {
        self.disks
            .iter()
            .find(|d| d.mount_point == "/")
            .or_else(|| {
                self.disks
                    .iter()
                    .max_by(|a, b| a.percent().total_cmp(&b.percent()))
            })
    }

    pub fn status(&self) -> ResourceStatus {
        ResourceStatus {
            cpu_usage: format!("{:.1}%", self.cpu_percent),
            memory_usage: format!("{:.1}%", self.memory_percent()),
            disk_usage: self
                .primary_disk()
                .map(|d| format!("{:.1}%", d.percent()))
                .unwrap_or_else(|| "N/A".to_string()),
        }
    }

    pub fn render(&self) -> String {
        let gib = |b: u64| b as f64 / 1024.0 / 1024.0 / 1024.0;
        let mut out = format!(
            "System Resources:\n- CPU Usage: {:.1}%\n- Memory Usage: {:.1}% ({:.1}GiB/{:.1}GiB)\n- Disks:",
            self.cpu_percent,
            self.memory_percent(),
            gib(self.memory_used),
            gib(self.memory_total),
        );
        if self.disks.is_empty() {
            out.push_str(" none reported");
        }
        for d in &self.disks {
            out.push_str(&format!(
                "\n  - {}: {:.1}% used ({:.1}GiB/{:.1}GiB)",
                d.mount_point,
                d.percent(),
                gib(d.used_bytes),
                gib(d.total_bytes)
            ));
        }
        out
    }
}

/// 采样当前资源；CPU 需要两次刷新间隔才有意义
pub async fn collect_resources() -> ResourceSnapshot {
    let mut sys = System::new();
    sys.refresh_cpu();
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    sys.refresh_cpu();
    sys.refresh_memory();

    let disks = Disks::new_with_refreshed_list()
        .list()
        .iter()
        .map(|d| DiskUsage {
            mount_point: d.mount_point().display().to_string(),
            used_bytes: d.total_space().saturating_sub(d.available_space()),
            total_bytes: d.total_space(),
        })
        .collect();

    ResourceSnapshot {
        cpu_percent: sys.global_cpu_info().cpu_usage(),
        memory_used: sys.used_memory(),
        memory_total: sys.total_memory(),
        disks,
    }
}

pub struct ResourceTool;

#[async_trait]
impl Tool for ResourceTool {
    fn name(&self) -> &str {
        "check_system_resources"
    }

    fn description(&self) -> &str {
        "Check CPU, memory, and disk usage"
    }

    fn usage(&self) -> String {
        "check_system_resources()".to_string()
    }

    async fn execute(&self, args: &[String]) -> Result<String, ToolError> {
        // 模型常会带一句描述性参数，忽略即可
        expect_args(self.name(), args, 0, 1)?;
        Ok(collect_resources().await.render())
    }
}
