//! 结构化巡检报告：服务状态按分类归组 + 资源使用 + 模型撰写的摘要与建议
//!
//! 模型输出按 JSON Schema 解析；不是合法 JSON 时原文作为摘要，模型不可用时使用启发式摘要。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::CategoryRule;
use crate::engine::ModelAdapter;
use crate::memory::Message;
use crate::tools::{collect_resources, probe_service, CommandRunner, ResourceSnapshot, ResourceStatus, ServiceStatus};

pub const OTHER_CATEGORY: &str = "other_services";

/// 资源使用率告警阈值（百分比）
const HIGH_USAGE: f64 = 90.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DiagnosticReport {
    /// 分类名 → 该分类下的服务
    pub services: BTreeMap<String, Vec<ServiceStatus>>,
    pub resources: ResourceStatus,
    pub summary: String,
    pub recommendations: Vec<String>,
}

/// 模型需要填写的部分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Narrative {
    /// Brief summary of system health
    pub summary: String,
    /// Recommended actions based on the findings, most important first
    pub recommendations: Vec<String>,
}

/// 服务名（小写）包含规则关键字即归入该分类；未命中归入 other_services
pub fn categorize(
    statuses: Vec<ServiceStatus>,
    rules: &[CategoryRule],
) -> BTreeMap<String, Vec<ServiceStatus>> {
    let mut out: BTreeMap<String, Vec<ServiceStatus>> = BTreeMap::new();
    for status in statuses {
        let name = status.name.to_lowercase();
        let category = rules
            .iter()
            .find(|r| r.keywords.iter().any(|k| name.contains(&k.to_lowercase())))
            .map(|r| r.name.clone())
            .unwrap_or_else(|| OTHER_CATEGORY.to_string());
        out.entry(category).or_default().push(status);
    }
    out
}

impl DiagnosticReport {
    /// 未运行或状态为 error / not_found 的服务：(分类, 服务)
    pub fn failing_services(&self) -> Vec<(&str, &ServiceStatus)> {
        self.services
            .iter()
            .flat_map(|(cat, list)| list.iter().map(move |s| (cat.as_str(), s)))
            .filter(|(_, s)| s.is_failing())
            .collect()
    }

    /// 存在故障服务的分类（去重，按名称排序）
    pub fn failing_categories(&self) -> Vec<&str> {
        let mut cats: Vec<&str> = self.failing_services().into_iter().map(|(c, _)| c).collect();
        cats.dedup();
        cats
    }

    pub fn render(&self) -> String {
        let mut out = String::from("=== Service Health Report ===");
        for (category, list) in &self.services {
            out.push_str(&format!("\n\n[{category}]"));
            for s in list {
                let mark = if s.is_failing() { "FAIL" } else { " OK " };
                out.push_str(&format!("\n  {mark} {:<28} {:<12} {}", s.name, s.status, s.message));
            }
        }
        out.push_str(&format!(
            "\n\nResources: CPU {} | Memory {} | Disk {}",
            self.resources.cpu_usage, self.resources.memory_usage, self.resources.disk_usage
        ));
        out.push_str(&format!("\n\nSummary:\n{}", self.summary));
        if !self.recommendations.is_empty() {
            out.push_str("\n\nRecommendations:");
            for r in &self.recommendations {
                out.push_str(&format!("\n  - {r}"));
            }
        }
        out
    }
}

/// 发给模型的 system 指令，内含 Narrative 的 JSON Schema
pub fn narrative_instructions() -> String {
    let schema = schemars::schema_for!(Narrative);
    let schema = serde_json::to_string_pretty(&schema).unwrap_or_default();
    format!(
        "You are an infrastructure health analyst. Read the service and resource data and \
         respond with a single JSON object matching this JSON Schema, and nothing else:\n{schema}"
    )
}

/// 去掉 ```json 围栏，取第一个 `{` 到最后一个 `}` 解析
pub fn parse_narrative(text: &str) -> Result<Narrative, serde_json::Error> {
    let trimmed = text.trim();
    let body = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    };
    serde_json::from_str(body)
}

/// 不依赖模型的摘要与建议
pub fn heuristic_narrative(
    services: &BTreeMap<String, Vec<ServiceStatus>>,
    snapshot: &ResourceSnapshot,
) -> Narrative {
    let total: usize = services.values().map(Vec::len).sum();
    let failing: Vec<&ServiceStatus> = services
        .values()
        .flatten()
        .filter(|s| s.is_failing())
        .collect();

    let mut recommendations: Vec<String> = failing
        .iter()
        .map(|s| format!("Investigate {} ({}): {}", s.name, s.status, s.message))
        .collect();
    let mut pressure = Vec::new();
    if f64::from(snapshot.cpu_percent) >= HIGH_USAGE {
        pressure.push("CPU");
    }
    if snapshot.memory_percent() >= HIGH_USAGE {
        pressure.push("memory");
    }
    if snapshot.primary_disk().is_some_and(|d| d.percent() >= HIGH_USAGE) {
        pressure.push("disk");
    }
    for p in &pressure {
        recommendations.push(format!("{p} usage is above {HIGH_USAGE:.0}%; find the top consumer before restarting services"));
    }

    let summary = if failing.is_empty() && pressure.is_empty() {
        format!("All {total} checked services are running and resource usage is normal.")
    } else {
        let mut parts = Vec::new();
        if !failing.is_empty() {
            parts.push(format!("{} of {total} services are not healthy", failing.len()));
        }
        if !pressure.is_empty() {
            parts.push(format!("high {} usage", pressure.join(" and ")));
        }
        format!("{}.", parts.join("; "))
    };
    Narrative {
        summary,
        recommendations,
    }
}

/// 一次性巡检
pub struct ReportBuilder {
    runner: Arc<dyn CommandRunner>,
    model: Option<ModelAdapter>,
    rules: Vec<CategoryRule>,
    timeout: Duration,
}

impl ReportBuilder {
    pub fn new(runner: Arc<dyn CommandRunner>, rules: Vec<CategoryRule>, timeout_secs: u64) -> Self {
        Self {
            runner,
            model: None,
            rules,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_model(mut self, model: ModelAdapter) -> Self {
        self.model = Some(model);
        self
    }

    pub async fn build_report(&self, services: &[String]) -> DiagnosticReport {
        let mut statuses = Vec::with_capacity(services.len());
        for name in services {
            statuses.push(probe_service(self.runner.as_ref(), name, self.timeout).await);
        }
        let snapshot = collect_resources().await;
        self.assemble(statuses, &snapshot).await
    }

    /// 归类并撰写摘要
    pub async fn assemble(
        &self,
        statuses: Vec<ServiceStatus>,
        snapshot: &ResourceSnapshot,
    ) -> DiagnosticReport {
        let services = categorize(statuses, &self.rules);
        let resources = snapshot.status();
        let fallback = heuristic_narrative(&services, snapshot);

        let narrative = match &self.model {
            None => fallback,
            Some(model) => {
                let data = serde_json::json!({
                    "services": &services,
                    "resources": &resources,
                });
                let context = [Message::user(format!("Health check data:\n{data}"))];
                match model.complete(&context, &narrative_instructions()).await {
                    Ok(text) => match parse_narrative(&text) {
                        Ok(n) => n,
                        Err(e) => {
                            tracing::warn!(error = %e, "report narrative is not valid JSON, showing raw text");
                            Narrative {
                                summary: text.trim().to_string(),
                                recommendations: fallback.recommendations,
                            }
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "model unavailable for report, using heuristic summary");
                        fallback
                    }
                }
            }
        };

        DiagnosticReport {
            services,
            resources,
            summary: narrative.summary,
            recommendations: narrative.recommendations,
        }
    }
}
