//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / usage / execute），由 ToolRegistry 按名注册与查找。
//! 参数为模型输出中拆出的位置字符串，派发层不检查个数与类型，由各工具用 expect_args 自行校验。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::ToolError;

/// 工具 trait：名称、描述（供 LLM 理解）、调用签名、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型输出 `name(args)` 中的 name）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 调用签名，如 `analyze_logs(service_name)`，拼入 prompt
    fn usage(&self) -> String {
        format!("{}()", self.name())
    }

    async fn execute(&self, args: &[String]) -> Result<String, ToolError>;
}

/// 校验位置参数个数（闭区间），不满足时返回 InvalidArguments
pub fn expect_args<'a>(
    tool: &str,
    args: &'a [String],
    min: usize,
    max: usize,
) -> Result<&'a [String], ToolError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min}..={max}")
        };
        return Err(ToolError::InvalidArguments(format!(
            "{tool} expects {expected} argument(s), got {}",
            args.len()
        )));
    }
    if let Some(i) = args.iter().take(min).position(|a| a.trim().is_empty()) {
        return Err(ToolError::InvalidArguments(format!(
            "{tool}: argument {} is empty",
            i + 1
        )));
    }
    Ok(args)
}

/// 工具注册表：按名称存储 Arc<dyn Tool>；BTreeMap 保证 prompt 中工具顺序稳定
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn invoke(&self, name: &str, args: &[String]) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 生成 prompt 中的 Available tools 段落
    pub fn describe(&self) -> String {
        self.tools
            .values()
            .map(|t| format!("- {}: {}", t.usage(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
