//! 配置文件校验：存在性 + 按扩展名做语法检查

use std::path::Path;

use async_trait::async_trait;

use crate::core::ToolError;
use crate::tools::registry::expect_args;
use crate::tools::Tool;

/// 校验结果文本；文件不存在或不可读属于正常结论，不算工具失败
pub async fn validate_file(path: &Path) -> String {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return format!("Configuration file not found at {}", path.display());
        }
        Err(e) => return format!("Cannot read {}: {e}", path.display()),
    };
    if content.trim().is_empty() {
        return format!("Warning: {} is empty", path.display());
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let checked = match ext.as_str() {
        "json" => Some(
            serde_json::from_str::<serde_json::Value>(&content)
                .map(|_| ())
                .map_err(|e| format!("Invalid JSON at line {} column {}: {e}", e.line(), e.column())),
        ),
        "toml" => Some(
            content
                .parse::<toml::Table>()
                .map(|_| ())
                .map_err(|e| format!("Invalid TOML: {}", e.message())),
        ),
        "yaml" | "yml" => Some(
            serde_yaml::from_str::<serde_yaml::Value>(&content)
                .map(|_| ())
                .map_err(|e| format!("Invalid YAML: {e}")),
        ),
        _ => None,
    };

    match checked {
        Some(Ok(())) => format!("Configuration is valid ({ext}): {}", path.display()),
        Some(Err(reason)) => format!("Error: {reason}"),
        None => format!(
            "Configuration file {} is readable ({} lines); no syntax checker for this format",
            path.display(),
            content.lines().count()
        ),
    }
}

pub struct ConfigCheckTool;

#[async_trait]
impl Tool for ConfigCheckTool {
    fn name(&self) -> &str {
        "validate_configuration"
    }

    fn description(&self) -> &str {
        "Check that a configuration file exists and parses (json, toml, yaml)"
    }

    fn usage(&self) -> String {
        "validate_configuration(config_path)".to_string()
    }

    async fn execute(&self, args: &[String]) -> Result<String, ToolError> {
        let args = expect_args(self.name(), args, 1, 1)?;
        Ok(validate_file(Path::new(args[0].trim())).await)
    }
}
