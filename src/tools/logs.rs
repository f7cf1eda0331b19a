//! 日志扫描：读取匹配文件的末尾若干行，去重后按错误 / 警告分类
//!
//! JSON 格式的日志行只展示 message / msg / text / log / error 字段。

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::core::ToolError;
use crate::tools::registry::expect_args;
use crate::tools::Tool;

/// 每个文件最多回读的字节数
const TAIL_WINDOW_BYTES: u64 = 64 * 1024;
/// 单次结果最多返回的行数
const MAX_FINDINGS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub severity: Severity,
    pub file: String,
    pub message: String,
}

impl Finding {
    pub fn render(&self) -> String {
        let tag = match self.severity {
            Severity::Error => "[ERROR]",
            Severity::Warning => "[WARNING]",
        };
        format!("{tag} {}: {}", self.file, self.message)
    }
}

/// 行分类器
pub struct LogClassifier {
    error: Regex,
    warning: Regex,
}

impl Default for LogClassifier {
    fn default() -> Self {
        Self {
            error: Regex::new(r"(?i)\bE\b|error").expect("built-in error pattern"),
            warning: Regex::new(r"(?i)\bW\b|warn").expect("built-in warning pattern"),
        }
    }
}

impl LogClassifier {
    pub fn classify(&self, line: &str, errors_only: bool) -> Option<Severity> {
        if self.error.is_match(line) {
            Some(Severity::Error)
        } else if !errors_only && self.warning.is_match(line) {
            Some(Severity::Warning)
        } else {
            None
        }
    }
}

/// JSON 日志只取消息字段；非 JSON 原样返回
pub fn extract_message(line: &str) -> String {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(line) else {
        return line.to_string();
    };
    for field in ["message", "msg", "text", "log", "error"] {
        if let Some(v) = map.get(field) {
            return match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
        }
    }
    let severity = map
        .get("severity")
        .or_else(|| map.get("level"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    format!("[JSON log with no message field: {severity} level]")
}

/// 读取文件最后 n 行
pub async fn tail_lines(path: &Path, n: usize) -> std::io::Result<Vec<String>> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(TAIL_WINDOW_BYTES);
    file.seek(std::io::SeekFrom::Start(start)).await?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;
    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().collect();
    // 从窗口中间截断时首行不完整
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(n);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

pub struct LogTool {
    default_globs: Vec<String>,
    log_root: PathBuf,
    tail: usize,
    classifier: LogClassifier,
}

impl LogTool {
    pub fn new(default_globs: Vec<String>, log_root: impl Into<PathBuf>, tail: usize) -> Self {
        Self {
            default_globs,
            log_root: log_root.into(),
            tail: tail.max(1),
            classifier: LogClassifier::default(),
        }
    }

    /// 参数为空时用默认 glob；含 `/` 或 `*` 视为 glob；否则视为服务名
    fn patterns_for(&self, target: Option<&str>) -> Vec<String> {
        match target.map(str::trim).filter(|t| !t.is_empty()) {
            None => self.default_globs.clone(),
            Some(t) if t.contains('/') || t.contains('*') => vec![t.to_string()],
            Some(service) => {
                let root = self.log_root.display();
                let service = service.to_lowercase();
                let mut patterns = vec![
                    format!("{root}/{service}*.log"),
                    format!("{root}/{service}/*.log"),
                    format!("{root}/{service}/*"),
                ];
                patterns.extend(
                    self.default_globs
                        .iter()
                        .filter(|g| g.to_lowercase().contains(&service))
                        .cloned(),
                );
                patterns
            }
        }
    }

    fn expand(patterns: &[String]) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for pattern in patterns {
            let Ok(paths) = glob::glob(pattern) else {
                tracing::debug!(pattern = %pattern, "invalid log glob");
                continue;
            };
            for path in paths.flatten() {
                if path.is_file() && seen.insert(path.clone()) {
                    files.push(path);
                }
            }
        }
        files.sort();
        files
    }

    pub async fn scan(&self, target: Option<&str>, errors_only: bool) -> (usize, Vec<Finding>) {
        let files = Self::expand(&self.patterns_for(target));
        let mut seen = HashSet::new();
        let mut findings = Vec::new();
        for file in &files {
            let lines = match tail_lines(file, self.tail).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::debug!(file = %file.display(), error = %e, "log unreadable");
                    continue;
                }
            };
            for line in lines {
                let line = line.trim();
                if line.is_empty() || !seen.insert(line.to_string()) {
                    continue;
                }
                if let Some(severity) = self.classifier.classify(line, errors_only) {
                    findings.push(Finding {
                        severity,
                        file: file.display().to_string(),
                        message: extract_message(line),
                    });
                }
            }
        }
        (files.len(), findings)
    }
}

#[async_trait]
impl Tool for LogTool {
    fn name(&self) -> &str {
        "analyze_logs"
    }

    fn description(&self) -> &str {
        "Scan recent log lines for errors and warnings (argument: service name or log path glob)"
    }

    fn usage(&self) -> String {
        "analyze_logs(service_name)".to_string()
    }

    async fn execute(&self, args: &[String]) -> Result<String, ToolError> {
        let args = expect_args(self.name(), args, 0, 1)?;
        let target = args.first().map(String::as_str);
        let (file_count, findings) = self.scan(target, false).await;

        if file_count == 0 {
            return Ok(format!(
                "No logs found for: {}",
                target.unwrap_or("default log locations")
            ));
        }
        if findings.is_empty() {
            return Ok("No errors or warnings found in the recent logs.".to_string());
        }
        let total = findings.len();
        let mut out: Vec<String> = findings.iter().take(MAX_FINDINGS).map(Finding::render).collect();
        if total > MAX_FINDINGS {
            out.push(format!("... {} more lines omitted", total - MAX_FINDINGS));
        }
        Ok(format!(
            "Scanned {file_count} log file(s):\n{}",
            out.join("\n")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifier() {
        let c = LogClassifier::default();
        assert_eq!(c.classify("connect() failed ERROR", false), Some(Severity::Error));
        assert_eq!(c.classify("W0615 warning: slow", false), Some(Severity::Warning));
        assert_eq!(c.classify("W0615 warning: slow", true), None);
        assert_eq!(c.classify("GET /health 200", false), None);
    }

    #[test]
    fn test_extract_message_from_json() {
        assert_eq!(extract_message(r#"{"msg":"db down","level":"error"}"#), "db down");
        assert_eq!(
            extract_message(r#"{"severity":"WARN"}"#),
            "[JSON log with no message field: WARN level]"
        );
        assert_eq!(extract_message("plain error line"), "plain error line");
    }

    #[tokio::test]
    async fn test_scan_service_logs_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("nginx-error.log"),
            "ok line\n[error] connect() failed (111: Connection refused)\n[error] connect() failed (111: Connection refused)\n[warn] upstream slow\n",
        )
        .unwrap();

        let tool = LogTool::new(vec![], dir.path(), 10);
        let out = tool.execute(&["nginx".to_string()]).await.unwrap();
        assert!(out.contains("Scanned 1 log file(s)"));
        assert_eq!(out.matches("[ERROR]").count(), 1);
        assert!(out.contains("[WARNING]"));
    }

    #[tokio::test]
    async fn test_scan_reports_clean_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.log"), "GET / 200\n").unwrap();
        let tool = LogTool::new(vec![], dir.path(), 5);

        let clean = tool.execute(&["app".to_string()]).await.unwrap();
        assert_eq!(clean, "No errors or warnings found in the recent logs.");

        let missing = tool.execute(&["mysql".to_string()]).await.unwrap();
        assert!(missing.starts_with("No logs found for: mysql"));
    }

    #[tokio::test]
    async fn test_tail_lines_keeps_last_n() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        std::fs::write(&path, "1\n2\n3\n4\n").unwrap();
        assert_eq!(tail_lines(&path, 2).await.unwrap(), vec!["3", "4"]);
    }
}
