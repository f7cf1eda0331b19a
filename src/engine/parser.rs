//! 模型输出解析：计划步骤、继续信号、工具调用、最终诊断
//!
//! 状态机只依赖 ResponseParser trait；默认的 HeuristicParser 基于文本启发式，
//! 可替换为结构化输出（如函数调用 schema）而不改动状态机。

use regex::Regex;

use crate::core::{Diagnosis, ToolCall};

pub trait ResponseParser: Send + Sync {
    /// 提取计划步骤；无法识别时返回空
    fn parse_plan(&self, text: &str) -> Vec<String>;

    /// 反思文本是否要求继续调查
    fn detects_continuation(&self, text: &str) -> bool;

    /// 提取第一个格式正确的工具调用；格式错误视为没有调用
    fn parse_tool_call(&self, text: &str, known_tools: &[String]) -> Option<ToolCall>;

    fn parse_diagnosis(&self, text: &str) -> Diagnosis;
}

const CONTINUATION_PHRASES: &[&str] = &[
    "need more information",
    "needs more information",
    "should continue",
    "further investigation is needed",
    "further investigation is required",
    "continue investigating",
];

pub struct HeuristicParser {
    numbered: Regex,
    bullet: Regex,
    call: Regex,
    tool_block: Regex,
}

impl Default for HeuristicParser {
    fn default() -> Self {
        Self {
            numbered: Regex::new(r"(?i)^\s*(?:step\s*)?\d+[.):]\s+(.+)$").expect("numbered step pattern"),
            bullet: Regex::new(r"^\s*[-*•]\s+(.+)$").expect("bullet pattern"),
            call: Regex::new(r"(?s)^\s*`?([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)`?\s*$")
                .expect("tool call pattern"),
            tool_block: Regex::new(r"(?s)```tool\s*\n?(.*?)```").expect("tool block pattern"),
        }
    }
}

fn clean_step(s: &str) -> String {
    s.trim().trim_matches('*').trim().to_string()
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// 按逗号切分参数，引号内的逗号不切；引号不成对时返回 None
///
/// 外层引号被去掉，内层引号保留；`service_name="nginx"` 形式只保留值。
pub(crate) fn split_arguments(raw: &str) -> Option<Vec<String>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(Vec::new());
    }
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut quoted = false;
    for c in raw.chars() {
        match (quote, c) {
            (None, '"' | '\'') => {
                quote = Some(c);
                quoted = true;
            }
            (Some(q), c) if c == q => quote = None,
            (None, ',') => {
                args.push(std::mem::take(&mut current));
                quoted = false;
            }
            (None, '=') if !quoted && is_identifier(current.trim()) => current.clear(),
            _ => current.push(c),
        }
    }
    if quote.is_some() {
        return None;
    }
    args.push(current);
    Some(args.into_iter().map(|a| a.trim().to_string()).collect())
}

impl HeuristicParser {
    fn parse_call_line(&self, line: &str) -> Option<ToolCall> {
        let caps = self.call.captures(line)?;
        let name = caps.get(1)?.as_str().to_string();
        let args = split_arguments(caps.get(2)?.as_str())?;
        Some(ToolCall::new(name, args))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Summary,
    RootCause,
    Remediation,
    Prevention,
}

/// 识别诊断段落标题，返回段落与同一行冒号后的内容
fn section_heading(line: &str) -> Option<(Section, String)> {
    let t = line.trim_start_matches(|c: char| {
        c == '#' || c == '*' || c.is_ascii_digit() || c == '.' || c == ')' || c.is_whitespace()
    });
    // 标题须以冒号结尾，或带 `#` / `**` 标记；以关键词开头的普通句子不算
    let marked = line.trim_start().starts_with('#') || line.trim_start().starts_with("**");
    let (head, rest) = match t.split_once(':') {
        Some((head, rest)) => (head, rest),
        None if marked => (t, ""),
        None => return None,
    };
    let head = head.trim().trim_end_matches('*').trim().to_lowercase();
    if head.is_empty() || head.len() > 40 {
        return None;
    }
    let section = if head.starts_with("root cause") {
        Section::RootCause
    } else if head.starts_with("summary")
        || head.starts_with("problem summary")
        || head.starts_with("diagnosis")
        || head.starts_with("problem diagnosis")
    {
        Section::Summary
    } else if head.starts_with("resolution")
        || head.starts_with("remediation")
        || head.starts_with("recommended")
        || head.starts_with("step-by-step resolution")
        || head.starts_with("steps to resolve")
    {
        Section::Remediation
    } else if head.starts_with("prevent") {
        Section::Prevention
    } else {
        return None;
    };
    Some((section, rest.trim().trim_start_matches('*').trim().to_string()))
}

fn strip_list_marker(line: &str) -> &str {
    let t = line.trim();
    let t = t
        .strip_prefix("- ")
        .or_else(|| t.strip_prefix("* "))
        .or_else(|| t.strip_prefix("• "))
        .unwrap_or(t);
    let digits = t.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &t[digits..];
        if let Some(r) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return r.trim();
        }
    }
    t.trim()
}

impl ResponseParser for HeuristicParser {
    fn parse_plan(&self, text: &str) -> Vec<String> {
        let numbered: Vec<String> = text
            .lines()
            .filter_map(|l| self.numbered.captures(l))
            .filter_map(|c| c.get(1).map(|m| clean_step(m.as_str())))
            .filter(|s| !s.is_empty())
            .collect();
        if !numbered.is_empty() {
            return numbered;
        }
        text.lines()
            .filter_map(|l| self.bullet.captures(l))
            .filter_map(|c| c.get(1).map(|m| clean_step(m.as_str())))
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn detects_continuation(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        CONTINUATION_PHRASES.iter().any(|p| lower.contains(p))
    }

    fn parse_tool_call(&self, text: &str, known_tools: &[String]) -> Option<ToolCall> {
        // ```tool 块优先：取第一个能解析出完整调用的块
        let mut saw_block = false;
        for caps in self.tool_block.captures_iter(text) {
            saw_block = true;
            let Some(body) = caps.get(1).map(|m| m.as_str().trim()) else {
                continue;
            };
            let Some(first) = body.lines().map(str::trim).find(|l| !l.is_empty()) else {
                continue;
            };
            if let Some(call) = self
                .parse_call_line(first)
                .or_else(|| self.parse_call_line(body))
            {
                return Some(call);
            }
        }
        if saw_block {
            return None;
        }
        // 无代码块时，只接受以已注册工具名开头的单独一行
        text.lines()
            .map(str::trim)
            .filter(|l| known_tools.iter().any(|t| l.trim_start_matches('`').starts_with(t.as_str())))
            .find_map(|l| self.parse_call_line(l))
            .filter(|c| known_tools.contains(&c.name))
    }

    fn parse_diagnosis(&self, text: &str) -> Diagnosis {
        let raw = text.trim().to_string();
        let mut summary: Vec<String> = Vec::new();
        let mut root_cause: Vec<String> = Vec::new();
        let mut remediation = Vec::new();
        let mut prevention = Vec::new();
        let mut current: Option<Section> = None;
        let mut found_any = false;

        for line in raw.lines() {
            if let Some((section, inline)) = section_heading(line) {
                current = Some(section);
                found_any = true;
                if inline.is_empty() {
                    continue;
                }
                match section {
                    Section::Summary => summary.push(inline),
                    Section::RootCause => root_cause.push(inline),
                    Section::Remediation => remediation.push(inline),
                    Section::Prevention => prevention.push(inline),
                }
                continue;
            }
            let item = strip_list_marker(line);
            if item.is_empty() {
                continue;
            }
            match current {
                Some(Section::Summary) => summary.push(item.to_string()),
                Some(Section::RootCause) => root_cause.push(item.to_string()),
                Some(Section::Remediation) => remediation.push(item.to_string()),
                Some(Section::Prevention) => prevention.push(item.to_string()),
                None => {}
            }
        }

        if !found_any {
            return Diagnosis {
                summary: raw.clone(),
                raw,
                ..Diagnosis::default()
            };
        }
        let summary = if summary.is_empty() {
            raw.split("\n\n").next().unwrap_or_default().trim().to_string()
        } else {
            summary.join(" ")
        };
        Diagnosis {
            summary,
            root_cause: (!root_cause.is_empty()).then(|| root_cause.join(" ")),
            remediation,
            prevention,
            raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Vec<String> {
        ["analyze_logs", "check_service_status", "execute_shell_command"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_parse_numbered_plan_ignores_sub_bullets() {
        let p = HeuristicParser::default();
        let plan = p.parse_plan(
            "Here is my plan:\n1. Check nginx status\n   - look at systemd\n2) **Analyze nginx logs**\n3. Verify upstream connectivity\nDone.",
        );
        assert_eq!(
            plan,
            vec![
                "Check nginx status",
                "Analyze nginx logs",
                "Verify upstream connectivity"
            ]
        );
    }

    #[test]
    fn test_parse_bullet_plan_and_empty() {
        let p = HeuristicParser::default();
        assert_eq!(p.parse_plan("- a\n- b"), vec!["a", "b"]);
        assert!(p.parse_plan("I will look around.").is_empty());
    }

    #[test]
    fn test_tool_block_with_quoted_commas() {
        let p = HeuristicParser::default();
        let call = p
            .parse_tool_call(
                "Next:\n```tool\nexecute_shell_command(\"grep -E 'a,b' /var/log/syslog\")\n```",
                &tools(),
            )
            .unwrap();
        assert_eq!(call.name, "execute_shell_command");
        assert_eq!(call.arguments, vec!["grep -E 'a,b' /var/log/syslog"]);
    }

    #[test]
    fn test_tool_block_keyword_arguments_and_empty() {
        let p = HeuristicParser::default();
        let call = p
            .parse_tool_call("```tool\nanalyze_logs(service_name='nginx')\n```", &tools())
            .unwrap();
        assert_eq!(call.arguments, vec!["nginx"]);
        let call = p
            .parse_tool_call("```tool\ncheck_system_resources()\n```", &tools())
            .unwrap();
        assert!(call.arguments.is_empty());
        let call = p
            .parse_tool_call("```tool\nexecute_shell_command(\"FOO=1 env\")\n```", &tools())
            .unwrap();
        assert_eq!(call.arguments, vec!["FOO=1 env"]);
    }

    #[test]
    fn test_malformed_call_is_no_call() {
        let p = HeuristicParser::default();
        assert!(p.parse_tool_call("```tool\nanalyze_logs(\"nginx)\n```", &tools()).is_none());
        assert!(p.parse_tool_call("```tool\nplease check the logs\n```", &tools()).is_none());
        assert!(p.parse_tool_call("No further action needed.", &tools()).is_none());
    }

    #[test]
    fn test_malformed_block_falls_through_to_next_block() {
        let p = HeuristicParser::default();
        let text = "First try:\n```tool\nanalyze_logs(\"nginx)\n```\nSorry, fixed:\n```tool\ncheck_service_status(\"nginx\")\n```";
        let call = p.parse_tool_call(text, &tools()).unwrap();
        assert_eq!(call.name, "check_service_status");
        assert_eq!(call.arguments, vec!["nginx"]);
    }

    #[test]
    fn test_bare_call_requires_known_tool() {
        let p = HeuristicParser::default();
        let call = p
            .parse_tool_call("I'll run:\ncheck_service_status(\"nginx\")", &tools())
            .unwrap();
        assert_eq!(call.name, "check_service_status");
        assert!(p.parse_tool_call("print(\"hello\")", &tools()).is_none());
    }

    #[test]
    fn test_continuation_keywords() {
        let p = HeuristicParser::default();
        assert!(p.detects_continuation("I NEED MORE INFORMATION about the upstream."));
        assert!(p.detects_continuation("We should continue with the network checks."));
        assert!(!p.detects_continuation("The root cause is clear."));
    }

    #[test]
    fn test_parse_diagnosis_sections() {
        let p = HeuristicParser::default();
        let d = p.parse_diagnosis(
            "## Summary\nnginx returns 502 because the upstream is down.\n\n**Root cause:** the app container exited (code 137).\n\nResolution steps:\n1. Restart the app container\n2. Raise its memory limit\n\nPreventive measures:\n- Alert on container restarts",
        );
        assert_eq!(d.summary, "nginx returns 502 because the upstream is down.");
        assert_eq!(
            d.root_cause.as_deref(),
            Some("the app container exited (code 137).")
        );
        assert_eq!(
            d.remediation,
            vec!["Restart the app container", "Raise its memory limit"]
        );
        assert_eq!(d.prevention, vec!["Alert on container restarts"]);
    }

    #[test]
    fn test_prose_starting_with_keyword_is_not_a_heading() {
        let p = HeuristicParser::default();
        let d = p.parse_diagnosis(
            "Summary: disk on /var is full.\nRecommended reading is the logrotate manual\nDiagnosis confirmed by df output\n\n### Remediation\n- Rotate and compress old logs",
        );
        assert_eq!(
            d.summary,
            "disk on /var is full. Recommended reading is the logrotate manual Diagnosis confirmed by df output"
        );
        assert_eq!(d.remediation, vec!["Rotate and compress old logs"]);
    }

    #[test]
    fn test_parse_diagnosis_without_headings_keeps_raw() {
        let p = HeuristicParser::default();
        let d = p.parse_diagnosis("Everything looks healthy.");
        assert_eq!(d.summary, "Everything looks healthy.");
        assert!(d.root_cause.is_none());
        assert_eq!(d.raw, "Everything looks healthy.");
    }
}
