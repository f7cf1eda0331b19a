//! 各阶段的 system 指令
//!
//! 内置默认模板，可被 config/prompts/{planning,execution,reflection,final}.txt 覆盖。
//! 模板中的 `{tools}` 会替换为工具注册表的描述。

use std::path::Path;

const PLANNING: &str = "You are an infrastructure troubleshooting assistant.
Given a problem description, create a troubleshooting plan.
Break down the steps you will take to diagnose and, if possible, resolve the issue.
Think methodically about what information you need and which tools would help.

Available tools:
{tools}

Provide your plan as numbered steps, one step per line.";

const EXECUTION: &str = "You are an infrastructure troubleshooting assistant.
Execute the troubleshooting plan one step at a time using the tools below.

Available tools:
{tools}

To use a tool, respond with exactly one block:
```tool
tool_name(\"argument\", \"argument\")
```
If no further tool is needed, answer without a tool block.";

const REFLECTION: &str = "You are an infrastructure troubleshooting assistant.
Reflect on the information gathered so far and what it tells you about the problem.
Consider:
1. What have you learned about the issue?
2. Do the results confirm the initial hypothesis or point to a different cause?
3. What information is still missing?
4. Should the troubleshooting approach change?

If you need more information, say so explicitly with the phrase \"need more information\".
Be honest about what is known, unknown and uncertain.";

const FINAL: &str = "You are an infrastructure troubleshooting assistant.
Summarize your findings and give a clear diagnosis of the problem.

Structure the answer with these headings:
Summary:
Root cause:
Resolution steps:
Preventive measures:

Be precise and technical, and list resolution steps and preventive measures as bullet points.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub planning: String,
    pub execution: String,
    pub reflection: String,
    pub final_report: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            planning: PLANNING.to_string(),
            execution: EXECUTION.to_string(),
            reflection: REFLECTION.to_string(),
            final_report: FINAL.to_string(),
        }
    }
}

impl Prompts {
    /// 依次在 config/prompts 与 ../config/prompts 中查找覆盖文件
    pub fn from_default_dirs() -> Self {
        let mut prompts = Self::default();
        for dir in ["config/prompts", "../config/prompts"] {
            let dir = Path::new(dir);
            if dir.is_dir() {
                prompts.override_from(dir);
                break;
            }
        }
        prompts
    }

    /// 目录中存在且非空的文件替换对应模板
    pub fn override_from(&mut self, dir: &Path) {
        let slots: [(&str, &mut String); 4] = [
            ("planning.txt", &mut self.planning),
            ("execution.txt", &mut self.execution),
            ("reflection.txt", &mut self.reflection),
            ("final.txt", &mut self.final_report),
        ];
        for (file, slot) in slots {
            match std::fs::read_to_string(dir.join(file)) {
                Ok(text) if !text.trim().is_empty() => {
                    tracing::debug!(file = %file, "prompt override loaded");
                    *slot = text;
                }
                _ => {}
            }
        }
    }
}

/// 替换 `{tools}` 占位符
pub fn render(template: &str, tools: &str) -> String {
    template.replace("{tools}", tools)
}
