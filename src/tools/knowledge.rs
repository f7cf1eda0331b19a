//! 故障排查知识库：按服务分类给出诊断步骤、常见修复与提示
//!
//! 内置数据来自 config/knowledge_base.toml，可由 tools.knowledge_base 指向的同格式文件替换。
//! 未知分类返回固定形状的回退记录（列出可用分类），而不是错误。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::ToolError;
use crate::tools::registry::expect_args;
use crate::tools::Tool;

const BUILTIN: &str = include_str!("../../config/knowledge_base.toml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroubleshootingStep {
    pub name: String,
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guidance {
    #[serde(default)]
    pub steps: Vec<TroubleshootingStep>,
    #[serde(default)]
    pub common_fixes: Vec<String>,
    #[serde(default)]
    pub other_tips: Vec<String>,
}

impl Guidance {
    pub fn render(&self) -> String {
        let mut out = String::from("Diagnostic steps:");
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("\n{}. {}", i + 1, step.name));
            for cmd in &step.commands {
                out.push_str(&format!("\n   $ {cmd}"));
            }
        }
        if !self.common_fixes.is_empty() {
            out.push_str("\nCommon fixes:");
            for f in &self.common_fixes {
                out.push_str(&format!("\n- {f}"));
            }
        }
        if !self.other_tips.is_empty() {
            out.push_str("\nTips:");
            for t in &self.other_tips {
                out.push_str(&format!("\n- {t}"));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KnowledgeBase {
    #[serde(default)]
    categories: BTreeMap<String, Guidance>,
}

impl KnowledgeBase {
    /// 分类名在加载时统一为去空白小写，查找时同样处理
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        let parsed: Self = toml::from_str(text)?;
        let categories = parsed
            .categories
            .into_iter()
            .map(|(name, guidance)| (name.trim().to_lowercase(), guidance))
            .collect();
        Ok(Self { categories })
    }

    pub fn builtin() -> Self {
        Self::from_toml(BUILTIN).expect("built-in knowledge base")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read knowledge base {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parse knowledge base {}", path.display()))
    }

    pub fn categories(&self) -> Vec<&str> {
        self.categories.keys().map(String::as_str).collect()
    }

    /// 查找分类（大小写与首尾空白不敏感）；未知分类返回回退记录
    pub fn lookup(&self, category: &str) -> Guidance {
        let key = category.trim().to_lowercase();
        if let Some(g) = self.categories.get(&key) {
            return g.clone();
        }
        let available = self.categories().join(", ");
        Guidance {
            steps: vec![TroubleshootingStep {
                name: format!("Category '{}' not found in troubleshooting database", category.trim()),
                commands: vec![format!("echo 'Available categories: {available}'")],
            }],
            common_fixes: vec!["Verify that the category name is correct".to_string()],
            other_tips: vec![format!("Available categories: {available}")],
        }
    }

    pub fn contains(&self, category: &str) -> bool {
        self.categories.contains_key(&category.trim().to_lowercase())
    }
}

pub struct TroubleshootingTool {
    kb: Arc<KnowledgeBase>,
}

impl TroubleshootingTool {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

#[async_trait]
impl Tool for TroubleshootingTool {
    fn name(&self) -> &str {
        "get_troubleshooting_steps"
    }

    fn description(&self) -> &str {
        "Look up diagnostic steps and common fixes for a service category"
    }

    fn usage(&self) -> String {
        format!(
            "get_troubleshooting_steps(category) where category is one of: {}",
            self.kb.categories().join(", ")
        )
    }

    async fn execute(&self, args: &[String]) -> Result<String, ToolError> {
        let args = expect_args(self.name(), args, 1, 1)?;
        Ok(self.kb.lookup(&args[0]).render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_has_categories() {
        let kb = KnowledgeBase::builtin();
        assert!(kb.contains("web_services"));
        assert!(kb.contains("Database_Services "));
        let g = kb.lookup("container_services");
        assert!(!g.steps.is_empty());
        assert!(!g.common_fixes.is_empty());
    }

    #[test]
    fn test_unknown_category_fallback() {
        let kb = KnowledgeBase::builtin();
        let g = kb.lookup("foo_services");
        assert_eq!(g.steps.len(), 1);
        assert_eq!(
            g.steps[0].name,
            "Category 'foo_services' not found in troubleshooting database"
        );
        assert!(g.steps[0].commands[0].contains("web_services"));
        assert_eq!(g.common_fixes, vec!["Verify that the category name is correct"]);
        assert!(g.other_tips[0].starts_with("Available categories: "));
    }

    #[test]
    fn test_custom_file() {
        let kb = KnowledgeBase::from_toml(
            "[categories.payment]\ncommon_fixes = [\"restart\"]\n[[categories.payment.steps]]\nname = \"pods\"\ncommands = [\"kubectl get pods\"]\n",
        )
        .unwrap();
        assert_eq!(kb.categories(), vec!["payment"]);
        assert!(kb.lookup("payment").render().contains("$ kubectl get pods"));
    }

    #[test]
    fn test_mixed_case_category_names_are_found() {
        let kb = KnowledgeBase::from_toml(
            "[categories.Payment]\ncommon_fixes = [\"restart the payment pods\"]\n",
        )
        .unwrap();
        assert_eq!(kb.categories(), vec!["payment"]);
        assert!(kb.contains("Payment"));
        assert!(kb.contains("payment"));
        assert_eq!(kb.lookup("PAYMENT").common_fixes, vec!["restart the payment pods"]);
    }
}
