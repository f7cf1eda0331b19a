//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TROUBLESHOOTER__*` 覆盖（双下划线表示嵌套，
//! 如 `TROUBLESHOOTER__ENGINE__MAX_TOTAL_TOOL_CALLS=6`）。配置以值的形式传入各组件构造函数。

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub engine: EngineSection,
    pub tools: ToolsSection,
    pub services: ServicesSection,
}

/// [app] 段：应用名、凭据文件
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 凭据文件（YAML / TOML，键值对），启动时导出到进程环境变量
    pub credentials_file: Option<PathBuf>,
}

/// [llm] 段：后端选择、端点、超时与 Driver 重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点）/ mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 存放 API Key 的环境变量名，未设置时回退到 OPENAI_API_KEY
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_api_key_env() -> String {
    "API_KEY".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

/// [engine] 段：迭代上限
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// 连续执行多少次工具后强制进入反思
    #[serde(default = "default_max_before_reflect")]
    pub max_tool_calls_before_reflect: usize,
    /// 工具记录总数上限，到达后反思必然收尾
    #[serde(default = "default_max_total")]
    pub max_total_tool_calls: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_tool_calls_before_reflect: default_max_before_reflect(),
            max_total_tool_calls: default_max_total(),
        }
    }
}

fn default_max_before_reflect() -> usize {
    5
}

fn default_max_total() -> usize {
    10
}

/// [tools] 段：工具超时、额外的 Shell 禁止模式、日志路径、知识库
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 追加到内置禁止列表的正则
    #[serde(default)]
    pub extra_deny_patterns: Vec<String>,
    #[serde(default = "default_log_globs")]
    pub log_globs: Vec<String>,
    /// 每个日志文件读取的末尾行数
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
    pub knowledge_base: Option<PathBuf>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            extra_deny_patterns: Vec::new(),
            log_globs: default_log_globs(),
            log_tail_lines: default_log_tail_lines(),
            knowledge_base: None,
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_log_globs() -> Vec<String> {
    vec!["/var/log/syslog".into(), "/var/log/nginx/*.log".into()]
}

fn default_log_tail_lines() -> usize {
    5
}

/// [services] 段：一次性巡检的默认服务与分类规则
#[derive(Debug, Clone, Deserialize)]
pub struct ServicesSection {
    #[serde(default = "default_services")]
    pub default: Vec<String>,
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryRule>,
}

impl Default for ServicesSection {
    fn default() -> Self {
        Self {
            default: default_services(),
            categories: default_categories(),
        }
    }
}

/// 服务名包含任一关键字即归入该分类
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CategoryRule {
    pub name: String,
    pub keywords: Vec<String>,
}

fn default_services() -> Vec<String> {
    vec![
        "nginx".into(),
        "docker".into(),
        "postgresql".into(),
        "redis".into(),
        "pgbouncer".into(),
    ]
}

fn default_categories() -> Vec<CategoryRule> {
    vec![
        CategoryRule {
            name: "web_services".into(),
            keywords: vec!["nginx".into(), "httpd".into(), "apache".into()],
        },
        CategoryRule {
            name: "database_services".into(),
            keywords: vec![
                "postgres".into(),
                "pgbouncer".into(),
                "mysql".into(),
            ],
        },
        CategoryRule {
            name: "cache_services".into(),
            keywords: vec!["redis".into(), "memcached".into()],
        },
        CategoryRule {
            name: "container_services".into(),
            keywords: vec!["docker".into(), "containerd".into(), "kube".into()],
        },
    ]
}

/// 从 config 目录加载配置，环境变量 TROUBLESHOOTER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TROUBLESHOOTER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TROUBLESHOOTER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 凭据文件读取错误
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("cannot read {}: {1}", .0.display())]
    Read(PathBuf, std::io::Error),
    #[error("cannot parse {}: {1}", .0.display())]
    Parse(PathBuf, String),
}

/// 读取凭据文件（.toml 按 TOML，其余按 YAML），返回非空的标量键值对
pub fn read_credentials(path: &Path) -> Result<Vec<(String, String)>, CredentialsError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CredentialsError::Read(path.to_path_buf(), e))?;
    let parse_err = |e: String| CredentialsError::Parse(path.to_path_buf(), e);

    let mut pairs: Vec<(String, String)> = if path.extension().is_some_and(|e| e == "toml") {
        let table: toml::Table = toml::from_str(&text).map_err(|e| parse_err(e.to_string()))?;
        table
            .into_iter()
            .filter_map(|(k, v)| match v {
                toml::Value::String(s) => Some((k, s)),
                toml::Value::Integer(i) => Some((k, i.to_string())),
                toml::Value::Boolean(b) => Some((k, b.to_string())),
                _ => None,
            })
            .collect()
    } else {
        let map: std::collections::BTreeMap<String, serde_yaml::Value> =
            serde_yaml::from_str(&text).map_err(|e| parse_err(e.to_string()))?;
        map.into_iter()
            .filter_map(|(k, v)| match v {
                serde_yaml::Value::String(s) => Some((k, s)),
                serde_yaml::Value::Number(n) => Some((k, n.to_string())),
                serde_yaml::Value::Bool(b) => Some((k, b.to_string())),
                _ => None,
            })
            .collect()
    };
    pairs.retain(|(_, v)| !v.is_empty());
    pairs.sort();
    Ok(pairs)
}

/// 把凭据文件内容导出为进程环境变量（仅在启动阶段、单线程时调用）
pub fn export_credentials(path: &Path) -> Result<usize, CredentialsError> {
    let pairs = read_credentials(path)?;
    for (k, v) in &pairs {
        std::env::set_var(k, v);
    }
    tracing::info!(path = %path.display(), count = pairs.len(), "credentials exported");
    Ok(pairs.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_engine_bounds() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.max_tool_calls_before_reflect, 5);
        assert_eq!(cfg.engine.max_total_tool_calls, 10);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
        assert_eq!(cfg.llm.provider, "openai");
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[engine]\nmax_total_tool_calls = 4\n[llm]\nprovider = \"mock\"").unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.engine.max_total_tool_calls, 4);
        assert_eq!(cfg.engine.max_tool_calls_before_reflect, 5);
        assert_eq!(cfg.llm.provider, "mock");
    }

    #[test]
    fn test_read_credentials_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.yml");
        std::fs::write(&path, "API_KEY: sk-test\nAPI_BASE: http://localhost:4000\n").unwrap();

        let pairs = read_credentials(&path).unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.contains(&("API_KEY".to_string(), "sk-test".to_string())));
        assert!(pairs.contains(&("API_BASE".to_string(), "http://localhost:4000".to_string())));
    }
}
