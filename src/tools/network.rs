//! 网络连通性：DNS 解析 + 带超时的 TCP 连接

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::{lookup_host, TcpStream};

use crate::core::ToolError;
use crate::tools::registry::expect_args;
use crate::tools::Tool;

const DEFAULT_PORT: u16 = 80;

pub struct NetworkTool {
    connect_timeout: Duration,
}

impl NetworkTool {
    pub fn new(connect_timeout_secs: u64) -> Self {
        Self {
            connect_timeout: Duration::from_secs(connect_timeout_secs.max(1)),
        }
    }
}

/// 解析 "host"、"host:port" 与单独的端口参数
fn split_target(host: &str, port: Option<&str>) -> Result<(String, u16), ToolError> {
    let host = host.trim();
    let (host, inline_port) = match host.rsplit_once(':') {
        Some((h, p)) if !h.contains(':') && p.chars().all(|c| c.is_ascii_digit()) => (h, Some(p)),
        _ => (host, None),
    };
    let port = match port.map(str::trim).or(inline_port) {
        None | Some("") => DEFAULT_PORT,
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| ToolError::InvalidArguments(format!("invalid port: {p}")))?,
    };
    Ok((host.to_string(), port))
}

#[async_trait]
impl Tool for NetworkTool {
    fn name(&self) -> &str {
        "check_network_connectivity"
    }

    fn description(&self) -> &str {
        "Resolve a host and try a TCP connection to it (port defaults to 80)"
    }

    fn usage(&self) -> String {
        "check_network_connectivity(host, port)".to_string()
    }

    async fn execute(&self, args: &[String]) -> Result<String, ToolError> {
        let args = expect_args(self.name(), args, 1, 2)?;
        let (host, port) = split_target(&args[0], args.get(1).map(String::as_str))?;

        let addrs: Vec<_> = match tokio::time::timeout(
            self.connect_timeout,
            lookup_host((host.as_str(), port)),
        )
        .await
        {
            Ok(Ok(a)) => a.collect(),
            Ok(Err(e)) => return Ok(format!("DNS resolution failed for {host}: {e}")),
            Err(_) => return Ok(format!("DNS resolution for {host} timed out")),
        };
        let Some(addr) = addrs.first().copied() else {
            return Ok(format!("DNS resolution for {host} returned no addresses"));
        };

        let start = Instant::now();
        let verdict = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(_)) => format!(
                "TCP connect to {addr} succeeded in {} ms",
                start.elapsed().as_millis()
            ),
            Ok(Err(e)) => format!("TCP connect to {addr} failed: {e}"),
            Err(_) => format!(
                "TCP connect to {addr} timed out after {}s",
                self.connect_timeout.as_secs()
            ),
        };
        Ok(format!(
            "Connectivity check {host}:{port}\nResolved: {}\n{verdict}",
            addrs
                .iter()
                .map(|a| a.ip().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_target() {
        assert_eq!(split_target("db.internal", None).unwrap(), ("db.internal".into(), 80));
        assert_eq!(split_target("db.internal:5432", None).unwrap(), ("db.internal".into(), 5432));
        assert_eq!(split_target("10.0.0.5", Some("443")).unwrap(), ("10.0.0.5".into(), 443));
        assert!(split_target("10.0.0.5", Some("http")).is_err());
    }

    #[tokio::test]
    async fn test_connects_to_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let tool = NetworkTool::new(2);
        let out = tool
            .execute(&["127.0.0.1".to_string(), port.to_string()])
            .await
            .unwrap();
        assert!(out.contains("succeeded"), "{out}");
    }
}
