//! Troubleshooter - 交互式运维排障助手
//!
//! 入口：初始化日志、加载配置与凭据，然后进入交互会话或执行一次性命令。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use troubleshooter::config::{export_credentials, load_config};
use troubleshooter::core::{AgentBuilder, SessionSupervisor};
use troubleshooter::driver::SessionDriver;
use troubleshooter::gate::ConsoleGate;
use troubleshooter::tools::LogTool;

#[derive(Parser)]
#[command(name = "troubleshooter", version, about = "Interactive infrastructure troubleshooting assistant")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive troubleshooting session (default)
    Chat {
        /// First problem to diagnose
        #[arg(long)]
        problem: Option<String>,
    },
    /// One-shot health check of services and system resources
    Check {
        /// Comma-separated services; defaults to [services].default
        #[arg(long, value_delimiter = ',')]
        services: Vec<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print troubleshooting guidance for a service category
    Steps {
        /// e.g. web_services; omit to list categories
        category: Option<String>,
    },
    /// Scan recent log lines for errors and warnings
    Logs {
        /// Service name or glob; defaults to the configured log globs
        target: Option<String>,
        #[arg(long)]
        errors_only: bool,
    },
}

fn main() -> anyhow::Result<()> {
    // 日志写 stderr，默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config).context("Failed to load configuration")?;
    // 凭据写入环境变量须在运行时的工作线程启动之前完成
    if let Some(path) = &config.app.credentials_file {
        export_credentials(path).context("Failed to load credentials")?;
    }
    let builder = AgentBuilder::new(config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    match cli.command.unwrap_or(Command::Chat { problem: None }) {
        Command::Chat { problem } => runtime.block_on(run_chat(builder, problem)),
        Command::Check { services, json } => runtime.block_on(run_check(builder, services, json)),
        Command::Steps { category } => run_steps(&builder, category),
        Command::Logs { target, errors_only } => {
            runtime.block_on(run_logs(&builder, target, errors_only))
        }
    }
}

async fn run_chat(builder: AgentBuilder, problem: Option<String>) -> anyhow::Result<()> {
    let components = builder
        .with_events(true)
        .build()
        .context("Failed to build agent")?;

    let supervisor = Arc::new(SessionSupervisor::new());
    let interrupt = Arc::clone(&supervisor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let console = Arc::new(ConsoleGate::new());
    let mut driver = SessionDriver::new(
        components.engine,
        console.clone(),
        components.recovery,
        supervisor.cancel_token(),
    );
    if let Some(rx) = components.events {
        driver = driver.with_event_output(rx);
    }
    driver.interactive(&console, problem).await
}

async fn run_check(builder: AgentBuilder, services: Vec<String>, json: bool) -> anyhow::Result<()> {
    let services = if services.is_empty() {
        builder.config().services.default.clone()
    } else {
        services
    };
    let components = builder.build().context("Failed to build agent")?;
    let knowledge = components.knowledge;

    tracing::info!(count = services.len(), "running service check");
    let report = components.reporter.build_report(&services).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("{}", report.render());
    for category in report.failing_categories() {
        if !knowledge.contains(category) {
            continue;
        }
        println!(
            "\n=== Troubleshooting guidance: {category} ===\n{}",
            knowledge.lookup(category).render()
        );
    }
    Ok(())
}

fn run_steps(builder: &AgentBuilder, category: Option<String>) -> anyhow::Result<()> {
    let knowledge = builder.build_knowledge_base()?;
    match category {
        Some(category) => println!("{}", knowledge.lookup(&category).render()),
        None => {
            println!("Available categories:");
            for name in knowledge.categories() {
                println!("  - {name}");
            }
        }
    }
    Ok(())
}

async fn run_logs(
    builder: &AgentBuilder,
    target: Option<String>,
    errors_only: bool,
) -> anyhow::Result<()> {
    let tools = &builder.config().tools;
    let scanner = LogTool::new(tools.log_globs.clone(), "/var/log", tools.log_tail_lines);
    let (files, findings) = scanner.scan(target.as_deref(), errors_only).await;
    if files == 0 {
        println!("No log files matched.");
    } else if findings.is_empty() {
        println!("Scanned {files} log file(s): no errors or warnings found.");
    } else {
        println!("Scanned {files} log file(s):");
        for finding in &findings {
            println!("{}", finding.render());
        }
    }
    Ok(())
}
