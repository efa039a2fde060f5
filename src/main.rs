//! Container Watch Agent CLI
//!
//! 监控容器生命周期并导出 `agent.node.*` 事件

use anyhow::Result;
use clap::{Parser, Subcommand};
use container_watch_agent::export::JsonlFileExporter;
use container_watch_agent::{
    Agent, AgentConfig, DockerCliAdapter, ExporterConfig, LogOptions, RuntimeAdapter,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "cwa")]
#[command(about = "Container Watch Agent - watch container lifecycle and export node events")]
#[command(version)]
struct Cli {
    /// 配置文件 (默认: <config dir>/container-watch-agent/config.json)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行监控导出管道，直到 Ctrl+C
    Run {
        /// 容器名称模式（可重复，按顺序尝试）
        #[arg(long, short)]
        pattern: Vec<String>,
        /// 同时把消息追加到此 JSONL 文件
        #[arg(long)]
        jsonl: Option<PathBuf>,
        /// 单条消息的 exporter 超时（秒）
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// 列出正在运行的容器
    Containers {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 显示发现会选中哪个容器
    Match {
        /// 容器名称模式（可重复，按顺序尝试）
        #[arg(long, short)]
        pattern: Vec<String>,
    },
    /// 显示容器日志
    Logs {
        /// 容器名称或 ID
        container: String,
        /// 只取最后 N 行
        #[arg(long, short, default_value = "100")]
        tail: usize,
        /// 每行加时间戳
        #[arg(long)]
        timestamps: bool,
    },
    /// 显示 JSONL 文件中最近导出的消息
    History {
        /// JSONL 文件 (默认: 数据目录中的导出文件)
        #[arg(long)]
        file: Option<PathBuf>,
        /// 消息条数
        #[arg(long, short, default_value = "20")]
        limit: usize,
    },
    /// 打印生效的配置
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG 控制日志级别，如 RUST_LOG=debug cwa run
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("container_watch_agent=info,cwa=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let mut config = AgentConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            pattern,
            jsonl,
            timeout_secs,
        } => {
            if !pattern.is_empty() {
                config.watch.patterns = pattern;
            }
            if let Some(path) = jsonl {
                if config.exporters.is_empty() {
                    config.exporters.push(ExporterConfig::Log);
                }
                config.exporters.push(ExporterConfig::JsonlFile { path: Some(path) });
            }
            if let Some(secs) = timeout_secs {
                config.delivery.timeout_secs = secs;
            }
            run(&config).await?;
        }
        Commands::Containers { json } => {
            let adapter = DockerCliAdapter::new()?;
            let containers = adapter.list_resources().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&containers)?);
            } else {
                println!("Found {} running containers:\n", containers.len());
                for c in containers {
                    let names: Vec<&str> = c.names.iter().map(String::as_str).collect();
                    println!("  {} | {} | {}", short_id(&c.id), names.join(","), c.status);
                }
            }
        }
        Commands::Match { pattern } => {
            let patterns = if pattern.is_empty() { config.watch.patterns.clone() } else { pattern };
            let adapter = DockerCliAdapter::new()?;
            let containers = adapter.list_resources().await?;

            match adapter.match_resource(&containers, &patterns) {
                Ok(found) => println!("{} ({})", found.display_name(), short_id(&found.id)),
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Logs {
            container,
            tail,
            timestamps,
        } => {
            let adapter = DockerCliAdapter::new()?;
            let options = LogOptions {
                tail: Some(tail),
                timestamps,
            };
            print!("{}", adapter.fetch_logs(&container, &options).await?);
        }
        Commands::History { file, limit } => {
            let path = file.unwrap_or_else(AgentConfig::default_jsonl_path);
            let records = JsonlFileExporter::read_recent(&path, limit);
            if records.is_empty() {
                println!("No exported messages in {}", path.display());
            }
            for record in records {
                println!(
                    "{} {} {}",
                    record.message.timestamp.to_rfc3339(),
                    record.message.name,
                    record.message.body
                );
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run(config: &AgentConfig) -> Result<()> {
    config.validate()?;

    let adapter: Arc<dyn RuntimeAdapter> = Arc::new(DockerCliAdapter::new()?);
    let root = CancellationToken::new();
    let mut agent = Agent::from_config(config, adapter, &root)?;
    agent.start()?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Shutting down");
            agent.shutdown().await;
        }
        _ = agent.wait() => {
            info!(state = %agent.state(), "Watcher finished");
        }
    }

    root.cancel();
    Ok(())
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
