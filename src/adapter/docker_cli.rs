//! 基于 `docker` CLI 的 Docker 适配器
//!
//! 用 `docker ps` 列出容器，从常驻的 `docker events` 子进程读取生命周期事件，
//! 用 `docker logs` 获取日志。所有输出都请求 JSON 行格式。

use super::{EventFilter, EventSender, EventSubscription, LogOptions, ResourceRecord, RuntimeAdapter, RuntimeEvent};
use crate::error::{WatchError, WatchResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Docker CLI 适配器
#[derive(Debug, Clone)]
pub struct DockerCliAdapter {
    docker: PathBuf,
}

impl DockerCliAdapter {
    /// 在 PATH 中查找 `docker`
    pub fn new() -> WatchResult<Self> {
        let docker = which::which("docker")
            .map_err(|e| WatchError::adapter(format!("docker executable not found: {}", e)))?;
        debug!(path = %docker.display(), "Using docker CLI");
        Ok(Self { docker })
    }

    /// 使用指定的 docker 可执行文件
    pub fn with_binary(docker: impl Into<PathBuf>) -> Self {
        Self {
            docker: docker.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> WatchResult<std::process::Output> {
        let output = Command::new(&self.docker)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WatchError::adapter(format!(
                "docker {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(output)
    }
}

#[async_trait]
impl RuntimeAdapter for DockerCliAdapter {
    async fn list_resources(&self) -> WatchResult<Vec<ResourceRecord>> {
        let output = self.run(&["ps", "--no-trunc", "--format", "{{json .}}"]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ps_output(&stdout)
    }

    async fn open_event_subscription(
        &self,
        token: &CancellationToken,
        filter: &EventFilter,
    ) -> WatchResult<EventSubscription> {
        let container_filter = format!("container={}", filter.container);
        let mut child = Command::new(&self.docker)
            .args([
                "events",
                "--format",
                "{{json .}}",
                "--filter",
                "type=container",
                "--filter",
                &container_filter,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WatchError::subscription(format!("failed to spawn docker events: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WatchError::subscription("docker events has no stdout"))?;

        info!(container = %filter.container, "Docker event stream opened");

        let (sender, subscription) = EventSubscription::channel(filter.buffer);
        tokio::spawn(pump_events(child, stdout, sender, token.clone()));

        Ok(subscription)
    }

    async fn fetch_logs(&self, container: &str, options: &LogOptions) -> WatchResult<String> {
        let mut args: Vec<String> = vec!["logs".to_string()];
        if let Some(tail) = options.tail {
            args.push("--tail".to_string());
            args.push(tail.to_string());
        }
        if options.timestamps {
            args.push("--timestamps".to_string());
        }
        args.push(container.to_string());

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&args).await?;

        // docker logs 把容器的 stderr 输出到自己的 stderr
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }
}

/// 转发 `docker events` 的输出行，直到取消、消费端关闭或 EOF
async fn pump_events(mut child: Child, stdout: ChildStdout, sender: EventSender, token: CancellationToken) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let event = match parse_event_line(&line) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Skipping unparsable docker event");
                        continue;
                    }
                };
                let delivered = tokio::select! {
                    _ = token.cancelled() => false,
                    sent = sender.events.send(event) => sent.is_ok(),
                };
                if !delivered {
                    break;
                }
            }
            Ok(None) => {
                let status = child.wait().await;
                let reason = match status {
                    Ok(s) => format!("docker events exited with {}", s),
                    Err(e) => format!("docker events exited: {}", e),
                };
                let _ = sender.errors.try_send(WatchError::stream(reason));
                return;
            }
            Err(e) => {
                let _ = sender.errors.try_send(WatchError::stream(format!("docker events read failed: {}", e)));
                break;
            }
        }
    }

    if let Err(e) = child.kill().await {
        debug!(error = %e, "docker events already exited");
    }
}

#[derive(Debug, Deserialize)]
struct DockerPsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Labels", default)]
    labels: String,
}

#[derive(Debug, Deserialize)]
struct DockerEventLine {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "Type", default)]
    kind: Option<String>,
    #[serde(rename = "Action", default)]
    action: Option<String>,
    #[serde(rename = "Actor", default)]
    actor: DockerActor,
}

#[derive(Debug, Default, Deserialize)]
struct DockerActor {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Attributes", default)]
    attributes: HashMap<String, String>,
}

fn parse_ps_output(output: &str) -> WatchResult<Vec<ResourceRecord>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let ps: DockerPsLine = serde_json::from_str(line)
                .map_err(|e| WatchError::adapter(format!("unexpected docker ps output: {}", e)))?;
            Ok(ps_to_record(ps))
        })
        .collect()
}

fn ps_to_record(ps: DockerPsLine) -> ResourceRecord {
    let mut attributes: HashMap<String, String> = ps
        .labels
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if !ps.image.is_empty() {
        attributes.insert("image".to_string(), ps.image);
    }

    let status = if ps.state.is_empty() { ps.status } else { ps.state };

    ResourceRecord {
        id: ps.id,
        names: ps
            .names
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .collect(),
        status,
        attributes,
    }
}

fn parse_event_line(line: &str) -> Result<RuntimeEvent, serde_json::Error> {
    let raw: DockerEventLine = serde_json::from_str(line)?;

    Ok(RuntimeEvent {
        id: raw.id.unwrap_or(raw.actor.id),
        status: raw.status.or(raw.action).unwrap_or_default(),
        kind: raw.kind.unwrap_or_else(|| "container".to_string()),
        attributes: raw.actor.attributes,
    })
}
