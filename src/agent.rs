//! Agent 组装 - 把容器 watcher 接到 exporter 注册表

use crate::adapter::RuntimeAdapter;
use crate::config::AgentConfig;
use crate::export::{build_exporters, Exporter, ExporterRegistry};
use crate::watch::{ContainerWatch, WatchState, Watcher};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// 监控与导出管道
pub struct Agent {
    watcher: ContainerWatch,
    registry: Option<ExporterRegistry>,
    token: CancellationToken,
    exporters: TaskTracker,
    drain_timeout: Duration,
}

impl Agent {
    /// 用给定的 exporter 构建管道，每个 exporter 一个通道
    pub fn new(
        config: &AgentConfig,
        adapter: Arc<dyn RuntimeAdapter>,
        exporters: Vec<Arc<dyn Exporter>>,
        root: &CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let token = root.child_token();
        let mut watcher = ContainerWatch::from_config(config, adapter, &token);
        let mut registry = ExporterRegistry::new(&config.delivery);

        for exporter in exporters {
            let (tx, rx) = mpsc::channel(config.delivery.channel_capacity);
            watcher.subscribe(tx);
            registry.register(exporter, rx)?;
        }

        Ok(Self {
            watcher,
            registry: Some(registry),
            token,
            exporters: TaskTracker::new(),
            drain_timeout: config.delivery.timeout(),
        })
    }

    /// 用配置中的 exporter 构建管道
    pub fn from_config(config: &AgentConfig, adapter: Arc<dyn RuntimeAdapter>, root: &CancellationToken) -> Result<Self> {
        let exporters = build_exporters(config)?;
        Self::new(config, adapter, exporters, root)
    }

    /// 先启动投递任务，再启动 watcher
    pub fn start(&mut self) -> Result<()> {
        let registry = self
            .registry
            .take()
            .ok_or_else(|| anyhow!("agent already started"))?;

        let names: Vec<String> = registry.exporter_names().iter().map(|n| n.to_string()).collect();
        registry.start(&self.token, &self.exporters)?;
        self.exporters.close();

        self.watcher.start()?;
        info!(exporters = ?names, patterns = ?self.watcher.patterns(), "Agent started");
        Ok(())
    }

    pub fn watcher(&self) -> &ContainerWatch {
        &self.watcher
    }

    pub fn state(&self) -> WatchState {
        self.watcher.state()
    }

    /// 立即取消全部任务
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// 等待 watcher 和所有投递任务结束
    pub async fn wait(&self) {
        self.watcher.wait().await;
        self.exporters.wait().await;
    }

    /// 停止 watcher，让 exporter 处理完已发出的消息，然后取消。
    ///
    /// 每个阶段最多等待一个投递超时；不理会取消的 exporter 任务会被留下。
    pub async fn shutdown(&self) {
        self.watcher.stop();
        self.watcher.wait().await;
        self.exporters.close();

        let timeout_ms = self.drain_timeout.as_millis() as u64;
        if tokio::time::timeout(self.drain_timeout, self.exporters.wait()).await.is_err() {
            warn!(timeout_ms, "Exporters did not drain in time, cancelling");
            self.token.cancel();

            if tokio::time::timeout(self.drain_timeout, self.exporters.wait()).await.is_err() {
                warn!(
                    timeout_ms,
                    remaining = self.exporters.len(),
                    "Exporters ignored cancellation, leaving them behind"
                );
            }
        }
        self.token.cancel();
        info!("Agent stopped");
    }
}
