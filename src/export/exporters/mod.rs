//! 内置 exporter

pub mod jsonl_file;
pub mod log;
pub mod webhook;

pub use jsonl_file::{ExportRecord, JsonlFileExporter};
pub use log::LogExporter;
pub use webhook::WebhookExporter;

use super::Exporter;
use crate::config::{AgentConfig, ExporterConfig};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// 按配置创建 exporter；未配置时输出到日志
pub fn build_exporters(config: &AgentConfig) -> Result<Vec<Arc<dyn Exporter>>> {
    if config.exporters.is_empty() {
        info!(exporter = "log", "No exporters configured, using log exporter");
        return Ok(vec![Arc::new(LogExporter::new())]);
    }

    let mut exporters: Vec<Arc<dyn Exporter>> = Vec::with_capacity(config.exporters.len());
    for exporter in &config.exporters {
        let built: Arc<dyn Exporter> = match exporter {
            ExporterConfig::Log => Arc::new(LogExporter::new()),
            ExporterConfig::JsonlFile { path } => {
                let path = path.clone().unwrap_or_else(AgentConfig::default_jsonl_path);
                Arc::new(JsonlFileExporter::new(path))
            }
            ExporterConfig::Webhook { url, token } => Arc::new(WebhookExporter::new(url.clone(), token.clone())?),
        };
        exporters.push(built);
    }
    Ok(exporters)
}
