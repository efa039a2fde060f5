//! 日志 exporter - 通过 tracing 输出消息

use crate::export::{DeliveryScope, Exporter};
use crate::model::Message;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// 日志 exporter
#[derive(Debug, Default)]
pub struct LogExporter;

impl LogExporter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Exporter for LogExporter {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle_message(&self, _scope: &DeliveryScope, message: &Message) -> Result<()> {
        info!(
            exporter = "log",
            kind = ?message.kind,
            name = %message.name,
            timestamp = %message.timestamp.to_rfc3339(),
            body = %message.body,
            "Message"
        );
        Ok(())
    }
}
