//! Exporter 层 - watcher 消息的消费者
//!
//! # 设计
//! 1. 每个 exporter 实现 `Exporter`
//! 2. `ExporterRegistry` 为每个注册的 exporter 持有一个投递任务
//! 3. 每次 `handle_message` 调用获得一个带截止时间的 `DeliveryScope`，
//!    exporter 应主动遵守

pub mod exporters;
pub mod registry;

pub use exporters::{build_exporters, JsonlFileExporter, LogExporter, WebhookExporter};
pub use registry::{message_listener, ExporterRegistry};

use crate::model::Message;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Exporter trait
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Exporter 名称（用于日志）
    fn name(&self) -> &str;

    /// 处理并转发一条消息。
    ///
    /// 由单个投递任务顺序调用。错误由注册表记录，
    /// 不会中断投递。
    async fn handle_message(&self, scope: &DeliveryScope, message: &Message) -> anyhow::Result<()>;
}

/// 单次投递的取消作用域
#[derive(Debug, Clone)]
pub struct DeliveryScope {
    token: CancellationToken,
    deadline: Instant,
}

impl DeliveryScope {
    /// `parent` 的子作用域，`timeout` 后也会到期
    pub fn new(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            deadline: Instant::now() + timeout,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// 作用域已取消或已过截止时间
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.deadline
    }

    /// 作用域取消或到期时完成
    pub async fn done(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = tokio::time::sleep_until(self.deadline) => {}
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}
