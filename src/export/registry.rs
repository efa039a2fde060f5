//! Exporter 注册表 - 每个 exporter 一个投递任务

use super::{DeliveryScope, Exporter};
use crate::config::DeliveryConfig;
use crate::model::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// 注册表订阅单元
struct ExporterHandler {
    exporter: Arc<dyn Exporter>,
    subscription: mpsc::Receiver<Message>,
}

/// Exporter 处理器注册表。
///
/// 先注册全部，再 `start` 一次。`start` 会消费注册表，
/// 投递期间处理器列表不会变化。
pub struct ExporterRegistry {
    handlers: Vec<ExporterHandler>,
    timeout: Duration,
}

impl ExporterRegistry {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self::with_timeout(config.timeout())
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            handlers: Vec::new(),
            timeout,
        }
    }

    /// 注册 exporter 及其消费的通道，不去重
    pub fn register(&mut self, exporter: Arc<dyn Exporter>, subscription: mpsc::Receiver<Message>) -> anyhow::Result<()> {
        info!(exporter = exporter.name(), "Registering exporter");
        self.handlers.push(ExporterHandler { exporter, subscription });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn exporter_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.exporter.name()).collect()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 在 `tracker` 上为每个处理器启动一个投递任务，返回任务数
    pub fn start(self, token: &CancellationToken, tracker: &TaskTracker) -> anyhow::Result<usize> {
        let count = self.handlers.len();
        for handler in self.handlers {
            tracker.spawn(message_listener(
                token.clone(),
                handler.subscription,
                handler.exporter,
                self.timeout,
            ));
        }
        info!(exporters = count, timeout_ms = self.timeout.as_millis() as u64, "Exporter registry started");
        Ok(count)
    }
}

/// 读取一个订阅通道，按顺序把消息交给 exporter。
///
/// 被取消或通道所有发送端都关闭时返回。
pub async fn message_listener(
    token: CancellationToken,
    mut subscription: mpsc::Receiver<Message>,
    exporter: Arc<dyn Exporter>,
    timeout: Duration,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!(exporter = exporter.name(), "Exiting listener");
                return;
            }
            message = subscription.recv() => message,
        };

        let Some(message) = message else {
            info!(exporter = exporter.name(), "Subscription closed, exiting listener");
            return;
        };

        if !message.is_well_formed() {
            warn!(exporter = exporter.name(), kind = ?message.kind, "Malformed message without name, skipping");
            continue;
        }

        deliver(&token, exporter.as_ref(), &message, timeout).await;
    }
}

/// 在新的投递作用域下执行一次处理。
///
/// 超过截止时间后取消作用域，但仍等待调用返回：
/// 不理会作用域的处理器只会拖住它自己的 exporter。
async fn deliver(token: &CancellationToken, exporter: &dyn Exporter, message: &Message, timeout: Duration) {
    let scope = DeliveryScope::new(token, timeout);
    let mut handle = exporter.handle_message(&scope, message);

    let result = tokio::select! {
        result = &mut handle => result,
        _ = tokio::time::sleep_until(scope.deadline()) => {
            warn!(
                exporter = exporter.name(),
                name = %message.name,
                timeout_ms = timeout.as_millis() as u64,
                "Exporter exceeded delivery timeout, waiting for it to return"
            );
            scope.cancel();
            handle.await
        }
    };
    scope.cancel();

    match result {
        Ok(()) => debug!(exporter = exporter.name(), name = %message.name, "Message exported"),
        Err(e) => warn!(exporter = exporter.name(), name = %message.name, error = %e, "Exporter failed to handle message"),
    }
}
