//! 容器生命周期 watcher
//!
//! 按名称模式发现一个容器，把它的运行时事件转换为
//! `agent.node.{up,restart,down}`。事件流断开时原地重新打开
//! （不重新发现），并发出新的 `agent.node.up`。

use super::{Backoff, WatchContext, WatchState, Watcher, WatcherBase};
use crate::adapter::{EventFilter, EventSubscription, ResourceRecord, RuntimeAdapter, RuntimeEvent};
use crate::config::{AgentConfig, ContainerWatchConfig, RetryConfig};
use crate::error::{WatchError, WatchResult};
use crate::model::{Message, NodeEvent};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 把运行时事件映射为节点事件。
///
/// 退出码为 0 的 `die` 是正常关闭，不产生事件；
/// 没有可读退出码的 `die` 视为失败。
pub fn translate(event: &RuntimeEvent) -> Option<NodeEvent> {
    match event.status.as_str() {
        "start" => Some(NodeEvent::Up),
        "restart" => Some(NodeEvent::Restart),
        "die" => match event.exit_code() {
            Some(0) => None,
            _ => Some(NodeEvent::Down),
        },
        _ => None,
    }
}

/// 容器生命周期 watcher
pub struct ContainerWatch {
    config: ContainerWatchConfig,
    retry: RetryConfig,
    adapter: Arc<dyn RuntimeAdapter>,
    base: WatcherBase,
}

impl ContainerWatch {
    pub fn new(
        config: ContainerWatchConfig,
        retry: RetryConfig,
        adapter: Arc<dyn RuntimeAdapter>,
        parent: &CancellationToken,
    ) -> Self {
        let base = WatcherBase::new("container", parent).with_backlog(config.subscriber_backlog);
        Self {
            config,
            retry,
            adapter,
            base,
        }
    }

    pub fn from_config(config: &AgentConfig, adapter: Arc<dyn RuntimeAdapter>, parent: &CancellationToken) -> Self {
        Self::new(config.watch.clone(), config.retry.clone(), adapter, parent)
    }

    pub fn patterns(&self) -> &[String] {
        &self.config.patterns
    }
}

#[async_trait]
impl Watcher for ContainerWatch {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn subscribe(&mut self, subscriber: mpsc::Sender<Message>) {
        self.base.subscribe(subscriber);
    }

    fn start(&mut self) -> WatchResult<()> {
        let runner = ContainerRunner {
            config: self.config.clone(),
            retry: self.retry.clone(),
            adapter: Arc::clone(&self.adapter),
        };
        self.base.spawn(move |ctx| runner.run(ctx))
    }

    fn stop(&self) {
        self.base.stop();
    }

    async fn wait(&self) {
        self.base.wait().await;
    }

    fn state(&self) -> WatchState {
        self.base.state()
    }

    fn state_updates(&self) -> watch::Receiver<WatchState> {
        self.base.state_updates()
    }
}

/// 已打开的订阅，drop 时取消其作用域
struct ActiveSubscription {
    events: mpsc::Receiver<RuntimeEvent>,
    errors: mpsc::Receiver<WatchError>,
    errors_open: bool,
    received: u64,
    token: CancellationToken,
}

impl ActiveSubscription {
    fn new(subscription: EventSubscription, token: CancellationToken) -> Self {
        Self {
            events: subscription.events,
            errors: subscription.errors,
            errors_open: true,
            received: 0,
            token,
        }
    }
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

enum Step {
    Cancelled,
    Event(RuntimeEvent),
    Broken(String),
    ErrorsClosed,
}

/// watcher 任务持有的状态
struct ContainerRunner {
    config: ContainerWatchConfig,
    retry: RetryConfig,
    adapter: Arc<dyn RuntimeAdapter>,
}

impl ContainerRunner {
    async fn run(self, mut ctx: WatchContext) {
        ctx.set_state(WatchState::Discovering);

        if let Some(resource) = self.discover(&ctx).await {
            self.emit(&mut ctx, NodeEvent::Up, &resource, "discovered", None);
            ctx.set_state(WatchState::Streaming);
            self.stream(&mut ctx, &resource).await;
        }

        ctx.set_state(WatchState::Stopped);
        info!("Container watcher stopped");
    }

    async fn discover(&self, ctx: &WatchContext) -> Option<ResourceRecord> {
        let mut backoff = Backoff::new(&self.retry);

        loop {
            let listed = tokio::select! {
                biased;
                _ = ctx.token.cancelled() => return None,
                listed = self.adapter.list_resources() => listed,
            };
            let matched = listed.and_then(|resources| self.adapter.match_resource(&resources, &self.config.patterns));

            match matched {
                Ok(resource) => {
                    info!(container = %resource.display_name(), id = %resource.id, "Container discovered");
                    return Some(resource);
                }
                Err(e @ WatchError::InvalidPattern { .. }) => {
                    error!(error = %e, "Discovery aborted");
                    return None;
                }
                Err(e) => {
                    let failures = backoff.attempts() + 1;
                    if let Some(max) = self.retry.max_discovery_attempts {
                        if failures >= max {
                            error!(attempts = failures, error = %e, "Discovery failed, giving up");
                            return None;
                        }
                    }
                    warn!(
                        patterns = ?self.config.patterns,
                        attempt = failures,
                        delay_ms = backoff.delay_for_attempt(backoff.attempts()).as_millis() as u64,
                        error = %e,
                        "Discovery failed, retrying"
                    );
                    if !backoff.wait(&ctx.token).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn stream(&self, ctx: &mut WatchContext, resource: &ResourceRecord) {
        let filter = EventFilter::for_resource(resource, self.config.event_buffer);
        let mut backoff = Backoff::new(&self.retry);

        let Some(mut sub) = self.open(ctx, &filter, &mut backoff).await else {
            return;
        };

        loop {
            let step = tokio::select! {
                biased;
                _ = ctx.token.cancelled() => Step::Cancelled,
                event = sub.events.recv() => match event {
                    Some(event) => Step::Event(event),
                    None => Step::Broken("event stream closed".to_string()),
                },
                error = sub.errors.recv(), if sub.errors_open => match error {
                    Some(e) => Step::Broken(e.to_string()),
                    None => Step::ErrorsClosed,
                },
            };

            match step {
                Step::Cancelled => return,
                Step::ErrorsClosed => sub.errors_open = false,
                Step::Event(event) => {
                    sub.received += 1;
                    self.handle_event(ctx, resource, event);
                }
                Step::Broken(reason) => {
                    ctx.set_state(WatchState::Repairing);
                    warn!(container = %filter.container, reason = %reason, "Event stream broken, repairing");

                    // 从未收到事件的流按退避重试
                    if sub.received > 0 {
                        backoff.reset();
                    } else if !backoff.wait(&ctx.token).await {
                        return;
                    }
                    drop(sub);

                    sub = match self.open(ctx, &filter, &mut backoff).await {
                        Some(sub) => sub,
                        None => return,
                    };
                    self.emit(ctx, NodeEvent::Up, resource, "repaired", None);
                    ctx.set_state(WatchState::Streaming);
                }
            }
        }
    }

    /// 打开订阅，按退避重试直到成功或 watcher 被取消
    async fn open(&self, ctx: &WatchContext, filter: &EventFilter, backoff: &mut Backoff) -> Option<ActiveSubscription> {
        loop {
            let token = ctx.token.child_token();
            let opened = tokio::select! {
                biased;
                _ = ctx.token.cancelled() => return None,
                opened = self.adapter.open_event_subscription(&token, filter) => opened,
            };

            match opened {
                Ok(subscription) => {
                    debug!(container = %filter.container, "Event subscription opened");
                    return Some(ActiveSubscription::new(subscription, token));
                }
                Err(e) => {
                    token.cancel();
                    warn!(
                        container = %filter.container,
                        attempt = backoff.attempts() + 1,
                        delay_ms = backoff.delay_for_attempt(backoff.attempts()).as_millis() as u64,
                        error = %e,
                        "Failed to open event subscription, retrying"
                    );
                    if !backoff.wait(&ctx.token).await {
                        return None;
                    }
                }
            }
        }
    }

    fn handle_event(&self, ctx: &mut WatchContext, resource: &ResourceRecord, event: RuntimeEvent) {
        match translate(&event) {
            Some(node_event) => self.emit(ctx, node_event, resource, "event", Some(&event)),
            None => debug!(
                container = %resource.display_name(),
                status = %event.status,
                exit_code = ?event.exit_code(),
                "Ignoring container event"
            ),
        }
    }

    fn emit(
        &self,
        ctx: &mut WatchContext,
        event: NodeEvent,
        resource: &ResourceRecord,
        reason: &str,
        source: Option<&RuntimeEvent>,
    ) {
        info!(container = %resource.display_name(), event = %event, reason, "Node lifecycle event");
        ctx.emit(Message::node_event(event, node_body(resource, reason, source)));
    }
}

fn node_body(resource: &ResourceRecord, reason: &str, source: Option<&RuntimeEvent>) -> Value {
    let mut body = json!({
        "container": resource.display_name(),
        "container_id": resource.id,
        "reason": reason,
    });
    if let Some(event) = source {
        body["status"] = json!(event.status);
        if let Some(code) = event.exit_code() {
            body["exit_code"] = json!(code);
        }
    }
    body
}
