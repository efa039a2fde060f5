//! Test doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use container_watch_agent::{
    DeliveryScope, EventFilter, EventSubscription, Exporter, LogOptions, Message, ResourceRecord, RetryConfig,
    RuntimeAdapter, RuntimeEvent, WatchError, WatchResult,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const NODE_NAME: &str = "/dapper-private-network_consensus_3_1";
pub const NODE_PATTERN: &str = "dapper-private-network_consensus_3_1";

pub fn node() -> ResourceRecord {
    ResourceRecord::new("100", [NODE_NAME]).with_status("running")
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        initial_backoff_ms: 10,
        max_backoff_ms: 100,
        backoff_multiplier: 2.0,
        max_discovery_attempts: None,
    }
}

/// Keep the producer half alive until the subscription scope ends,
/// so streams only break when a test says so.
fn hold_open(token: &CancellationToken, sender: impl Send + 'static) {
    let token = token.clone();
    tokio::spawn(async move {
        token.cancelled().await;
        drop(sender);
    });
}

/// Replays a fixed list of events on the first subscription
pub struct ScriptedAdapter {
    pub containers: Vec<ResourceRecord>,
    pub events: Vec<RuntimeEvent>,
    pub opens: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(events: Vec<RuntimeEvent>) -> Self {
        Self {
            containers: vec![node()],
            events,
            opens: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RuntimeAdapter for ScriptedAdapter {
    async fn list_resources(&self) -> WatchResult<Vec<ResourceRecord>> {
        Ok(self.containers.clone())
    }

    async fn open_event_subscription(
        &self,
        token: &CancellationToken,
        filter: &EventFilter,
    ) -> WatchResult<EventSubscription> {
        let first = self.opens.fetch_add(1, Ordering::SeqCst) == 0;
        let (sender, subscription) = EventSubscription::channel(filter.buffer.max(self.events.len()));
        if first {
            for event in &self.events {
                sender
                    .events
                    .try_send(event.clone())
                    .map_err(|e| WatchError::subscription(e.to_string()))?;
            }
        }
        hold_open(token, sender);
        Ok(subscription)
    }

    async fn fetch_logs(&self, _container: &str, _options: &LogOptions) -> WatchResult<String> {
        Ok(String::new())
    }
}

/// First subscription fails immediately on its error stream; the
/// reconnected one delivers a `restart` one second later.
pub struct BrokenStreamAdapter {
    pub opens: AtomicUsize,
}

impl BrokenStreamAdapter {
    pub fn new() -> Self {
        Self {
            opens: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RuntimeAdapter for BrokenStreamAdapter {
    async fn list_resources(&self) -> WatchResult<Vec<ResourceRecord>> {
        Ok(vec![node()])
    }

    async fn open_event_subscription(
        &self,
        token: &CancellationToken,
        filter: &EventFilter,
    ) -> WatchResult<EventSubscription> {
        let (sender, subscription) = EventSubscription::channel(filter.buffer);

        if self.opens.fetch_add(1, Ordering::SeqCst) == 0 {
            sender
                .errors
                .try_send(WatchError::stream("mock docker adapter error"))
                .map_err(|e| WatchError::subscription(e.to_string()))?;
            hold_open(token, sender);
        } else {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let _ = sender.events.send(RuntimeEvent::new("100", "restart")).await;
                token.cancelled().await;
            });
        }

        Ok(subscription)
    }

    async fn fetch_logs(&self, _container: &str, _options: &LogOptions) -> WatchResult<String> {
        Ok(String::new())
    }
}

/// Discovery finds nothing for the first `misses` listings
pub struct LateContainerAdapter {
    pub misses: usize,
    pub lists: AtomicUsize,
}

#[async_trait]
impl RuntimeAdapter for LateContainerAdapter {
    async fn list_resources(&self) -> WatchResult<Vec<ResourceRecord>> {
        let call = self.lists.fetch_add(1, Ordering::SeqCst);
        if call < self.misses {
            Ok(vec![ResourceRecord::new("1", ["/postgres"])])
        } else {
            Ok(vec![ResourceRecord::new("1", ["/postgres"]), node()])
        }
    }

    async fn open_event_subscription(
        &self,
        token: &CancellationToken,
        filter: &EventFilter,
    ) -> WatchResult<EventSubscription> {
        let (sender, subscription) = EventSubscription::channel(filter.buffer);
        hold_open(token, sender);
        Ok(subscription)
    }

    async fn fetch_logs(&self, _container: &str, _options: &LogOptions) -> WatchResult<String> {
        Ok(String::new())
    }
}

/// Refuses the first `failures` subscription attempts, then streams `start`
pub struct FlakyOpenAdapter {
    pub failures: usize,
    pub opens: AtomicUsize,
}

#[async_trait]
impl RuntimeAdapter for FlakyOpenAdapter {
    async fn list_resources(&self) -> WatchResult<Vec<ResourceRecord>> {
        Ok(vec![node()])
    }

    async fn open_event_subscription(
        &self,
        token: &CancellationToken,
        filter: &EventFilter,
    ) -> WatchResult<EventSubscription> {
        if self.opens.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(WatchError::subscription("daemon unavailable"));
        }
        let (sender, subscription) = EventSubscription::channel(filter.buffer);
        sender
            .events
            .try_send(RuntimeEvent::new("100", "start"))
            .map_err(|e| WatchError::subscription(e.to_string()))?;
        hold_open(token, sender);
        Ok(subscription)
    }

    async fn fetch_logs(&self, _container: &str, _options: &LogOptions) -> WatchResult<String> {
        Ok(String::new())
    }
}

/// Every subscription breaks before delivering anything; records when each was opened
pub struct AlwaysBrokenAdapter {
    pub opened: mpsc::UnboundedSender<tokio::time::Instant>,
}

impl AlwaysBrokenAdapter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<tokio::time::Instant>) {
        let (opened, rx) = mpsc::unbounded_channel();
        (Self { opened }, rx)
    }
}

#[async_trait]
impl RuntimeAdapter for AlwaysBrokenAdapter {
    async fn list_resources(&self) -> WatchResult<Vec<ResourceRecord>> {
        Ok(vec![node()])
    }

    async fn open_event_subscription(
        &self,
        token: &CancellationToken,
        filter: &EventFilter,
    ) -> WatchResult<EventSubscription> {
        let _ = self.opened.send(tokio::time::Instant::now());
        let (sender, subscription) = EventSubscription::channel(filter.buffer);
        sender
            .errors
            .try_send(WatchError::stream("daemon restarted"))
            .map_err(|e| WatchError::subscription(e.to_string()))?;
        hold_open(token, sender);
        Ok(subscription)
    }

    async fn fetch_logs(&self, _container: &str, _options: &LogOptions) -> WatchResult<String> {
        Ok(String::new())
    }
}

/// Never returns from a delivery and ignores its scope
pub struct HungExporter;

#[async_trait]
impl Exporter for HungExporter {
    fn name(&self) -> &str {
        "hung"
    }

    async fn handle_message(&self, _scope: &DeliveryScope, _message: &Message) -> anyhow::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Forwards every handled message to a channel
pub struct RecordingExporter {
    pub name: String,
    pub seen: mpsc::UnboundedSender<Message>,
}

impl RecordingExporter {
    pub fn new(name: &str) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (seen, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.to_string(),
                seen,
            },
            rx,
        )
    }
}

#[async_trait]
impl Exporter for RecordingExporter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle_message(&self, _scope: &DeliveryScope, message: &Message) -> anyhow::Result<()> {
        let _ = self.seen.send(message.clone());
        Ok(())
    }
}

/// Receive the next message or fail after five seconds
pub async fn next_message(rx: &mut mpsc::Receiver<Message>) -> Message {
    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(message)) => message,
        Ok(None) => panic!("subscriber channel closed"),
        Err(_) => panic!("timeout waiting for event from watch"),
    }
}
