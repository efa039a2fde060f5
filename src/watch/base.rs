//! Watcher 公共设施 - 订阅者扇出、取消作用域、任务组
//!
//! 每个订阅者有自己的转发任务和有界积压队列。`emit` 只负责入队，
//! 从不等待任何一个消费者，所以卡住的订阅者只会拖慢它自己。

use super::WatchState;
use crate::error::{WatchError, WatchResult};
use crate::model::Message;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// 每个订阅者默认的积压队列长度
pub const DEFAULT_SUBSCRIBER_BACKLOG: usize = 1024;

/// 单个订阅者的入队端
#[derive(Debug)]
struct SubscriberQueue {
    index: usize,
    queue: mpsc::Sender<Message>,
    /// 当前这段饱和期内丢弃的消息数
    dropped: u64,
}

/// 把消息复制给所有订阅者
#[derive(Debug)]
pub struct Emitter {
    watcher: String,
    subscribers: Vec<SubscriberQueue>,
    dropped_total: u64,
}

impl Emitter {
    /// 为每个订阅者在 `tracker` 上启动一个转发任务
    pub fn new(
        watcher: impl Into<String>,
        subscribers: Vec<mpsc::Sender<Message>>,
        backlog: usize,
        token: &CancellationToken,
        tracker: &TaskTracker,
    ) -> Self {
        let watcher = watcher.into();
        let subscribers = subscribers
            .into_iter()
            .enumerate()
            .map(|(index, subscriber)| {
                let (queue, pending) = mpsc::channel(backlog.max(1));
                tracker.spawn(forward(watcher.clone(), index, pending, subscriber, token.clone()));
                SubscriberQueue {
                    index,
                    queue,
                    dropped: 0,
                }
            })
            .collect();

        Self {
            watcher,
            subscribers,
            dropped_total: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// 启动以来因积压队列已满而丢弃的消息总数
    pub fn dropped(&self) -> u64 {
        self.dropped_total
    }

    /// 把 `message` 放入每个订阅者的队列，返回入队成功的数量。
    ///
    /// 不会等待。积压满了的订阅者丢弃本条消息并计数，已关闭的订阅者被移除。
    pub fn emit(&mut self, message: Message) -> usize {
        let mut delivered = 0;
        let mut closed = false;

        for subscriber in &mut self.subscribers {
            match subscriber.queue.try_send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    if subscriber.dropped > 0 {
                        info!(
                            watcher = %self.watcher,
                            subscriber = subscriber.index,
                            dropped = subscriber.dropped,
                            "Subscriber caught up"
                        );
                        subscriber.dropped = 0;
                    }
                }
                Err(TrySendError::Full(_)) => {
                    if subscriber.dropped == 0 {
                        warn!(
                            watcher = %self.watcher,
                            subscriber = subscriber.index,
                            name = %message.name,
                            "Subscriber backlog full, dropping messages"
                        );
                    }
                    subscriber.dropped += 1;
                    self.dropped_total += 1;
                }
                Err(TrySendError::Closed(_)) => closed = true,
            }
        }

        if closed {
            self.subscribers.retain(|s| !s.queue.is_closed());
            debug!(watcher = %self.watcher, remaining = self.subscribers.len(), "Dropped closed subscribers");
        }

        debug!(watcher = %self.watcher, name = %message.name, delivered, "Message emitted");
        delivered
    }
}

/// 把积压队列里的消息按顺序送进订阅者通道。
///
/// 队列关闭（watcher 结束）时排空后退出；取消时只把还能立即放下的消息送出。
async fn forward(
    watcher: String,
    index: usize,
    mut pending: mpsc::Receiver<Message>,
    subscriber: mpsc::Sender<Message>,
    token: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            message = pending.recv() => message,
        };
        let Some(message) = message else {
            return;
        };

        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            sent = subscriber.send(message) => sent,
        };
        if sent.is_err() {
            debug!(watcher = %watcher, subscriber = index, "Subscriber closed, stopping forwarder");
            return;
        }
    }

    pending.close();
    let mut flushed = 0usize;
    while let Ok(message) = pending.try_recv() {
        if subscriber.try_send(message).is_err() {
            break;
        }
        flushed += 1;
    }
    debug!(watcher = %watcher, subscriber = index, flushed, "Forwarder cancelled");
}

/// 交给运行中 watcher 任务的句柄
#[derive(Debug)]
pub struct WatchContext {
    pub token: CancellationToken,
    emitter: Emitter,
    state: Arc<watch::Sender<WatchState>>,
}

impl WatchContext {
    pub fn emit(&mut self, message: Message) -> usize {
        self.emitter.emit(message)
    }

    pub fn set_state(&self, state: WatchState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(watcher = %self.emitter.watcher, from = %previous, to = %state, "Watcher state changed");
        }
    }

    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Watcher 公共状态：启动前收集订阅者，启动后持有作用域和任务组
#[derive(Debug)]
pub struct WatcherBase {
    name: String,
    subscribers: Vec<mpsc::Sender<Message>>,
    backlog: usize,
    token: CancellationToken,
    tracker: TaskTracker,
    state: Arc<watch::Sender<WatchState>>,
    started: bool,
}

impl WatcherBase {
    /// watcher 的作用域挂在 `parent` 之下
    pub fn new(name: impl Into<String>, parent: &CancellationToken) -> Self {
        let (state, _) = watch::channel(WatchState::Created);
        Self {
            name: name.into(),
            subscribers: Vec::new(),
            backlog: DEFAULT_SUBSCRIBER_BACKLOG,
            token: parent.child_token(),
            tracker: TaskTracker::new(),
            state: Arc::new(state),
            started: false,
        }
    }

    /// 设置每个订阅者的积压队列长度
    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&mut self, subscriber: mpsc::Sender<Message>) {
        if self.started {
            warn!(watcher = %self.name, "Subscribe after start ignored");
            return;
        }
        self.subscribers.push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// 启动 watcher 任务和各订阅者的转发任务，此后订阅者归任务所有
    pub fn spawn<F, Fut>(&mut self, run: F) -> WatchResult<()>
    where
        F: FnOnce(WatchContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.started {
            return Err(WatchError::AlreadyStarted);
        }
        self.started = true;

        if self.token.is_cancelled() {
            self.state.send_replace(WatchState::Stopped);
            self.subscribers.clear();
            self.tracker.close();
            return Ok(());
        }

        let emitter = Emitter::new(
            self.name.clone(),
            std::mem::take(&mut self.subscribers),
            self.backlog,
            &self.token,
            &self.tracker,
        );
        let ctx = WatchContext {
            token: self.token.clone(),
            emitter,
            state: Arc::clone(&self.state),
        };

        info!(watcher = %self.name, subscribers = ctx.emitter.subscriber_count(), "Starting watcher");
        self.tracker.spawn(run(ctx));
        self.tracker.close();
        Ok(())
    }

    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            info!(watcher = %self.name, "Stopping watcher");
        }
        self.token.cancel();
        self.tracker.close();
        if !self.started {
            self.state.send_replace(WatchState::Stopped);
        }
    }

    /// 等待 watcher 任务和所有转发任务结束
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    pub fn state_updates(&self) -> watch::Receiver<WatchState> {
        self.state.subscribe()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeEvent, AGENT_NODE_RESTART, AGENT_NODE_UP};
    use serde_json::Value;
    use std::time::Duration;

    fn up() -> Message {
        Message::node_event(NodeEvent::Up, Value::Null)
    }

    fn restart() -> Message {
        Message::node_event(NodeEvent::Restart, Value::Null)
    }

    fn start_emitter(subscribers: Vec<mpsc::Sender<Message>>, backlog: usize) -> (Emitter, CancellationToken, TaskTracker) {
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let emitter = Emitter::new("test", subscribers, backlog, &token, &tracker);
        tracker.close();
        (emitter, token, tracker)
    }

    #[tokio::test]
    async fn test_emit_multicasts_copies() {
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        let (mut emitter, _token, _tracker) = start_emitter(vec![tx1, tx2], 8);

        assert_eq!(emitter.emit(up()), 2);
        assert_eq!(rx1.recv().await.unwrap().name, AGENT_NODE_UP);
        assert_eq!(rx2.recv().await.unwrap().name, AGENT_NODE_UP);
    }

    #[tokio::test]
    async fn test_emit_drops_closed_subscriber() {
        let (tx1, rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        drop(rx1);
        let (mut emitter, _token, _tracker) = start_emitter(vec![tx1, tx2], 8);

        // 转发任务发现订阅者已关闭后退出
        emitter.emit(up());
        assert!(rx2.recv().await.is_some());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(emitter.emit(restart()), 1);
        assert_eq!(emitter.subscriber_count(), 1);
        assert_eq!(rx2.recv().await.unwrap().name, AGENT_NODE_RESTART);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscriber_never_blocks_emit() {
        // 慢订阅者通道容量 1，且从不读取
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(256);
        let (mut emitter, _token, _tracker) = start_emitter(vec![slow_tx, fast_tx], 4);

        for i in 0..100 {
            emitter.emit(Message::metric(format!("m.{i}"), Value::from(i)));
            tokio::task::yield_now().await;
        }

        // 快订阅者收到全部消息且顺序不变
        for i in 0..100 {
            let got = tokio::time::timeout(Duration::from_secs(1), fast_rx.recv()).await.unwrap();
            assert_eq!(got.unwrap().name, format!("m.{i}"));
        }

        // 慢订阅者超出积压的部分被丢弃并计数
        assert!(emitter.dropped() > 0);
        assert_eq!(slow_rx.recv().await.unwrap().name, "m.0");
    }

    #[tokio::test]
    async fn test_forwarders_drain_when_emitter_dropped() {
        let (tx, mut rx) = mpsc::channel(8);
        let (mut emitter, _token, tracker) = start_emitter(vec![tx], 8);

        emitter.emit(up());
        emitter.emit(restart());
        drop(emitter);

        tracker.wait().await;
        assert_eq!(rx.recv().await.unwrap().name, AGENT_NODE_UP);
        assert_eq!(rx.recv().await.unwrap().name, AGENT_NODE_RESTART);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_stalled_forwarder() {
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (mut emitter, token, tracker) = start_emitter(vec![slow_tx], 8);
        emitter.emit(up());
        emitter.emit(up());
        emitter.emit(up());

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_base_start_twice_fails() {
        let root = CancellationToken::new();
        let mut base = WatcherBase::new("test", &root);

        base.spawn(|ctx| async move { ctx.set_state(WatchState::Stopped) }).unwrap();
        assert!(matches!(
            base.spawn(|_| async {}),
            Err(WatchError::AlreadyStarted)
        ));
        base.wait().await;
        assert_eq!(base.state(), WatchState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_terminal() {
        let root = CancellationToken::new();
        let mut base = WatcherBase::new("test", &root);
        base.stop();
        base.stop();

        assert_eq!(base.state(), WatchState::Stopped);
        base.spawn(|ctx| async move { ctx.set_state(WatchState::Streaming) }).unwrap();
        base.wait().await;
        assert_eq!(base.state(), WatchState::Stopped);
    }

    #[tokio::test]
    async fn test_subscribe_after_start_ignored() {
        let root = CancellationToken::new();
        let mut base = WatcherBase::new("test", &root).with_backlog(4);
        let (tx, _rx) = mpsc::channel(1);
        base.subscribe(tx.clone());
        assert_eq!(base.subscriber_count(), 1);

        base.spawn(|ctx| async move { ctx.token.cancelled().await }).unwrap();
        base.subscribe(tx);
        assert_eq!(base.subscriber_count(), 0);

        base.stop();
        base.wait().await;
    }

    #[tokio::test]
    async fn test_root_cancel_reaches_watcher_scope() {
        let root = CancellationToken::new();
        let base = WatcherBase::new("test", &root);
        root.cancel();
        assert!(base.token().is_cancelled());
    }
}
