//! Watcher - 观察外部资源的长期任务
//!
//! 所有 watcher 遵循同一约定：
//! 1. `start` 之前 `subscribe` 一个或多个通道（没有重放）
//! 2. `start` 启动 watcher 任务
//! 3. 每条 `Message` 复制给所有订阅者
//! 4. `stop` 取消 watcher 自己的作用域，`wait` 等待任务结束

mod backoff;
mod base;
pub mod container;

pub use backoff::Backoff;
pub use base::{Emitter, WatchContext, WatcherBase, DEFAULT_SUBSCRIBER_BACKLOG};
pub use container::{translate, ContainerWatch};

use crate::error::WatchResult;
use crate::model::Message;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tokio::sync::{mpsc, watch};

/// Watcher 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    Created,
    Discovering,
    Streaming,
    Repairing,
    /// 终态
    Stopped,
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WatchState::Created => "created",
            WatchState::Discovering => "discovering",
            WatchState::Streaming => "streaming",
            WatchState::Repairing => "repairing",
            WatchState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Watcher trait
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Watcher 名称（用于日志）
    fn name(&self) -> &str;

    /// 注册订阅通道，仅在 `start` 之前有效
    fn subscribe(&mut self, subscriber: mpsc::Sender<Message>);

    /// 启动 watcher 任务
    fn start(&mut self) -> WatchResult<()>;

    /// 取消 watcher，可重复调用
    fn stop(&self);

    /// 等待 watcher 任务结束
    async fn wait(&self);

    /// 当前状态
    fn state(&self) -> WatchState;

    /// 订阅状态变化
    fn state_updates(&self) -> watch::Receiver<WatchState>;
}
