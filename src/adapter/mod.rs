//! 容器运行时适配器
//!
//! watcher 只通过 `RuntimeAdapter` 与运行时交互：列出容器、
//! 按模式选择、订阅生命周期事件、获取日志。

mod types;

pub mod docker_cli;

pub use docker_cli::DockerCliAdapter;
pub use types::*;

use crate::error::{WatchError, WatchResult};
use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;

/// 容器运行时适配器 trait
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// 列出正在运行的容器
    async fn list_resources(&self) -> WatchResult<Vec<ResourceRecord>>;

    /// 按顺序尝试模式，返回第一个匹配的容器
    fn match_resource(
        &self,
        resources: &[ResourceRecord],
        patterns: &[String],
    ) -> WatchResult<ResourceRecord> {
        match_first(resources, patterns)
    }

    /// 打开生命周期事件订阅。
    ///
    /// 可重复调用，每次返回新的流。
    /// `token` 取消时流结束。
    async fn open_event_subscription(
        &self,
        token: &CancellationToken,
        filter: &EventFilter,
    ) -> WatchResult<EventSubscription>;

    /// 获取容器最近的日志
    async fn fetch_logs(&self, container: &str, options: &LogOptions) -> WatchResult<String>;
}

/// 适配器共用的模式匹配。
///
/// 按给定顺序，第一个匹配到任意容器名的模式胜出。
/// 忽略运行时名称的前导 `/`。
pub fn match_first(resources: &[ResourceRecord], patterns: &[String]) -> WatchResult<ResourceRecord> {
    for pattern in patterns {
        let re = Regex::new(pattern).map_err(|source| WatchError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;

        let found = resources
            .iter()
            .find(|r| r.names.iter().any(|name| re.is_match(trim_name(name))));

        if let Some(resource) = found {
            return Ok(resource.clone());
        }
    }

    Err(WatchError::NotFound {
        patterns: patterns.to_vec(),
    })
}

fn trim_name(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}
