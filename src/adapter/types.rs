//! 适配器数据类型

use crate::error::WatchError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc;

/// `die` 事件中携带退出码的属性
pub const EXIT_CODE_ATTRIBUTE: &str = "exitCode";

/// 运行时报告的容器快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    pub names: BTreeSet<String>,
    pub status: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl ResourceRecord {
    pub fn new<I, S>(id: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            names: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// 去掉前导 `/` 的第一个名称，没有则用 id
    pub fn display_name(&self) -> &str {
        self.names
            .iter()
            .next()
            .map(|n| n.strip_prefix('/').unwrap_or(n))
            .unwrap_or(&self.id)
    }
}

/// 运行时报告的生命周期事件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEvent {
    pub id: String,
    /// 运行时动作，如 `start`、`restart`、`die`
    pub status: String,
    /// 对象类型，如 `container`
    pub kind: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl RuntimeEvent {
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            kind: "container".to_string(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_exit_code(self, code: i64) -> Self {
        self.with_attribute(EXIT_CODE_ATTRIBUTE, code.to_string())
    }

    /// 解析出的退出码（存在且为数字时）
    pub fn exit_code(&self) -> Option<i64> {
        self.attributes
            .get(EXIT_CODE_ATTRIBUTE)
            .and_then(|v| v.trim().parse().ok())
    }
}

/// 事件订阅的范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// 容器名称或 ID
    pub container: String,
    /// 向适配器请求的通道容量
    pub buffer: usize,
}

impl EventFilter {
    pub fn for_resource(resource: &ResourceRecord, buffer: usize) -> Self {
        Self {
            container: resource.display_name().to_string(),
            buffer,
        }
    }
}

/// 活动订阅：事件流和独立的错误流
#[derive(Debug)]
pub struct EventSubscription {
    pub events: mpsc::Receiver<RuntimeEvent>,
    pub errors: mpsc::Receiver<WatchError>,
}

/// `EventSubscription` 的发送端
#[derive(Debug, Clone)]
pub struct EventSender {
    pub events: mpsc::Sender<RuntimeEvent>,
    pub errors: mpsc::Sender<WatchError>,
}

impl EventSubscription {
    /// 创建相连的发送端/订阅对
    pub fn channel(buffer: usize) -> (EventSender, EventSubscription) {
        let (event_tx, event_rx) = mpsc::channel(buffer.max(1));
        let (error_tx, error_rx) = mpsc::channel(1);
        (
            EventSender {
                events: event_tx,
                errors: error_tx,
            },
            EventSubscription {
                events: event_rx,
                errors: error_rx,
            },
        )
    }
}

/// 日志获取选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// 只取最后 N 行
    pub tail: Option<usize>,
    pub timestamps: bool,
}
