//! 消息模型 - watcher 发出、exporter 消费的记录
//!
//! `Message` 是不可变值。watcher 多播给多个订阅者时复制而不共享。

mod node_event;

pub use node_event::{NodeEvent, AGENT_NODE_DOWN, AGENT_NODE_RESTART, AGENT_NODE_UP};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Metric,
    Event,
}

/// watcher 产生的指标或事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    /// exporter 依赖的稳定标识，如 `agent.node.up`
    pub name: String,
    pub timestamp: DateTime<Utc>,
    /// 不透明负载
    #[serde(default)]
    pub body: Value,
}

impl Message {
    /// 创建事件消息，时间戳为当前时间
    pub fn event(name: impl Into<String>, body: Value) -> Self {
        Self {
            kind: MessageKind::Event,
            name: name.into(),
            timestamp: Utc::now(),
            body,
        }
    }

    /// 创建指标消息，时间戳为当前时间
    pub fn metric(name: impl Into<String>, body: Value) -> Self {
        Self {
            kind: MessageKind::Metric,
            name: name.into(),
            timestamp: Utc::now(),
            body,
        }
    }

    /// 创建节点生命周期事件消息
    pub fn node_event(event: NodeEvent, body: Value) -> Self {
        Self::event(event.name(), body)
    }

    /// 覆盖时间戳
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 名称非空白的消息才可投递
    pub fn is_well_formed(&self) -> bool {
        !self.name.trim().is_empty()
    }

    /// 消息携带的节点生命周期事件（如有）
    pub fn node_event_kind(&self) -> Option<NodeEvent> {
        match self.kind {
            MessageKind::Event => NodeEvent::from_name(&self.name),
            MessageKind::Metric => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            MessageKind::Metric => "metric",
            MessageKind::Event => "event",
        };
        write!(f, "{} {} @ {}", kind, self.name, self.timestamp.to_rfc3339())
    }
}
