//! 节点生命周期词汇 - 与 exporter 共享

use serde::{Deserialize, Serialize};
use std::fmt;

pub const AGENT_NODE_UP: &str = "agent.node.up";
pub const AGENT_NODE_RESTART: &str = "agent.node.restart";
pub const AGENT_NODE_DOWN: &str = "agent.node.down";

/// 被跟踪节点的生命周期事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeEvent {
    Up,
    Restart,
    Down,
}

impl NodeEvent {
    /// 事件的线上名称
    pub fn name(&self) -> &'static str {
        match self {
            NodeEvent::Up => AGENT_NODE_UP,
            NodeEvent::Restart => AGENT_NODE_RESTART,
            NodeEvent::Down => AGENT_NODE_DOWN,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            AGENT_NODE_UP => Some(NodeEvent::Up),
            AGENT_NODE_RESTART => Some(NodeEvent::Restart),
            AGENT_NODE_DOWN => Some(NodeEvent::Down),
            _ => None,
        }
    }
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
