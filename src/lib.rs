//! Container Watch Agent - 监控容器生命周期并把事件分发给 exporter

pub mod adapter;
pub mod agent;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod watch;

pub use adapter::{DockerCliAdapter, EventFilter, EventSubscription, LogOptions, ResourceRecord, RuntimeAdapter, RuntimeEvent};
pub use agent::Agent;
pub use config::{AgentConfig, ContainerWatchConfig, DeliveryConfig, ExporterConfig, RetryConfig};
pub use error::{WatchError, WatchResult};
pub use export::{DeliveryScope, Exporter, ExporterRegistry};
pub use model::{Message, MessageKind, NodeEvent, AGENT_NODE_DOWN, AGENT_NODE_RESTART, AGENT_NODE_UP};
pub use watch::{ContainerWatch, WatchState, Watcher};
