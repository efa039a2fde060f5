//! Agent 配置 - 启动时加载一次，以引用向下传递

use crate::error::{WatchError, WatchResult};
use crate::watch::DEFAULT_SUBSCRIBER_BACKLOG;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const APP_DIR: &str = "container-watch-agent";

/// Agent 顶层配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub watch: ContainerWatchConfig,
    pub delivery: DeliveryConfig,
    pub retry: RetryConfig,
    pub exporters: Vec<ExporterConfig>,
}

/// 容器 watcher 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerWatchConfig {
    /// 名称模式（正则表达式），按顺序尝试
    #[serde(alias = "regex")]
    pub patterns: Vec<String>,
    /// 适配器事件通道容量
    pub event_buffer: usize,
    /// 每个订阅通道前的积压队列长度
    pub subscriber_backlog: usize,
}

impl Default for ContainerWatchConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            event_buffer: 32,
            subscriber_backlog: DEFAULT_SUBSCRIBER_BACKLOG,
        }
    }
}

impl ContainerWatchConfig {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Exporter 投递配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// 单条消息处理的截止时间（秒）
    pub timeout_secs: u64,
    /// 每个 exporter 订阅通道的容量
    pub channel_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            channel_capacity: 64,
        }
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 发现和打开订阅重试时的退避
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// 发现失败达到此次数后放弃（`None` 表示一直重试）
    pub max_discovery_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            max_discovery_attempts: None,
        }
    }
}

/// 内置 exporter 选择
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExporterConfig {
    /// 把消息写入 tracing 日志
    Log,
    /// 把消息追加到 JSONL 文件
    JsonlFile {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
    /// 把消息 POST 到 HTTP 端点
    Webhook {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
}

impl AgentConfig {
    /// 默认配置文件位置
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// JSONL exporter 的默认输出位置
    pub fn default_jsonl_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("messages.jsonl")
    }

    /// 从 `path` 或默认位置加载；默认文件不存在时使用默认值
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !path.exists() {
            if explicit {
                anyhow::bail!("config file not found: {}", path.display());
            }
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: AgentConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
        info!(path = %path.display(), "Loaded agent config");
        Ok(config)
    }

    /// 检查各组件依赖的配置
    pub fn validate(&self) -> WatchResult<()> {
        if self.watch.patterns.is_empty() {
            return Err(WatchError::configuration("at least one container pattern is required"));
        }
        for pattern in &self.watch.patterns {
            if pattern.trim().is_empty() {
                return Err(WatchError::configuration("container patterns must not be empty"));
            }
            Regex::new(pattern).map_err(|source| WatchError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        }
        if self.watch.event_buffer == 0 {
            return Err(WatchError::configuration("watch.event_buffer must be positive"));
        }
        if self.watch.subscriber_backlog == 0 {
            return Err(WatchError::configuration("watch.subscriber_backlog must be positive"));
        }
        if self.delivery.timeout_secs == 0 {
            return Err(WatchError::configuration("delivery.timeout_secs must be positive"));
        }
        if self.delivery.channel_capacity == 0 {
            return Err(WatchError::configuration("delivery.channel_capacity must be positive"));
        }
        if self.retry.initial_backoff_ms == 0 || self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(WatchError::configuration(
                "retry backoff must satisfy 0 < initial_backoff_ms <= max_backoff_ms",
            ));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(WatchError::configuration("retry.backoff_multiplier must be >= 1.0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> AgentConfig {
        AgentConfig {
            watch: ContainerWatchConfig::new(["consensus"]),
            ..AgentConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.delivery.timeout(), Duration::from_secs(5));
        assert_eq!(config.delivery.channel_capacity, 64);
        assert_eq!(config.retry.initial_backoff_ms, 500);
        assert!(config.retry.max_discovery_attempts.is_none());
        assert!(config.exporters.is_empty());
    }

    #[test]
    fn test_validate_requires_patterns() {
        let err = AgentConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("pattern"));
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_regex() {
        let mut config = valid_config();
        config.watch.patterns.push("(unclosed".to_string());
        assert!(matches!(config.validate(), Err(WatchError::InvalidPattern { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = valid_config();
        config.delivery.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let mut config = valid_config();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_with_regex_alias() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "watch": {{"regex": ["dapper-private-network_consensus_\\d+_1"]}},
                "delivery": {{"timeout_secs": 2}},
                "exporters": [
                    {{"type": "log"}},
                    {{"type": "jsonl_file", "path": "/tmp/out.jsonl"}},
                    {{"type": "webhook", "url": "http://localhost:9000/ingest"}}
                ]
            }}"#
        )
        .unwrap();

        let config = AgentConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.watch.patterns, vec!["dapper-private-network_consensus_\\d+_1"]);
        assert_eq!(config.watch.event_buffer, 32);
        assert_eq!(config.watch.subscriber_backlog, 1024);
        assert_eq!(config.delivery.timeout_secs, 2);
        assert_eq!(config.delivery.channel_capacity, 64);
        assert_eq!(config.exporters.len(), 3);
        assert_eq!(config.exporters[0], ExporterConfig::Log);
        assert_eq!(
            config.exporters[2],
            ExporterConfig::Webhook {
                url: "http://localhost:9000/ingest".to_string(),
                token: None,
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = AgentConfig::load(Some(&dir.path().join("nope.json")));
        assert!(result.is_err());
    }
}
