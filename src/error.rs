//! 监控管道错误类型

/// 运行时适配器和 watcher 的错误
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("no container matches patterns {patterns:?}")]
    NotFound { patterns: Vec<String> },

    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("runtime adapter error: {reason}")]
    Adapter { reason: String },

    #[error("event subscription failed: {reason}")]
    Subscription { reason: String },

    #[error("event stream broken: {reason}")]
    Stream { reason: String },

    #[error("watcher already started")]
    AlreadyStarted,

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl WatchError {
    pub fn adapter(reason: impl Into<String>) -> Self {
        WatchError::Adapter {
            reason: reason.into(),
        }
    }

    pub fn subscription(reason: impl Into<String>) -> Self {
        WatchError::Subscription {
            reason: reason.into(),
        }
    }

    pub fn stream(reason: impl Into<String>) -> Self {
        WatchError::Stream {
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        WatchError::Configuration {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WatchError::NotFound { .. })
    }
}

pub type WatchResult<T> = std::result::Result<T, WatchError>;
