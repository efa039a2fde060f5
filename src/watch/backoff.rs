//! 指数退避 - 用于发现和订阅重试

use crate::config::RetryConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 有上限的指数退避
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.backoff_multiplier.max(1.0),
            attempt: 0,
        }
    }

    /// 第 attempt 次（从 0 开始）的延迟：`initial * multiplier^attempt`，不超过 `max`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.initial.as_millis() as f64 * self.multiplier.powi(exponent);
        let max_millis = self.max.as_millis() as f64;

        if !millis.is_finite() || millis >= max_millis {
            return self.max;
        }
        Duration::from_millis(millis as u64)
    }

    /// 下一次的延迟，并推进计数
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// 自上次重置以来发出的延迟次数
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// 等待下一次延迟。先被取消则返回 `false`。
    pub async fn wait(&mut self, token: &CancellationToken) -> bool {
        let delay = self.next_delay();
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
