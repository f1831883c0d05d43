//! 基础设施配置
//!
//! 定义 Redis 的连接配置。

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Redis 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis 服务器地址
    pub url: String,
    /// 房间频道前缀
    pub room_channel_prefix: String,
    /// 订阅连接断开后的首次重连间隔（毫秒），之后按指数退避
    pub reconnect_interval_ms: u64,
    /// 重连间隔上限（毫秒）
    pub max_reconnect_interval_ms: u64,
    /// 等待订阅确认的超时时间（毫秒）
    pub subscribe_timeout_ms: u64,
    /// 用户在线标记的过期时间（秒）
    pub online_ttl_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            room_channel_prefix: "chat:room:".to_string(),
            reconnect_interval_ms: 500,
            max_reconnect_interval_ms: 10_000,
            subscribe_timeout_ms: 3_000,
            online_ttl_seconds: 60,
        }
    }
}

impl RedisConfig {
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.reconnect_interval_ms
                .saturating_mul(factor)
                .min(self.max_reconnect_interval_ms),
        )
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }
}
