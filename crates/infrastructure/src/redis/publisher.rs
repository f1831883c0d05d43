//! Redis 消息发布者
//!
//! 所有房间共用一条 `ConnectionManager` 连接，断线后由其自动重连。

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use crate::redis::{RedisError, RedisResult};

/// Redis 发布者
#[derive(Clone)]
pub struct RedisPublisher {
    connection: ConnectionManager,
}

impl RedisPublisher {
    pub async fn new(client: &Client) -> RedisResult<Self> {
        let connection = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| RedisError::ConnectionError {
                message: format!("创建 Redis 发布连接失败: {}", e),
            })?;

        info!("Redis 发布者创建成功");
        Ok(Self { connection })
    }

    /// 发布消息到指定频道，返回收到消息的订阅者数量
    pub async fn publish(&self, channel: &str, payload: &str) -> RedisResult<u32> {
        let mut connection = self.connection.clone();
        let receivers: u32 = connection
            .publish(channel, payload)
            .await
            .map_err(|e| RedisError::PublishError {
                message: format!("发布到频道 {} 失败: {}", channel, e),
            })?;

        debug!(channel, receivers, "发布消息到频道");
        Ok(receivers)
    }
}
