//! 基于 Redis Pub/Sub 的跨进程消息代理

use application::{BrokerEnvelope, BrokerError, BrokerInbox, MessageBroker};
use async_trait::async_trait;
use domain::RoomId;
use redis::Client;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::RedisConfig;
use crate::redis::{RedisError, RedisPublisher, RedisResult, RedisSubscriber};

pub struct RedisMessageBroker {
    publisher: RedisPublisher,
    subscriber: RedisSubscriber,
    channel_prefix: String,
}

impl RedisMessageBroker {
    /// 连接 Redis，返回代理和本进程的收件箱
    pub async fn connect(config: &RedisConfig) -> RedisResult<(Self, BrokerInbox)> {
        let client = Client::open(config.url.as_str()).map_err(|e| RedisError::ConfigError {
            message: format!("创建 Redis 客户端失败: {}", e),
        })?;

        let publisher = RedisPublisher::new(&client).await?;
        let (sink, inbox) = mpsc::unbounded_channel();
        let subscriber = RedisSubscriber::start(client, config, sink);

        info!(url = %config.url, prefix = %config.room_channel_prefix, "Redis 消息代理已连接");
        let broker = Self {
            publisher,
            subscriber,
            channel_prefix: config.room_channel_prefix.clone(),
        };
        Ok((broker, inbox))
    }

    /// 房间对应的频道名
    pub fn channel_for(&self, room_id: &RoomId) -> String {
        format!("{}{}", self.channel_prefix, room_id)
    }

    /// 等待订阅连接建立，超时返回 false
    pub async fn wait_connected(&self, timeout: std::time::Duration) -> bool {
        self.subscriber.wait_connected(timeout).await
    }

    pub fn shutdown(&self) {
        self.subscriber.shutdown();
    }
}

#[async_trait]
impl MessageBroker for RedisMessageBroker {
    /// 订阅连接断开时直接报告不可用，由中继改为本地投递并稍后重发
    async fn publish(&self, envelope: &BrokerEnvelope) -> Result<(), BrokerError> {
        self.subscriber.ensure_connected()?;
        let payload = serde_json::to_string(envelope).map_err(RedisError::from)?;
        let receivers = self
            .publisher
            .publish(&self.channel_for(envelope.room_id()), &payload)
            .await?;

        // 本进程已订阅该频道，无人接收说明订阅连接刚刚断开且尚未察觉
        if receivers == 0 && !envelope.delivered_locally {
            return Err(BrokerError::unavailable(format!(
                "频道 {} 没有订阅者",
                self.channel_for(envelope.room_id())
            )));
        }
        Ok(())
    }

    async fn subscribe(&self, room_id: &RoomId) -> Result<(), BrokerError> {
        self.subscriber.subscribe(&self.channel_for(room_id)).await?;
        Ok(())
    }

    async fn unsubscribe(&self, room_id: &RoomId) -> Result<(), BrokerError> {
        self.subscriber
            .unsubscribe(&self.channel_for(room_id))
            .await?;
        Ok(())
    }
}
