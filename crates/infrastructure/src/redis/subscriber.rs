//! Redis 消息订阅者
//!
//! 单个后台任务持有 PubSub 连接，通过命令通道动态订阅、退订房间频道。
//! 连接断开后按指数退避重连，并重新订阅断开前的全部频道。
//! 连接状态对外公开，断开期间发布方应改走本地投递。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use application::BrokerEnvelope;
use futures_util::StreamExt;
use redis::Client;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RedisConfig;
use crate::redis::{RedisError, RedisResult};

enum Command {
    Subscribe {
        channel: String,
        ack: oneshot::Sender<RedisResult<()>>,
    },
    Unsubscribe {
        channel: String,
        ack: oneshot::Sender<RedisResult<()>>,
    },
}

/// 一次 PubSub 会话结束的原因
enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// Redis 消息订阅者
pub struct RedisSubscriber {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    connected: Arc<AtomicBool>,
    config: RedisConfig,
}

/// 连接层面的错误需要重建会话，其余错误只影响当前频道
fn is_connection_lost(err: &redis::RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal()
}

impl RedisSubscriber {
    /// 启动订阅任务，收到的消息写入 `sink`；需在 tokio 运行时内调用
    pub fn start(
        client: Client,
        config: &RedisConfig,
        sink: mpsc::UnboundedSender<BrokerEnvelope>,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::listen_loop(
            client,
            config.clone(),
            receiver,
            sink,
            connected.clone(),
            shutdown.clone(),
        ));

        Self {
            commands,
            shutdown,
            connected,
            config: config.clone(),
        }
    }

    /// PubSub 连接是否已建立并完成重新订阅
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// 连接断开时返回错误，避免消息发布后无人接收
    pub fn ensure_connected(&self) -> RedisResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(RedisError::ConnectionError {
                message: "订阅连接未建立".to_string(),
            })
        }
    }

    /// 等待订阅连接建立，超时返回 false
    pub async fn wait_connected(&self, timeout: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_connected() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        true
    }

    /// 订阅频道，等待 Redis 确认
    pub async fn subscribe(&self, channel: &str) -> RedisResult<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Subscribe {
            channel: channel.to_string(),
            ack,
        })?;
        self.wait_ack(done, "subscribe").await
    }

    pub async fn unsubscribe(&self, channel: &str) -> RedisResult<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Unsubscribe {
            channel: channel.to_string(),
            ack,
        })?;
        self.wait_ack(done, "unsubscribe").await
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn send(&self, command: Command) -> RedisResult<()> {
        self.commands
            .send(command)
            .map_err(|_| RedisError::SubscribeError {
                message: "订阅任务已停止".to_string(),
            })
    }

    async fn wait_ack(
        &self,
        done: oneshot::Receiver<RedisResult<()>>,
        operation: &str,
    ) -> RedisResult<()> {
        match tokio::time::timeout(self.config.subscribe_timeout(), done).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RedisError::SubscribeError {
                message: "订阅任务已停止".to_string(),
            }),
            Err(_) => Err(RedisError::TimeoutError {
                operation: operation.to_string(),
            }),
        }
    }

    async fn listen_loop(
        client: Client,
        config: RedisConfig,
        mut commands: mpsc::UnboundedReceiver<Command>,
        sink: mpsc::UnboundedSender<BrokerEnvelope>,
        connected: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) {
        let mut channels: HashSet<String> = HashSet::new();
        let mut retry_count = 0u32;

        loop {
            let end = Self::session(
                &client,
                &mut channels,
                &mut commands,
                &sink,
                &connected,
                &mut retry_count,
                &shutdown,
            )
            .await;
            connected.store(false, Ordering::SeqCst);

            match end {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Disconnected) => {
                    warn!("Redis 订阅连接已断开");
                }
                Err(e) => {
                    error!("Redis 订阅连接错误: {}", e);
                }
            }

            retry_count += 1;
            let delay = config.reconnect_delay(retry_count);
            if !Self::wait_reconnect(delay, &mut channels, &mut commands, &shutdown).await {
                break;
            }
        }

        info!("Redis 订阅监听已停止");
    }

    /// 建立连接，订阅已有频道并处理消息与命令，直到连接断开或关闭
    async fn session(
        client: &Client,
        channels: &mut HashSet<String>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        sink: &mpsc::UnboundedSender<BrokerEnvelope>,
        connected: &AtomicBool,
        retry_count: &mut u32,
        shutdown: &CancellationToken,
    ) -> RedisResult<SessionEnd> {
        let mut pubsub = client.get_async_pubsub().await?;
        for channel in channels.iter() {
            if let Err(e) = pubsub.subscribe(channel).await {
                if is_connection_lost(&e) {
                    return Err(e.into());
                }
                // 保留在集合中，下次重连时再试
                warn!(channel = %channel, "重新订阅频道失败: {}", e);
            }
        }
        info!(channels = channels.len(), "Redis 订阅连接已建立");
        *retry_count = 0;
        connected.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
                command = commands.recv() => match command {
                    None => return Ok(SessionEnd::Shutdown),
                    Some(Command::Subscribe { channel, ack }) => {
                        match pubsub.subscribe(&channel).await {
                            Ok(()) => {
                                debug!(channel = %channel, "订阅频道");
                                channels.insert(channel);
                                let _ = ack.send(Ok(()));
                            }
                            Err(e) => {
                                let lost = is_connection_lost(&e);
                                let _ = ack.send(Err(RedisError::SubscribeError {
                                    message: format!("订阅频道 {} 失败: {}", channel, e),
                                }));
                                if lost {
                                    return Err(e.into());
                                }
                                warn!(channel = %channel, "订阅频道失败: {}", e);
                            }
                        }
                    }
                    Some(Command::Unsubscribe { channel, ack }) => {
                        channels.remove(&channel);
                        match pubsub.unsubscribe(&channel).await {
                            Ok(()) => {
                                debug!(channel = %channel, "退订频道");
                                let _ = ack.send(Ok(()));
                            }
                            Err(e) => {
                                // 已移出集合，重建后的连接不会再订阅该频道
                                let _ = ack.send(Ok(()));
                                if is_connection_lost(&e) {
                                    return Err(e.into());
                                }
                                warn!(channel = %channel, "退订频道失败: {}", e);
                            }
                        }
                    }
                },
                message = async {
                    let stream = pubsub.on_message();
                    tokio::pin!(stream);
                    stream.next().await
                } => match message {
                    Some(message) => {
                        if !Self::forward(&message, sink) {
                            return Ok(SessionEnd::Shutdown);
                        }
                    }
                    None => return Ok(SessionEnd::Disconnected),
                },
            }
        }
    }

    /// 等待重连期间继续响应命令；返回 false 表示应当退出
    async fn wait_reconnect(
        delay: std::time::Duration,
        channels: &mut HashSet<String>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        shutdown: &CancellationToken,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = &mut sleep => return true,
                command = commands.recv() => match command {
                    None => return false,
                    Some(Command::Subscribe { channel, ack }) => {
                        let _ = ack.send(Err(RedisError::ConnectionError {
                            message: format!("重连中，暂时无法订阅 {}", channel),
                        }));
                    }
                    Some(Command::Unsubscribe { channel, ack }) => {
                        channels.remove(&channel);
                        let _ = ack.send(Ok(()));
                    }
                },
            }
        }
    }

    /// 解析消息并写入收件箱；收件箱关闭时返回 false
    fn forward(message: &redis::Msg, sink: &mpsc::UnboundedSender<BrokerEnvelope>) -> bool {
        let channel = message.get_channel_name();
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(channel, "获取消息负载失败: {}", e);
                return true;
            }
        };

        match serde_json::from_str::<BrokerEnvelope>(&payload) {
            Ok(envelope) => sink.send(envelope).is_ok(),
            Err(e) => {
                warn!(channel, "反序列化消息失败: {}", e);
                true
            }
        }
    }
}

impl Drop for RedisSubscriber {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> RedisConfig {
        RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
            room_channel_prefix: format!("test_room:{}:", uuid::Uuid::new_v4()),
            ..RedisConfig::default()
        }
    }

    #[tokio::test]
    async fn subscribe_is_reported_as_failure_while_redis_is_unreachable() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            reconnect_interval_ms: 50,
            subscribe_timeout_ms: 500,
            ..RedisConfig::default()
        };
        let client = Client::open(config.url.as_str()).unwrap();
        let (sink, _inbox) = mpsc::unbounded_channel();
        let subscriber = RedisSubscriber::start(client, &config, sink);

        assert!(subscriber.subscribe("nowhere").await.is_err());
        assert!(subscriber.unsubscribe("nowhere").await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_redis_is_reported_as_disconnected() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            reconnect_interval_ms: 50,
            ..RedisConfig::default()
        };
        let client = Client::open(config.url.as_str()).unwrap();
        let (sink, _inbox) = mpsc::unbounded_channel();
        let subscriber = RedisSubscriber::start(client, &config, sink);

        assert!(!subscriber.wait_connected(Duration::from_millis(300)).await);
        assert!(!subscriber.is_connected());

        let err: application::BrokerError = subscriber.ensure_connected().unwrap_err().into();
        assert!(err.is_retryable());
        subscriber.shutdown();
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        if std::env::var("REDIS_INTEGRATION_TEST").is_err() {
            return;
        }
        let config = test_config();
        let client = Client::open(config.url.as_str()).unwrap();
        let (sink, _inbox) = mpsc::unbounded_channel();
        let subscriber = RedisSubscriber::start(client, &config, sink);

        assert!(subscriber.wait_connected(Duration::from_secs(2)).await);
        assert!(subscriber.ensure_connected().is_ok());
        let channel = format!("{}r1", config.room_channel_prefix);
        assert!(subscriber.subscribe(&channel).await.is_ok());
        assert!(subscriber.unsubscribe(&channel).await.is_ok());
        subscriber.shutdown();
    }
}
