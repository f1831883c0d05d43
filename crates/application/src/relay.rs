//! 聊天消息中继
//!
//! 消息统一经由代理的房间频道扇出：包括发送者所在进程在内，每个订阅了该房间的进程
//! 从自己的订阅收到消息后投递给本进程成员，因此每个成员（含发送者）恰好收到一份。
//!
//! 代理不可用时先在本进程直接投递，并在后台带退避重发；回流到发布进程的那份会被跳过。

use std::collections::HashSet;
use std::sync::Arc;

use domain::{ChatMessage, NodeId, RoomId, ServerEvent, DEFAULT_MAX_MESSAGE_CHARS};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{BrokerEnvelope, BrokerError, BrokerInbox, MessageBroker};
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::registry::{ConnectionHandle, RoomRegistry};
use crate::retry::{retry_async, RetryPolicy};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub max_message_chars: usize,
    /// 代理发布失败后的后台重发策略
    pub retry: RetryPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct MessageRelay {
    node_id: NodeId,
    registry: Arc<RoomRegistry>,
    broker: Arc<dyn MessageBroker>,
    clock: Arc<dyn Clock>,
    config: RelayConfig,
    /// 串行化订阅变更，避免订阅与退订交错
    subscription_gate: Mutex<()>,
    subscribed: RwLock<HashSet<RoomId>>,
}

impl MessageRelay {
    pub fn new(
        registry: Arc<RoomRegistry>,
        broker: Arc<dyn MessageBroker>,
        clock: Arc<dyn Clock>,
        config: RelayConfig,
    ) -> Self {
        Self {
            node_id: NodeId::new(),
            registry,
            broker,
            clock,
            config,
            subscription_gate: Mutex::new(()),
            subscribed: RwLock::new(HashSet::new()),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// 发送聊天消息；发送者必须是该房间的当前成员
    pub async fn send(
        &self,
        connection: &ConnectionHandle,
        room_id: &RoomId,
        text: Option<String>,
    ) -> Result<ChatMessage, ApplicationError> {
        if !self.registry.is_member(connection.id(), room_id).await {
            return Err(ApplicationError::authorization(format!(
                "not a member of room {room_id}"
            )));
        }

        let message = ChatMessage::new(
            connection.user_id().clone(),
            room_id.clone(),
            text.unwrap_or_default(),
            self.config.max_message_chars,
            self.clock.now(),
        );
        let mut envelope = BrokerEnvelope::new(self.node_id, message.clone());

        if !self.is_subscribed(room_id).await {
            // 本进程收不到回流，只能直接投递
            envelope.delivered_locally = true;
            self.deliver_locally(&message).await;
            self.spawn_republish(envelope);
            return Ok(message);
        }

        if let Err(err) = self.broker.publish(&envelope).await {
            warn!(room_id = %room_id, error = %err, "消息发布失败，改为本地投递后后台重发");
            envelope.delivered_locally = true;
            self.deliver_locally(&message).await;
            self.spawn_republish(envelope);
        }

        Ok(message)
    }

    /// 处理代理投递来的消息，返回投递到的本地连接数
    pub async fn deliver_from_broker(&self, envelope: BrokerEnvelope) -> usize {
        if envelope.origin == self.node_id && envelope.delivered_locally {
            return 0;
        }
        self.deliver_locally(&envelope.message).await
    }

    /// 启动消费代理收件箱的任务
    pub fn spawn_inbox(
        self: &Arc<Self>,
        mut inbox: BrokerInbox,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    envelope = inbox.recv() => match envelope {
                        Some(envelope) => {
                            relay.deliver_from_broker(envelope).await;
                        }
                        None => {
                            warn!("代理收件箱已关闭");
                            break;
                        }
                    },
                }
            }
            debug!("代理收件箱任务结束");
        })
    }

    /// 确保本进程订阅了房间频道
    pub async fn ensure_subscribed(&self, room_id: &RoomId) -> Result<(), BrokerError> {
        if self.is_subscribed(room_id).await {
            return Ok(());
        }

        let _gate = self.subscription_gate.lock().await;
        if self.is_subscribed(room_id).await {
            return Ok(());
        }
        self.broker.subscribe(room_id).await?;
        self.subscribed.write().await.insert(room_id.clone());
        info!(room_id = %room_id, node_id = %self.node_id, "订阅房间频道");
        Ok(())
    }

    /// 退订没有本地成员的房间，并补订此前订阅失败的房间
    pub async fn prune_subscriptions(&self) {
        let _gate = self.subscription_gate.lock().await;

        let subscribed: Vec<RoomId> = self.subscribed.read().await.iter().cloned().collect();
        for room_id in subscribed {
            // 先移出集合：随后的加入会走慢路径并在闸门处等待
            self.subscribed.write().await.remove(&room_id);
            if !self.registry.members(&room_id).await.is_empty() {
                self.subscribed.write().await.insert(room_id);
                continue;
            }
            match self.broker.unsubscribe(&room_id).await {
                Ok(()) => debug!(room_id = %room_id, "退订空房间频道"),
                Err(err) => warn!(room_id = %room_id, error = %err, "退订房间频道失败"),
            }
        }

        for room_id in self.registry.room_ids().await {
            if self.is_subscribed(&room_id).await {
                continue;
            }
            match self.broker.subscribe(&room_id).await {
                Ok(()) => {
                    self.subscribed.write().await.insert(room_id.clone());
                    info!(room_id = %room_id, "补订房间频道");
                }
                Err(err) => warn!(room_id = %room_id, error = %err, "补订房间频道失败"),
            }
        }
    }

    pub async fn is_subscribed(&self, room_id: &RoomId) -> bool {
        self.subscribed.read().await.contains(room_id)
    }

    async fn deliver_locally(&self, message: &ChatMessage) -> usize {
        self.registry
            .deliver(&message.room_id, ServerEvent::ChatMessage(message.clone()))
            .await
    }

    fn spawn_republish(&self, envelope: BrokerEnvelope) {
        let broker = Arc::clone(&self.broker);
        let policy = self.config.retry.clone();
        tokio::spawn(async move {
            let result = retry_async(&policy, BrokerError::is_retryable, || {
                let broker = Arc::clone(&broker);
                let envelope = envelope.clone();
                async move { broker.publish(&envelope).await }
            })
            .await;
            if let Err(err) = result {
                warn!(
                    room_id = %envelope.room_id(),
                    error = %err,
                    "消息重发失败，其他进程的成员将收不到该消息"
                );
            }
        });
    }
}
