// 进程内代理实现：单进程部署与测试使用
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use domain::RoomId;
use tokio::sync::{broadcast, mpsc, RwLock};

use crate::broker::{BrokerEnvelope, BrokerError, BrokerInbox, MessageBroker};

/// 共享的进程内发布订阅通道
///
/// 每个挂接到同一个 hub 的 [`LocalMessageBroker`] 相当于一个独立的服务进程，
/// 因而也可以在单个测试里模拟多进程部署。
#[derive(Clone)]
pub struct LocalBrokerHub {
    sender: broadcast::Sender<BrokerEnvelope>,
}

impl LocalBrokerHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 挂接一个新的代理端点，需在 tokio 运行时内调用
    pub fn attach(&self) -> (LocalMessageBroker, BrokerInbox) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let subscriptions = Arc::new(RwLock::new(HashSet::new()));
        let mut receiver = self.sender.subscribe();

        tokio::spawn({
            let subscriptions = Arc::clone(&subscriptions);
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(envelope) => {
                            if !subscriptions.read().await.contains(envelope.room_id()) {
                                continue;
                            }
                            if inbox_tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "本地代理消费过慢，丢弃了部分消息");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                tracing::debug!("本地代理转发任务结束");
            }
        });

        let broker = LocalMessageBroker {
            sender: self.sender.clone(),
            subscriptions,
        };
        (broker, inbox_rx)
    }
}

impl Default for LocalBrokerHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[derive(Clone)]
pub struct LocalMessageBroker {
    sender: broadcast::Sender<BrokerEnvelope>,
    subscriptions: Arc<RwLock<HashSet<RoomId>>>,
}

#[async_trait]
impl MessageBroker for LocalMessageBroker {
    async fn publish(&self, envelope: &BrokerEnvelope) -> Result<(), BrokerError> {
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(envelope.clone())
            .map_err(|err| BrokerError::unavailable(err.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, room_id: &RoomId) -> Result<(), BrokerError> {
        self.subscriptions.write().await.insert(room_id.clone());
        Ok(())
    }

    async fn unsubscribe(&self, room_id: &RoomId) -> Result<(), BrokerError> {
        self.subscriptions.write().await.remove(room_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{ChatMessage, NodeId, UserId};
    use std::time::Duration;
    use tokio::time::timeout;

    fn envelope(room: &str, text: &str) -> BrokerEnvelope {
        let message = ChatMessage::new(
            UserId::parse("a").unwrap(),
            RoomId::parse(room).unwrap(),
            text,
            2000,
            Utc::now(),
        );
        BrokerEnvelope::new(NodeId::new(), message)
    }

    #[tokio::test]
    async fn delivers_only_subscribed_rooms_to_every_endpoint() {
        let hub = LocalBrokerHub::default();
        let (node_a, mut inbox_a) = hub.attach();
        let (node_b, mut inbox_b) = hub.attach();
        let room = RoomId::parse("r1").unwrap();

        node_a.subscribe(&room).await.unwrap();
        node_b.subscribe(&room).await.unwrap();

        node_a.publish(&envelope("other", "ignored")).await.unwrap();
        node_a.publish(&envelope("r1", "hello")).await.unwrap();

        for inbox in [&mut inbox_a, &mut inbox_b] {
            let received = timeout(Duration::from_secs(1), inbox.recv())
                .await
                .expect("delivery")
                .expect("open inbox");
            assert_eq!(received.message.text, "hello");
        }
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = LocalBrokerHub::default();
        let (node, mut inbox) = hub.attach();
        let room = RoomId::parse("r1").unwrap();

        node.subscribe(&room).await.unwrap();
        node.unsubscribe(&room).await.unwrap();
        node.publish(&envelope("r1", "late")).await.unwrap();

        assert!(timeout(Duration::from_millis(100), inbox.recv()).await.is_err());
    }
}
