use async_trait::async_trait;
use domain::{ChatMessage, NodeId, RoomId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// 经由跨进程代理传递的消息信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerEnvelope {
    /// 发布消息的服务进程
    pub origin: NodeId,
    pub message: ChatMessage,
    /// 发布方已直接投递给本进程成员，回流时应跳过
    #[serde(default)]
    pub delivered_locally: bool,
}

impl BrokerEnvelope {
    pub fn new(origin: NodeId, message: ChatMessage) -> Self {
        Self {
            origin,
            message,
            delivered_locally: false,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.message.room_id
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("invalid broker payload: {0}")]
    Payload(String),
}

impl BrokerError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload(message.into())
    }

    /// 连接类故障可以重试，负载错误重试也不会成功
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_))
    }
}

/// 代理投递到本进程的消息流
pub type BrokerInbox = mpsc::UnboundedReceiver<BrokerEnvelope>;

/// 按房间分频道的发布订阅代理
///
/// 订阅的房间收到的消息统一写入构造代理时返回的 [`BrokerInbox`]。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, envelope: &BrokerEnvelope) -> Result<(), BrokerError>;

    /// 幂等：重复订阅同一房间不产生重复投递
    async fn subscribe(&self, room_id: &RoomId) -> Result<(), BrokerError>;

    async fn unsubscribe(&self, room_id: &RoomId) -> Result<(), BrokerError>;
}
