//! 应用层实现。
//!
//! 围绕房间注册表组织连接网关、在线状态广播、消息中继与心跳巡检，
//! 并对外部协作方（令牌校验、发布订阅代理、在线状态存储）做抽象。

pub mod broker;
pub mod clock;
pub mod error;
pub mod gateway;
pub mod heartbeat;
pub mod local_broker;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod retry;
pub mod runtime;

pub use broker::{BrokerEnvelope, BrokerError, BrokerInbox, MessageBroker};
pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use gateway::{ConnectionGateway, TokenVerifier};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor};
pub use local_broker::{LocalBrokerHub, LocalMessageBroker};
pub use presence::{MemoryPresenceStore, PresenceBroadcaster, PresenceStore};
pub use registry::{ConnectionHandle, Departure, JoinOutcome, Room, RoomRegistry};
pub use relay::{MessageRelay, RelayConfig};
pub use retry::{retry_async, Backoff, RetryPolicy};
pub use runtime::{ChatRuntime, ChatRuntimeDependencies, ChatSettings};
