//! 基础设施层实现。
//!
//! 提供基于 Redis 的消息代理与在线状态存储，实现应用层定义的接口。

pub mod config;
pub mod presence_storage;
pub mod redis;

pub use config::RedisConfig;
pub use presence_storage::RedisPresenceStore;
pub use crate::redis::{RedisError, RedisMessageBroker, RedisPublisher, RedisResult, RedisSubscriber};
