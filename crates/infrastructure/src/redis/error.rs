//! Redis 错误类型定义

use application::{ApplicationError, BrokerError};
use thiserror::Error;

/// Redis 操作错误
#[derive(Error, Debug)]
pub enum RedisError {
    /// 连接错误
    #[error("Redis 连接错误: {message}")]
    ConnectionError { message: String },

    /// 发布错误
    #[error("Redis 发布错误: {message}")]
    PublishError { message: String },

    /// 订阅错误
    #[error("Redis 订阅错误: {message}")]
    SubscribeError { message: String },

    /// 序列化错误
    #[error("序列化错误: {message}")]
    SerializationError { message: String },

    /// 超时错误
    #[error("操作超时: {operation}")]
    TimeoutError { operation: String },

    /// 配置错误
    #[error("配置错误: {message}")]
    ConfigError { message: String },
}

/// Redis 结果类型
pub type RedisResult<T> = Result<T, RedisError>;

impl From<redis::RedisError> for RedisError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::InvalidClientConfig => RedisError::ConfigError {
                message: err.to_string(),
            },
            _ => RedisError::ConnectionError {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for RedisError {
    fn from(err: serde_json::Error) -> Self {
        RedisError::SerializationError {
            message: err.to_string(),
        }
    }
}

impl From<RedisError> for BrokerError {
    fn from(err: RedisError) -> Self {
        match err {
            RedisError::SerializationError { .. } => BrokerError::payload(err.to_string()),
            _ => BrokerError::unavailable(err.to_string()),
        }
    }
}

impl From<RedisError> for ApplicationError {
    fn from(err: RedisError) -> Self {
        ApplicationError::infrastructure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_errors_keep_retryability() {
        let unavailable: BrokerError = RedisError::ConnectionError {
            message: "refused".into(),
        }
        .into();
        assert!(unavailable.is_retryable());

        let payload: BrokerError = RedisError::SerializationError {
            message: "bad json".into(),
        }
        .into();
        assert!(!payload.is_retryable());
    }
}
