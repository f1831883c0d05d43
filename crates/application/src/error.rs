use domain::DomainError;
use thiserror::Error;

use crate::broker::BrokerError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("authorization failed: {0}")]
    Authorization(String),
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    pub fn authentication(message: impl Into<String>) -> Self {
        ApplicationError::Authentication(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        ApplicationError::Authorization(message.into())
    }

    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    /// 回报给客户端的错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Domain(DomainError::MalformedEvent { .. }) => "MALFORMED_EVENT",
            ApplicationError::Domain(DomainError::ValidationError { .. }) => "INVALID_ARGUMENT",
            ApplicationError::Authentication(_) => "AUTHENTICATION_FAILED",
            ApplicationError::Authorization(_) => "AUTHORIZATION_FAILED",
            ApplicationError::Broker(_) => "BROKER_UNAVAILABLE",
            ApplicationError::Infrastructure(_) => "INFRASTRUCTURE_ERROR",
        }
    }
}
