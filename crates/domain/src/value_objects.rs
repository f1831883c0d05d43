use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

/// 房间标识的最大长度（字符数）。
pub const MAX_ROOM_ID_CHARS: usize = 128;

/// 用户唯一标识，取自令牌的 `sub` 声明。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::validation_error("user_id", "cannot be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 房间标识，例如 `peer-support-1`。
///
/// 房间按需创建，标识本身即频道名的一部分，因此不允许空白字符。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::validation_error("roomId", "cannot be empty"));
        }
        if value.chars().count() > MAX_ROOM_ID_CHARS {
            return Err(DomainError::validation_error("roomId", "too long"));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(DomainError::validation_error(
                "roomId",
                "must not contain whitespace",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.0
    }
}

/// 单条连接的唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// 服务进程标识，用于识别经由代理回流的本进程消息。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_trims_and_rejects_blank() {
        assert_eq!(RoomId::parse("  r1 ").unwrap().as_str(), "r1");
        assert!(RoomId::parse("   ").is_err());
        assert!(RoomId::parse("peer support").is_err());
        assert!(RoomId::parse("x".repeat(MAX_ROOM_ID_CHARS + 1)).is_err());
    }

    #[test]
    fn room_id_validates_on_deserialize() {
        let ok: RoomId = serde_json::from_str("\"peer-support-1\"").unwrap();
        assert_eq!(ok.as_str(), "peer-support-1");
        assert!(serde_json::from_str::<RoomId>("\"\"").is_err());
    }

    #[test]
    fn user_id_is_a_plain_json_string() {
        let user = UserId::parse("42").unwrap();
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"42\"");
        assert!(UserId::parse("").is_err());
    }
}
