//! WebSocket 事件协议
//!
//! 每个文本帧是一个 JSON 对象，由 `event` 字段区分事件类型，其余字段为负载：
//!
//! ```json
//! {"event":"join_room","roomId":"peer-support-1"}
//! {"event":"room_users","roomId":"peer-support-1","users":["1","2"]}
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::message::{ChatMessage, PresenceSnapshot};
use crate::value_objects::{RoomId, UserId};

/// 客户端发往服务端的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    ChatMessage {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(default)]
        text: Option<String>,
    },
    Heartbeat,
    /// `roomId` 可省略，表示离开当前房间
    LeaveRoom {
        #[serde(rename = "roomId", default)]
        room_id: Option<RoomId>,
    },
}

impl ClientEvent {
    pub fn parse(frame: &str) -> DomainResult<Self> {
        serde_json::from_str(frame).map_err(|err| DomainError::malformed_event(err.to_string()))
    }

    /// 事件名称，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "join_room",
            ClientEvent::ChatMessage { .. } => "chat_message",
            ClientEvent::Heartbeat => "heartbeat",
            ClientEvent::LeaveRoom { .. } => "leave_room",
        }
    }
}

/// 服务端推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    RoomUsers(PresenceSnapshot),
    ChatMessage(ChatMessage),
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.to_owned(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn parses_client_events() {
        let join = ClientEvent::parse(r#"{"event":"join_room","roomId":"r1"}"#).unwrap();
        assert_eq!(
            join,
            ClientEvent::JoinRoom {
                room_id: RoomId::parse("r1").unwrap()
            }
        );

        let heartbeat = ClientEvent::parse(r#"{"event":"heartbeat"}"#).unwrap();
        assert_eq!(heartbeat, ClientEvent::Heartbeat);

        let leave = ClientEvent::parse(r#"{"event":"leave_room"}"#).unwrap();
        assert_eq!(leave, ClientEvent::LeaveRoom { room_id: None });
    }

    #[test]
    fn chat_message_tolerates_extra_and_missing_fields() {
        let event = ClientEvent::parse(
            r#"{"event":"chat_message","roomId":"r1","text":"hi","clientMsgId":7}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::ChatMessage {
                room_id: RoomId::parse("r1").unwrap(),
                text: Some("hi".into()),
            }
        );

        let event = ClientEvent::parse(r#"{"event":"chat_message","roomId":"r1","text":null}"#)
            .unwrap();
        assert!(matches!(event, ClientEvent::ChatMessage { text: None, .. }));
    }

    #[test]
    fn rejects_unknown_or_invalid_frames() {
        assert!(matches!(
            ClientEvent::parse(r#"{"event":"shout"}"#),
            Err(DomainError::MalformedEvent { .. })
        ));
        assert!(ClientEvent::parse(r#"{"event":"join_room","roomId":""}"#).is_err());
        assert!(ClientEvent::parse("not json").is_err());
    }

    #[test]
    fn server_events_use_wire_field_names() {
        let message = ChatMessage {
            sender: UserId::parse("a").unwrap(),
            room_id: RoomId::parse("r1").unwrap(),
            text: "hello".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        let value: serde_json::Value =
            serde_json::from_str(&ServerEvent::ChatMessage(message).to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "chat_message",
                "sender": "a",
                "roomId": "r1",
                "text": "hello",
                "timestamp": "2024-05-01T12:00:00Z"
            })
        );

        let snapshot = PresenceSnapshot::new(
            RoomId::parse("r1").unwrap(),
            vec![UserId::parse("b").unwrap(), UserId::parse("a").unwrap()],
        );
        let value: serde_json::Value =
            serde_json::from_str(&ServerEvent::RoomUsers(snapshot).to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "room_users", "roomId": "r1", "users": ["a", "b"]})
        );

        let connected = ServerEvent::Connected {
            user_id: UserId::parse("a").unwrap(),
        };
        assert_eq!(
            connected.to_json().unwrap(),
            r#"{"event":"connected","userId":"a"}"#
        );
    }
}
