use serde::{Deserialize, Serialize};

use crate::value_objects::{RoomId, Timestamp, UserId};

/// 默认的消息正文上限（字符数）。
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 2000;

/// 转发中的聊天消息，不做持久化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: UserId,
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
    pub text: String,
    pub timestamp: Timestamp,
}

impl ChatMessage {
    /// 构造消息，正文超过 `max_chars` 个字符时截断。
    pub fn new(
        sender: UserId,
        room_id: RoomId,
        text: impl Into<String>,
        max_chars: usize,
        timestamp: Timestamp,
    ) -> Self {
        let text = text.into();
        let text = match text.char_indices().nth(max_chars) {
            Some((cut, _)) => text[..cut].to_owned(),
            None => text,
        };

        Self {
            sender,
            room_id,
            text,
            timestamp,
        }
    }
}

/// 某一时刻房间成员列表的只读视图。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
    pub users: Vec<UserId>,
}

impl PresenceSnapshot {
    /// 成员列表排序并去重：同一用户的多条连接只出现一次。
    pub fn new(room_id: RoomId, users: impl IntoIterator<Item = UserId>) -> Self {
        let mut users: Vec<UserId> = users.into_iter().collect();
        users.sort();
        users.dedup();
        Self { room_id, users }
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.users.binary_search(user_id).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
