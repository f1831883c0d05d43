//! 聊天中继核心领域模型
//!
//! 包含房间、连接、聊天消息等值对象，以及客户端与服务端之间的事件协议。

pub mod errors;
pub mod message;
pub mod protocol;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use message::*;
pub use protocol::*;
pub use value_objects::*;
