//! Redis Pub/Sub 模块
//!
//! 每个房间对应一个频道，发布端共享一条自动重连的连接，订阅端由单个后台任务持有。

pub mod broker;
pub mod error;
pub mod publisher;
pub mod subscriber;

// 重新导出
pub use broker::*;
pub use error::*;
pub use publisher::*;
pub use subscriber::*;
