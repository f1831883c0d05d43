//! Web API 层。
//!
//! 提供 Axum 路由：`/chat` WebSocket 端点与少量 HTTP 查询接口，
//! 请求统一委托给应用层的聊天运行时。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
