//! 连接网关
//!
//! 建连时校验令牌，之后把每条连接上的事件路由到注册表、中继与在线状态广播器。
//! 任何单条连接上的错误只回报给该连接本身。

use std::sync::Arc;

use domain::{ClientEvent, RoomId, ServerEvent, UserId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ApplicationError;
use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnectionHandle, RoomRegistry};
use crate::relay::MessageRelay;

/// 令牌校验器：不透明的令牌字符串 → 用户标识
#[cfg_attr(test, mockall::automock)]
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<UserId, ApplicationError>;
}

pub struct ConnectionGateway {
    verifier: Arc<dyn TokenVerifier>,
    registry: Arc<RoomRegistry>,
    presence: Arc<PresenceBroadcaster>,
    relay: Arc<MessageRelay>,
}

impl ConnectionGateway {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        registry: Arc<RoomRegistry>,
        presence: Arc<PresenceBroadcaster>,
        relay: Arc<MessageRelay>,
    ) -> Self {
        Self {
            verifier,
            registry,
            presence,
            relay,
        }
    }

    /// 校验建连时携带的令牌，缺失或无效时拒绝连接
    pub fn authenticate(&self, token: Option<&str>) -> Result<UserId, ApplicationError> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApplicationError::authentication("missing token"))?;
        self.verifier.verify(token)
    }

    /// 为已认证用户建立连接，并推送 `connected` 事件
    pub async fn open(
        &self,
        user_id: UserId,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let connection = ConnectionHandle::new(user_id.clone(), outbound);
        connection.send(ServerEvent::Connected {
            user_id: user_id.clone(),
        });
        self.presence.heartbeat(None, &user_id).await;

        info!(connection_id = %connection.id(), user_id = %user_id, "连接已建立");
        (connection, receiver)
    }

    pub async fn handle(
        &self,
        connection: &ConnectionHandle,
        event: ClientEvent,
    ) -> Result<(), ApplicationError> {
        debug!(
            connection_id = %connection.id(),
            event = event.name(),
            "处理客户端事件"
        );
        match event {
            ClientEvent::JoinRoom { room_id } => self.join(connection, room_id).await,
            ClientEvent::ChatMessage { room_id, text } => {
                self.relay.send(connection, &room_id, text).await?;
            }
            ClientEvent::Heartbeat => self.heartbeat(connection).await,
            ClientEvent::LeaveRoom { room_id } => self.leave(connection, room_id.as_ref()).await,
        }
        Ok(())
    }

    /// 处理一个文本帧；解析或处理失败时仅向该连接回报 `error` 事件
    pub async fn dispatch_frame(&self, connection: &ConnectionHandle, frame: &str) {
        let result = match ClientEvent::parse(frame) {
            Ok(event) => self.handle(connection, event).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            self.report(connection, &err);
        }
    }

    pub async fn join(&self, connection: &ConnectionHandle, room_id: RoomId) {
        let outcome = self.registry.join(connection, room_id.clone()).await;
        if let Some(previous) = &outcome.previous {
            self.presence.member_departed(previous).await;
        }
        if !outcome.refreshed {
            self.presence.record_join(&room_id, connection.user_id()).await;
        }

        // 订阅失败时中继会退回本地投递，下次巡检再补订
        if let Err(err) = self.relay.ensure_subscribed(&room_id).await {
            warn!(room_id = %room_id, error = %err, "订阅房间频道失败");
        }

        self.presence.notify(&room_id).await;
        info!(
            connection_id = %connection.id(),
            user_id = %connection.user_id(),
            room_id = %room_id,
            "用户加入房间"
        );
    }

    /// 离开当前房间；指定的房间与当前房间不一致时忽略
    pub async fn leave(&self, connection: &ConnectionHandle, room_id: Option<&RoomId>) {
        if let Some(room_id) = room_id {
            if !self.registry.is_member(connection.id(), room_id).await {
                debug!(connection_id = %connection.id(), room_id = %room_id, "不在该房间，忽略离开请求");
                return;
            }
        }
        if let Some(departure) = self.registry.leave(connection.id()).await {
            self.presence.member_departed(&departure).await;
            info!(
                connection_id = %connection.id(),
                user_id = %departure.user_id,
                room_id = %departure.room_id,
                "用户离开房间"
            );
        }
    }

    pub async fn heartbeat(&self, connection: &ConnectionHandle) {
        let room_id = if self.registry.touch(connection.id()).await {
            self.registry.current_room(connection.id()).await
        } else {
            None
        };
        self.presence
            .heartbeat(room_id.as_ref(), connection.user_id())
            .await;
    }

    /// 连接断开：移除成员身份并通知房间剩余成员
    pub async fn on_disconnect(&self, connection: &ConnectionHandle) {
        if let Some(departure) = self.registry.leave(connection.id()).await {
            self.presence.member_departed(&departure).await;
        }
        info!(
            connection_id = %connection.id(),
            user_id = %connection.user_id(),
            "连接已断开"
        );
    }

    fn report(&self, connection: &ConnectionHandle, err: &ApplicationError) {
        warn!(
            connection_id = %connection.id(),
            user_id = %connection.user_id(),
            error = %err,
            "客户端事件处理失败"
        );
        connection.send(ServerEvent::error(err.code(), err.to_string()));
    }
}
