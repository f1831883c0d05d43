use std::sync::Arc;

use async_trait::async_trait;
use domain::{PresenceSnapshot, RoomId, ServerEvent, UserId};
use tracing::warn;

use crate::error::ApplicationError;
use crate::registry::{Departure, Room, RoomRegistry};

/// 跨进程的在线状态存储
///
/// 只做镜像：聊天流程不读取它，写入失败只记录日志。
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// 标记用户在线（带过期时间，连接建立和每次心跳时刷新）
    async fn mark_online(&self, user_id: &UserId) -> Result<(), ApplicationError>;

    async fn add_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), ApplicationError>;

    async fn remove_member(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<(), ApplicationError>;

    /// 所有进程合计的房间在线用户
    async fn online_members(&self, room_id: &RoomId) -> Result<Vec<UserId>, ApplicationError>;
}

/// 内存实现的在线状态存储（单进程部署与测试使用）
pub use memory::MemoryPresenceStore;

mod memory {
    use super::*;
    use crate::clock::{Clock, SystemClock};
    use domain::Timestamp;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;
    use tokio::sync::RwLock;

    const DEFAULT_ONLINE_TTL: Duration = Duration::from_secs(60);

    /// 在线标记与 Redis 实现一致：带过期时间，未续期的用户不计入房间在线列表
    pub struct MemoryPresenceStore {
        room_users: RwLock<HashMap<RoomId, HashSet<UserId>>>,
        /// 用户 -> 在线标记的过期时刻
        online: RwLock<HashMap<UserId, Timestamp>>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    }

    impl Default for MemoryPresenceStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MemoryPresenceStore {
        pub fn new() -> Self {
            Self::with_clock(Arc::new(SystemClock), DEFAULT_ONLINE_TTL)
        }

        pub fn with_clock(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
            Self {
                room_users: RwLock::new(HashMap::new()),
                online: RwLock::new(HashMap::new()),
                clock,
                ttl,
            }
        }

        pub async fn is_online(&self, user_id: &UserId) -> bool {
            let now = self.clock.now();
            self.online
                .read()
                .await
                .get(user_id)
                .is_some_and(|expires_at| *expires_at > now)
        }

        /// 刷新在线标记，同时清理已过期的标记
        async fn refresh(&self, user_id: &UserId) {
            let now = self.clock.now();
            let expires_at = chrono::Duration::from_std(self.ttl)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl))
                .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);

            let mut online = self.online.write().await;
            online.retain(|_, expires_at| *expires_at > now);
            online.insert(user_id.clone(), expires_at);
        }
    }

    #[async_trait]
    impl PresenceStore for MemoryPresenceStore {
        async fn mark_online(&self, user_id: &UserId) -> Result<(), ApplicationError> {
            self.refresh(user_id).await;
            Ok(())
        }

        async fn add_member(
            &self,
            room_id: &RoomId,
            user_id: &UserId,
        ) -> Result<(), ApplicationError> {
            self.room_users
                .write()
                .await
                .entry(room_id.clone())
                .or_default()
                .insert(user_id.clone());
            self.refresh(user_id).await;
            Ok(())
        }

        async fn remove_member(
            &self,
            room_id: &RoomId,
            user_id: &UserId,
        ) -> Result<(), ApplicationError> {
            let mut room_users = self.room_users.write().await;
            if let Some(users) = room_users.get_mut(room_id) {
                users.remove(user_id);
                if users.is_empty() {
                    room_users.remove(room_id);
                }
            }
            Ok(())
        }

        async fn online_members(&self, room_id: &RoomId) -> Result<Vec<UserId>, ApplicationError> {
            let now = self.clock.now();
            let room_users = self.room_users.read().await;
            let online = self.online.read().await;
            let mut users: Vec<UserId> = room_users
                .get(room_id)
                .map(|users| {
                    users
                        .iter()
                        .filter(|user| {
                            online
                                .get(*user)
                                .is_some_and(|expires_at| *expires_at > now)
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            users.sort();
            Ok(users)
        }
    }

}

/// 在线状态广播器
pub struct PresenceBroadcaster {
    registry: Arc<RoomRegistry>,
    store: Arc<dyn PresenceStore>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<RoomRegistry>, store: Arc<dyn PresenceStore>) -> Self {
        Self { registry, store }
    }

    /// 向房间全部成员推送当前成员列表，返回推送的连接数
    ///
    /// 快照在房间锁内计算并入队，同一房间的通知按事件发生顺序到达。
    pub async fn notify(&self, room_id: &RoomId) -> usize {
        let sent = self
            .registry
            .inspect_room(room_id, |room: &Room| {
                room.send_all(&ServerEvent::RoomUsers(room.snapshot()))
            })
            .await
            .unwrap_or(0);
        tracing::debug!(room_id = %room_id, sent, "推送房间成员列表");
        sent
    }

    pub async fn snapshot(&self, room_id: &RoomId) -> PresenceSnapshot {
        self.registry.snapshot(room_id).await
    }

    pub async fn record_join(&self, room_id: &RoomId, user_id: &UserId) {
        if let Err(err) = self.store.add_member(room_id, user_id).await {
            warn!(room_id = %room_id, user_id = %user_id, error = %err, "写入在线状态失败");
        }
    }

    /// 同步成员离开到存储；该用户仍有其他连接在房间内时保留
    ///
    /// 只能看到本节点的连接。同一用户在其它节点仍在房间内时，
    /// 房间集合中的记录会在那个节点下一次心跳时重新写入。
    pub async fn record_departure(&self, departure: &Departure) {
        if departure.user_still_present {
            return;
        }
        if let Err(err) = self
            .store
            .remove_member(&departure.room_id, &departure.user_id)
            .await
        {
            warn!(
                room_id = %departure.room_id,
                user_id = %departure.user_id,
                error = %err,
                "移除在线状态失败"
            );
        }
    }

    /// 成员离开后同步存储并通知房间剩余成员
    pub async fn member_departed(&self, departure: &Departure) {
        self.record_departure(departure).await;
        if !departure.room_emptied {
            self.notify(&departure.room_id).await;
        }
    }

    /// 刷新用户在线标记；在房间内时一并刷新房间集合
    pub async fn heartbeat(&self, room_id: Option<&RoomId>, user_id: &UserId) {
        if let Err(err) = self.store.mark_online(user_id).await {
            warn!(user_id = %user_id, error = %err, "刷新在线标记失败");
        }
        if let Some(room_id) = room_id {
            self.record_join(room_id, user_id).await;
        }
    }

    pub async fn online_members(&self, room_id: &RoomId) -> Result<Vec<UserId>, ApplicationError> {
        self.store.online_members(room_id).await
    }
}
