//! 房间注册表
//!
//! 唯一持有「连接 → 房间」与「房间 → 成员」两张映射的组件。
//!
//! 并发约束：
//! - 每个房间一把互斥锁，同一房间的加入、离开、心跳、驱逐串行执行，不同房间互不阻塞；
//! - 加锁顺序固定为 房间表 → 房间 → 连接表，持锁期间不做任何网络 I/O；
//! - 某连接的成员记录与它在连接表中的房间指向只在该房间的锁内修改，二者始终一致。

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use domain::{ConnectionId, PresenceSnapshot, RoomId, ServerEvent, Timestamp, UserId};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

use crate::clock::Clock;

/// 推送给单条连接的事件通道
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

/// 已认证连接的句柄，由连接网关创建
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    outbound: Outbound,
}

impl ConnectionHandle {
    pub fn new(user_id: UserId, outbound: Outbound) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id,
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// 连接的写端已关闭时返回 false
    pub fn send(&self, event: ServerEvent) -> bool {
        self.outbound.send(event).is_ok()
    }
}

#[derive(Debug)]
struct Member {
    user_id: UserId,
    last_seen: Timestamp,
    outbound: Outbound,
}

/// 单个房间的成员表
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: HashMap<ConnectionId, Member>,
    /// 已从房间表移除；持有旧引用的加入操作需要重新获取房间
    closed: bool,
}

impl Room {
    fn new(id: RoomId) -> Self {
        Self {
            id,
            members: HashMap::new(),
            closed: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains_user(&self, user_id: &UserId) -> bool {
        self.members.values().any(|member| &member.user_id == user_id)
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot::new(
            self.id.clone(),
            self.members.values().map(|member| member.user_id.clone()),
        )
    }

    /// 向全部成员推送事件，返回成功写入的连接数
    pub fn send_all(&self, event: &ServerEvent) -> usize {
        self.members
            .values()
            .filter(|member| member.outbound.send(event.clone()).is_ok())
            .count()
    }
}

/// 一条成员记录被移除的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub room_id: RoomId,
    /// 该用户仍有其他连接留在房间内
    pub user_still_present: bool,
    pub room_emptied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub room_id: RoomId,
    /// 从之前所在房间移除的记录
    pub previous: Option<Departure>,
    /// 已在该房间内，仅刷新了心跳时间
    pub refreshed: bool,
}

pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Arc<Mutex<Room>>>>,
    memberships: Mutex<HashMap<ConnectionId, RoomId>>,
    clock: Arc<dyn Clock>,
}

impl RoomRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            memberships: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// 加入房间；若连接原本在其他房间，先从旧房间移除
    pub async fn join(&self, connection: &ConnectionHandle, room_id: RoomId) -> JoinOutcome {
        let previous_room = self.current_room(connection.id()).await;
        let previous = match previous_room {
            Some(previous_room) if previous_room != room_id => {
                self.remove_member(&previous_room, connection.id()).await
            }
            _ => None,
        };

        let refreshed = loop {
            let room = self.room_for_join(&room_id).await;
            let mut guard = room.lock().await;
            if guard.closed {
                continue;
            }

            let now = self.clock.now();
            let refreshed = match guard.members.entry(connection.id()) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().last_seen = now;
                    true
                }
                Entry::Vacant(entry) => {
                    entry.insert(Member {
                        user_id: connection.user_id().clone(),
                        last_seen: now,
                        outbound: connection.outbound.clone(),
                    });
                    false
                }
            };
            self.memberships
                .lock()
                .await
                .insert(connection.id(), room_id.clone());
            break refreshed;
        };

        debug!(
            connection_id = %connection.id(),
            user_id = %connection.user_id(),
            room_id = %room_id,
            refreshed,
            "连接加入房间"
        );

        JoinOutcome {
            room_id,
            previous,
            refreshed,
        }
    }

    /// 离开当前房间；不在任何房间时什么也不做
    pub async fn leave(&self, connection_id: ConnectionId) -> Option<Departure> {
        let room_id = self.current_room(connection_id).await?;
        self.remove_member(&room_id, connection_id).await
    }

    /// 刷新心跳时间；不在任何房间时静默忽略
    pub async fn touch(&self, connection_id: ConnectionId) -> bool {
        let Some(room_id) = self.current_room(connection_id).await else {
            return false;
        };
        let Some(room) = self.room(&room_id).await else {
            return false;
        };

        let mut guard = room.lock().await;
        match guard.members.get_mut(&connection_id) {
            Some(member) => {
                member.last_seen = self.clock.now();
                true
            }
            None => false,
        }
    }

    /// 房间当前成员；未知房间返回空列表
    pub async fn members(&self, room_id: &RoomId) -> Vec<UserId> {
        self.snapshot(room_id).await.users
    }

    pub async fn snapshot(&self, room_id: &RoomId) -> PresenceSnapshot {
        self.inspect_room(room_id, Room::snapshot)
            .await
            .unwrap_or_else(|| PresenceSnapshot::new(room_id.clone(), Vec::new()))
    }

    pub async fn current_room(&self, connection_id: ConnectionId) -> Option<RoomId> {
        self.memberships.lock().await.get(&connection_id).cloned()
    }

    pub async fn is_member(&self, connection_id: ConnectionId, room_id: &RoomId) -> bool {
        self.current_room(connection_id).await.as_ref() == Some(room_id)
    }

    /// 在房间锁内读取房间；房间不存在时返回 None
    pub async fn inspect_room<R>(&self, room_id: &RoomId, f: impl FnOnce(&Room) -> R) -> Option<R> {
        let room = self.room(room_id).await?;
        let guard = room.lock().await;
        Some(f(&guard))
    }

    /// 向房间内全部本进程成员投递事件
    pub async fn deliver(&self, room_id: &RoomId, event: ServerEvent) -> usize {
        self.inspect_room(room_id, |room| room.send_all(&event))
            .await
            .unwrap_or(0)
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.read().await.keys().cloned().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.memberships.lock().await.len()
    }

    /// 驱逐最后心跳早于 `cutoff` 的成员
    ///
    /// 逐个房间加锁检查，同一时刻最多持有一个房间锁。
    pub async fn evict_stale(&self, cutoff: Timestamp) -> Vec<Departure> {
        let rooms: Vec<(RoomId, Arc<Mutex<Room>>)> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(id, room)| (id.clone(), Arc::clone(room)))
            .collect();

        let mut departures = Vec::new();
        for (room_id, room) in rooms {
            let emptied = {
                let mut guard = room.lock().await;
                let stale: Vec<ConnectionId> = guard
                    .members
                    .iter()
                    .filter(|(_, member)| member.last_seen < cutoff)
                    .map(|(id, _)| *id)
                    .collect();
                if stale.is_empty() {
                    continue;
                }

                let mut memberships = self.memberships.lock().await;
                for connection_id in stale {
                    let Some(member) = guard.members.remove(&connection_id) else {
                        continue;
                    };
                    if memberships.get(&connection_id) == Some(&room_id) {
                        memberships.remove(&connection_id);
                    }
                    departures.push(Departure {
                        connection_id,
                        user_still_present: guard.contains_user(&member.user_id),
                        user_id: member.user_id,
                        room_id: room_id.clone(),
                        room_emptied: guard.is_empty(),
                    });
                }
                guard.is_empty()
            };

            if emptied {
                self.prune_room(&room_id).await;
            }
        }

        departures
    }

    /// 关闭注册表，移除全部成员
    pub async fn shutdown(&self) -> Vec<Departure> {
        let mut rooms = self.rooms.write().await;
        let mut departures = Vec::new();

        for (room_id, room) in rooms.drain() {
            let mut guard = room.lock().await;
            guard.closed = true;
            for (connection_id, member) in guard.members.drain() {
                departures.push(Departure {
                    connection_id,
                    user_id: member.user_id,
                    room_id: room_id.clone(),
                    user_still_present: false,
                    room_emptied: true,
                });
            }
        }
        self.memberships.lock().await.clear();

        info!(evicted = departures.len(), "房间注册表已关闭");
        departures
    }

    async fn room(&self, room_id: &RoomId) -> Option<Arc<Mutex<Room>>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    async fn room_for_join(&self, room_id: &RoomId) -> Arc<Mutex<Room>> {
        if let Some(room) = self.room(room_id).await {
            return room;
        }
        let mut rooms = self.rooms.write().await;
        Arc::clone(
            rooms
                .entry(room_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Room::new(room_id.clone())))),
        )
    }

    async fn remove_member(
        &self,
        room_id: &RoomId,
        connection_id: ConnectionId,
    ) -> Option<Departure> {
        let room = self.room(room_id).await?;
        let departure = {
            let mut guard = room.lock().await;
            let member = guard.members.remove(&connection_id)?;
            let mut memberships = self.memberships.lock().await;
            if memberships.get(&connection_id) == Some(room_id) {
                memberships.remove(&connection_id);
            }
            Departure {
                connection_id,
                user_still_present: guard.contains_user(&member.user_id),
                user_id: member.user_id,
                room_id: room_id.clone(),
                room_emptied: guard.is_empty(),
            }
        };

        if departure.room_emptied {
            self.prune_room(room_id).await;
        }
        debug!(
            connection_id = %connection_id,
            user_id = %departure.user_id,
            room_id = %room_id,
            "连接离开房间"
        );
        Some(departure)
    }

    /// 房间已空时从房间表删除
    async fn prune_room(&self, room_id: &RoomId) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(room_id).cloned() else {
            return;
        };
        let mut guard = room.lock().await;
        if guard.is_empty() {
            guard.closed = true;
            rooms.remove(room_id);
            debug!(room_id = %room_id, "空房间已删除");
        }
    }
}
