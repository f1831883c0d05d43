use application::{ApplicationError, PresenceStore};
use async_trait::async_trait;
use domain::{RoomId, UserId};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::config::RedisConfig;
use crate::redis::{RedisError, RedisResult};

/// 房间在线集合的过期时间，防止进程崩溃后残留
const ROOM_SET_TTL_SECONDS: i64 = 86_400;

/// Redis实现的在线状态存储
///
/// - `room:{room_id}:online`：房间在线用户集合
/// - `online:{user_id}`：用户在线标记，带过期时间，心跳时刷新
#[derive(Clone)]
pub struct RedisPresenceStore {
    connection: ConnectionManager,
    online_ttl_seconds: u64,
}

impl RedisPresenceStore {
    pub async fn connect(config: &RedisConfig) -> RedisResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| RedisError::ConfigError {
            message: format!("创建 Redis 客户端失败: {}", e),
        })?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection,
            online_ttl_seconds: config.online_ttl_seconds,
        })
    }

    /// 生成房间在线用户集合的Redis键
    fn room_online_key(room_id: &RoomId) -> String {
        format!("room:{}:online", room_id)
    }

    /// 生成用户在线标记的Redis键
    fn user_online_key(user_id: &UserId) -> String {
        format!("online:{}", user_id)
    }
}

fn redis_failure(e: redis::RedisError) -> ApplicationError {
    ApplicationError::infrastructure(format!("Redis operation failed: {e}"))
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn mark_online(&self, user_id: &UserId) -> Result<(), ApplicationError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .set_ex(Self::user_online_key(user_id), 1, self.online_ttl_seconds)
            .await
            .map_err(redis_failure)?;
        Ok(())
    }

    async fn add_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), ApplicationError> {
        let mut conn = self.connection.clone();
        let room_key = Self::room_online_key(room_id);

        let _: () = redis::pipe()
            .sadd(&room_key, user_id.as_str())
            .ignore()
            .expire(&room_key, ROOM_SET_TTL_SECONDS)
            .ignore()
            .set_ex(Self::user_online_key(user_id), 1, self.online_ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(redis_failure)?;

        tracing::debug!(room_id = %room_id, user_id = %user_id, "写入房间在线集合");
        Ok(())
    }

    async fn remove_member(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<(), ApplicationError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .srem(Self::room_online_key(room_id), user_id.as_str())
            .await
            .map_err(redis_failure)?;

        tracing::debug!(room_id = %room_id, user_id = %user_id, "移出房间在线集合");
        Ok(())
    }

    /// 房间集合中在线标记仍未过期的用户
    async fn online_members(&self, room_id: &RoomId) -> Result<Vec<UserId>, ApplicationError> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = conn
            .smembers(Self::room_online_key(room_id))
            .await
            .map_err(redis_failure)?;

        let mut users: Vec<UserId> = members
            .into_iter()
            .filter_map(|member| UserId::parse(member).ok())
            .collect();
        if users.is_empty() {
            return Ok(users);
        }

        let mut pipe = redis::pipe();
        for user_id in &users {
            pipe.exists(Self::user_online_key(user_id));
        }
        let alive: Vec<bool> = pipe.query_async(&mut conn).await.map_err(redis_failure)?;

        let mut alive = alive.into_iter();
        users.retain(|_| alive.next().unwrap_or(false));
        users.sort();
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RedisConfig {
        RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
            ..RedisConfig::default()
        }
    }

    #[test]
    fn keys_follow_room_and_user_layout() {
        let room = RoomId::parse("peer-support-1").unwrap();
        let user = UserId::parse("42").unwrap();
        assert_eq!(RedisPresenceStore::room_online_key(&room), "room:peer-support-1:online");
        assert_eq!(RedisPresenceStore::user_online_key(&user), "online:42");
    }

    #[tokio::test]
    async fn test_membership_round_trip() {
        if std::env::var("REDIS_INTEGRATION_TEST").is_err() {
            return;
        }
        let store = RedisPresenceStore::connect(&test_config()).await.unwrap();
        let room = RoomId::parse(format!("test-{}", uuid::Uuid::new_v4())).unwrap();
        let alice = UserId::parse("alice").unwrap();
        let bob = UserId::parse("bob").unwrap();

        store.add_member(&room, &alice).await.unwrap();
        store.add_member(&room, &bob).await.unwrap();
        assert_eq!(
            store.online_members(&room).await.unwrap(),
            vec![alice.clone(), bob.clone()]
        );

        store.remove_member(&room, &alice).await.unwrap();
        assert_eq!(store.online_members(&room).await.unwrap(), vec![bob.clone()]);
        store.remove_member(&room, &bob).await.unwrap();
    }
}
