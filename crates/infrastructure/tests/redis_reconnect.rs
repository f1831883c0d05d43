//! 订阅连接被服务端断开后的恢复行为
//!
//! 需要真实 Redis：设置 `REDIS_INTEGRATION_TEST` 后运行，地址取自 `REDIS_URL`。

use std::time::Duration;

use application::{BrokerEnvelope, MessageBroker};
use chrono::Utc;
use domain::{ChatMessage, NodeId, RoomId, UserId};
use infrastructure::{RedisConfig, RedisMessageBroker};

fn test_config() -> RedisConfig {
    RedisConfig {
        url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
        room_channel_prefix: format!("test_room:{}:", uuid::Uuid::new_v4()),
        reconnect_interval_ms: 100,
        max_reconnect_interval_ms: 400,
        ..RedisConfig::default()
    }
}

fn envelope(room: &RoomId, text: &str) -> BrokerEnvelope {
    let message = ChatMessage::new(
        UserId::parse("a").unwrap(),
        room.clone(),
        text,
        2000,
        Utc::now(),
    );
    BrokerEnvelope::new(NodeId::new(), message)
}

async fn kill_pubsub_clients(url: &str) {
    let client = redis::Client::open(url).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let killed: i64 = redis::cmd("CLIENT")
        .arg("KILL")
        .arg("TYPE")
        .arg("pubsub")
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(killed >= 1);
}

#[tokio::test]
async fn publish_never_succeeds_silently_across_a_pubsub_drop() {
    if std::env::var("REDIS_INTEGRATION_TEST").is_err() {
        return;
    }
    let config = test_config();
    let (broker, mut inbox) = RedisMessageBroker::connect(&config).await.unwrap();
    assert!(broker.wait_connected(Duration::from_secs(2)).await);

    let room = RoomId::parse("r1").unwrap();
    broker.subscribe(&room).await.unwrap();

    kill_pubsub_clients(&config.url).await;

    // 每次发布要么报告不可用，要么消息确实回流；恢复后订阅的频道照常收到消息
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut recovered = false;
    let mut attempt = 0;
    while tokio::time::Instant::now() < deadline {
        attempt += 1;
        let sent = envelope(&room, &format!("attempt-{attempt}"));
        match broker.publish(&sent).await {
            Ok(()) => {
                let received = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
                    .await
                    .expect("published message must come back")
                    .unwrap();
                assert_eq!(received, sent);
                recovered = true;
                break;
            }
            Err(err) => {
                assert!(err.is_retryable());
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }

    assert!(recovered, "subscriber did not reconnect in time");
    broker.shutdown();
}
