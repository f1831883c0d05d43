mod support;

use application::LocalBrokerHub;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;

use support::{assert_no_event, send_json, spawn_server, wait_for, wait_for_users};

fn is_chat(text: &'static str) -> impl Fn(&Value) -> bool {
    move |event| event["event"] == "chat_message" && event["text"] == text
}

#[tokio::test]
async fn health_reports_ok() {
    let server = spawn_server(&LocalBrokerHub::new(64)).await;

    let response = reqwest::get(server.http_url("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({ "ok": true }));

    server.stop().await;
}

#[tokio::test]
async fn rejects_missing_or_invalid_token_before_upgrade() {
    let server = spawn_server(&LocalBrokerHub::new(64)).await;

    let missing = connect_async(format!("ws://{}/chat", server.addr)).await;
    assert!(missing.is_err());

    let forged = connect_async(format!("ws://{}/chat?token=not-a-jwt", server.addr)).await;
    assert!(forged.is_err());

    assert_eq!(server.runtime.registry().connection_count().await, 0);
    server.stop().await;
}

#[tokio::test]
async fn members_share_presence_and_messages() {
    let server = spawn_server(&LocalBrokerHub::new(64)).await;
    let mut alice = server.connect("1").await;
    let mut bob = server.connect("2").await;

    send_json(&mut alice, json!({ "event": "join_room", "roomId": "r1" })).await;
    wait_for_users(&mut alice, "r1", &["1"]).await;

    send_json(&mut bob, json!({ "event": "join_room", "roomId": "r1" })).await;
    wait_for_users(&mut alice, "r1", &["1", "2"]).await;
    wait_for_users(&mut bob, "r1", &["1", "2"]).await;

    send_json(
        &mut alice,
        json!({ "event": "chat_message", "roomId": "r1", "text": "hello" }),
    )
    .await;

    let received = wait_for(&mut bob, is_chat("hello")).await;
    assert_eq!(received["sender"], "1");
    assert_eq!(received["roomId"], "r1");
    assert!(received["timestamp"].is_string());

    // 发送者同样收到一份
    let echoed = wait_for(&mut alice, is_chat("hello")).await;
    assert_eq!(echoed["sender"], "1");
    assert_no_event(&mut alice, is_chat("hello")).await;

    server.stop().await;
}

#[tokio::test]
async fn switching_rooms_updates_both_rooms() {
    let server = spawn_server(&LocalBrokerHub::new(64)).await;
    let mut alice = server.connect("1").await;
    let mut bob = server.connect("2").await;

    send_json(&mut alice, json!({ "event": "join_room", "roomId": "r1" })).await;
    wait_for_users(&mut alice, "r1", &["1"]).await;
    send_json(&mut bob, json!({ "event": "join_room", "roomId": "r1" })).await;
    wait_for_users(&mut bob, "r1", &["1", "2"]).await;

    send_json(&mut alice, json!({ "event": "join_room", "roomId": "r2" })).await;
    wait_for_users(&mut bob, "r1", &["2"]).await;
    wait_for_users(&mut alice, "r2", &["1"]).await;

    // 离开后不再收到 r1 的消息
    send_json(
        &mut bob,
        json!({ "event": "chat_message", "roomId": "r1", "text": "still here?" }),
    )
    .await;
    wait_for(&mut bob, is_chat("still here?")).await;
    assert_no_event(&mut alice, is_chat("still here?")).await;

    server.stop().await;
}

#[tokio::test]
async fn chat_outside_joined_room_is_rejected() {
    let server = spawn_server(&LocalBrokerHub::new(64)).await;
    let mut alice = server.connect("1").await;

    send_json(
        &mut alice,
        json!({ "event": "chat_message", "roomId": "r1", "text": "sneaky" }),
    )
    .await;
    let error = wait_for(&mut alice, |event| event["event"] == "error").await;
    assert_eq!(error["code"], "AUTHORIZATION_FAILED");

    send_json(&mut alice, json!({ "event": "nonsense" })).await;
    wait_for(&mut alice, |event| event["event"] == "error").await;

    server.stop().await;
}

#[tokio::test]
async fn disconnect_removes_member_and_notifies_room() {
    let server = spawn_server(&LocalBrokerHub::new(64)).await;
    let mut alice = server.connect("1").await;
    let mut bob = server.connect("2").await;

    send_json(&mut alice, json!({ "event": "join_room", "roomId": "r1" })).await;
    send_json(&mut bob, json!({ "event": "join_room", "roomId": "r1" })).await;
    wait_for_users(&mut alice, "r1", &["1", "2"]).await;

    drop(bob);
    wait_for_users(&mut alice, "r1", &["1"]).await;

    server.stop().await;
}

#[tokio::test]
async fn room_endpoints_require_bearer_token() {
    let server = spawn_server(&LocalBrokerHub::new(64)).await;
    let mut alice = server.connect("1").await;
    send_json(&mut alice, json!({ "event": "join_room", "roomId": "r1" })).await;
    wait_for_users(&mut alice, "r1", &["1"]).await;

    let client = Client::new();
    let unauthorized = client
        .get(server.http_url("/api/v1/rooms/r1/users"))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

    for path in ["/api/v1/rooms/r1/users", "/api/v1/rooms/r1/online"] {
        let response = client
            .get(server.http_url(path))
            .bearer_auth(server.token("9"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.json::<Value>().await.unwrap(),
            json!({ "roomId": "r1", "users": ["1"] })
        );
    }

    server.stop().await;
}

#[tokio::test]
async fn messages_cross_nodes_through_the_broker() {
    let hub = LocalBrokerHub::new(64);
    let node_a = spawn_server(&hub).await;
    let node_b = spawn_server(&hub).await;

    let mut alice = node_a.connect("1").await;
    let mut bob = node_b.connect("2").await;

    send_json(&mut alice, json!({ "event": "join_room", "roomId": "r1" })).await;
    wait_for_users(&mut alice, "r1", &["1"]).await;
    send_json(&mut bob, json!({ "event": "join_room", "roomId": "r1" })).await;
    wait_for_users(&mut bob, "r1", &["2"]).await;

    send_json(
        &mut alice,
        json!({ "event": "chat_message", "roomId": "r1", "text": "across" }),
    )
    .await;

    let received = wait_for(&mut bob, is_chat("across")).await;
    assert_eq!(received["sender"], "1");
    wait_for(&mut alice, is_chat("across")).await;
    assert_no_event(&mut bob, is_chat("across")).await;

    node_a.stop().await;
    node_b.stop().await;
}
