#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    ChatRuntime, ChatRuntimeDependencies, ChatSettings, LocalBrokerHub, MemoryPresenceStore,
    SystemClock,
};
use domain::UserId;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtConfig, JwtService};

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct TestServer {
    pub addr: SocketAddr,
    pub runtime: Arc<ChatRuntime>,
    jwt: JwtService,
    shutdown: Option<oneshot::Sender<()>>,
}

pub fn jwt_service() -> JwtService {
    JwtService::new(JwtConfig {
        secret: "test-secret-key".to_string(),
        expiration_hours: 24,
    })
}

/// 启动一个挂接到 `hub` 的服务节点，多个节点共享同一个 hub 即模拟多进程部署
pub async fn spawn_server(hub: &LocalBrokerHub) -> TestServer {
    let (broker, inbox) = hub.attach();
    let jwt = jwt_service();

    let runtime = ChatRuntime::start(ChatRuntimeDependencies {
        verifier: Arc::new(jwt.clone()),
        broker: Arc::new(broker),
        inbox,
        presence_store: Arc::new(MemoryPresenceStore::new()),
        clock: Arc::new(SystemClock),
        settings: ChatSettings::default(),
    });

    let state = AppState::new(runtime.clone(), Arc::new(jwt.clone()));
    let app = router(state, &["*".to_string()]);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    // allow server to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    TestServer {
        addr,
        runtime,
        jwt,
        shutdown: Some(shutdown_tx),
    }
}

impl TestServer {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn token(&self, user: &str) -> String {
        self.jwt
            .generate_token(&UserId::parse(user).unwrap())
            .expect("token")
    }

    /// 以 `user` 身份连接并消费掉 `connected` 事件
    pub async fn connect(&self, user: &str) -> WsStream {
        let url = format!("ws://{}/chat?token={}", self.addr, self.token(user));
        let (mut stream, _) = connect_async(url).await.expect("websocket connect");
        let connected = next_event(&mut stream).await;
        assert_eq!(connected["event"], "connected");
        assert_eq!(connected["userId"], user);
        stream
    }

    pub async fn stop(mut self) {
        self.runtime.shutdown().await;
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn send_json(stream: &mut WsStream, value: Value) {
    use futures_util::SinkExt;
    stream
        .send(TungsteniteMessage::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

/// 读取下一条文本事件
pub async fn next_event(stream: &mut WsStream) -> Value {
    loop {
        let message = timeout(EVENT_TIMEOUT, stream.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream closed")
            .expect("websocket error");
        if let TungsteniteMessage::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("event json");
        }
    }
}

/// 跳过其它事件，直到收到满足条件的事件
pub async fn wait_for(stream: &mut WsStream, matches: impl Fn(&Value) -> bool) -> Value {
    loop {
        let event = next_event(stream).await;
        if matches(&event) {
            return event;
        }
    }
}

pub async fn wait_for_users(stream: &mut WsStream, room: &str, users: &[&str]) -> Value {
    wait_for(stream, |event| {
        event["event"] == "room_users" && event["roomId"] == room && event["users"] == serde_json::json!(users)
    })
    .await
}

/// 断言一段时间内没有收到满足条件的事件
pub async fn assert_no_event(stream: &mut WsStream, matches: impl Fn(&Value) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match timeout(remaining, stream.next()).await {
            Err(_) => return,
            Ok(Some(Ok(TungsteniteMessage::Text(text)))) => {
                let event: Value = serde_json::from_str(text.as_str()).expect("event json");
                assert!(!matches(&event), "unexpected event: {event}");
            }
            Ok(Some(Ok(_))) => {}
            Ok(_) => return,
        }
    }
}
