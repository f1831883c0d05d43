//! 主应用程序入口
//!
//! 加载配置，组装聊天运行时并启动 Axum 服务，收到 Ctrl+C 后优雅退出。

use std::sync::Arc;

use application::{
    Backoff, BrokerInbox, ChatRuntime, ChatRuntimeDependencies, ChatSettings, HeartbeatConfig,
    LocalBrokerHub, MemoryPresenceStore, MessageBroker, PresenceStore, RelayConfig, RetryPolicy,
    SystemClock,
};
use config::{AppConfig, BrokerKind};
use infrastructure::{RedisConfig, RedisMessageBroker, RedisPresenceStore};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

/// 进程内代理的广播缓冲区大小
const LOCAL_BROKER_CAPACITY: usize = 1024;

struct Backends {
    broker: Arc<dyn MessageBroker>,
    inbox: BrokerInbox,
    presence_store: Arc<dyn PresenceStore>,
    redis_broker: Option<Arc<RedisMessageBroker>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    let backends = build_backends(&config).await?;

    let settings = ChatSettings {
        heartbeat: HeartbeatConfig {
            sweep_interval: config.presence.sweep_interval(),
            staleness_threshold: config.presence.staleness_threshold(),
        },
        relay: RelayConfig {
            max_message_chars: config.chat.max_message_chars,
            retry: RetryPolicy {
                max_attempts: config.broker.retry_max_attempts,
                backoff: Backoff::exponential(
                    config.broker.retry_base_delay(),
                    config.broker.retry_base_delay() * 16,
                ),
            },
        },
    };

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let runtime = ChatRuntime::start(ChatRuntimeDependencies {
        verifier: jwt_service.clone(),
        broker: backends.broker,
        inbox: backends.inbox,
        presence_store: backends.presence_store,
        clock: Arc::new(SystemClock),
        settings,
    });

    let state = AppState::new(runtime.clone(), jwt_service);
    let app = router(state, &config.server.cors_origins);

    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %bind_address, broker = ?config.broker.kind, "聊天中继服务启动");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    runtime.shutdown().await;
    if let Some(redis_broker) = backends.redis_broker {
        redis_broker.shutdown();
    }
    tracing::info!("服务已停止");

    Ok(())
}

async fn build_backends(config: &AppConfig) -> anyhow::Result<Backends> {
    match config.broker.kind {
        BrokerKind::Local => {
            let (broker, inbox) = LocalBrokerHub::new(LOCAL_BROKER_CAPACITY).attach();
            Ok(Backends {
                broker: Arc::new(broker),
                inbox,
                presence_store: Arc::new(MemoryPresenceStore::with_clock(
                    Arc::new(SystemClock),
                    config.presence.online_ttl(),
                )),
                redis_broker: None,
            })
        }
        BrokerKind::Redis => {
            let redis_config = RedisConfig {
                url: config.broker.redis_url.clone().unwrap_or_default(),
                room_channel_prefix: config.broker.channel_prefix.clone(),
                online_ttl_seconds: config.presence.online_ttl_secs,
                ..RedisConfig::default()
            };

            let (broker, inbox) = RedisMessageBroker::connect(&redis_config).await?;
            let presence_store = RedisPresenceStore::connect(&redis_config).await?;
            tracing::info!("已连接 Redis");

            let broker = Arc::new(broker);
            Ok(Backends {
                broker: broker.clone(),
                inbox,
                presence_store: Arc::new(presence_store),
                redis_broker: Some(broker),
            })
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听退出信号失败");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始关闭");
}
