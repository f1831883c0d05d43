use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::{BrokerInbox, MessageBroker};
use crate::clock::Clock;
use crate::gateway::{ConnectionGateway, TokenVerifier};
use crate::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use crate::presence::{PresenceBroadcaster, PresenceStore};
use crate::registry::RoomRegistry;
use crate::relay::{MessageRelay, RelayConfig};

#[derive(Debug, Clone, Default)]
pub struct ChatSettings {
    pub heartbeat: HeartbeatConfig,
    pub relay: RelayConfig,
}

/// 组装聊天运行时所需的外部协作方
pub struct ChatRuntimeDependencies {
    pub verifier: Arc<dyn TokenVerifier>,
    pub broker: Arc<dyn MessageBroker>,
    pub inbox: BrokerInbox,
    pub presence_store: Arc<dyn PresenceStore>,
    pub clock: Arc<dyn Clock>,
    pub settings: ChatSettings,
}

/// 聊天运行时：持有注册表及各组件，并管理后台任务的生命周期
pub struct ChatRuntime {
    gateway: Arc<ConnectionGateway>,
    registry: Arc<RoomRegistry>,
    presence: Arc<PresenceBroadcaster>,
    relay: Arc<MessageRelay>,
    monitor: Arc<HeartbeatMonitor>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatRuntime {
    /// 构建组件并启动代理收件箱与心跳巡检任务，需在 tokio 运行时内调用
    pub fn start(deps: ChatRuntimeDependencies) -> Arc<Self> {
        let ChatRuntimeDependencies {
            verifier,
            broker,
            inbox,
            presence_store,
            clock,
            settings,
        } = deps;

        let registry = Arc::new(RoomRegistry::new(clock.clone()));
        let presence = Arc::new(PresenceBroadcaster::new(registry.clone(), presence_store));
        let relay = Arc::new(MessageRelay::new(
            registry.clone(),
            broker,
            clock.clone(),
            settings.relay,
        ));
        let monitor = Arc::new(HeartbeatMonitor::new(
            registry.clone(),
            presence.clone(),
            relay.clone(),
            clock,
            settings.heartbeat,
        ));
        let gateway = Arc::new(ConnectionGateway::new(
            verifier,
            registry.clone(),
            presence.clone(),
            relay.clone(),
        ));

        let shutdown = CancellationToken::new();
        let tasks = vec![
            relay.spawn_inbox(inbox, shutdown.child_token()),
            monitor.clone().spawn(shutdown.child_token()),
        ];

        info!(node_id = %relay.node_id(), "聊天运行时已启动");
        Arc::new(Self {
            gateway,
            registry,
            presence,
            relay,
            monitor,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn gateway(&self) -> &Arc<ConnectionGateway> {
        &self.gateway
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn presence(&self) -> &Arc<PresenceBroadcaster> {
        &self.presence
    }

    pub fn relay(&self) -> &Arc<MessageRelay> {
        &self.relay
    }

    pub fn monitor(&self) -> &Arc<HeartbeatMonitor> {
        &self.monitor
    }

    /// 停止后台任务并驱逐全部成员
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "后台任务异常退出");
            }
        }

        let departures = self.registry.shutdown().await;
        for departure in &departures {
            self.presence.record_departure(departure).await;
        }
        self.relay.prune_subscriptions().await;
        info!(evicted = departures.len(), "聊天运行时已关闭");
    }
}
