use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use domain::RoomId;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::presence::PresenceBroadcaster;
use crate::registry::{Departure, RoomRegistry};
use crate::relay::MessageRelay;

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub sweep_interval: Duration,
    /// 超过该时长未收到心跳的成员会被驱逐
    pub staleness_threshold: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10),
            staleness_threshold: Duration::from_secs(60),
        }
    }
}

/// 心跳巡检：定期驱逐失联成员
pub struct HeartbeatMonitor {
    registry: Arc<RoomRegistry>,
    presence: Arc<PresenceBroadcaster>,
    relay: Arc<MessageRelay>,
    clock: Arc<dyn Clock>,
    config: HeartbeatConfig,
}

impl HeartbeatMonitor {
    pub fn new(
        registry: Arc<RoomRegistry>,
        presence: Arc<PresenceBroadcaster>,
        relay: Arc<MessageRelay>,
        clock: Arc<dyn Clock>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            registry,
            presence,
            relay,
            clock,
            config,
        }
    }

    /// 执行一次巡检，返回被驱逐的成员
    pub async fn sweep(&self) -> Vec<Departure> {
        // 阈值超出时间范围时不驱逐任何成员
        let cutoff = chrono::Duration::from_std(self.config.staleness_threshold)
            .ok()
            .and_then(|threshold| self.clock.now().checked_sub_signed(threshold))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
        let departures = self.registry.evict_stale(cutoff).await;

        let mut affected: BTreeSet<RoomId> = BTreeSet::new();
        for departure in &departures {
            info!(
                connection_id = %departure.connection_id,
                user_id = %departure.user_id,
                room_id = %departure.room_id,
                "心跳超时，驱逐成员"
            );
            self.presence.record_departure(departure).await;
            if !departure.room_emptied {
                affected.insert(departure.room_id.clone());
            }
        }
        for room_id in &affected {
            self.presence.notify(room_id).await;
        }

        self.relay.prune_subscriptions().await;
        departures
    }

    /// 启动后台巡检任务，直到 `shutdown` 被取消
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即返回
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = self.sweep().await;
                        if !evicted.is_empty() {
                            debug!(evicted = evicted.len(), "心跳巡检完成");
                        }
                    }
                }
            }
            debug!("心跳巡检任务结束");
        })
    }
}
