use livescribe_config::Settings;
use livescribe_services::{
    ClusterBus, ConnectionRegistry, LocalClusterBus, RedisClusterBus, TranscriptBroadcaster,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub instance_id: String,
    pub broadcaster: Arc<TranscriptBroadcaster>,
    pub registry: Arc<ConnectionRegistry>,
}

impl AppState {
    /// Connects the cluster bus (Redis when configured) and starts relaying.
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let instance_id = settings
            .cluster
            .instance_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let bus: Arc<dyn ClusterBus> = match settings.redis.url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => {
                let bus = RedisClusterBus::connect(url, &settings.redis.channel).await?;
                info!(channel = %settings.redis.channel, "Cluster relay over Redis");
                Arc::new(bus)
            }
            None => {
                info!("No Redis URL configured; relaying in-process only");
                Arc::new(LocalClusterBus::new())
            }
        };

        Ok(Self::with_bus(settings, instance_id, bus))
    }

    /// Must be called inside a tokio runtime.
    pub fn with_bus(settings: Settings, instance_id: String, bus: Arc<dyn ClusterBus>) -> Self {
        let broadcaster = TranscriptBroadcaster::new(instance_id.clone(), bus);
        broadcaster.start_relay();
        let registry = ConnectionRegistry::from_settings(&settings.rtms, Arc::clone(&broadcaster));

        Self {
            settings,
            instance_id,
            broadcaster,
            registry,
        }
    }
}
