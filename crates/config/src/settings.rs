use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub app: AppSettings,
    pub rtms: RtmsSettings,
    pub redis: RedisSettings,
    pub cluster: ClusterSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

/// Credentials and protocol parameters for the remote real-time media service.
#[derive(Debug, Deserialize, Clone)]
pub struct RtmsSettings {
    pub client_id: String,
    /// Pre-shared key used to sign both handshakes. Sessions refuse to start without it.
    pub client_secret: Option<String>,
    /// Secret token for answering the webhook endpoint validation challenge.
    pub webhook_secret_token: Option<String>,
    pub protocol_version: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisSettings {
    /// When unset the cluster bus stays in-process (single instance).
    pub url: Option<String>,
    pub channel: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterSettings {
    /// Identity stamped on relayed envelopes. Defaults to a random UUID per process.
    pub instance_id: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .prefix("LIVESCRIBE"),
            )
            .set_default("app.host", "0.0.0.0")?
            .set_default("app.port", 3000)?
            .set_default("app.cors_origins", Vec::<String>::new())?
            .set_default("rtms.client_id", "")?
            .set_default("rtms.client_secret", None::<String>)?
            .set_default("rtms.webhook_secret_token", None::<String>)?
            .set_default("rtms.protocol_version", 1)?
            .set_default("redis.url", None::<String>)?
            .set_default("redis.channel", "livescribe:transcripts")?
            .set_default("cluster.instance_id", None::<String>)?
            .build()?;

        config.try_deserialize()
    }
}
