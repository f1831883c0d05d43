//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听与跨域
//! - JWT认证
//! - 消息代理
//! - 心跳与在线状态
//!
//! 加载顺序（后者覆盖前者）：默认值 → `APP_CONFIG_FILE` 指定的文件 →
//! `APP_` 前缀环境变量（`__` 表示嵌套）→ `JWT_SECRET` / `REDIS_URL` / `CORS_ORIGIN`。

use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// 心跳与在线状态各项时长的上限（一天）
pub const MAX_PRESENCE_SECS: u64 = 86_400;

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    #[serde(default)]
    pub server: ServerConfig,
    /// JWT认证配置
    #[serde(default)]
    pub jwt: JwtConfig,
    /// 消息代理配置
    #[serde(default)]
    pub broker: BrokerConfig,
    /// 心跳与在线状态配置
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 允许跨域的前端来源，`*` 表示任意来源
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8001,
            cors_origins: vec!["http://localhost:5173".into()],
        }
    }
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expiration_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// 进程内代理，仅适用于单进程部署
    Local,
    Redis,
}

/// 消息代理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    pub redis_url: Option<String>,
    /// 房间频道前缀
    pub channel_prefix: String,
    /// 发布失败后的最大重发次数
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Local,
            redis_url: None,
            channel_prefix: "chat:room:".into(),
            retry_max_attempts: 5,
            retry_base_delay_ms: 200,
        }
    }
}

/// 心跳与在线状态配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    pub sweep_interval_secs: u64,
    pub staleness_threshold_secs: u64,
    /// 用户在线标记的过期时间，未续期即视为离线
    pub online_ttl_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 10,
            staleness_threshold_secs: 60,
            online_ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// 消息正文上限（字符数），超出部分截断
    pub max_message_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 2000,
        }
    }
}

impl AppConfig {
    /// 按优先级合并各来源并校验
    pub fn load() -> Result<Self, ConfigError> {
        let mut config: AppConfig = Self::figment().extract()?;

        if let Ok(origins) = std::env::var("CORS_ORIGIN") {
            config.server.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn figment() -> Figment {
        let mut fig = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }

        fig.merge(Env::prefixed("APP_").split("__"))
            .merge(
                Env::raw()
                    .only(&["JWT_SECRET"])
                    .map(|_| "jwt.secret".into()),
            )
            .merge(
                Env::raw()
                    .only(&["REDIS_URL"])
                    .map(|_| "broker.redis_url".into()),
            )
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.trim().is_empty() {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret cannot be empty".to_string(),
            ));
        }
        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "expiration hours must be positive".to_string(),
            ));
        }

        if self.server.host.trim().is_empty() {
            return Err(ConfigError::InvalidServerConfig(
                "host cannot be empty".to_string(),
            ));
        }

        let presence = &self.presence;
        if presence.sweep_interval_secs == 0
            || presence.staleness_threshold_secs == 0
            || presence.online_ttl_secs == 0
        {
            return Err(ConfigError::InvalidPresenceConfig(
                "intervals must be greater than 0".to_string(),
            ));
        }
        if presence.sweep_interval_secs > MAX_PRESENCE_SECS
            || presence.staleness_threshold_secs > MAX_PRESENCE_SECS
            || presence.online_ttl_secs > MAX_PRESENCE_SECS
        {
            return Err(ConfigError::InvalidPresenceConfig(format!(
                "intervals must not exceed {MAX_PRESENCE_SECS} seconds"
            )));
        }
        let min_threshold = presence.sweep_interval_secs.checked_mul(2);
        if min_threshold.map_or(true, |min| presence.staleness_threshold_secs < min) {
            return Err(ConfigError::InvalidPresenceConfig(
                "staleness threshold must be at least twice the sweep interval".to_string(),
            ));
        }

        if self.broker.kind == BrokerKind::Redis
            && self
                .broker
                .redis_url
                .as_deref()
                .map_or(true, |url| url.trim().is_empty())
        {
            return Err(ConfigError::InvalidBrokerConfig(
                "redis_url is required when broker kind is redis".to_string(),
            ));
        }
        if self.broker.retry_max_attempts == 0 {
            return Err(ConfigError::InvalidBrokerConfig(
                "retry_max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.chat.max_message_chars == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "max_message_chars must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl PresenceConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    pub fn online_ttl(&self) -> Duration {
        Duration::from_secs(self.online_ttl_secs)
    }
}

impl BrokerConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid presence configuration: {0}")]
    InvalidPresenceConfig(String),
    #[error("Invalid broker configuration: {0}")]
    InvalidBrokerConfig(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}
