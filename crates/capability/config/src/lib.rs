//! 网关运行配置加载。
//!
//! - [`AppConfig`]：网关级设置，来自环境变量
//! - [`DriverSections`]：驱动配置段，来自 TOML 文件
//! - [`schema`]：声明式参数模式与通用解析器

pub mod schema;
pub mod sections;

pub use schema::{ParamKind, ParamSpec, ParamValue, Params, parse_section};
pub use sections::{DriverSections, Section};

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required option {1} in section {0}")]
    Missing(String, String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("configuration file {0} not found")]
    FileNotFound(String),
    #[error("configuration file parse error: {0}")]
    Parse(String),
}

/// 网关运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub client_id: String,
    pub client_descr: String,
    /// 调度周期（秒）
    pub interval_secs: u64,
    pub log_level: String,
    pub redis_url: String,
    /// 记录过期天数，0 表示不过期
    pub redis_expire_days: u64,
    pub redis_pool_size: u32,
    pub http_enabled: bool,
    pub http_addr: String,
    pub config_file: String,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let client_id = env::var("WOLF_CLIENT_ID").unwrap_or_else(|_| "1".to_string());
        let client_descr = env::var("WOLF_CLIENT_DESCR").unwrap_or_default();
        let interval_secs = read_u64_with_default("WOLF_INTERVAL", 3600)?;
        if interval_secs == 0 {
            return Err(ConfigError::Invalid("WOLF_INTERVAL".to_string(), "0".to_string()));
        }
        let log_level = env::var("WOLF_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let redis_url =
            env::var("WOLF_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());
        let redis_expire_days = read_u64_with_default("WOLF_REDIS_EXPIRE_DAYS", 0)?;
        let redis_pool_size = read_u32_with_default("WOLF_REDIS_POOL_SIZE", 8)?.max(1);
        let http_enabled = read_bool_with_default("WOLF_HTTP", true);
        let http_addr = env::var("WOLF_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let config_file =
            env::var("WOLF_CONFIG_FILE").unwrap_or_else(|_| "config/wolf.toml".to_string());

        Ok(Self {
            client_id,
            client_descr,
            interval_secs,
            log_level,
            redis_url,
            redis_expire_days,
            redis_pool_size,
            http_enabled,
            http_addr,
            config_file,
        })
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
