use wolf_cache::CacheError;
use wolf_config::ConfigError;

/// 驱动构造与调用错误。
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("unknown measure {0}")]
    UnknownMeasure(String),
    #[error("unknown driver kind {0}")]
    UnknownKind(String),
}

impl DriverError {
    /// 缓存后端级故障需要上抛到进程层面。
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Cache(err) if err.is_fatal())
    }
}
