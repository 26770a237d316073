//! 缓存层错误类型
//!
//! - `Unreachable` / `Protocol`：后端级故障，进程必须退出
//! - `Codec` / `Conflict`：单条操作失败，记录日志后继续

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unreachable: {0}")]
    Unreachable(String),
    #[error("cache backend protocol error: {0}")]
    Protocol(String),
    #[error("cache codec error: {0}")]
    Codec(String),
    #[error("transaction on {0} abandoned after {1} conflicting attempts")]
    Conflict(String, u32),
}

impl CacheError {
    /// 后端级故障不可恢复。
    pub fn is_fatal(&self) -> bool {
        matches!(self, CacheError::Unreachable(_) | CacheError::Protocol(_))
    }

    /// 进程退出码：不可达为 2，协议/配置错误为 3。
    pub fn exit_code(&self) -> i32 {
        match self {
            CacheError::Unreachable(_) => 2,
            CacheError::Protocol(_) => 3,
            CacheError::Codec(_) | CacheError::Conflict(_, _) => 1,
        }
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            CacheError::Unreachable(err.to_string())
        } else {
            CacheError::Protocol(err.to_string())
        }
    }
}

impl From<bb8::RunError<redis::RedisError>> for CacheError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        match err {
            bb8::RunError::User(err) => err.into(),
            bb8::RunError::TimedOut => {
                CacheError::Unreachable("timed out waiting for a pooled connection".to_string())
            }
        }
    }
}

impl From<rmp_serde::encode::Error> for CacheError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        CacheError::Codec(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CacheError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        CacheError::Codec(err.to_string())
    }
}
