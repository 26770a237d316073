use wolf_cache::CacheError;
use wolf_driver::DriverError;

/// 调度过程中需要结束进程的错误。
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("driver {0} failed fatally: {1}")]
    Driver(String, DriverError),
}

impl SchedulerError {
    pub fn exit_code(&self) -> i32 {
        match self {
            SchedulerError::Cache(err) => err.exit_code(),
            SchedulerError::Driver(_, DriverError::Cache(err)) => err.exit_code(),
            SchedulerError::Driver(_, _) => 1,
        }
    }
}
