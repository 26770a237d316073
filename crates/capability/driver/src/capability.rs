//! 驱动能力接口
//!
//! 驱动只实现适用的能力子集；调度器通过 `FieldDriver::as_*` 查询能力，
//! 返回 None 即表示不具备。

use crate::error::DriverError;
use async_trait::async_trait;
use domain::{MeasureValue, Record};
use tokio::task::JoinHandle;

/// 周期轮询：产出一条规范记录。
#[async_trait]
pub trait Pollable: Send + Sync {
    async fn poll(&self) -> Result<Record, DriverError>;
}

/// 写入设备：返回 false 表示设备拒绝。
#[async_trait]
pub trait Writable: Send + Sync {
    async fn write(&self, measure_id: &str, value: &MeasureValue) -> Result<bool, DriverError>;
}

/// 事件驱动监听：启动后台任务，自行把记录写入缓存。
#[async_trait]
pub trait Listener: Send + Sync {
    async fn start(&self) -> Result<JoinHandle<()>, DriverError>;
}

/// 停止钩子：重载或退出前调用。
#[async_trait]
pub trait Stoppable: Send + Sync {
    async fn stop(&self);
}

/// 把当前元数据目录推送到出口。
#[async_trait]
pub trait ConfigPublisher: Send + Sync {
    async fn post_config(&self) -> bool;
}
