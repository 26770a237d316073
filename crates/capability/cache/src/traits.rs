//! 缓存接口 Trait 定义
//!
//! - [`MeasurementCache`]：记录、出口队列、元数据、客户端登记的唯一持有者
//! - [`Delivery`]：`load` 的投递回调，由云端驱动实现
//!
//! 所有公开操作先探测后端连通性；后端不可达或协议错误返回致命的 [`CacheError`]。

use crate::error::CacheError;
use async_trait::async_trait;
use domain::{ClientEntry, MappingRow, MetaEntry, MetaFilter, Record};

/// 投递回调：返回 true 表示出口已确认收到该记录。
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, record: &Record) -> bool;
}

/// 一次 `load` 的结果统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// 投递成功并已移出队列
    pub delivered: usize,
    /// 投递失败（或无法解码），留在队列等待下个周期
    pub failed: usize,
    /// 记录已不存在，引用已从队列清除
    pub dangling: usize,
    /// 投递成功但移除时检测到并发修改，保留在队列中重投
    pub retained: usize,
}

/// 持久化多队列投递缓存。
#[async_trait]
pub trait MeasurementCache: Send + Sync {
    /// 本网关的客户端标识。
    fn client_id(&self) -> &str;

    /// 替换已登记的出口列表（每个启用的云端驱动一个队列）。
    fn set_sinks(&self, sinks: Vec<String>);

    fn sinks(&self) -> Vec<String>;

    /// 写入 `clients:<client_id>` 登记。
    async fn register_client(&self, description: &str) -> Result<(), CacheError>;

    /// 存储一条记录并扇出到所有已登记出口队列，同时覆盖最新值快照。
    ///
    /// 空记录直接忽略；同秒键冲突时按合并规则合并。
    async fn store(&self, record: &Record) -> Result<(), CacheError>;

    /// 排空一个出口队列，只有投递成功的记录才会移出。
    async fn load(&self, sink: &str, delivery: &dyn Delivery) -> Result<DrainReport, CacheError>;

    async fn load_last(&self, client_id: &str, device_id: &str)
    -> Result<Option<Record>, CacheError>;

    /// 直接覆盖最新值快照，不进入投递队列。
    async fn store_last(&self, record: &Record) -> Result<(), CacheError>;

    async fn load_meta(&self, filter: &MetaFilter) -> Result<Vec<MetaEntry>, CacheError>;

    /// 用映射行整体替换设备的元数据条目。
    async fn store_meta(
        &self,
        device_id: &str,
        driver_id: &str,
        device_descr: &str,
        rows: &[MappingRow],
    ) -> Result<(), CacheError>;

    /// 触发后端持久化检查点。
    async fn save(&self) -> Result<(), CacheError>;

    async fn clients(&self, client_id: Option<&str>) -> Result<Vec<ClientEntry>, CacheError>;
}

/// 由映射行构造设备的元数据条目。
pub fn meta_entries(
    client_id: &str,
    device_id: &str,
    driver_id: &str,
    device_descr: &str,
    rows: &[MappingRow],
) -> Vec<MetaEntry> {
    rows.iter()
        .map(|row| MetaEntry {
            client_id: client_id.to_string(),
            device_id: device_id.to_string(),
            measure_id: row.measure_id.clone(),
            driver_id: driver_id.to_string(),
            device_descr: device_descr.to_string(),
            measure_descr: row.description.clone(),
            measure_unit: row.unit.clone(),
            measure_type: row.measure_type.clone(),
            rw: row.rw,
        })
        .collect()
}
