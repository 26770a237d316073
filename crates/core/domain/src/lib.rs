//! 网关核心领域模型。
//!
//! 所有驱动产出和消费同一种规范测量记录 [`Record`]；
//! 元数据目录 [`MetaEntry`] 描述每个测量通道。

pub mod data;

pub use data::{
    ClientEntry, MappingRow, MeasureValue, MetaEntry, MetaFilter, Record, WriteRequest,
    now_epoch_secs,
};
