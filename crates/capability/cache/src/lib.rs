//! # Wolf Cache 模块
//!
//! 持久化多队列投递缓存：网关所有持久状态的唯一持有者。
//!
//! - 测量记录：`store` 写入并扇出到每个已登记出口的队列
//! - 出口队列：`load` 逐条投递，成功后移出；没有任何队列引用的记录被删除
//! - 最新值快照、元数据目录、客户端登记
//!
//! ## 实现
//!
//! - [`RedisCache`]：bb8 连接池 + WATCH/MULTI/EXEC 乐观事务
//! - [`InMemoryCache`]：同语义的内存实现，用于测试

pub mod codec;
pub mod error;
pub mod fault;
pub mod in_memory;
pub mod keys;
pub mod redis;
pub mod traits;

pub use error::CacheError;
pub use fault::{FaultReporter, fault_channel};
pub use in_memory::InMemoryCache;
pub use redis::RedisCache;
pub use traits::{Delivery, DrainReport, MeasurementCache, meta_entries};
