//! # Wolf Scheduler 模块
//!
//! - [`Scheduler`]：固定周期的并发轮询/排空，周期 ≥ 60 秒时对齐整分钟
//! - [`WriteBackWorker`]：串行处理 HTTP 层的写回请求
//! - [`Updater`]：每日自更新检查

pub mod error;
pub mod scheduler;
pub mod timing;
pub mod updater;
pub mod writeback;

pub use error::SchedulerError;
pub use scheduler::{Scheduler, TickOutcome, WallClock};
pub use timing::{alignment_delay, rearm_period};
pub use updater::{DAILY, NoopUpdater, Updater, watch_updates};
pub use writeback::{WriteBackSender, WriteBackWorker, WriteOutcome, write_back_queue};
