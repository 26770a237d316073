//! 日志初始化与运行计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_stored: u64,
    pub store_conflicts: u64,
    pub deliveries_ok: u64,
    pub deliveries_failed: u64,
    pub dangling_pruned: u64,
    pub polls_ok: u64,
    pub polls_failed: u64,
    pub ticks_completed: u64,
    pub ticks_skipped: u64,
    pub writebacks_ok: u64,
    pub writebacks_dropped: u64,
}

/// 网关运行计数器。
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    records_stored: AtomicU64,
    store_conflicts: AtomicU64,
    deliveries_ok: AtomicU64,
    deliveries_failed: AtomicU64,
    dangling_pruned: AtomicU64,
    polls_ok: AtomicU64,
    polls_failed: AtomicU64,
    ticks_completed: AtomicU64,
    ticks_skipped: AtomicU64,
    writebacks_ok: AtomicU64,
    writebacks_dropped: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_stored: self.records_stored.load(Ordering::Relaxed),
            store_conflicts: self.store_conflicts.load(Ordering::Relaxed),
            deliveries_ok: self.deliveries_ok.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            dangling_pruned: self.dangling_pruned.load(Ordering::Relaxed),
            polls_ok: self.polls_ok.load(Ordering::Relaxed),
            polls_failed: self.polls_failed.load(Ordering::Relaxed),
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            writebacks_ok: self.writebacks_ok.load(Ordering::Relaxed),
            writebacks_dropped: self.writebacks_dropped.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<GatewayMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static GatewayMetrics {
    METRICS.get_or_init(GatewayMetrics::new)
}

/// 初始化 tracing。
///
/// `RUST_LOG` 优先，否则使用给定级别（通常来自 `WOLF_LOG_LEVEL`）。
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录成功写入缓存的记录数。
pub fn record_stored() {
    metrics().records_stored.fetch_add(1, Ordering::Relaxed);
}

/// 记录重试耗尽后放弃的写入。
pub fn record_store_conflict() {
    metrics().store_conflicts.fetch_add(1, Ordering::Relaxed);
}

pub fn record_delivery_ok() {
    metrics().deliveries_ok.fetch_add(1, Ordering::Relaxed);
}

pub fn record_delivery_failed() {
    metrics().deliveries_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录被清理的悬空队列成员。
pub fn record_dangling_pruned() {
    metrics().dangling_pruned.fetch_add(1, Ordering::Relaxed);
}

pub fn record_poll_ok() {
    metrics().polls_ok.fetch_add(1, Ordering::Relaxed);
}

pub fn record_poll_failed() {
    metrics().polls_failed.fetch_add(1, Ordering::Relaxed);
}

pub fn record_tick_completed() {
    metrics().ticks_completed.fetch_add(1, Ordering::Relaxed);
}

/// 记录因缺少现场或云端驱动而跳过的周期。
pub fn record_tick_skipped() {
    metrics().ticks_skipped.fetch_add(1, Ordering::Relaxed);
}

pub fn record_writeback_ok() {
    metrics().writebacks_ok.fetch_add(1, Ordering::Relaxed);
}

pub fn record_writeback_dropped() {
    metrics().writebacks_dropped.fetch_add(1, Ordering::Relaxed);
}
