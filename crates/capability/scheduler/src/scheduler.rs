//! 周期轮询/投递调度器
//!
//! 状态：Idle → TickRunning → Idle。每个周期：
//! 1. 周期 ≥ 60 秒时等待到下一个整分钟
//! 2. 每个现场驱动一个轮询任务，每个云端驱动一个排空任务，并发执行
//! 3. 等待全部任务结束后回到 Idle
//!
//! 周期执行期间持有驱动集合的读锁，重载必须等待当前周期结束。

use crate::error::SchedulerError;
use crate::timing::{alignment_delay, rearm_period};
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use wolf_cache::MeasurementCache;
use wolf_driver::{CloudDriver, DriverSet, FieldDriver};

/// 一个周期的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 没有现场驱动或没有云端驱动
    Skipped,
    /// 对齐等待期间收到停机信号
    Cancelled,
    Completed { tasks: usize },
}

/// 墙钟：返回 Unix 纪元秒。
pub type WallClock = Arc<dyn Fn() -> f64 + Send + Sync>;

/// 调度器
pub struct Scheduler {
    cache: Arc<dyn MeasurementCache>,
    drivers: Arc<RwLock<DriverSet>>,
    interval_secs: u64,
    shutdown: watch::Receiver<bool>,
    clock: WallClock,
}

impl Scheduler {
    pub fn new(
        cache: Arc<dyn MeasurementCache>,
        drivers: Arc<RwLock<DriverSet>>,
        interval_secs: u64,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cache,
            drivers,
            interval_secs,
            shutdown,
            clock: Arc::new(domain::now_epoch_secs),
        }
    }

    /// 替换对齐使用的墙钟。
    pub fn with_clock(mut self, clock: WallClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn drivers(&self) -> Arc<RwLock<DriverSet>> {
        self.drivers.clone()
    }

    /// 周期循环：立即执行第一个周期，之后从上一次扇出时刻起每隔 `rearm_period`
    /// 重新布置一次（随后的整分钟对齐补齐到完整周期），直到停机。
    pub async fn run(&self) -> Result<(), SchedulerError> {
        let period = rearm_period(self.interval_secs);
        let mut shutdown = self.shutdown.clone();
        info!(target: "wolf.scheduler", interval_secs = self.interval_secs, period_secs = period.as_secs(), "scheduler_started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let (_, fanned_out) = self.run_tick().await?;
            tokio::select! {
                _ = tokio::time::sleep_until(fanned_out + period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(target: "wolf.scheduler", "scheduler_stopped");
        Ok(())
    }

    /// 执行一个周期。
    pub async fn tick(&self) -> Result<TickOutcome, SchedulerError> {
        self.run_tick().await.map(|(outcome, _)| outcome)
    }

    /// 执行一个周期，同时返回扇出时刻（未扇出时为返回时刻）。
    async fn run_tick(&self) -> Result<(TickOutcome, Instant), SchedulerError> {
        let drivers = self.drivers.read().await;
        if drivers.field.is_empty() || drivers.cloud.is_empty() {
            info!(
                target: "wolf.scheduler",
                field = drivers.field.len(),
                cloud = drivers.cloud.len(),
                "tick_skipped_no_drivers"
            );
            wolf_telemetry::record_tick_skipped();
            return Ok((TickOutcome::Skipped, Instant::now()));
        }

        if let Some(delay) = alignment_delay(self.interval_secs, (self.clock)()) {
            debug!(target: "wolf.scheduler", delay_ms = delay.as_millis() as u64, "tick_aligning");
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|stop| *stop) => {
                    return Ok((TickOutcome::Cancelled, Instant::now()));
                }
            }
        }

        debug!(target: "wolf.scheduler", "tick_started");
        let fanned_out = Instant::now();
        let mut tasks = JoinSet::new();
        for driver in drivers.field.iter().cloned() {
            tasks.spawn(poll_task(driver, self.cache.clone()));
        }
        for driver in drivers.cloud.iter().cloned() {
            tasks.spawn(drain_task(driver, self.cache.clone()));
        }
        let total = tasks.len();

        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if fatal.is_none() {
                        fatal = Some(err);
                    }
                }
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => warn!(target: "wolf.scheduler", error = %err, "tick_task_cancelled"),
            }
        }
        if let Some(err) = fatal {
            return Err(err);
        }

        wolf_telemetry::record_tick_completed();
        debug!(target: "wolf.scheduler", tasks = total, "tick_completed");
        Ok((TickOutcome::Completed { tasks: total }, fanned_out))
    }
}

async fn poll_task(
    driver: Arc<dyn FieldDriver>,
    cache: Arc<dyn MeasurementCache>,
) -> Result<(), SchedulerError> {
    let Some(pollable) = driver.as_pollable() else {
        return Ok(());
    };
    debug!(target: "wolf.scheduler", driver = driver.name(), "poll_started");
    let record = match pollable.poll().await {
        Ok(record) => record,
        Err(err) if err.is_fatal() => {
            return Err(SchedulerError::Driver(driver.name().to_string(), err));
        }
        Err(err) => {
            warn!(target: "wolf.scheduler", driver = driver.name(), error = %err, "poll_failed");
            wolf_telemetry::record_poll_failed();
            return Ok(());
        }
    };
    wolf_telemetry::record_poll_ok();
    match cache.store(&record).await {
        Ok(()) => {}
        Err(err) if err.is_fatal() => return Err(err.into()),
        Err(err) => warn!(target: "wolf.scheduler", driver = driver.name(), error = %err, "store_failed"),
    }
    debug!(target: "wolf.scheduler", driver = driver.name(), "poll_ended");
    Ok(())
}

async fn drain_task(
    driver: Arc<dyn CloudDriver>,
    cache: Arc<dyn MeasurementCache>,
) -> Result<(), SchedulerError> {
    debug!(target: "wolf.scheduler", sink = driver.name(), "drain_started");
    match cache.load(driver.name(), driver.as_ref()).await {
        Ok(report) => {
            info!(
                target: "wolf.scheduler",
                sink = driver.name(),
                delivered = report.delivered,
                failed = report.failed,
                dangling = report.dangling,
                retained = report.retained,
                "drain_completed"
            );
            Ok(())
        }
        Err(err) if err.is_fatal() => Err(err.into()),
        Err(err) => {
            warn!(target: "wolf.scheduler", sink = driver.name(), error = %err, "drain_failed");
            Ok(())
        }
    }
}
