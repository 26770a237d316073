//! 写回队列
//!
//! HTTP 层把写入请求推入 FIFO 队列，单个消费者按序处理：
//! 通过元数据目录找到所属现场驱动，写入后立即回读并覆盖最新值快照。
//! 无法解析的请求记录日志后丢弃。

use crate::error::SchedulerError;
use domain::{MetaFilter, WriteRequest};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, info, warn};
use wolf_cache::MeasurementCache;
use wolf_driver::{DriverSet, FieldDriver};

/// 写回请求发送端（HTTP 层持有）。
pub type WriteBackSender = mpsc::Sender<WriteRequest>;

/// 单个请求的处理结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// 写入成功（若驱动可轮询，快照已刷新）
    Written,
    /// 驱动拒绝写入
    Rejected,
    /// 请求无法解析或驱动不支持写入
    Dropped,
}

/// 写回消费者
pub struct WriteBackWorker {
    cache: Arc<dyn MeasurementCache>,
    drivers: Arc<RwLock<DriverSet>>,
    receiver: mpsc::Receiver<WriteRequest>,
}

/// 创建写回队列。
pub fn write_back_queue(
    cache: Arc<dyn MeasurementCache>,
    drivers: Arc<RwLock<DriverSet>>,
    capacity: usize,
) -> (WriteBackSender, WriteBackWorker) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        sender,
        WriteBackWorker {
            cache,
            drivers,
            receiver,
        },
    )
}

impl WriteBackWorker {
    /// 消费队列直到发送端全部关闭或收到停机信号。
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SchedulerError> {
        info!(target: "wolf.writeback", "writeback_worker_started");
        loop {
            tokio::select! {
                request = self.receiver.recv() => match request {
                    Some(request) => {
                        self.handle(request).await?;
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(target: "wolf.writeback", "writeback_worker_stopped");
        Ok(())
    }

    /// 处理一个请求；只有缓存后端级故障返回错误。
    pub async fn handle(&self, request: WriteRequest) -> Result<WriteOutcome, SchedulerError> {
        let filter = MetaFilter::default()
            .client(&request.client_id)
            .device(&request.device_id)
            .measure(&request.measure_id);
        let entry = self.cache.load_meta(&filter).await?.into_iter().next();
        let Some(entry) = entry else {
            return Ok(drop_request(&request, "writeback_unknown_measure"));
        };
        if !entry.rw {
            return Ok(drop_request(&request, "writeback_read_only"));
        }

        let driver = self.find_driver(&entry.driver_id).await;
        let Some(driver) = driver else {
            return Ok(drop_request(&request, "writeback_driver_not_loaded"));
        };
        let Some(writable) = driver.as_writable() else {
            return Ok(drop_request(&request, "writeback_not_writable"));
        };

        match writable.write(&request.measure_id, &request.value).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(target: "wolf.writeback", driver = driver.name(), measure = %request.measure_id, "writeback_rejected");
                wolf_telemetry::record_writeback_dropped();
                return Ok(WriteOutcome::Rejected);
            }
            Err(err) if err.is_fatal() => {
                return Err(SchedulerError::Driver(driver.name().to_string(), err));
            }
            Err(err) => {
                warn!(target: "wolf.writeback", driver = driver.name(), error = %err, "writeback_failed");
                wolf_telemetry::record_writeback_dropped();
                return Ok(WriteOutcome::Rejected);
            }
        }
        info!(target: "wolf.writeback", driver = driver.name(), device = %request.device_id, measure = %request.measure_id, value = %request.value, "writeback_written");

        if let Some(pollable) = driver.as_pollable() {
            match pollable.poll().await {
                Ok(record) => match self.cache.store_last(&record).await {
                    Ok(()) => debug!(target: "wolf.writeback", driver = driver.name(), "writeback_readback_stored"),
                    Err(err) if err.is_fatal() => return Err(err.into()),
                    Err(err) => warn!(target: "wolf.writeback", driver = driver.name(), error = %err, "writeback_readback_store_failed"),
                },
                Err(err) if err.is_fatal() => {
                    return Err(SchedulerError::Driver(driver.name().to_string(), err));
                }
                Err(err) => {
                    warn!(target: "wolf.writeback", driver = driver.name(), error = %err, "writeback_readback_failed")
                }
            }
        }
        wolf_telemetry::record_writeback_ok();
        Ok(WriteOutcome::Written)
    }

    async fn find_driver(&self, driver_id: &str) -> Option<Arc<dyn FieldDriver>> {
        self.drivers
            .read()
            .await
            .field
            .iter()
            .find(|driver| driver.name() == driver_id)
            .cloned()
    }
}

fn drop_request(request: &WriteRequest, reason: &'static str) -> WriteOutcome {
    warn!(
        target: "wolf.writeback",
        client = %request.client_id,
        device = %request.device_id,
        measure = %request.measure_id,
        reason,
        "writeback_dropped"
    );
    wolf_telemetry::record_writeback_dropped();
    WriteOutcome::Dropped
}
