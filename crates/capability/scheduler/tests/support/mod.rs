#![allow(dead_code)]

use async_trait::async_trait;
use domain::{MeasureValue, Record};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use wolf_cache::Delivery;
use wolf_driver::{CloudDriver, DriverError, FieldDriver, Pollable, Writable};

/// 可轮询、可写入的假现场驱动。
pub struct FakeMeter {
    pub name: String,
    pub device_id: String,
    pub polls: AtomicUsize,
    pub gate: Option<Arc<Notify>>,
    pub fail: bool,
    pub writes: Mutex<Vec<(String, MeasureValue)>>,
    pub writable: bool,
    pub poll_times: std::sync::Mutex<Vec<Instant>>,
}

impl FakeMeter {
    pub fn new(name: &str, device_id: &str) -> Self {
        Self {
            name: name.to_string(),
            device_id: device_id.to_string(),
            polls: AtomicUsize::new(0),
            gate: None,
            fail: false,
            writes: Mutex::new(Vec::new()),
            writable: true,
            poll_times: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// 相邻两次轮询之间的间隔（秒）。
    pub fn poll_gaps(&self) -> Vec<u64> {
        let times = self.poll_times.lock().expect("poll times");
        times
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_secs_f64().round() as u64)
            .collect()
    }
}

#[async_trait]
impl Pollable for FakeMeter {
    async fn poll(&self) -> Result<Record, DriverError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.poll_times.lock().expect("poll times").push(Instant::now());
        if self.fail {
            return Err(DriverError::Transport("timed out".to_string()));
        }
        let mut record = Record::new("1", &self.device_id, 1000.0).with_measure("V", 230.1);
        for (measure, value) in self.writes.lock().await.iter() {
            record.measures.insert(measure.clone(), value.clone());
        }
        Ok(record)
    }
}

#[async_trait]
impl Writable for FakeMeter {
    async fn write(&self, measure_id: &str, value: &MeasureValue) -> Result<bool, DriverError> {
        self.writes
            .lock()
            .await
            .push((measure_id.to_string(), value.clone()));
        Ok(true)
    }
}

impl FieldDriver for FakeMeter {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_pollable(&self) -> Option<&dyn Pollable> {
        Some(self)
    }

    fn as_writable(&self) -> Option<&dyn Writable> {
        if self.writable { Some(self) } else { None }
    }
}

/// 统计投递次数的假云端驱动。
pub struct FakeSink {
    pub name: String,
    pub accept: bool,
    pub delivered: AtomicUsize,
}

impl FakeSink {
    pub fn new(name: &str, accept: bool) -> Self {
        Self {
            name: name.to_string(),
            accept,
            delivered: AtomicUsize::new(0),
        }
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Delivery for FakeSink {
    async fn deliver(&self, _record: &Record) -> bool {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        self.accept
    }
}

impl CloudDriver for FakeSink {
    fn name(&self) -> &str {
        &self.name
    }
}
