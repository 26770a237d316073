//! 内存缓存实现
//!
//! 与 Redis 实现遵循同一套语义，用于测试和无后端的本地运行。
//! 记录不会过期；`set_reachable(false)` 可模拟后端不可达。

use crate::codec::merge_measures;
use crate::error::CacheError;
use crate::keys;
use crate::traits::{Delivery, DrainReport, MeasurementCache, meta_entries};
use domain::{ClientEntry, MappingRow, MetaEntry, MetaFilter, Record};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, error, warn};

#[derive(Default)]
struct State {
    records: HashMap<String, Record>,
    lasts: HashMap<String, Record>,
    queues: BTreeMap<String, BTreeSet<String>>,
    meta: BTreeMap<String, MetaEntry>,
    clients: BTreeMap<String, ClientEntry>,
}

/// 内存缓存
pub struct InMemoryCache {
    client_id: String,
    state: Mutex<State>,
    sinks: RwLock<Vec<String>>,
    reachable: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryCache {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            state: Mutex::new(State::default()),
            sinks: RwLock::new(Vec::new()),
            reachable: AtomicBool::new(true),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// 读取存储中的记录（用于测试）
    pub fn record(&self, key: &str) -> Option<Record> {
        self.lock().records.get(key).cloned()
    }

    /// 删除记录但保留队列引用（用于测试过期场景）
    pub fn remove_record(&self, key: &str) -> Option<Record> {
        self.lock().records.remove(key)
    }

    /// 出口队列当前成员（用于测试）
    pub fn queue_members(&self, sink: &str) -> Vec<String> {
        let queue = keys::queue_key(&self.client_id, sink);
        self.lock()
            .queues
            .get(&queue)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// `save` 被调用的次数
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ping(&self) -> Result<(), CacheError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unreachable(
                "in-memory cache marked unreachable".to_string(),
            ))
        }
    }

    fn queue_keys(&self) -> Vec<String> {
        self.sinks()
            .iter()
            .map(|sink| keys::queue_key(&self.client_id, sink))
            .collect()
    }
}

#[async_trait::async_trait]
impl MeasurementCache for InMemoryCache {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn set_sinks(&self, sinks: Vec<String>) {
        *self.sinks.write().unwrap_or_else(PoisonError::into_inner) = sinks;
    }

    fn sinks(&self) -> Vec<String> {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn register_client(&self, description: &str) -> Result<(), CacheError> {
        self.ping()?;
        self.lock().clients.insert(
            keys::client_key(&self.client_id),
            ClientEntry {
                client_id: self.client_id.clone(),
                description: description.to_string(),
            },
        );
        Ok(())
    }

    async fn store(&self, record: &Record) -> Result<(), CacheError> {
        self.ping()?;
        if record.is_empty() {
            return Ok(());
        }
        let key = keys::record_key(record);
        let queues = self.queue_keys();
        let mut state = self.lock();
        match state.records.get_mut(&key) {
            Some(existing) => merge_measures(existing, record),
            None => {
                state.records.insert(key.clone(), record.clone());
            }
        }
        for queue in queues {
            state.queues.entry(queue).or_default().insert(key.clone());
        }
        state.lasts.insert(
            keys::last_key(&record.client_id, &record.device_id),
            record.clone(),
        );
        wolf_telemetry::record_stored();
        debug!(target: "wolf.cache", key = %key, "record_stored");
        Ok(())
    }

    async fn load(&self, sink: &str, delivery: &dyn Delivery) -> Result<DrainReport, CacheError> {
        self.ping()?;
        let queue = keys::queue_key(&self.client_id, sink);
        let members: Vec<String> = self
            .lock()
            .queues
            .get(&queue)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();

        let mut report = DrainReport::default();
        for key in members {
            let record = {
                let mut state = self.lock();
                match state.records.get(&key) {
                    Some(record) => record.clone(),
                    None => {
                        if let Some(members) = state.queues.get_mut(&queue) {
                            members.remove(&key);
                        }
                        drop(state);
                        error!(target: "wolf.cache", sink, key = %key, "dangling_reference_pruned");
                        wolf_telemetry::record_dangling_pruned();
                        report.dangling += 1;
                        continue;
                    }
                }
            };

            if !delivery.deliver(&record).await {
                warn!(target: "wolf.cache", sink, key = %key, "delivery_failed");
                wolf_telemetry::record_delivery_failed();
                report.failed += 1;
                continue;
            }
            wolf_telemetry::record_delivery_ok();

            let queues = self.queue_keys();
            let mut state = self.lock();
            match state.records.get(&key) {
                Some(current) if *current != record => {
                    debug!(target: "wolf.cache", sink, key = %key, "record_changed_during_delivery");
                    report.retained += 1;
                    continue;
                }
                _ => {}
            }
            if let Some(members) = state.queues.get_mut(&queue) {
                members.remove(&key);
            }
            let still_queued = queues
                .iter()
                .filter(|other| **other != queue)
                .any(|other| state.queues.get(other).is_some_and(|m| m.contains(&key)));
            if !still_queued {
                state.records.remove(&key);
            }
            report.delivered += 1;
        }
        Ok(report)
    }

    async fn load_last(
        &self,
        client_id: &str,
        device_id: &str,
    ) -> Result<Option<Record>, CacheError> {
        self.ping()?;
        Ok(self
            .lock()
            .lasts
            .get(&keys::last_key(client_id, device_id))
            .cloned())
    }

    async fn store_last(&self, record: &Record) -> Result<(), CacheError> {
        self.ping()?;
        self.lock().lasts.insert(
            keys::last_key(&record.client_id, &record.device_id),
            record.clone(),
        );
        Ok(())
    }

    async fn load_meta(&self, filter: &MetaFilter) -> Result<Vec<MetaEntry>, CacheError> {
        self.ping()?;
        Ok(self
            .lock()
            .meta
            .values()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }

    async fn store_meta(
        &self,
        device_id: &str,
        driver_id: &str,
        device_descr: &str,
        rows: &[MappingRow],
    ) -> Result<(), CacheError> {
        self.ping()?;
        if rows.is_empty() {
            return Ok(());
        }
        let entries = meta_entries(&self.client_id, device_id, driver_id, device_descr, rows);
        let mut state = self.lock();
        state
            .meta
            .retain(|_, entry| !(entry.client_id == self.client_id && entry.device_id == device_id));
        for entry in entries {
            state.meta.insert(
                keys::meta_key(&entry.client_id, &entry.device_id, &entry.measure_id),
                entry,
            );
        }
        Ok(())
    }

    async fn save(&self) -> Result<(), CacheError> {
        self.ping()?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clients(&self, client_id: Option<&str>) -> Result<Vec<ClientEntry>, CacheError> {
        self.ping()?;
        let state = self.lock();
        Ok(match client_id {
            Some(id) => state
                .clients
                .get(&keys::client_key(id))
                .cloned()
                .into_iter()
                .collect(),
            None => state.clients.values().cloned().collect(),
        })
    }
}
