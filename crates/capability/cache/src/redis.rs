//! Redis 缓存实现
//!
//! 每个操作从 bb8 连接池独占一条连接，WATCH 状态只属于当前事务。
//! 写入与确认移除都使用 WATCH/MULTI/EXEC 乐观事务，冲突时有限次重试。

use crate::codec::{self, merge_measures};
use crate::error::CacheError;
use crate::keys;
use crate::traits::{Delivery, DrainReport, MeasurementCache, meta_entries};
use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use domain::{ClientEntry, MappingRow, MetaEntry, MetaFilter, Record};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, error, info, warn};

/// 乐观事务最大尝试次数
const MAX_TXN_ATTEMPTS: u32 = 8;

/// Redis 缓存
pub struct RedisCache {
    pool: Pool<RedisConnectionManager>,
    client_id: String,
    /// 记录过期秒数，None 表示不过期
    expire_secs: Option<i64>,
    sinks: RwLock<Vec<String>>,
    /// 元数据目录的内存镜像，每次 `load_meta` 整体刷新
    meta_mirror: RwLock<Vec<MetaEntry>>,
}

impl RedisCache {
    /// 建立连接池并探测连通性。
    pub async fn connect(
        redis_url: &str,
        pool_size: u32,
        client_id: impl Into<String>,
        expire_days: u64,
    ) -> Result<Self, CacheError> {
        let manager = RedisConnectionManager::new(redis_url)?;
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .await?;
        let expire_secs = match expire_days {
            0 => None,
            days => Some(days as i64 * 86_400),
        };
        let cache = Self {
            pool,
            client_id: client_id.into(),
            expire_secs,
            sinks: RwLock::new(Vec::new()),
            meta_mirror: RwLock::new(Vec::new()),
        };
        drop(cache.checked_connection().await?);
        info!(target: "wolf.cache", pool_size, "cache_connected");
        Ok(cache)
    }

    /// 最近一次刷新的元数据镜像。
    pub fn meta_snapshot(&self) -> Vec<MetaEntry> {
        self.meta_mirror
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 取连接并 PING。
    async fn checked_connection(
        &self,
    ) -> Result<PooledConnection<'_, RedisConnectionManager>, CacheError> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(conn)
    }

    fn queue_keys(&self) -> Vec<String> {
        self.sinks()
            .iter()
            .map(|sink| keys::queue_key(&self.client_id, sink))
            .collect()
    }

    /// 投递成功后把记录键移出 `queue`，没有其他队列引用时删除记录。
    ///
    /// 返回 false 表示记录在投递期间被修改或重试耗尽，键保留在队列中。
    async fn acknowledge(
        &self,
        conn: &mut MultiplexedConnection,
        sink: &str,
        queue: &str,
        key: &str,
        delivered: &[u8],
    ) -> Result<bool, CacheError> {
        let queues = self.queue_keys();
        let mut watched = queues.clone();
        if !watched.iter().any(|q| q == queue) {
            watched.push(queue.to_string());
        }
        watched.push(key.to_string());

        for attempt in 1..=MAX_TXN_ATTEMPTS {
            let _: () = redis::cmd("WATCH").arg(&watched).query_async(&mut *conn).await?;
            let current: Option<Vec<u8>> = conn.get(key).await?;
            if current.as_deref() != Some(delivered) {
                unwatch(conn).await?;
                debug!(target: "wolf.cache", sink, key, "record_changed_during_delivery");
                return Ok(false);
            }

            let mut still_queued = false;
            for other in queues.iter().filter(|q| q.as_str() != queue) {
                let member: bool = conn.sismember(other, key).await?;
                if member {
                    still_queued = true;
                    break;
                }
            }

            let mut pipe = redis::pipe();
            pipe.atomic().srem(queue, key).ignore();
            if !still_queued {
                pipe.del(key).ignore();
            }
            let committed: Option<()> = pipe.query_async(&mut *conn).await?;
            if committed.is_some() {
                debug!(target: "wolf.cache", sink, key, deleted = !still_queued, "record_acknowledged");
                return Ok(true);
            }
            debug!(target: "wolf.cache", sink, key, attempt, "acknowledge_conflict_retry");
        }
        warn!(target: "wolf.cache", sink, key, "acknowledge_retries_exhausted");
        Ok(false)
    }

    /// 读取队列引用的记录；记录已不存在时在 WATCH 保护下把引用移出队列。
    async fn read_or_prune(
        &self,
        conn: &mut MultiplexedConnection,
        sink: &str,
        queue: &str,
        key: &str,
    ) -> Result<Queued, CacheError> {
        for attempt in 1..=MAX_TXN_ATTEMPTS {
            if let Some(bytes) = watch_record(conn, key).await? {
                unwatch(conn).await?;
                return Ok(Queued::Present(bytes));
            }
            if commit_prune(conn, queue, key).await? {
                return Ok(Queued::Pruned);
            }
            debug!(target: "wolf.cache", sink, key, attempt, "prune_conflict_retry");
        }
        warn!(target: "wolf.cache", sink, key, "prune_retries_exhausted");
        Ok(Queued::Busy)
    }

    async fn scan_keys(
        conn: &mut MultiplexedConnection,
        pattern: &str,
    ) -> Result<Vec<String>, CacheError> {
        let mut cursor: u64 = 0;
        let mut items = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await?;
            items.extend(keys);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        items.sort();
        items.dedup();
        Ok(items)
    }
}

/// 队列引用的读取结果。
enum Queued {
    Present(Vec<u8>),
    Pruned,
    Busy,
}

/// WATCH 记录键并读取记录。
async fn watch_record(
    conn: &mut MultiplexedConnection,
    key: &str,
) -> Result<Option<Vec<u8>>, CacheError> {
    let _: () = redis::cmd("WATCH").arg(key).query_async(&mut *conn).await?;
    Ok(conn.get(key).await?)
}

/// 在 MULTI/EXEC 中移出悬空引用；记录在 WATCH 之后被重新写入时返回 false。
async fn commit_prune(
    conn: &mut MultiplexedConnection,
    queue: &str,
    key: &str,
) -> Result<bool, CacheError> {
    let committed: Option<()> = redis::pipe()
        .atomic()
        .srem(queue, key)
        .ignore()
        .query_async(&mut *conn)
        .await?;
    Ok(committed.is_some())
}

async fn unwatch(conn: &mut MultiplexedConnection) -> Result<(), CacheError> {
    let _: () = redis::cmd("UNWATCH").query_async(&mut *conn).await?;
    Ok(())
}

#[async_trait::async_trait]
impl MeasurementCache for RedisCache {
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
        let mut conn = self.checked_connection().await?;
        let entry = ClientEntry {
            client_id: self.client_id.clone(),
            description: description.to_string(),
        };
        let _: () = conn
            .set(keys::client_key(&self.client_id), codec::encode(&entry)?)
            .await?;
        Ok(())
    }

    async fn store(&self, record: &Record) -> Result<(), CacheError> {
        let mut conn = self.checked_connection().await?;
        if record.is_empty() {
            return Ok(());
        }
        let key = keys::record_key(record);
        let last = keys::last_key(&record.client_id, &record.device_id);
        let snapshot = codec::encode(record)?;
        let queues = self.queue_keys();

        for attempt in 1..=MAX_TXN_ATTEMPTS {
            let _: () = redis::cmd("WATCH").arg(&key).query_async(&mut *conn).await?;
            let existing: Option<Vec<u8>> = conn.get(&key).await?;
            let merged = match existing {
                Some(bytes) => match codec::decode::<Record>(&bytes) {
                    Ok(mut existing) => {
                        merge_measures(&mut existing, record);
                        existing
                    }
                    Err(err) => {
                        warn!(target: "wolf.cache", key = %key, error = %err, "stored_record_unreadable");
                        record.clone()
                    }
                },
                None => record.clone(),
            };
            let payload = match codec::encode(&merged) {
                Ok(payload) => payload,
                Err(err) => {
                    unwatch(&mut conn).await?;
                    return Err(err);
                }
            };

            let mut pipe = redis::pipe();
            pipe.atomic().set(&key, payload).ignore();
            if let Some(ttl) = self.expire_secs {
                pipe.expire(&key, ttl).ignore();
            }
            for queue in &queues {
                pipe.sadd(queue, &key).ignore();
            }
            pipe.set(&last, &snapshot).ignore();

            let committed: Option<()> = pipe.query_async(&mut *conn).await?;
            if committed.is_some() {
                wolf_telemetry::record_stored();
                debug!(target: "wolf.cache", key = %key, queues = queues.len(), "record_stored");
                return Ok(());
            }
            debug!(target: "wolf.cache", key = %key, attempt, "store_conflict_retry");
        }

        wolf_telemetry::record_store_conflict();
        Err(CacheError::Conflict(key, MAX_TXN_ATTEMPTS))
    }

    async fn load(&self, sink: &str, delivery: &dyn Delivery) -> Result<DrainReport, CacheError> {
        let mut conn = self.checked_connection().await?;
        let queue = keys::queue_key(&self.client_id, sink);
        let members: Vec<String> = conn.smembers(&queue).await?;

        let mut report = DrainReport::default();
        for key in members {
            let bytes = match self.read_or_prune(&mut conn, sink, &queue, &key).await? {
                Queued::Present(bytes) => bytes,
                Queued::Pruned => {
                    error!(target: "wolf.cache", sink, key = %key, "dangling_reference_pruned");
                    wolf_telemetry::record_dangling_pruned();
                    report.dangling += 1;
                    continue;
                }
                Queued::Busy => {
                    report.retained += 1;
                    continue;
                }
            };
            let record: Record = match codec::decode(&bytes) {
                Ok(record) => record,
                Err(err) => {
                    error!(target: "wolf.cache", sink, key = %key, error = %err, "record_decode_failed");
                    report.failed += 1;
                    continue;
                }
            };

            if !delivery.deliver(&record).await {
                warn!(target: "wolf.cache", sink, key = %key, "delivery_failed");
                wolf_telemetry::record_delivery_failed();
                report.failed += 1;
                continue;
            }
            wolf_telemetry::record_delivery_ok();

            if self.acknowledge(&mut conn, sink, &queue, &key, &bytes).await? {
                report.delivered += 1;
            } else {
                report.retained += 1;
            }
        }
        Ok(report)
    }

    async fn load_last(
        &self,
        client_id: &str,
        device_id: &str,
    ) -> Result<Option<Record>, CacheError> {
        let mut conn = self.checked_connection().await?;
        let bytes: Option<Vec<u8>> = conn.get(keys::last_key(client_id, device_id)).await?;
        bytes.map(|bytes| codec::decode(&bytes)).transpose()
    }

    async fn store_last(&self, record: &Record) -> Result<(), CacheError> {
        let mut conn = self.checked_connection().await?;
        let _: () = conn
            .set(
                keys::last_key(&record.client_id, &record.device_id),
                codec::encode(record)?,
            )
            .await?;
        Ok(())
    }

    async fn load_meta(&self, filter: &MetaFilter) -> Result<Vec<MetaEntry>, CacheError> {
        let mut conn = self.checked_connection().await?;
        let meta_keys = Self::scan_keys(&mut conn, keys::META_PATTERN).await?;
        let mut catalog = Vec::with_capacity(meta_keys.len());
        if !meta_keys.is_empty() {
            let values: Vec<Option<Vec<u8>>> = conn.mget(&meta_keys).await?;
            for (key, value) in meta_keys.iter().zip(values) {
                let Some(bytes) = value else { continue };
                match codec::decode::<MetaEntry>(&bytes) {
                    Ok(entry) => catalog.push(entry),
                    Err(err) => {
                        warn!(target: "wolf.cache", key = %key, error = %err, "meta_decode_failed")
                    }
                }
            }
        }
        let matching = catalog
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        *self
            .meta_mirror
            .write()
            .unwrap_or_else(PoisonError::into_inner) = catalog;
        Ok(matching)
    }

    async fn store_meta(
        &self,
        device_id: &str,
        driver_id: &str,
        device_descr: &str,
        rows: &[MappingRow],
    ) -> Result<(), CacheError> {
        let mut conn = self.checked_connection().await?;
        if rows.is_empty() {
            return Ok(());
        }
        let entries = meta_entries(&self.client_id, device_id, driver_id, device_descr, rows);
        let fresh: Vec<String> = entries
            .iter()
            .map(|entry| keys::meta_key(&entry.client_id, &entry.device_id, &entry.measure_id))
            .collect();
        let stale: Vec<String> =
            Self::scan_keys(&mut conn, &keys::meta_device_pattern(&self.client_id, device_id))
                .await?
                .into_iter()
                .filter(|key| !fresh.contains(key))
                .collect();

        let mut pipe = redis::pipe();
        pipe.atomic();
        if !stale.is_empty() {
            pipe.del(&stale).ignore();
        }
        for (key, entry) in fresh.iter().zip(&entries) {
            pipe.set(key, codec::encode(entry)?).ignore();
        }
        let _: () = pipe.query_async(&mut *conn).await?;

        let mut mirror = self
            .meta_mirror
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        mirror.retain(|entry| !(entry.client_id == self.client_id && entry.device_id == device_id));
        mirror.extend(entries);
        debug!(target: "wolf.cache", device_id, driver_id, rows = rows.len(), superseded = stale.len(), "meta_stored");
        Ok(())
    }

    async fn save(&self) -> Result<(), CacheError> {
        let mut conn = self.checked_connection().await?;
        let result: redis::RedisResult<()> = redis::cmd("BGSAVE").query_async(&mut *conn).await;
        match result {
            Ok(()) => info!(target: "wolf.cache", "cache_save_started"),
            Err(err) => warn!(target: "wolf.cache", error = %err, "cache_save_failed"),
        }
        Ok(())
    }

    async fn clients(&self, client_id: Option<&str>) -> Result<Vec<ClientEntry>, CacheError> {
        let mut conn = self.checked_connection().await?;
        let client_keys = match client_id {
            Some(id) => vec![keys::client_key(id)],
            None => Self::scan_keys(&mut conn, keys::CLIENTS_PATTERN).await?,
        };
        if client_keys.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Option<Vec<u8>>> = conn.mget(&client_keys).await?;
        values
            .into_iter()
            .flatten()
            .map(|bytes| codec::decode(&bytes))
            .collect()
    }
}
