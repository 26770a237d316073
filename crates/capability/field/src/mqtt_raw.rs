//! MQTT 原始报文监听驱动
//!
//! 每个映射行的 `address` 是一个订阅主题，收到的报文即该测量的值。
//! 连接建立（含重连）后重新订阅全部主题。

use crate::registers::round14;
use async_trait::async_trait;
use domain::{MappingRow, MeasureValue, Record, now_epoch_secs};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wolf_cache::{FaultReporter, MeasurementCache};
use wolf_config::schema::ParamDefault;
use wolf_config::{ConfigError, ParamSpec, Params, Section};
use wolf_driver::{
    DriverContext, DriverError, FieldDriver, FieldDriverFactory, Listener, Stoppable, Writable,
};

pub const KIND: &str = "mqtt_raw";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const PARAMS: &[ParamSpec] = &[
    ParamSpec::string("device_id").required(),
    ParamSpec::string("descr").default(ParamDefault::Str("")),
    ParamSpec::string("host").default(ParamDefault::Str("127.0.0.1")),
    ParamSpec::int("port").default(ParamDefault::Int(1883)),
    ParamSpec::string("username"),
    ParamSpec::string("password"),
    ParamSpec::int("keepalive").default(ParamDefault::Int(60)),
    ParamSpec::int("qos").default(ParamDefault::Int(0)),
];

pub(crate) fn qos_from(level: i64) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// 报文到记录的转换与入库，由监听任务持有。
struct Inbox {
    name: String,
    client_id: String,
    device_id: String,
    rows: Vec<MappingRow>,
    cache: Arc<dyn MeasurementCache>,
    faults: FaultReporter,
    stopping: AtomicBool,
}

impl Inbox {
    fn record_for(&self, topic: &str, payload: &[u8]) -> Option<Record> {
        let row = self.rows.iter().find(|row| row.address == topic)?;
        let text = String::from_utf8_lossy(payload).trim().to_string();
        let value = if row.measure_type == "c" || row.measure_type.starts_with('s') {
            MeasureValue::Text(text)
        } else {
            match text.parse::<f64>() {
                Ok(raw) => MeasureValue::Float(round14(raw * row.scale) + row.offset),
                Err(_) => {
                    warn!(
                        target: "wolf.field.mqtt",
                        driver = %self.name,
                        topic,
                        payload = %text,
                        "mqtt_payload_not_numeric"
                    );
                    return None;
                }
            }
        };
        Some(
            Record::new(&self.client_id, &self.device_id, now_epoch_secs())
                .with_measure(&row.measure_id, value),
        )
    }

    /// 处理一条报文；返回 false 表示缓存已失效，监听必须结束。
    async fn accept(&self, topic: &str, payload: &[u8]) -> bool {
        let Some(record) = self.record_for(topic, payload) else {
            return true;
        };
        debug!(target: "wolf.field.mqtt", driver = %self.name, topic, "mqtt_message_received");
        match self.cache.store(&record).await {
            Ok(()) => true,
            Err(err) => {
                if self.faults.report(&self.name, err.clone()) {
                    error!(target: "wolf.field.mqtt", driver = %self.name, error = %err, "mqtt_listener_cache_lost");
                    return false;
                }
                warn!(target: "wolf.field.mqtt", driver = %self.name, error = %err, "mqtt_store_failed");
                true
            }
        }
    }
}

pub struct MqttRawDriver {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    keepalive: Duration,
    qos: QoS,
    inbox: Arc<Inbox>,
    client: Mutex<Option<AsyncClient>>,
}

impl MqttRawDriver {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            format!("wolf-{}", uuid::Uuid::new_v4()),
            self.host.clone(),
            self.port,
        );
        options.set_keep_alive(self.keepalive);
        if let (Some(username), Some(password)) = (self.username.as_ref(), self.password.as_ref()) {
            options.set_credentials(username, password);
        }
        options
    }

    fn client(&self) -> Option<AsyncClient> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl FieldDriver for MqttRawDriver {
    fn name(&self) -> &str {
        &self.inbox.name
    }

    fn as_writable(&self) -> Option<&dyn Writable> {
        Some(self)
    }

    fn as_listener(&self) -> Option<&dyn Listener> {
        Some(self)
    }

    fn as_stoppable(&self) -> Option<&dyn Stoppable> {
        Some(self)
    }
}

#[async_trait]
impl Listener for MqttRawDriver {
    async fn start(&self) -> Result<JoinHandle<()>, DriverError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), 64);
        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = Some(client.clone());
        self.inbox.stopping.store(false, Ordering::SeqCst);

        let inbox = self.inbox.clone();
        let qos = self.qos;
        let broker = format!("{}:{}", self.host, self.port);
        info!(target: "wolf.field.mqtt", driver = %inbox.name, broker = %broker, "mqtt_listener_starting");

        Ok(tokio::spawn(async move {
            loop {
                let event = eventloop.poll().await;
                if inbox.stopping.load(Ordering::SeqCst) {
                    break;
                }
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(target: "wolf.field.mqtt", driver = %inbox.name, broker = %broker, "mqtt_connected");
                        for row in &inbox.rows {
                            if let Err(err) = client.try_subscribe(row.address.clone(), qos) {
                                warn!(target: "wolf.field.mqtt", driver = %inbox.name, topic = %row.address, error = %err, "mqtt_subscribe_failed");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if !inbox.accept(&publish.topic, &publish.payload).await {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(target: "wolf.field.mqtt", driver = %inbox.name, broker = %broker, error = %err, "mqtt_connection_error");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
            debug!(target: "wolf.field.mqtt", driver = %inbox.name, "mqtt_listener_exited");
        }))
    }
}

#[async_trait]
impl Writable for MqttRawDriver {
    async fn write(&self, measure_id: &str, value: &MeasureValue) -> Result<bool, DriverError> {
        let row = self
            .inbox
            .rows
            .iter()
            .find(|row| row.measure_id == measure_id)
            .ok_or_else(|| DriverError::UnknownMeasure(measure_id.to_string()))?;
        let Some(client) = self.client() else {
            warn!(target: "wolf.field.mqtt", driver = %self.inbox.name, "mqtt_write_before_start");
            return Ok(false);
        };
        match client
            .publish(row.address.clone(), self.qos, false, value.to_string())
            .await
        {
            Ok(()) => {
                debug!(target: "wolf.field.mqtt", driver = %self.inbox.name, topic = %row.address, value = %value, "mqtt_published");
                Ok(true)
            }
            Err(err) => {
                warn!(target: "wolf.field.mqtt", driver = %self.inbox.name, topic = %row.address, error = %err, "mqtt_publish_failed");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl Stoppable for MqttRawDriver {
    async fn stop(&self) {
        self.inbox.stopping.store(true, Ordering::SeqCst);
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(client) = client {
            if let Err(err) = client.disconnect().await {
                debug!(target: "wolf.field.mqtt", driver = %self.inbox.name, error = %err, "mqtt_disconnect_failed");
            }
            info!(target: "wolf.field.mqtt", driver = %self.inbox.name, "mqtt_disconnected");
        }
    }
}

pub struct MqttRawFactory;

#[async_trait]
impl FieldDriverFactory for MqttRawFactory {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn params(&self) -> &'static [ParamSpec] {
        PARAMS
    }

    async fn build(
        &self,
        section: &Section,
        params: Params,
        ctx: &DriverContext,
    ) -> Result<Arc<dyn FieldDriver>, DriverError> {
        let invalid = |option: &str, reason: &str| {
            ConfigError::Invalid(format!("{}.{}", section.name, option), reason.to_string())
        };
        let device_id = params.require_str("device_id")?.to_string();
        let descr = params.str("descr").unwrap_or_default().to_string();
        let port = u16::try_from(params.int("port").unwrap_or(1883))
            .map_err(|_| invalid("port", "must be a TCP port"))?;
        let keepalive = u64::try_from(params.int("keepalive").unwrap_or(60))
            .map_err(|_| invalid("keepalive", "must not be negative"))?;
        let qos = qos_from(params.int("qos").unwrap_or(0))
            .ok_or_else(|| invalid("qos", "must be 0, 1 or 2"))?;

        let rows = section.mapping()?;
        ctx.cache
            .store_meta(&device_id, &section.name, &descr, &rows)
            .await?;

        Ok(Arc::new(MqttRawDriver {
            host: params.str("host").unwrap_or("127.0.0.1").to_string(),
            port,
            username: params.str("username").map(str::to_string),
            password: params.str("password").map(str::to_string),
            keepalive: Duration::from_secs(keepalive),
            qos,
            inbox: Arc::new(Inbox {
                name: section.name.clone(),
                client_id: ctx.client_id().to_string(),
                device_id,
                rows,
                cache: ctx.cache.clone(),
                faults: ctx.faults.clone(),
                stopping: AtomicBool::new(false),
            }),
            client: Mutex::new(None),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wolf_cache::{InMemoryCache, fault_channel};

    fn inbox() -> Inbox {
        let row = |measure_id: &str, measure_type: &str, topic: &str| MappingRow {
            measure_id: measure_id.to_string(),
            description: String::new(),
            unit: String::new(),
            measure_type: measure_type.to_string(),
            rw: true,
            scale: 0.5,
            offset: 1.0,
            address: topic.to_string(),
        };
        Inbox {
            name: "mqtt_raw.room".to_string(),
            client_id: "1".to_string(),
            device_id: "ROOM".to_string(),
            rows: vec![row("T", "f", "room/temp"), row("MODE", "s", "room/mode")],
            cache: Arc::new(InMemoryCache::new("1")),
            faults: FaultReporter::detached(),
            stopping: AtomicBool::new(false),
        }
    }

    #[test]
    fn numeric_payload_is_scaled() {
        let record = inbox().record_for("room/temp", b" 42 ").expect("record");
        assert_eq!(record.device_id, "ROOM");
        assert_eq!(record.measures["T"], MeasureValue::Float(22.0));
    }

    #[test]
    fn text_payload_is_kept_verbatim() {
        let record = inbox().record_for("room/mode", b"auto").expect("record");
        assert_eq!(record.measures["MODE"], MeasureValue::from("auto"));
    }

    #[test]
    fn unknown_topic_or_garbage_is_ignored() {
        let inbox = inbox();
        assert!(inbox.record_for("room/other", b"1").is_none());
        assert!(inbox.record_for("room/temp", b"hot").is_none());
    }

    #[tokio::test]
    async fn stored_messages_keep_the_listener_running() {
        let cache = Arc::new(InMemoryCache::new("1"));
        let inbox = Inbox {
            cache: cache.clone(),
            ..inbox()
        };
        assert!(inbox.accept("room/temp", b"42").await);
        assert!(inbox.accept("room/unknown", b"1").await);
        let last = cache.load_last("1", "ROOM").await.expect("last").expect("snapshot");
        assert_eq!(last.measures["T"], MeasureValue::Float(22.0));
    }

    #[tokio::test]
    async fn unreachable_cache_stops_listener_and_reports_fault() {
        let cache = Arc::new(InMemoryCache::new("1"));
        cache.set_reachable(false);
        let (faults, mut rx) = fault_channel();
        let inbox = Inbox {
            cache,
            faults,
            ..inbox()
        };
        assert!(!inbox.accept("room/temp", b"42").await);
        let err = rx.try_recv().expect("fault");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn qos_levels() {
        assert_eq!(qos_from(1), Some(QoS::AtLeastOnce));
        assert_eq!(qos_from(3), None);
    }
}
