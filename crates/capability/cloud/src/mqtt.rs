//! MQTT 云端驱动
//!
//! 构造时建立长连接并在后台驱动 eventloop；记录发布到
//! `<topic>/<client_id>/<device_id>`，元数据目录发布到 `<topic>/<client_id>/config`。
//! 未连上 broker 时投递直接失败，记录留在队列中等下一轮。

use crate::payload::RecordPayload;
use async_trait::async_trait;
use domain::{MetaFilter, Record};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wolf_cache::{Delivery, MeasurementCache};
use wolf_config::schema::ParamDefault;
use wolf_config::{ConfigError, ParamSpec, Params, Section};
use wolf_driver::{
    CloudDriver, CloudDriverFactory, ConfigPublisher, DriverContext, DriverError, Stoppable,
};

pub const KIND: &str = "mqtt";

const PARAMS: &[ParamSpec] = &[
    ParamSpec::string("host").default(ParamDefault::Str("127.0.0.1")),
    ParamSpec::int("port").default(ParamDefault::Int(1883)),
    ParamSpec::string("username"),
    ParamSpec::string("password"),
    ParamSpec::int("keepalive").default(ParamDefault::Int(60)),
    ParamSpec::string("topic").required(),
    ParamSpec::int("qos").default(ParamDefault::Int(0)),
    ParamSpec::boolean("retain").default(ParamDefault::Bool(false)),
];

fn qos_from(level: i64) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

pub struct MqttSink {
    name: String,
    broker: String,
    topic: String,
    qos: QoS,
    retain: bool,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    eventloop: Mutex<Option<JoinHandle<()>>>,
    cache: Arc<dyn MeasurementCache>,
}

impl MqttSink {
    pub fn record_topic(&self, record: &Record) -> String {
        format!("{}/{}/{}", self.topic, record.client_id, record.device_id)
    }

    pub fn config_topic(&self) -> String {
        format!("{}/{}/config", self.topic, self.cache.client_id())
    }

    async fn publish(&self, topic: String, payload: Vec<u8>) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            debug!(target: "wolf.cloud.mqtt", sink = %self.name, broker = %self.broker, "mqtt_not_connected");
            return false;
        }
        match self.client.publish(topic.clone(), self.qos, self.retain, payload).await {
            Ok(()) => {
                debug!(target: "wolf.cloud.mqtt", sink = %self.name, topic = %topic, "mqtt_published");
                true
            }
            Err(err) => {
                warn!(target: "wolf.cloud.mqtt", sink = %self.name, topic = %topic, error = %err, "mqtt_publish_failed");
                false
            }
        }
    }
}

#[async_trait]
impl Delivery for MqttSink {
    async fn deliver(&self, record: &Record) -> bool {
        let payload = match serde_json::to_vec(&RecordPayload::from_record(record)) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target: "wolf.cloud.mqtt", sink = %self.name, error = %err, "mqtt_payload_encode_failed");
                return false;
            }
        };
        self.publish(self.record_topic(record), payload).await
    }
}

#[async_trait]
impl ConfigPublisher for MqttSink {
    async fn post_config(&self) -> bool {
        let filter = MetaFilter::default().client(self.cache.client_id());
        let entries = match self.cache.load_meta(&filter).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(target: "wolf.cloud.mqtt", sink = %self.name, error = %err, "mqtt_config_load_failed");
                return false;
            }
        };
        let payload = match serde_json::to_vec(&entries) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target: "wolf.cloud.mqtt", sink = %self.name, error = %err, "mqtt_payload_encode_failed");
                return false;
            }
        };
        let published = self.publish(self.config_topic(), payload).await;
        info!(target: "wolf.cloud.mqtt", sink = %self.name, entries = entries.len(), published, "mqtt_config_posted");
        published
    }
}

#[async_trait]
impl Stoppable for MqttSink {
    async fn stop(&self) {
        if let Err(err) = self.client.disconnect().await {
            debug!(target: "wolf.cloud.mqtt", sink = %self.name, error = %err, "mqtt_disconnect_failed");
        }
        let handle = self
            .eventloop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        info!(target: "wolf.cloud.mqtt", sink = %self.name, broker = %self.broker, "mqtt_disconnected");
    }
}

impl CloudDriver for MqttSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_config_publisher(&self) -> Option<&dyn ConfigPublisher> {
        Some(self)
    }

    fn as_stoppable(&self) -> Option<&dyn Stoppable> {
        Some(self)
    }
}

pub struct MqttSinkFactory;

#[async_trait]
impl CloudDriverFactory for MqttSinkFactory {
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
    ) -> Result<Arc<dyn CloudDriver>, DriverError> {
        let invalid = |option: &str, reason: &str| {
            ConfigError::Invalid(format!("{}.{}", section.name, option), reason.to_string())
        };
        let host = params.str("host").unwrap_or("127.0.0.1").to_string();
        let port = u16::try_from(params.int("port").unwrap_or(1883))
            .map_err(|_| invalid("port", "must be a TCP port"))?;
        let keepalive = u64::try_from(params.int("keepalive").unwrap_or(60))
            .map_err(|_| invalid("keepalive", "must not be negative"))?;
        let qos = qos_from(params.int("qos").unwrap_or(0))
            .ok_or_else(|| invalid("qos", "must be 0, 1 or 2"))?;
        let topic = params
            .require_str("topic")?
            .trim_end_matches('/')
            .to_string();

        let mut options = MqttOptions::new(
            format!("wolf-{}-{}", section.name, uuid::Uuid::new_v4()),
            host.clone(),
            port,
        );
        options.set_keep_alive(Duration::from_secs(keepalive));
        if let (Some(username), Some(password)) = (params.str("username"), params.str("password")) {
            options.set_credentials(username, password);
        }

        let broker = format!("{}:{}", host, port);
        let connected = Arc::new(AtomicBool::new(false));
        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let handle = {
            let connected = connected.clone();
            let name = section.name.clone();
            let broker = broker.clone();
            tokio::spawn(async move {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            connected.store(true, Ordering::SeqCst);
                            info!(target: "wolf.cloud.mqtt", sink = %name, broker = %broker, "mqtt_connected");
                        }
                        Ok(_) => {}
                        Err(err) => {
                            if connected.swap(false, Ordering::SeqCst) {
                                warn!(target: "wolf.cloud.mqtt", sink = %name, broker = %broker, error = %err, "mqtt_connection_lost");
                            } else {
                                debug!(target: "wolf.cloud.mqtt", sink = %name, broker = %broker, error = %err, "mqtt_connect_retry");
                            }
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            })
        };

        Ok(Arc::new(MqttSink {
            name: section.name.clone(),
            broker,
            topic,
            qos,
            retain: params.boolean("retain").unwrap_or(false),
            client,
            connected,
            eventloop: Mutex::new(Some(handle)),
            cache: ctx.cache.clone(),
        }))
    }
}
