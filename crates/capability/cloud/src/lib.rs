//! # Wolf Cloud 模块
//!
//! 随网关发布的云端驱动。云端驱动名即出口名，也是缓存中投递队列的名字。
//!
//! - [`mqtt`]：JSON 记录发布到 broker
//! - [`rest`]：JSON 记录 POST 到 HTTP 服务

pub mod mqtt;
pub mod payload;
pub mod rest;

pub use mqtt::{MqttSink, MqttSinkFactory};
pub use payload::{MeasureItem, RecordPayload, local_timestamp};
pub use rest::{RestSink, RestSinkFactory};

use std::sync::Arc;
use wolf_driver::DriverCatalog;

pub fn register(catalog: DriverCatalog) -> DriverCatalog {
    catalog
        .with_cloud(Arc::new(MqttSinkFactory))
        .with_cloud(Arc::new(RestSinkFactory))
}
