//! # Wolf Field 模块
//!
//! 随网关发布的现场驱动：
//!
//! - [`modbus_tcp`]：Modbus TCP 网桥轮询与写入（按 `host:port` 加资源锁）
//! - [`mqtt_raw`]：订阅 MQTT 主题，报文即测量值
//!
//! [`register`] 把全部现场驱动工厂登记到驱动目录。

pub mod modbus_tcp;
pub mod mqtt_raw;
pub mod registers;

pub use modbus_tcp::{ModbusTcpDriver, ModbusTcpFactory};
pub use mqtt_raw::{MqttRawDriver, MqttRawFactory};

use std::sync::Arc;
use wolf_driver::DriverCatalog;

pub fn register(catalog: DriverCatalog) -> DriverCatalog {
    catalog
        .with_field(Arc::new(ModbusTcpFactory))
        .with_field(Arc::new(MqttRawFactory))
}
