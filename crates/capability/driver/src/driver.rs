use crate::capability::{ConfigPublisher, Listener, Pollable, Stoppable, Writable};
use wolf_cache::Delivery;

/// 现场驱动：从设备采集数据。
pub trait FieldDriver: Send + Sync {
    /// 驱动实例名（配置段名）
    fn name(&self) -> &str;

    fn as_pollable(&self) -> Option<&dyn Pollable> {
        None
    }

    fn as_writable(&self) -> Option<&dyn Writable> {
        None
    }

    fn as_listener(&self) -> Option<&dyn Listener> {
        None
    }

    fn as_stoppable(&self) -> Option<&dyn Stoppable> {
        None
    }
}

/// 云端驱动：把记录投递到一个出口，出口名即队列名。
pub trait CloudDriver: Delivery {
    fn name(&self) -> &str;

    fn as_config_publisher(&self) -> Option<&dyn ConfigPublisher> {
        None
    }

    fn as_stoppable(&self) -> Option<&dyn Stoppable> {
        None
    }
}
