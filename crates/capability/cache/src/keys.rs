//! 后端键空间。
//!
//! | 键 | 内容 |
//! |---|---|
//! | `data:<client>:<device>:<ts>` | 一条测量记录 |
//! | `data:<client>:<device>:last` | 最新值快照 |
//! | `queue:<client>:<sink>` | 该出口待投递的记录键集合 |
//! | `meta:<client>:<device>:<measure>` | 一个元数据条目 |
//! | `clients:<client>` | 客户端登记 |

use domain::Record;

pub fn record_key(record: &Record) -> String {
    format!(
        "data:{}:{}:{}",
        record.client_id,
        record.device_id,
        record.second()
    )
}

pub fn last_key(client_id: &str, device_id: &str) -> String {
    format!("data:{}:{}:last", client_id, device_id)
}

pub fn queue_key(client_id: &str, sink: &str) -> String {
    format!("queue:{}:{}", client_id, sink)
}

pub fn meta_key(client_id: &str, device_id: &str, measure_id: &str) -> String {
    format!("meta:{}:{}:{}", client_id, device_id, measure_id)
}

/// 某设备全部元数据条目的匹配模式。
pub fn meta_device_pattern(client_id: &str, device_id: &str) -> String {
    format!("meta:{}:{}:*", client_id, device_id)
}

pub const META_PATTERN: &str = "meta:*";

pub fn client_key(client_id: &str) -> String {
    format!("clients:{}", client_id)
}

pub const CLIENTS_PATTERN: &str = "clients:*";
