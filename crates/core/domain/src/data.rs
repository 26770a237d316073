use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 测量值：数值、布尔或字符串标量。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasureValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MeasureValue {
    /// 数值视图（布尔按 0/1），字符串返回 None。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MeasureValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            MeasureValue::Int(v) => Some(*v as f64),
            MeasureValue::Float(v) => Some(*v),
            MeasureValue::Text(_) => None,
        }
    }
}

impl fmt::Display for MeasureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasureValue::Bool(v) => write!(f, "{}", v),
            MeasureValue::Int(v) => write!(f, "{}", v),
            MeasureValue::Float(v) => write!(f, "{}", v),
            MeasureValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for MeasureValue {
    fn from(value: f64) -> Self {
        MeasureValue::Float(value)
    }
}

impl From<i64> for MeasureValue {
    fn from(value: i64) -> Self {
        MeasureValue::Int(value)
    }
}

impl From<bool> for MeasureValue {
    fn from(value: bool) -> Self {
        MeasureValue::Bool(value)
    }
}

impl From<&str> for MeasureValue {
    fn from(value: &str) -> Self {
        MeasureValue::Text(value.to_string())
    }
}

/// 规范测量记录。
///
/// 身份键为 `(client_id, device_id, 秒级时间戳)`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// 采集时间（Unix 秒，含小数）
    pub ts: f64,
    pub client_id: String,
    pub device_id: String,
    pub measures: BTreeMap<String, MeasureValue>,
}

impl Record {
    pub fn new(client_id: impl Into<String>, device_id: impl Into<String>, ts: f64) -> Self {
        Self {
            ts,
            client_id: client_id.into(),
            device_id: device_id.into(),
            measures: BTreeMap::new(),
        }
    }

    pub fn with_measure(mut self, measure_id: impl Into<String>, value: impl Into<MeasureValue>) -> Self {
        self.measures.insert(measure_id.into(), value.into());
        self
    }

    /// 没有任何测量值的记录视为空记录。
    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }

    /// 键中使用的整秒时间戳。
    pub fn second(&self) -> i64 {
        self.ts.trunc() as i64
    }
}

/// 测量通道映射行（驱动配置中的一行）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRow {
    pub measure_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: String,
    /// 值类型标签（如 `h`、`f`、`bool`、`string`）
    #[serde(default)]
    pub measure_type: String,
    #[serde(default)]
    pub rw: bool,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    /// 协议相关地址（寄存器号、主题、路径等）
    #[serde(default)]
    pub address: String,
}

fn default_scale() -> f64 {
    1.0
}

/// 元数据目录条目：描述一个测量通道。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub client_id: String,
    pub device_id: String,
    pub measure_id: String,
    /// 所属现场驱动（配置段名）
    pub driver_id: String,
    pub device_descr: String,
    pub measure_descr: String,
    pub measure_unit: String,
    pub measure_type: String,
    pub rw: bool,
}

/// 元数据查询条件，字段为 None 时不过滤。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaFilter {
    pub client_id: Option<String>,
    pub device_id: Option<String>,
    pub measure_id: Option<String>,
    pub rw: Option<bool>,
}

impl MetaFilter {
    pub fn client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn measure(mut self, measure_id: impl Into<String>) -> Self {
        self.measure_id = Some(measure_id.into());
        self
    }

    pub fn rw(mut self, rw: bool) -> Self {
        self.rw = Some(rw);
        self
    }

    pub fn matches(&self, entry: &MetaEntry) -> bool {
        self.client_id.as_ref().is_none_or(|id| *id == entry.client_id)
            && self.device_id.as_ref().is_none_or(|id| *id == entry.device_id)
            && self.measure_id.as_ref().is_none_or(|id| *id == entry.measure_id)
            && self.rw.is_none_or(|rw| rw == entry.rw)
    }
}

/// 客户端登记条目。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEntry {
    pub client_id: String,
    pub description: String,
}

/// HTTP 层投递给写回队列的请求。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub client_id: String,
    pub device_id: String,
    pub measure_id: String,
    pub value: MeasureValue,
}

/// 当前 Unix 时间（秒，含小数）。
pub fn now_epoch_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
