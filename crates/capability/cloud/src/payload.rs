//! 出站报文格式
//!
//! 记录的 `ts` 转为带本地时区偏移的 `at`，测量值展开为
//! `[{measure_id, value}]` 数组。

use chrono::{DateTime, Local};
use domain::{MeasureValue, Record};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureItem<'a> {
    pub measure_id: &'a str,
    pub value: &'a MeasureValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordPayload<'a> {
    pub client_id: &'a str,
    pub device_id: &'a str,
    pub at: String,
    pub measures: Vec<MeasureItem<'a>>,
}

impl<'a> RecordPayload<'a> {
    pub fn from_record(record: &'a Record) -> Self {
        Self {
            client_id: &record.client_id,
            device_id: &record.device_id,
            at: local_timestamp(record.ts),
            measures: record
                .measures
                .iter()
                .map(|(measure_id, value)| MeasureItem { measure_id, value })
                .collect(),
        }
    }
}

/// `%Y-%m-%dT%H:%M:%S%z`，本地时区。
pub fn local_timestamp(ts: f64) -> String {
    let secs = ts.trunc() as i64;
    let nanos = (ts.fract() * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos)
        .unwrap_or_default()
        .with_timezone(&Local)
        .format("%Y-%m-%dT%H:%M:%S%z")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn measures_become_an_array() {
        let record = Record::new("1", "M1", 1000.5)
            .with_measure("A", 1.5)
            .with_measure("B", "on");
        let json = serde_json::to_value(RecordPayload::from_record(&record)).expect("json");
        assert_eq!(json["client_id"], "1");
        assert_eq!(json["device_id"], "M1");
        assert_eq!(json["measures"][0]["measure_id"], "A");
        assert_eq!(json["measures"][0]["value"], 1.5);
        assert_eq!(json["measures"][1]["value"], "on");
        assert!(json.get("ts").is_none());
    }

    #[test]
    fn timestamp_carries_offset() {
        let at = local_timestamp(1000.0);
        let parsed = DateTime::<FixedOffset>::parse_from_str(&at, "%Y-%m-%dT%H:%M:%S%z")
            .expect("parse");
        assert_eq!(parsed.timestamp(), 1000);
    }
}
