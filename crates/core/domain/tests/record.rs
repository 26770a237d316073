use domain::{MappingRow, MeasureValue, MetaEntry, MetaFilter, Record};

fn meta(device_id: &str, measure_id: &str, rw: bool) -> MetaEntry {
    MetaEntry {
        client_id: "1".to_string(),
        device_id: device_id.to_string(),
        measure_id: measure_id.to_string(),
        driver_id: "modbus_tcp.meter".to_string(),
        device_descr: "".to_string(),
        measure_descr: "".to_string(),
        measure_unit: "V".to_string(),
        measure_type: "f".to_string(),
        rw,
    }
}

#[test]
fn record_second_truncates_fraction() {
    let record = Record::new("1", "M1", 1000.93).with_measure("V", 230.1);
    assert_eq!(record.second(), 1000);
    assert!(!record.is_empty());
    assert!(Record::new("1", "M1", 1.0).is_empty());
}

#[test]
fn measure_value_json_is_untagged() {
    let record = Record::new("1", "M1", 1.0)
        .with_measure("a", 1i64)
        .with_measure("b", true)
        .with_measure("c", "on");
    let value = serde_json::to_value(&record).expect("serialize");
    assert_eq!(value["measures"]["a"], 1);
    assert_eq!(value["measures"]["b"], true);
    assert_eq!(value["measures"]["c"], "on");

    let parsed: MeasureValue = serde_json::from_str("2.5").expect("parse");
    assert_eq!(parsed, MeasureValue::Float(2.5));
}

#[test]
fn meta_filter_combines_fields() {
    let entries = vec![meta("M1", "V", false), meta("M1", "SP", true), meta("M2", "V", false)];

    let all: Vec<_> = entries.iter().filter(|e| MetaFilter::default().matches(e)).collect();
    assert_eq!(all.len(), 3);

    let device = MetaFilter::default().client("1").device("M1");
    assert_eq!(entries.iter().filter(|e| device.matches(e)).count(), 2);

    let writable = MetaFilter::default().device("M1").rw(true);
    let found: Vec<_> = entries.iter().filter(|e| writable.matches(e)).collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].measure_id, "SP");
}

#[test]
fn mapping_row_defaults() {
    let row: MappingRow = serde_json::from_str(r#"{"measure_id": "V"}"#).expect("parse");
    assert_eq!(row.scale, 1.0);
    assert_eq!(row.offset, 0.0);
    assert!(!row.rw);
}
