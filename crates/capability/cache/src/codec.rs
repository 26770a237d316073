//! 记录与元数据的 MessagePack（map 形式）编码，以及同秒合并规则。

use crate::error::CacheError;
use domain::Record;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// 把 `incoming` 的测量值并入 `existing`：已存在的测量名保留原值，只补充新名称。
pub fn merge_measures(existing: &mut Record, incoming: &Record) {
    for (measure_id, value) in &incoming.measures {
        existing
            .measures
            .entry(measure_id.clone())
            .or_insert_with(|| value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::MeasureValue;

    #[test]
    fn existing_measures_win_on_collision() {
        let mut existing = Record::new("1", "M1", 100.0).with_measure("a", 1i64);
        merge_measures(
            &mut existing,
            &Record::new("1", "M1", 100.4).with_measure("a", 9i64).with_measure("b", 2i64),
        );
        assert_eq!(existing.measures["a"], MeasureValue::Int(1));
        assert_eq!(existing.measures["b"], MeasureValue::Int(2));
        assert_eq!(existing.ts, 100.0);
    }

    #[test]
    fn msgpack_keeps_value_kinds() {
        let record = Record::new("1", "M1", 1000.5)
            .with_measure("V", 230.1)
            .with_measure("n", 7i64)
            .with_measure("on", true)
            .with_measure("state", "run");
        let decoded: Record = decode(&encode(&record).expect("encode")).expect("decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let err = decode::<Record>(&[0xc1, 0x00]).expect_err("invalid");
        assert!(matches!(err, CacheError::Codec(_)));
    }
}
