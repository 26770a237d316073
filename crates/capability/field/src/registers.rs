//! Modbus 寄存器地址与数据类型解析
//!
//! 地址采用常见的 5 位编号：`4xxxx` 保持寄存器，`3xxxx` 输入寄存器，
//! `1xxxx` 离散输入，其余为线圈。

use domain::MeasureValue;
use wolf_driver::DriverError;

/// 寄存器表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Coil,
    DiscreteInput,
    InputRegister,
    HoldingRegister,
}

/// 解析后的寄存器地址（0 起始）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub table: Table,
    pub address: u16,
}

impl Register {
    pub fn parse(number: &str) -> Result<Self, DriverError> {
        let number: u32 = number
            .trim()
            .parse()
            .map_err(|_| DriverError::Protocol(format!("invalid register number: {}", number)))?;
        let (table, base) = match number {
            n if n > 40000 => (Table::HoldingRegister, 40001),
            n if n > 30000 => (Table::InputRegister, 30001),
            n if n > 10000 => (Table::DiscreteInput, 10001),
            n if n > 0 => (Table::Coil, 1),
            _ => return Err(DriverError::Protocol("register number 0".to_string())),
        };
        let address = u16::try_from(number - base)
            .map_err(|_| DriverError::Protocol(format!("register out of range: {}", number)))?;
        Ok(Self { table, address })
    }

    pub fn is_bit(&self) -> bool {
        matches!(self.table, Table::Coil | Table::DiscreteInput)
    }
}

/// 多寄存器数值的字序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordOrder {
    Big,
    Little,
}

/// 值类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Char,
    /// 字符串，参数为寄存器数
    Text(u16),
}

impl DataType {
    /// `b B h H i I q Q f d c s<字节数>`
    pub fn parse(tag: &str) -> Result<Self, DriverError> {
        let data_type = match tag {
            "b" => DataType::I8,
            "B" => DataType::U8,
            "h" => DataType::I16,
            "H" => DataType::U16,
            "i" => DataType::I32,
            "I" => DataType::U32,
            "q" => DataType::I64,
            "Q" => DataType::U64,
            "f" => DataType::F32,
            "d" => DataType::F64,
            "c" => DataType::Char,
            other => match other.strip_prefix('s') {
                Some(bytes) => {
                    let bytes: u16 = bytes.parse().map_err(|_| {
                        DriverError::Protocol(format!("invalid string length: {}", other))
                    })?;
                    DataType::Text((bytes >> 1).max(1))
                }
                None => return Err(DriverError::Protocol(format!("unknown value type: {}", other))),
            },
        };
        Ok(data_type)
    }

    pub fn register_count(&self) -> u16 {
        match self {
            DataType::I8 | DataType::U8 | DataType::I16 | DataType::U16 | DataType::Char => 1,
            DataType::I32 | DataType::U32 | DataType::F32 => 2,
            DataType::I64 | DataType::U64 | DataType::F64 => 4,
            DataType::Text(count) => *count,
        }
    }
}

fn ordered(registers: &[u16], order: WordOrder) -> Vec<u16> {
    let mut words = registers.to_vec();
    if order == WordOrder::Little {
        words.reverse();
    }
    words
}

fn be_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_be_bytes()).collect()
}

/// 把寄存器解码为测量值，数值类型应用 `scale` / `offset`。
pub fn decode(
    registers: &[u16],
    data_type: DataType,
    order: WordOrder,
    scale: f64,
    offset: f64,
) -> Result<MeasureValue, DriverError> {
    let needed = data_type.register_count() as usize;
    if registers.len() < needed {
        return Err(DriverError::Protocol(format!(
            "need {} registers, got {}",
            needed,
            registers.len()
        )));
    }
    let registers = &registers[..needed];
    let raw = match data_type {
        DataType::I8 => (registers[0].to_be_bytes()[0] as i8) as f64,
        DataType::U8 => registers[0].to_be_bytes()[0] as f64,
        DataType::I16 => registers[0] as i16 as f64,
        DataType::U16 => registers[0] as f64,
        DataType::I32 | DataType::U32 | DataType::F32 => {
            let bytes = be_bytes(&ordered(registers, order));
            let bits = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            match data_type {
                DataType::I32 => bits as i32 as f64,
                DataType::U32 => bits as f64,
                _ => f32::from_bits(bits) as f64,
            }
        }
        DataType::I64 | DataType::U64 | DataType::F64 => {
            let bytes = be_bytes(&ordered(registers, order));
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[..8]);
            let bits = u64::from_be_bytes(buf);
            match data_type {
                DataType::I64 => bits as i64 as f64,
                DataType::U64 => bits as f64,
                _ => f64::from_bits(bits),
            }
        }
        DataType::Char | DataType::Text(_) => {
            let bytes = be_bytes(registers);
            let text = String::from_utf8_lossy(&bytes)
                .trim_end_matches('\0')
                .to_string();
            return Ok(MeasureValue::Text(text));
        }
    };
    if raw.is_nan() {
        return Err(DriverError::Protocol("register value is NaN".to_string()));
    }
    Ok(MeasureValue::Float(round14(raw * scale) + offset))
}

pub(crate) fn round14(value: f64) -> f64 {
    let factor = 1e14;
    let rounded = (value * factor).round() / factor;
    if rounded.is_finite() { rounded } else { value }
}

/// 把写入值编码为寄存器。
pub fn encode(
    value: &MeasureValue,
    data_type: DataType,
    order: WordOrder,
) -> Result<Vec<u16>, DriverError> {
    let invalid = || DriverError::Protocol(format!("cannot encode {} as {:?}", value, data_type));
    let words_of = |bytes: &[u8]| -> Vec<u16> {
        bytes
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)]))
            .collect()
    };
    let words = match data_type {
        DataType::Char | DataType::Text(_) => {
            let MeasureValue::Text(text) = value else {
                return Err(invalid());
            };
            let mut bytes = text.as_bytes().to_vec();
            bytes.resize(data_type.register_count() as usize * 2, 0);
            return Ok(words_of(&bytes));
        }
        _ => {
            let number = value.as_f64().ok_or_else(invalid)?;
            match data_type {
                DataType::I8 => vec![u16::from_be_bytes([number as i8 as u8, 0])],
                DataType::U8 => vec![u16::from_be_bytes([number as u8, 0])],
                DataType::I16 => vec![number as i16 as u16],
                DataType::U16 => vec![number as u16],
                DataType::I32 => words_of(&(number as i32).to_be_bytes()),
                DataType::U32 => words_of(&(number as u32).to_be_bytes()),
                DataType::F32 => words_of(&(number as f32).to_be_bytes()),
                DataType::I64 => words_of(&(number as i64).to_be_bytes()),
                DataType::U64 => words_of(&(number as u64).to_be_bytes()),
                _ => words_of(&number.to_be_bytes()),
            }
        }
    };
    Ok(ordered(&words, order))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_numbers_select_table() {
        let holding = Register::parse("40001").expect("holding");
        assert_eq!(holding, Register { table: Table::HoldingRegister, address: 0 });
        assert_eq!(Register::parse("30010").expect("input").table, Table::InputRegister);
        assert_eq!(Register::parse("10002").expect("discrete").address, 1);
        assert!(Register::parse("17").expect("coil").is_bit());
        assert!(Register::parse("0").is_err());
        assert!(Register::parse("abc").is_err());
    }

    #[test]
    fn data_types_know_their_width() {
        assert_eq!(DataType::parse("h").expect("h").register_count(), 1);
        assert_eq!(DataType::parse("f").expect("f").register_count(), 2);
        assert_eq!(DataType::parse("d").expect("d").register_count(), 4);
        assert_eq!(DataType::parse("s16").expect("s16"), DataType::Text(8));
        assert!(DataType::parse("x").is_err());
    }

    #[test]
    fn decode_int16_applies_scale_and_offset() {
        let value = decode(&[(-100i16) as u16], DataType::I16, WordOrder::Big, 0.1, 1.0)
            .expect("decode");
        assert_eq!(value, MeasureValue::Float(-9.0));
    }

    #[test]
    fn decode_float32_respects_word_order() {
        let bits = 230.5f32.to_bits();
        let high = (bits >> 16) as u16;
        let low = bits as u16;
        let big = decode(&[high, low], DataType::F32, WordOrder::Big, 1.0, 0.0).expect("big");
        let little =
            decode(&[low, high], DataType::F32, WordOrder::Little, 1.0, 0.0).expect("little");
        assert_eq!(big, MeasureValue::Float(230.5));
        assert_eq!(little, big);
    }

    #[test]
    fn decode_text_strips_padding() {
        let words = encode(&MeasureValue::from("RUN"), DataType::Text(3), WordOrder::Big)
            .expect("encode");
        let value = decode(&words, DataType::Text(3), WordOrder::Big, 1.0, 0.0).expect("decode");
        assert_eq!(value, MeasureValue::from("RUN"));
    }

    #[test]
    fn decode_rejects_nan_and_short_reads() {
        let nan = f32::NAN.to_bits();
        let words = [(nan >> 16) as u16, nan as u16];
        assert!(decode(&words, DataType::F32, WordOrder::Big, 1.0, 0.0).is_err());
        assert!(decode(&[1], DataType::I32, WordOrder::Big, 1.0, 0.0).is_err());
    }

    #[test]
    fn encode_uint32_little_endian_words() {
        let words = encode(&MeasureValue::Int(0x0001_0002), DataType::U32, WordOrder::Little)
            .expect("encode");
        assert_eq!(words, vec![0x0002, 0x0001]);
    }
}
