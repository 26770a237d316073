//! 驱动配置段文件。
//!
//! ```toml
//! [field.modbus_tcp.meter1]      # 段名 modbus_tcp.meter1
//! host = "192.168.1.10"
//! device_id = "M1"
//!
//! [[field.modbus_tcp.meter1.mapping]]
//! measure_id = "V"
//! address = "30001"
//!
//! [cloud.mqtt]                   # 段名 mqtt
//! host = "broker.local"
//! ```

use crate::ConfigError;
use domain::MappingRow;
use std::path::Path;

/// 一个驱动配置段。
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// 段名，同时作为驱动实例名与（云端驱动的）队列名
    pub name: String,
    /// 驱动类型
    pub kind: String,
    pub options: toml::Table,
}

impl Section {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, options: toml::Table) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            options,
        }
    }

    /// `disabled = true` 表示该段被管理员禁用。
    pub fn is_disabled(&self) -> bool {
        self.options
            .get("disabled")
            .and_then(toml::Value::as_bool)
            .unwrap_or(false)
    }

    /// 读取内联映射行 `[[...mapping]]`。
    pub fn mapping(&self) -> Result<Vec<MappingRow>, ConfigError> {
        let Some(value) = self.options.get("mapping") else {
            return Ok(Vec::new());
        };
        value
            .clone()
            .try_into::<Vec<MappingRow>>()
            .map_err(|err| ConfigError::Invalid(format!("{}.mapping", self.name), err.to_string()))
    }
}

/// 配置文件中的全部驱动段。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverSections {
    pub field: Vec<Section>,
    pub cloud: Vec<Section>,
}

impl DriverSections {
    /// 读取并解析配置文件。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Parse(format!("{}: {}", path.display(), err)))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let root: toml::Table = text
            .parse()
            .map_err(|err: toml::de::Error| ConfigError::Parse(err.to_string()))?;
        let mut sections = Self::default();

        if let Some(field) = root.get("field") {
            for (kind, instances) in as_table(field, "field")? {
                for (instance, options) in as_table(instances, kind)? {
                    let name = format!("{}.{}", kind, instance);
                    let options = as_table(options, &name)?.clone();
                    sections.field.push(Section::new(kind.clone(), name, options));
                }
            }
        }

        if let Some(cloud) = root.get("cloud") {
            for (kind, options) in as_table(cloud, "cloud")? {
                let options = as_table(options, kind)?.clone();
                sections.cloud.push(Section::new(kind.clone(), kind.clone(), options));
            }
        }

        Ok(sections)
    }

    pub fn field_sections<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Section> + 'a {
        self.field.iter().filter(move |section| section.kind == kind)
    }

    pub fn cloud_section(&self, kind: &str) -> Option<&Section> {
        self.cloud.iter().find(|section| section.kind == kind)
    }
}

fn as_table<'a>(value: &'a toml::Value, name: &str) -> Result<&'a toml::Table, ConfigError> {
    value
        .as_table()
        .ok_or_else(|| ConfigError::Parse(format!("{} must be a table", name)))
}
