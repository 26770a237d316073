//! 声明式参数模式。
//!
//! 每个驱动工厂声明一组 [`ParamSpec`]，由 [`parse_section`] 统一解析为 [`Params`]：
//! 缺省值补齐、必填检查、类型检查、枚举取值检查。

use crate::ConfigError;
use crate::sections::Section;
use std::collections::BTreeMap;

/// 参数类型。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    String,
    Int,
    Float,
    Boolean,
    /// 取值必须属于给定集合的字符串
    Enum(&'static [&'static str]),
}

/// 参数缺省值（可在 const 上下文中声明）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDefault {
    Str(&'static str),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// 解析后的参数值。
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Int(i64),
    Float(f64),
    Boolean(bool),
}

/// 单个参数声明。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: Option<ParamDefault>,
    pub required: bool,
}

impl ParamSpec {
    pub const fn new(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            default: None,
            required: false,
        }
    }

    pub const fn string(name: &'static str) -> Self {
        Self::new(name, ParamKind::String)
    }

    pub const fn int(name: &'static str) -> Self {
        Self::new(name, ParamKind::Int)
    }

    pub const fn float(name: &'static str) -> Self {
        Self::new(name, ParamKind::Float)
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name, ParamKind::Boolean)
    }

    pub const fn one_of(name: &'static str, values: &'static [&'static str]) -> Self {
        Self::new(name, ParamKind::Enum(values))
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn default(mut self, value: ParamDefault) -> Self {
        self.default = Some(value);
        self
    }
}

/// 一个配置段的类型化参数。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    section: String,
    values: BTreeMap<&'static str, ParamValue>,
}

impl Params {
    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ParamValue::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ParamValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ParamValue::Float(value)) => Some(*value),
            Some(ParamValue::Int(value)) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ParamValue::Boolean(value)) => Some(*value),
            _ => None,
        }
    }

    /// 必填字符串参数。
    pub fn require_str(&self, name: &str) -> Result<&str, ConfigError> {
        self.str(name)
            .ok_or_else(|| ConfigError::Missing(self.section.clone(), name.to_string()))
    }

    pub fn require_int(&self, name: &str) -> Result<i64, ConfigError> {
        self.int(name)
            .ok_or_else(|| ConfigError::Missing(self.section.clone(), name.to_string()))
    }
}

/// 按参数声明解析配置段。
pub fn parse_section(section: &Section, specs: &[ParamSpec]) -> Result<Params, ConfigError> {
    let mut params = Params {
        section: section.name.clone(),
        values: BTreeMap::new(),
    };
    for spec in specs {
        let value = match section.options.get(spec.name) {
            Some(raw) => Some(convert(section, spec, raw)?),
            None => spec.default.map(|default| match default {
                ParamDefault::Str(value) => ParamValue::String(value.to_string()),
                ParamDefault::Int(value) => ParamValue::Int(value),
                ParamDefault::Float(value) => ParamValue::Float(value),
                ParamDefault::Bool(value) => ParamValue::Boolean(value),
            }),
        };
        match value {
            Some(value) => {
                params.values.insert(spec.name, value);
            }
            None if spec.required => {
                return Err(ConfigError::Missing(
                    section.name.clone(),
                    spec.name.to_string(),
                ));
            }
            None => {}
        }
    }
    Ok(params)
}

fn convert(section: &Section, spec: &ParamSpec, raw: &toml::Value) -> Result<ParamValue, ConfigError> {
    let invalid = || {
        ConfigError::Invalid(
            format!("{}.{}", section.name, spec.name),
            raw.to_string(),
        )
    };
    match spec.kind {
        ParamKind::String => raw
            .as_str()
            .map(|value| ParamValue::String(value.to_string()))
            .ok_or_else(invalid),
        ParamKind::Int => raw.as_integer().map(ParamValue::Int).ok_or_else(invalid),
        ParamKind::Float => raw
            .as_float()
            .or_else(|| raw.as_integer().map(|value| value as f64))
            .map(ParamValue::Float)
            .ok_or_else(invalid),
        ParamKind::Boolean => raw.as_bool().map(ParamValue::Boolean).ok_or_else(invalid),
        ParamKind::Enum(allowed) => {
            let value = raw.as_str().ok_or_else(invalid)?;
            if allowed.contains(&value) {
                Ok(ParamValue::String(value.to_string()))
            } else {
                Err(ConfigError::Invalid(
                    format!("{}.{}", section.name, spec.name),
                    format!("{}; valid options are: {}", value, allowed.join(", ")),
                ))
            }
        }
    }
}
