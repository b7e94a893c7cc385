//! 值类型转换
//!
//! 把原始字符串转换为 line protocol 字段值：
//! - float：`1.50`（定点，无后缀）
//! - integer：`15i`
//! - boolean / on-off：`true` | `false`
//! - string：`"foo \"bar\""`
//! - identity：原样输出

use crate::error::NormalizeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// 未指定精度时 float 的小数位数。
const DEFAULT_FLOAT_PRECISION: usize = 6;

/// 转换类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionKind {
    Identity,
    Float,
    Integer,
    Boolean,
    OnOff,
    String,
}

impl ConversionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Float => "float",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::OnOff => "on-off",
            Self::String => "string",
        }
    }
}

impl FromStr for ConversionKind {
    type Err = NormalizeError;

    /// 空字符串视为 identity。
    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "" | "identity" => Ok(Self::Identity),
            "float" => Ok(Self::Float),
            "integer" => Ok(Self::Integer),
            "boolean" => Ok(Self::Boolean),
            "on-off" => Ok(Self::OnOff),
            "string" => Ok(Self::String),
            other => Err(NormalizeError::UnsupportedConversion(other.to_string())),
        }
    }
}

impl fmt::Display for ConversionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 转换参数（订阅定义中的 `conversion`）。
///
/// `kind` 保留原始字符串，首次转换时才解析，
/// 未知类型因此在第一条消息时报错而不是加载时。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Conversion {
    pub kind: String,
    /// float 小数位数，0 表示默认（6 位）。
    pub precision: u32,
    /// 非 0 时乘以该系数。
    pub scale: f64,
    /// 转换前的查找表，键为去除首尾空白后的原始值。
    pub lookup: Option<HashMap<String, String>>,
}

impl Conversion {
    pub fn new(kind: ConversionKind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            ..Self::default()
        }
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_lookup(mut self, lookup: HashMap<String, String>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// 解析后的转换类型。
    pub fn kind(&self) -> Result<ConversionKind, NormalizeError> {
        self.kind.parse()
    }

    /// 对原始值执行（查找表 +）类型转换。
    pub fn convert(&self, raw: &str) -> Result<String, NormalizeError> {
        let kind = self.kind()?;
        let translated;
        let raw = match &self.lookup {
            Some(lookup) => {
                translated = translate(lookup, raw)?;
                translated.as_str()
            }
            None => raw,
        };

        match kind {
            ConversionKind::Identity => Ok(raw.to_string()),
            ConversionKind::Float => self.to_float(raw),
            ConversionKind::Integer => self.to_integer(raw),
            ConversionKind::Boolean => to_boolean(raw),
            ConversionKind::OnOff => to_on_off(raw),
            ConversionKind::String => Ok(quote(raw)),
        }
    }

    fn to_float(&self, raw: &str) -> Result<String, NormalizeError> {
        let mut value = raw
            .parse::<f64>()
            .map_err(|err| NormalizeError::Parse(format!("float {:?}: {}", raw, err)))?;
        if !value.is_finite() {
            return Err(NormalizeError::Parse(format!("float {:?}: not finite", raw)));
        }
        // -0 -> 0
        if value == 0.0 {
            value = 0.0;
        }
        if self.scale != 0.0 {
            value *= self.scale;
            if !value.is_finite() {
                return Err(NormalizeError::Parse(format!(
                    "float {:?} scaled by {}: not finite",
                    raw, self.scale
                )));
            }
            if value == 0.0 {
                value = 0.0;
            }
        }
        let precision = if self.precision == 0 {
            DEFAULT_FLOAT_PRECISION
        } else {
            self.precision as usize
        };
        Ok(format!("{:.*}", precision, value))
    }

    fn to_integer(&self, raw: &str) -> Result<String, NormalizeError> {
        let mut value = raw
            .parse::<i64>()
            .map_err(|err| NormalizeError::Parse(format!("integer {:?}: {}", raw, err)))?;
        if self.scale != 0.0 {
            value = (value as f64 * self.scale) as i64;
        }
        Ok(format!("{}i", value))
    }
}

fn translate(lookup: &HashMap<String, String>, raw: &str) -> Result<String, NormalizeError> {
    let key = raw.trim();
    lookup
        .get(key)
        .cloned()
        .ok_or_else(|| NormalizeError::Lookup(key.to_string()))
}

fn to_boolean(raw: &str) -> Result<String, NormalizeError> {
    let normalized = raw.trim().to_lowercase();
    let value = match normalized.as_str() {
        "1" | "t" | "true" => true,
        "0" | "f" | "false" => false,
        _ => {
            return Err(NormalizeError::Parse(format!(
                "boolean {:?}: invalid syntax",
                raw
            )));
        }
    };
    Ok(value.to_string())
}

fn to_on_off(raw: &str) -> Result<String, NormalizeError> {
    let normalized = raw.trim().to_lowercase();
    match normalized.as_str() {
        "on" => Ok("true".to_string()),
        "off" => Ok("false".to_string()),
        _ => Err(NormalizeError::Validation(format!(
            "expected on/off, got {:?}",
            raw
        ))),
    }
}

/// line protocol 字符串字段：双引号包裹并转义。
fn quote(raw: &str) -> String {
    let mut quoted = String::with_capacity(raw.len() + 2);
    quoted.push('"');
    for ch in raw.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}
