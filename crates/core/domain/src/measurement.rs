//! 数据点（Measurement）
//!
//! 一条订阅消息读取后的结构化结果：
//! - 名称、可选数据库、字段值、标签与纳秒时间戳
//! - `validate` 校验名称与标签字符集
//! - `format` 输出 InfluxDB line protocol
//!
//! 格式参考：
//! <https://docs.influxdata.com/influxdb/v1.8/write_protocols/line_protocol_reference/>

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// 流水线写入的唯一字段名。
pub const VALUE_FIELD: &str = "value";

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\-_\.]+$").expect("name pattern"));
static TAG_VALUE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9:;\-_\.]+$").expect("tag value pattern"));

/// 数据点校验错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid database name {0:?}")]
    InvalidDatabaseName(String),
    #[error("invalid measurement name {0:?}")]
    InvalidMeasurementName(String),
    #[error("at least one value is required")]
    MissingValue,
    #[error("invalid field name {0:?}")]
    InvalidFieldName(String),
    #[error("invalid tag name {0:?}")]
    InvalidTagName(String),
    #[error("invalid value {value:?} for tag {tag:?}")]
    InvalidTagValue { tag: String, value: String },
}

/// 提交到 InfluxDB 的单个数据点。
///
/// 字段值已是 line protocol 表示（例如 `1.50`、`3i`、`"text"`）。
/// 标签使用有序映射，序列化时按标签名排序输出。
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// 目标数据库，空字符串表示使用部署默认库。
    pub database: String,
    pub name: String,
    /// Unix 纪元起的纳秒数。
    pub timestamp_ns: i64,
    pub values: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

impl Measurement {
    /// 以当前时间创建数据点。
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_timestamp(database, name, crate::now_epoch_ns())
    }

    pub fn with_timestamp(
        database: impl Into<String>,
        name: impl Into<String>,
        timestamp_ns: i64,
    ) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            timestamp_ns,
            values: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    /// 设置标签。
    pub fn tag(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(name.into(), value.into());
    }

    /// 设置 `value` 字段。
    pub fn set_value(&mut self, value: impl Into<String>) {
        self.set_field(VALUE_FIELD, value);
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// 数据点自身的数据库，未设置时回退到 `default`。
    pub fn database_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.database.is_empty() {
            default
        } else {
            &self.database
        }
    }

    /// 校验名称、字段与标签。
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.database.is_empty() && !NAME_PATTERN.is_match(&self.database) {
            return Err(ValidationError::InvalidDatabaseName(self.database.clone()));
        }
        if !NAME_PATTERN.is_match(&self.name) {
            return Err(ValidationError::InvalidMeasurementName(self.name.clone()));
        }
        if self.values.is_empty() {
            return Err(ValidationError::MissingValue);
        }
        for field in self.values.keys() {
            if !NAME_PATTERN.is_match(field) {
                return Err(ValidationError::InvalidFieldName(field.clone()));
            }
        }
        for (tag, value) in &self.tags {
            if !NAME_PATTERN.is_match(tag) {
                return Err(ValidationError::InvalidTagName(tag.clone()));
            }
            if !TAG_VALUE_PATTERN.is_match(value) {
                return Err(ValidationError::InvalidTagValue {
                    tag: tag.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    /// line protocol 表示：
    /// `<measurement>[,<tag>=<value>...] <field>=<value>[,<field>=<value>...] <timestamp>`
    ///
    /// 不做校验，调用方需先 `validate`。
    pub fn format(&self) -> String {
        let mut line = self.name.clone();
        for (tag, value) in &self.tags {
            line.push(',');
            line.push_str(tag);
            line.push('=');
            line.push_str(value);
        }
        line.push(' ');
        let fields = self
            .values
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(",");
        line.push_str(&fields);
        line.push(' ');
        line.push_str(&self.timestamp_ns.to_string());
        line
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}
