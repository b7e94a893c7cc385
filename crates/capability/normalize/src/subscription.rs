//! 订阅定义与读取流水线

use crate::context::TemplateContext;
use crate::conversion::Conversion;
use crate::error::NormalizeError;
use crate::template::Template;
use domain::Measurement;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// 单个 MQTT 订阅。
///
/// - `topic`：订阅的主题过滤器，可含 `+` / `#` 通配符
/// - `measurement`：measurement 名称模板
/// - `database`：可选，覆盖默认数据库
/// - `tags`：标签名 -> 标签值模板
/// - `value`：可选取值表达式（如 `CSV 1`、`JSON "a.b"`），为空时使用整个 payload
/// - `csvSeparator`：可选，单字符 CSV 分隔符
/// - `conversion`：值类型转换
///
/// 模板在第一次读取时编译并缓存，之后修改模板字段不会生效。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Subscription {
    pub topic: String,
    pub measurement: String,
    pub database: String,
    pub tags: BTreeMap<String, String>,
    pub value: String,
    #[serde(rename = "csvSeparator")]
    pub csv_separator: String,
    pub conversion: Conversion,
    #[serde(skip)]
    templates: OnceLock<Result<CompiledTemplates, NormalizeError>>,
}

/// 一个订阅编译后的全部模板。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplates {
    measurement: Template,
    value: Option<Template>,
    tags: Vec<(String, Template)>,
}

impl CompiledTemplates {
    fn compile(subscription: &Subscription) -> Result<Self, NormalizeError> {
        let measurement = Template::parse("measurement", &subscription.measurement)?;
        let value = if subscription.value.is_empty() {
            None
        } else if subscription.value.contains("{{") {
            Some(Template::parse("value", &subscription.value)?)
        } else {
            Some(Template::parse(
                "value",
                &format!("{{{{{}}}}}", subscription.value),
            )?)
        };
        let tags = subscription
            .tags
            .iter()
            .map(|(tag, text)| {
                let template = Template::parse(format!("tag.{}", tag), text)?;
                Ok::<_, NormalizeError>((tag.clone(), template))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            measurement,
            value,
            tags,
        })
    }

    pub fn measurement(&self) -> &Template {
        &self.measurement
    }

    pub fn value(&self) -> Option<&Template> {
        self.value.as_ref()
    }

    pub fn tag(&self, name: &str) -> Option<&Template> {
        self.tags
            .iter()
            .find(|(tag, _)| tag == name)
            .map(|(_, template)| template)
    }
}

impl Subscription {
    pub fn new(topic: impl Into<String>, measurement: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            measurement: measurement.into(),
            ..Self::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.tags.insert(name.into(), template.into());
        self
    }

    pub fn with_csv_separator(mut self, separator: impl Into<String>) -> Self {
        self.csv_separator = separator.into();
        self
    }

    pub fn with_conversion(mut self, conversion: Conversion) -> Self {
        self.conversion = conversion;
        self
    }

    /// 编译（仅首次）并返回模板；编译失败同样被缓存。
    pub fn compiled(&self) -> Result<&CompiledTemplates, NormalizeError> {
        self.templates
            .get_or_init(|| CompiledTemplates::compile(self))
            .as_ref()
            .map_err(Clone::clone)
    }

    /// 从一条 MQTT 消息读取数据点。
    ///
    /// 任一阶段失败即返回错误，不产生部分数据点。
    pub fn read(&self, topic: &str, payload: &str) -> Result<Measurement, NormalizeError> {
        let templates = self.compiled()?;
        let ctx = TemplateContext::new(self, topic, payload);

        let name = templates.measurement.execute(&ctx)?;
        let mut measurement = Measurement::new(self.database.clone(), name);

        let raw = match &templates.value {
            Some(template) => template.execute(&ctx)?,
            None => payload.to_string(),
        };
        measurement.set_value(self.conversion.convert(&raw)?);

        for (tag, template) in &templates.tags {
            measurement.tag(tag.clone(), template.execute(&ctx)?);
        }
        Ok(measurement)
    }
}
