//! MQTT 消息 -> 数据点 规整。
//!
//! 流程：`Subscription::read(topic, payload)`
//! 1. 编译（仅首次）measurement / value / tag 模板
//! 2. 构造 `TemplateContext`
//! 3. 执行模板得到 measurement 名称、原始值与标签
//! 4. `Conversion` 把原始值转换为 line protocol 字段值

pub mod context;
pub mod conversion;
pub mod error;
pub mod subscription;
pub mod template;

pub use context::TemplateContext;
pub use conversion::{Conversion, ConversionKind};
pub use error::NormalizeError;
pub use subscription::{CompiledTemplates, Subscription};
pub use template::{Accessor, Template};
