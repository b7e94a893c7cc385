//! 规整错误类型

/// 订阅读取流水线中任一阶段的错误。
///
/// 需要 `Clone`：模板编译结果（含失败）被缓存并在后续读取时重放。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// 数值、JSON、CSV 或模板语法解析失败
    #[error("parse error: {0}")]
    Parse(String),

    /// 配置或取值不合法（例如 CSV 分隔符、on/off 取值）
    #[error("validation error: {0}")]
    Validation(String),

    /// 查找表中不存在的键
    #[error("lookup failed for {0:?}")]
    Lookup(String),

    /// topic 段或 CSV 列下标越界
    #[error("{what} index {index} out of range (count: {count})")]
    IndexOutOfRange {
        what: &'static str,
        index: i64,
        count: usize,
    },

    /// JSON 路径中找不到的键
    #[error("could not find key {key:?} in {path:?}")]
    KeyNotFound { key: String, path: String },

    /// 不支持的转换类型
    #[error("conversion {0:?} not supported")]
    UnsupportedConversion(String),
}
