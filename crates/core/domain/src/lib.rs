//! 核心领域模型：写入 InfluxDB 的数据点。

pub mod measurement;

pub use measurement::{Measurement, ValidationError, VALUE_FIELD};

/// 当前时间（Unix 纪元起的纳秒数）。
pub fn now_epoch_ns() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}
