//! 追踪初始化与进程内计数指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub read_failures: u64,
    pub unmatched_messages: u64,
    pub points_submitted: u64,
    pub backpressure: u64,
    pub write_success: u64,
    pub write_failure: u64,
    pub dropped_invalid: u64,
    pub write_latency_ms_total: u64,
    pub write_latency_ms_count: u64,
}

impl MetricsSnapshot {
    /// 平均写入延迟（毫秒），无样本时为 0。
    pub fn avg_write_latency_ms(&self) -> u64 {
        self.write_latency_ms_total
            .checked_div(self.write_latency_ms_count)
            .unwrap_or(0)
    }
}

/// 桥接进程的计数指标。
#[derive(Debug, Default)]
pub struct TelemetryMetrics {
    messages_received: AtomicU64,
    read_failures: AtomicU64,
    unmatched_messages: AtomicU64,
    points_submitted: AtomicU64,
    backpressure: AtomicU64,
    write_success: AtomicU64,
    write_failure: AtomicU64,
    dropped_invalid: AtomicU64,
    write_latency_ms_total: AtomicU64,
    write_latency_ms_count: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            unmatched_messages: self.unmatched_messages.load(Ordering::Relaxed),
            points_submitted: self.points_submitted.load(Ordering::Relaxed),
            backpressure: self.backpressure.load(Ordering::Relaxed),
            write_success: self.write_success.load(Ordering::Relaxed),
            write_failure: self.write_failure.load(Ordering::Relaxed),
            dropped_invalid: self.dropped_invalid.load(Ordering::Relaxed),
            write_latency_ms_total: self.write_latency_ms_total.load(Ordering::Relaxed),
            write_latency_ms_count: self.write_latency_ms_count.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info，可由 RUST_LOG 覆盖）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录收到的 MQTT 消息。
pub fn record_message_received() {
    metrics().messages_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录订阅读取失败（模板或转换出错）。
pub fn record_read_failure() {
    metrics().read_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录没有任何订阅匹配的消息。
pub fn record_unmatched_message() {
    metrics().unmatched_messages.fetch_add(1, Ordering::Relaxed);
}

/// 记录进入投递队列的数据点。
pub fn record_point_submitted() {
    metrics().points_submitted.fetch_add(1, Ordering::Relaxed);
}

/// 记录背压次数。
pub fn record_backpressure() {
    metrics().backpressure.fetch_add(1, Ordering::Relaxed);
}

/// 记录写入成功次数。
pub fn record_write_success() {
    metrics().write_success.fetch_add(1, Ordering::Relaxed);
}

/// 记录写入失败次数。
pub fn record_write_failure() {
    metrics().write_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录校验失败丢弃次数。
pub fn record_dropped_invalid() {
    metrics().dropped_invalid.fetch_add(1, Ordering::Relaxed);
}

/// 记录写入延迟（毫秒）。
pub fn record_write_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .write_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .write_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}
