//! InfluxDB 投递
//!
//! 数据点进入有界队列，由单个 worker 逐条校验、序列化并写入：
//! - 每个数据点最多尝试一次，失败只记录日志并丢弃
//! - 队列满时 `submit` 等待，`try_submit` 返回 `Backpressure`
//! - `shutdown` 显式关闭队列并等待 worker 结束

use async_trait::async_trait;
use domain::{Measurement, ValidationError};
use mfx_telemetry::{
    record_dropped_invalid, record_write_failure, record_write_latency_ms, record_write_success,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 投递错误。
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid measurement: {0}")]
    Validation(#[from] ValidationError),
    #[error("http error: {0}")]
    Http(String),
    #[error("got HTTP status {status} for db={database:?}, line={line:?}")]
    Status {
        status: u16,
        database: String,
        line: String,
    },
    #[error("backpressure: {0}")]
    Backpressure(String),
    #[error("delivery queue closed")]
    Closed,
}

/// InfluxDB 连接与队列参数。
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 数据点未指定数据库时使用。
    pub database: String,
    pub queue_capacity: usize,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8086,
            username: None,
            password: None,
            database: "default".to_string(),
            queue_capacity: 32,
        }
    }
}

/// line protocol 写入器抽象。
#[async_trait]
pub trait LineWriter: Send + Sync {
    async fn write(&self, database: &str, body: String) -> Result<(), DeliveryError>;
}

/// 空写入器（用于接线与测试）。
#[derive(Debug, Default)]
pub struct NoopWriter;

#[async_trait]
impl LineWriter for NoopWriter {
    async fn write(&self, _database: &str, _body: String) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// 基于 InfluxDB 1.x HTTP `/write` 接口的写入器。
#[derive(Debug, Clone)]
pub struct HttpLineWriter {
    client: reqwest::Client,
    url: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpLineWriter {
    pub fn new(config: &InfluxConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| DeliveryError::Http(err.to_string()))?;
        Ok(Self {
            client,
            url: format!("http://{}:{}/write", config.host, config.port),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LineWriter for HttpLineWriter {
    async fn write(&self, database: &str, body: String) -> Result<(), DeliveryError> {
        let line = body.trim_end().to_string();
        let mut request = self
            .client
            .post(&self.url)
            .query(&[("db", database)])
            .body(body);
        if let Some(username) = self.username.as_ref() {
            request = request.basic_auth(username, self.password.as_ref());
        }
        let response = request
            .send()
            .await
            .map_err(|err| DeliveryError::Http(err.to_string()))?;
        let status = response.status().as_u16();
        if status == 200 || status == 204 {
            return Ok(());
        }
        Err(DeliveryError::Status {
            status,
            database: database.to_string(),
            line,
        })
    }
}

/// 校验并写入单个数据点。
pub async fn deliver(
    writer: &dyn LineWriter,
    default_database: &str,
    measurement: &Measurement,
) -> Result<(), DeliveryError> {
    measurement.validate()?;
    let database = measurement.database_or(default_database);
    writer
        .write(database, format!("{}\n", measurement.format()))
        .await
}

/// 投递队列的提交端，可克隆。
#[derive(Debug, Clone)]
pub struct MeasurementSubmitter {
    sender: mpsc::Sender<Measurement>,
}

impl MeasurementSubmitter {
    /// 提交数据点，队列满时等待。
    pub async fn submit(&self, measurement: Measurement) -> Result<(), DeliveryError> {
        self.sender
            .send(measurement)
            .await
            .map_err(|_| DeliveryError::Closed)
    }

    /// 提交数据点，队列满时立即返回 `Backpressure`。
    pub fn try_submit(&self, measurement: Measurement) -> Result<(), DeliveryError> {
        self.sender.try_send(measurement).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                DeliveryError::Backpressure("queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// InfluxDB 投递服务（队列 + worker）。
pub struct InfluxService {
    submitter: MeasurementSubmitter,
    worker: JoinHandle<()>,
}

impl InfluxService {
    /// 启动 worker。
    pub fn start(
        writer: Arc<dyn LineWriter>,
        default_database: impl Into<String>,
        queue_capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let worker = tokio::spawn(work(receiver, writer, default_database.into()));
        Self {
            submitter: MeasurementSubmitter { sender },
            worker,
        }
    }

    pub fn submitter(&self) -> MeasurementSubmitter {
        self.submitter.clone()
    }

    /// 关闭队列并等待 worker 处理完剩余数据点。
    ///
    /// 其他提交端仍存活时队列不会关闭，超时后强制终止 worker。
    pub async fn shutdown(self, timeout: Duration) {
        let Self { submitter, mut worker } = self;
        drop(submitter);
        match tokio::time::timeout(timeout, &mut worker).await {
            Ok(_) => info!(target: "mfx.influx", "influx_worker_stopped"),
            Err(_) => {
                warn!(target: "mfx.influx", "influx_worker_shutdown_timeout");
                worker.abort();
            }
        }
    }
}

async fn work(
    mut receiver: mpsc::Receiver<Measurement>,
    writer: Arc<dyn LineWriter>,
    default_database: String,
) {
    while let Some(measurement) = receiver.recv().await {
        let started_at = Instant::now();
        match deliver(writer.as_ref(), &default_database, &measurement).await {
            Ok(()) => {
                record_write_success();
                record_write_latency_ms(started_at.elapsed().as_millis() as u64);
                debug!(
                    target: "mfx.influx",
                    database = %measurement.database_or(&default_database),
                    line = %measurement,
                    "influx_write_ok"
                );
            }
            Err(DeliveryError::Validation(err)) => {
                record_dropped_invalid();
                warn!(
                    target: "mfx.influx",
                    measurement = %measurement.name,
                    error = %err,
                    "measurement_invalid"
                );
            }
            Err(err) => {
                record_write_failure();
                warn!(target: "mfx.influx", error = %err, "influx_write_failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::{Mutex, Notify};

    #[derive(Default)]
    struct RecordingWriter {
        writes: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl LineWriter for RecordingWriter {
        async fn write(&self, database: &str, body: String) -> Result<(), DeliveryError> {
            if database == "unreachable" {
                return Err(DeliveryError::Http("forced failure".to_string()));
            }
            self.writes.lock().await.push((database.to_string(), body));
            Ok(())
        }
    }

    struct BlockingWriter {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl LineWriter for BlockingWriter {
        async fn write(&self, _database: &str, _body: String) -> Result<(), DeliveryError> {
            self.release.notified().await;
            Ok(())
        }
    }

    fn sample(database: &str, name: &str, value: &str) -> Measurement {
        let mut m = Measurement::with_timestamp(database, name, 1_000);
        m.set_value(value);
        m
    }

    #[tokio::test]
    async fn worker_uses_default_database() {
        let writer = Arc::new(RecordingWriter::default());
        let service = InfluxService::start(writer.clone(), "default", 4);
        let submitter = service.submitter();
        submitter
            .submit(sample("", "temp", "1.5"))
            .await
            .expect("submit");
        submitter
            .submit(sample("own", "temp", "2.5"))
            .await
            .expect("submit");
        drop(submitter);
        service.shutdown(Duration::from_secs(5)).await;

        let writes = writer.writes.lock().await;
        assert_eq!(
            writes.as_slice(),
            &[
                ("default".to_string(), "temp value=1.5 1000\n".to_string()),
                ("own".to_string(), "temp value=2.5 1000\n".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn invalid_and_failed_points_are_dropped() {
        let writer = Arc::new(RecordingWriter::default());
        let service = InfluxService::start(writer.clone(), "default", 4);
        let submitter = service.submitter();
        submitter
            .submit(sample("", "m & m", "1"))
            .await
            .expect("submit");
        submitter
            .submit(sample("unreachable", "m", "1"))
            .await
            .expect("submit");
        submitter.submit(sample("", "m", "2")).await.expect("submit");
        drop(submitter);
        service.shutdown(Duration::from_secs(5)).await;

        let writes = writer.writes.lock().await;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, "m value=2 1000\n");
    }

    #[tokio::test]
    async fn deliver_rejects_invalid_measurement() {
        let err = deliver(&NoopWriter, "default", &sample("?invalid db", "m", "1"))
            .await
            .expect_err("invalid");
        assert!(matches!(
            err,
            DeliveryError::Validation(ValidationError::InvalidDatabaseName(_))
        ));
    }

    #[tokio::test]
    async fn try_submit_reports_backpressure() {
        let release = Arc::new(Notify::new());
        let writer = Arc::new(BlockingWriter {
            release: release.clone(),
        });
        let service = InfluxService::start(writer, "default", 1);
        let submitter = service.submitter();

        let results = (0..3)
            .map(|i| submitter.try_submit(sample("", "m", &i.to_string())))
            .collect::<Vec<_>>();
        assert!(
            results
                .iter()
                .any(|result| matches!(result, Err(DeliveryError::Backpressure(_))))
        );

        release.notify_waiters();
        release.notify_one();
        drop(submitter);
        service.shutdown(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn shutdown_times_out_while_submitters_remain() {
        let service = InfluxService::start(Arc::new(NoopWriter), "default", 1);
        let submitter = service.submitter();
        service.shutdown(Duration::from_millis(50)).await;

        // worker 已被终止，队列随之关闭
        tokio::task::yield_now().await;
        let mut closed = false;
        for _ in 0..20 {
            if matches!(
                submitter.try_submit(sample("", "m", "1")),
                Err(DeliveryError::Closed)
            ) {
                closed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(closed);
    }
}
