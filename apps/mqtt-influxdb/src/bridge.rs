//! 桥接链路装配
//!
//! MQTT 采集源收到的消息交给 `SubscriptionRouter`，按主题匹配订阅生成数据点，
//! 再提交到 InfluxDB 投递队列。

use mfx_config::AppConfig;
use mfx_ingest::{
    IngestError, Message, MessageHandler, MqttSource, MqttSourceConfig, NoopSource, Source,
    topic_matches,
};
use mfx_normalize::Subscription;
use mfx_pipeline::{
    DeliveryError, HttpLineWriter, InfluxConfig, InfluxService, MeasurementSubmitter,
};
use mfx_telemetry::{
    record_backpressure, record_message_received, record_point_submitted, record_read_failure,
    record_unmatched_message,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 按主题把消息分发给匹配的订阅。
///
/// 单个订阅读取或提交失败只记录日志，不影响其他订阅，也不向采集源返回错误。
pub struct SubscriptionRouter {
    subscriptions: Vec<Subscription>,
    submitter: MeasurementSubmitter,
}

impl SubscriptionRouter {
    pub fn new(subscriptions: Vec<Subscription>, submitter: MeasurementSubmitter) -> Self {
        Self {
            subscriptions,
            submitter,
        }
    }

    /// 需要向 broker 订阅的主题过滤器（去重，保持配置顺序）。
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for subscription in &self.subscriptions {
            if !topics.contains(&subscription.topic) {
                topics.push(subscription.topic.clone());
            }
        }
        topics
    }
}

#[async_trait::async_trait]
impl MessageHandler for SubscriptionRouter {
    async fn handle(&self, message: Message) -> Result<(), IngestError> {
        record_message_received();
        let payload = message.payload_str();
        debug!(
            target: "mfx.ingest",
            topic = %message.topic,
            payload_size = message.payload.len(),
            received_at_ms = message.received_at_ms,
            "message_received"
        );

        let mut matched = false;
        for subscription in self
            .subscriptions
            .iter()
            .filter(|subscription| topic_matches(&subscription.topic, &message.topic))
        {
            matched = true;
            let measurement = match subscription.read(&message.topic, &payload) {
                Ok(measurement) => measurement,
                Err(err) => {
                    record_read_failure();
                    warn!(
                        target: "mfx.ingest",
                        topic = %message.topic,
                        subscription = %subscription.topic,
                        error = %err,
                        "read_failed"
                    );
                    continue;
                }
            };

            let line = measurement.to_string();
            match self.submitter.submit(measurement).await {
                Ok(()) => {
                    record_point_submitted();
                    debug!(target: "mfx.ingest", topic = %message.topic, line = %line, "point_submitted");
                }
                Err(err) => {
                    if matches!(err, DeliveryError::Backpressure(_)) {
                        record_backpressure();
                    }
                    warn!(
                        target: "mfx.ingest",
                        topic = %message.topic,
                        error = %err,
                        "point_submit_failed"
                    );
                }
            }
        }

        if !matched {
            record_unmatched_message();
            debug!(target: "mfx.ingest", topic = %message.topic, "message_unmatched");
        }
        Ok(())
    }
}

/// 运行中的桥接实例（投递服务 + 采集任务）。
pub struct Bridge {
    influx: InfluxService,
    source_task: tokio::task::JoinHandle<()>,
}

impl Bridge {
    /// 先启动投递服务，再启动 MQTT 采集源。
    pub fn start(config: &AppConfig, subscriptions: Vec<Subscription>) -> Result<Self, DeliveryError> {
        let influx_config = InfluxConfig {
            host: config.influx_host.clone(),
            port: config.influx_port,
            username: config.influx_username.clone(),
            password: config.influx_password.clone(),
            database: config.influx_database.clone(),
            queue_capacity: config.queue_size,
        };
        let writer = HttpLineWriter::new(&influx_config)?;
        info!(
            target: "mfx.app",
            url = %writer.url(),
            database = %influx_config.database,
            queue_capacity = influx_config.queue_capacity,
            "influx_started"
        );
        let influx = InfluxService::start(
            Arc::new(writer),
            influx_config.database.clone(),
            influx_config.queue_capacity,
        );

        let router = Arc::new(SubscriptionRouter::new(subscriptions, influx.submitter()));
        let topics = router.topics();
        let source: Arc<dyn Source> = if topics.is_empty() {
            info!(target: "mfx.app", "ingest source: noop (no subscriptions)");
            Arc::new(NoopSource)
        } else {
            let mqtt_config = MqttSourceConfig {
                host: config.mqtt_host.clone(),
                port: config.mqtt_port,
                username: config.mqtt_username.clone(),
                password: config.mqtt_password.clone(),
                topics,
            };
            info!(
                target: "mfx.app",
                "ingest source: mqtt {}:{} topics={}",
                mqtt_config.host,
                mqtt_config.port,
                mqtt_config.topics.len()
            );
            Arc::new(MqttSource::new(mqtt_config))
        };

        let source_task = tokio::spawn(async move {
            if let Err(err) = source.run(router).await {
                warn!(target: "mfx.app", error = %err, "ingest stopped");
            }
        });
        Ok(Self {
            influx,
            source_task,
        })
    }

    /// 断开采集源，然后排空投递队列。
    pub async fn stop(self) {
        self.source_task.abort();
        let _ = self.source_task.await;
        self.influx.shutdown(Duration::from_secs(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mfx_pipeline::LineWriter;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl LineWriter for RecordingWriter {
        async fn write(&self, database: &str, body: String) -> Result<(), DeliveryError> {
            self.writes.lock().await.push((database.to_string(), body));
            Ok(())
        }
    }

    fn subscriptions() -> Vec<Subscription> {
        vec![
            Subscription::new("sensors/+/temp", "temp").with_tag("room", "{{.Topic 1}}"),
            Subscription::new("sensors/#", r#"{{.JSON "name"}}"#),
            Subscription::new("other/#", "other").with_database("elsewhere"),
            Subscription::new("sensors/+/temp", "temp_copy"),
        ]
    }

    #[tokio::test]
    async fn topics_are_deduplicated() {
        let service = InfluxService::start(Arc::new(mfx_pipeline::NoopWriter), "default", 1);
        let router = SubscriptionRouter::new(subscriptions(), service.submitter());
        assert_eq!(router.topics(), ["sensors/+/temp", "sensors/#", "other/#"]);
        drop(router);
        service.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn routes_to_every_matching_subscription() {
        let writer = Arc::new(RecordingWriter::default());
        let service = InfluxService::start(writer.clone(), "default", 8);
        let router = SubscriptionRouter::new(subscriptions(), service.submitter());

        // 第二个订阅需要 JSON payload，读取失败后其余订阅照常处理
        router
            .handle(Message::new("sensors/kitchen/temp", "21.5"))
            .await
            .expect("handled");
        router
            .handle(Message::new("unrelated/topic", "1"))
            .await
            .expect("handled");
        router
            .handle(Message::new("other/x", "7"))
            .await
            .expect("handled");
        drop(router);
        service.shutdown(Duration::from_secs(5)).await;

        let writes = writer.writes.lock().await;
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].0, "default");
        assert!(writes[0].1.starts_with("temp,room=kitchen value=21.5 "));
        assert!(writes[1].1.starts_with("temp_copy value=21.5 "));
        assert_eq!(writes[2].0, "elsewhere");
        assert!(writes[2].1.starts_with("other value=7 "));
    }
}
