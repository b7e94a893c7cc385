use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 采集错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("source error: {0}")]
    Source(String),
}

/// 从总线收到的一条消息。
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at_ms: i64,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at_ms: now_epoch_ms(),
        }
    }

    /// payload 按 UTF-8 解码（非法字节替换）。
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// 消息处理器。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), IngestError>;
}

/// 采集源抽象。
#[async_trait]
pub trait Source: Send + Sync {
    async fn run(&self, handler: Arc<dyn MessageHandler>) -> Result<(), IngestError>;
}

/// 占位源（没有订阅时使用）。
#[derive(Debug, Default)]
pub struct NoopSource;

#[async_trait]
impl Source for NoopSource {
    async fn run(&self, _handler: Arc<dyn MessageHandler>) -> Result<(), IngestError> {
        Ok(())
    }
}

/// MQTT 采集源配置。
#[derive(Debug, Clone)]
pub struct MqttSourceConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 订阅的主题过滤器（可含通配符）。
    pub topics: Vec<String>,
}

/// MQTT 采集源。
///
/// 每次（重新）连接成功后订阅全部主题，连接错误后等待 1 秒继续轮询。
#[derive(Debug, Clone)]
pub struct MqttSource {
    config: MqttSourceConfig,
}

impl MqttSource {
    pub fn new(config: MqttSourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Source for MqttSource {
    async fn run(&self, handler: Arc<dyn MessageHandler>) -> Result<(), IngestError> {
        if let Some(filter) = self
            .config
            .topics
            .iter()
            .find(|filter| !is_valid_filter(filter))
        {
            return Err(IngestError::Source(format!("invalid topic filter {:?}", filter)));
        }

        let client_id = format!("mqtt-influxdb-{}", uuid::Uuid::new_v4());
        let mut options =
            rumqttc::MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }

        info!(
            target: "mfx.mqtt",
            host = %self.config.host,
            port = self.config.port,
            "mqtt_connecting"
        );
        let (client, mut eventloop) = rumqttc::AsyncClient::new(options, 10);

        loop {
            match eventloop.poll().await {
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                    info!(target: "mfx.mqtt", host = %self.config.host, "mqtt_connected");
                    // 请求队列容量有限，订阅放到独立任务中，避免阻塞事件循环
                    let client = client.clone();
                    let topics = self.config.topics.clone();
                    tokio::spawn(async move {
                        for topic in topics {
                            info!(target: "mfx.mqtt", topic = %topic, "mqtt_subscribe");
                            if let Err(err) = client
                                .subscribe(topic.clone(), rumqttc::QoS::AtMostOnce)
                                .await
                            {
                                warn!(target: "mfx.mqtt", topic = %topic, error = %err, "mqtt_subscribe_failed");
                            }
                        }
                    });
                }
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::Publish(publish))) => {
                    let message = Message {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                        received_at_ms: now_epoch_ms(),
                    };
                    if let Err(err) = handler.handle(message).await {
                        warn!(target: "mfx.mqtt", topic = %publish.topic, error = %err, "message_handler_failed");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(target: "mfx.mqtt", error = %err, "mqtt_connection_lost");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// 主题过滤器是否合法：非空，`+` 独占一层，`#` 独占最后一层。
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }
    let levels = filter.split('/').collect::<Vec<_>>();
    levels.iter().enumerate().all(|(i, level)| match *level {
        "+" => true,
        "#" => i + 1 == levels.len(),
        level => !level.contains('+') && !level.contains('#'),
    })
}

/// MQTT 主题过滤器匹配（支持 `+` 单层与 `#` 多层通配符）。
///
/// 以 `$` 开头的主题不匹配以通配符开头的过滤器。
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_millis() as i64
}
