//! 应用运行配置与订阅加载。
//!
//! 加载顺序：默认值 → JSON 配置文件 → `MFX_*` 环境变量。

use mfx_normalize::Subscription;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing config file: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {message}")]
    Parse { path: String, message: String },
}

/// 应用运行配置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub pidfile: Option<PathBuf>,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub influx_host: String,
    pub influx_port: u16,
    pub influx_username: Option<String>,
    pub influx_password: Option<String>,
    pub influx_database: String,
    pub queue_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pidfile: None,
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            influx_host: "localhost".to_string(),
            influx_port: 8086,
            influx_username: None,
            influx_password: None,
            influx_database: "default".to_string(),
            queue_size: 32,
        }
    }
}

/// 配置文件内容，缺省的键不覆盖已有值。
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    pidfile: Option<String>,
    #[serde(rename = "MQTTHost")]
    mqtt_host: Option<String>,
    #[serde(rename = "MQTTPort")]
    mqtt_port: Option<u16>,
    #[serde(rename = "MQTTUser")]
    mqtt_username: Option<String>,
    #[serde(rename = "MQTTPass")]
    mqtt_password: Option<String>,
    #[serde(rename = "influxHost")]
    influx_host: Option<String>,
    #[serde(rename = "influxPort")]
    influx_port: Option<u16>,
    #[serde(rename = "influxUser")]
    influx_username: Option<String>,
    #[serde(rename = "influxPass")]
    influx_password: Option<String>,
    #[serde(rename = "influxDB")]
    influx_database: Option<String>,
    #[serde(rename = "queueSize")]
    queue_size: Option<usize>,
}

impl AppConfig {
    /// 加载完整配置。
    ///
    /// 指定 `explicit` 时该文件必须存在，否则依次读取默认位置中存在的文件。
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::Missing(path.display().to_string()));
                }
                config.merge_file(path)?;
            }
            None => {
                for path in default_config_files() {
                    if path.is_file() {
                        config.merge_file(&path)?;
                    }
                }
            }
        }
        config.apply_env()?;
        Ok(config)
    }

    /// 合并一个 JSON 配置文件。
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: FileConfig = serde_json::from_str(&raw).map_err(|err| ConfigError::Parse {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        self.apply_file(file);
        Ok(())
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(pidfile) = file.pidfile {
            self.pidfile = non_empty(pidfile).map(PathBuf::from);
        }
        if let Some(host) = file.mqtt_host {
            self.mqtt_host = host;
        }
        if let Some(port) = file.mqtt_port {
            self.mqtt_port = port;
        }
        if let Some(username) = file.mqtt_username {
            self.mqtt_username = non_empty(username);
        }
        if let Some(password) = file.mqtt_password {
            self.mqtt_password = non_empty(password);
        }
        if let Some(host) = file.influx_host {
            self.influx_host = host;
        }
        if let Some(port) = file.influx_port {
            self.influx_port = port;
        }
        if let Some(username) = file.influx_username {
            self.influx_username = non_empty(username);
        }
        if let Some(password) = file.influx_password {
            self.influx_password = non_empty(password);
        }
        if let Some(database) = file.influx_database {
            self.influx_database = database;
        }
        if let Some(queue_size) = file.queue_size {
            self.queue_size = queue_size;
        }
    }

    /// 应用 `MFX_*` 环境变量覆盖。
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(pidfile) = read_optional("MFX_PIDFILE") {
            self.pidfile = Some(PathBuf::from(pidfile));
        }
        if let Some(host) = read_optional("MFX_MQTT_HOST") {
            self.mqtt_host = host;
        }
        self.mqtt_port = read_u16_with_default("MFX_MQTT_PORT", self.mqtt_port)?;
        if let Some(username) = read_optional("MFX_MQTT_USER") {
            self.mqtt_username = Some(username);
        }
        if let Some(password) = read_optional("MFX_MQTT_PASS") {
            self.mqtt_password = Some(password);
        }
        if let Some(host) = read_optional("MFX_INFLUX_HOST") {
            self.influx_host = host;
        }
        self.influx_port = read_u16_with_default("MFX_INFLUX_PORT", self.influx_port)?;
        if let Some(username) = read_optional("MFX_INFLUX_USER") {
            self.influx_username = Some(username);
        }
        if let Some(password) = read_optional("MFX_INFLUX_PASS") {
            self.influx_password = Some(password);
        }
        if let Some(database) = read_optional("MFX_INFLUX_DB") {
            self.influx_database = database;
        }
        self.queue_size = read_usize_with_default("MFX_QUEUE_SIZE", self.queue_size)?;
        Ok(())
    }
}

/// 默认配置文件位置（按加载顺序）。
pub fn default_config_files() -> Vec<PathBuf> {
    let mut files = vec![PathBuf::from("/etc/mqtt-influxdb.json")];
    if let Some(home) = read_optional("HOME") {
        files.push(Path::new(&home).join(".config/mqtt-influxdb.json"));
    }
    files
}

/// 默认订阅目录（按加载顺序）。
pub fn default_subscription_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from("/etc/mqtt-influxdb.d")];
    if let Some(home) = read_optional("HOME") {
        dirs.push(Path::new(&home).join(".config/mqtt-influxdb.d"));
    }
    dirs
}

/// 读取各目录下的全部订阅文件。
///
/// 目录不存在时跳过；目录内文件按文件名排序。
pub fn load_subscriptions<P: AsRef<Path>>(dirs: &[P]) -> Result<Vec<Subscription>, ConfigError> {
    let mut subscriptions = Vec::new();
    for dir in dirs {
        let dir = dir.as_ref();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(source) => {
                return Err(ConfigError::Io {
                    path: dir.display().to_string(),
                    source,
                });
            }
        };
        let mut files = entries
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| ConfigError::Io {
                path: dir.display().to_string(),
                source,
            })?;
        files.retain(|path| path.is_file());
        files.sort();
        for file in files {
            subscriptions.extend(read_subscription_file(&file)?);
        }
    }
    Ok(subscriptions)
}

/// 读取单个订阅文件，文件中可连续存放多个 JSON 数组。
pub fn read_subscription_file(path: &Path) -> Result<Vec<Subscription>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut subscriptions = Vec::new();
    for batch in serde_json::Deserializer::from_str(&raw).into_iter::<Vec<Subscription>>() {
        let batch = batch.map_err(|err| ConfigError::Parse {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        subscriptions.extend(batch);
    }
    Ok(subscriptions)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match read_optional(key) {
        Some(value) => value,
        None => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match read_optional(key) {
        Some(value) => value,
        None => return Ok(default),
    };
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}
