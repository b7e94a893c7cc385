//! mqtt-influxdb：订阅 MQTT 主题并把消息写入 InfluxDB。

use clap::Parser;
use mfx_config::{AppConfig, default_subscription_dirs, load_subscriptions};
use mfx_normalize::Subscription;
use mfx_telemetry::{init_tracing, metrics};
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

mod bridge;
mod pidfile;

use bridge::Bridge;
use pidfile::PidFile;

const APP_NAME: &str = "mqtt-influxdb";

#[derive(Parser, Debug)]
#[command(name = "mqtt-influxdb", about = "Bridge MQTT messages into InfluxDB")]
#[command(disable_version_flag = true)]
struct Args {
    /// 配置文件路径（JSON）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 打印版本号后退出
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// 通知正在运行的实例重新加载配置
    #[arg(long)]
    reload: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    if args.version {
        println!("{} {}", APP_NAME, env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    init_tracing();

    if args.reload {
        return send_reload(args.config.as_deref());
    }
    run(args.config.as_deref()).await
}

/// 读取配置与全部订阅。
fn read_setup(config_path: Option<&Path>) -> Result<(AppConfig, Vec<Subscription>), Box<dyn Error>> {
    let config = AppConfig::load(config_path)?;
    let subscriptions = load_subscriptions(&default_subscription_dirs())?;
    info!(target: "mfx.app", count = subscriptions.len(), "subscriptions_loaded");
    Ok((config, subscriptions))
}

/// 运行直到 SIGINT/SIGTERM；SIGHUP 时重新加载配置。
async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn Error>> {
    info!(target: "mfx.app", version = env!("CARGO_PKG_VERSION"), "starting {}", APP_NAME);
    let (config, subscriptions) = read_setup(config_path)?;

    let _pidfile = match config.pidfile.as_deref() {
        Some(path) => Some(PidFile::create(path)?),
        None => None,
    };

    let mut bridge = Bridge::start(&config, subscriptions)?;

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!(target: "mfx.app", signal = "SIGINT", "signal_received");
                break;
            }
            _ = sigterm.recv() => {
                info!(target: "mfx.app", signal = "SIGTERM", "signal_received");
                break;
            }
            _ = sighup.recv() => {
                info!(target: "mfx.app", signal = "SIGHUP", "reloading");
                let setup = read_setup(config_path);
                bridge.stop().await;
                let (config, subscriptions) = setup?;
                bridge = Bridge::start(&config, subscriptions)?;
            }
        }
    }

    bridge.stop().await;
    info!(target: "mfx.app", metrics = ?metrics().snapshot(), "stopped");
    Ok(())
}

/// 读取 pid 文件并向该进程发送 SIGHUP。
fn send_reload(config_path: Option<&Path>) -> Result<(), Box<dyn Error>> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let config = AppConfig::load(config_path)?;
    let path = config.pidfile.ok_or("no pidfile configured")?;
    info!(target: "mfx.app", path = %path.display(), "read pid");
    let pid = pidfile::read_pid(&path)?;
    info!(target: "mfx.app", pid, "sending SIGHUP");
    kill(Pid::from_raw(pid), Signal::SIGHUP)?;
    Ok(())
}
