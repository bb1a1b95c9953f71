//! 控制核心的无界面入口。
//!
//! 加载配置、初始化日志、装配包日志 / 连接管理器 / 控制门面，
//! 按配置自动连接机器人，并把操作员提示与故障输出到日志，直到收到 Ctrl-C。

use anyhow::Context;
use control_panel::config::{self, AppConfig};
use control_panel::{
    ConnectionManager, JsonFileModeStore, ModeStore, NotificationLevel, PacketLogger, RobotControl,
};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config::resolve_config_path(std::env::args().nth(1));
    // 先加载配置再初始化日志，加载错误稍后补记
    let loaded = config::load_app_config(&config_path);
    let level = loaded
        .as_ref()
        .map(AppConfig::log_level_filter)
        .unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .try_init()
        .context("初始化 env_logger 日志服务失败")?;

    let app_config = match loaded {
        Ok(app_config) => app_config,
        Err(e) => {
            warn!("[主程序] {}。将使用默认配置。", e);
            AppConfig::default()
        }
    };
    info!("[主程序] 控制核心正在启动，配置文件: {}", config_path.display());

    let logger = PacketLogger::new(app_config.packet_log.clone());
    let _retention_sweep = logger.spawn_retention_sweep();
    let mode_store: Arc<dyn ModeStore> = Arc::new(JsonFileModeStore::new(&app_config.mode_store_path));
    let connection = ConnectionManager::new(app_config.connection.clone(), logger.clone(), mode_store.clone());
    let control = RobotControl::new(connection, mode_store, app_config.scaling);

    let mut notifications = control.subscribe_notifications();
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(n) => match n.level {
                    NotificationLevel::Error => error!("[提示] {}: {}", n.title, n.description),
                    NotificationLevel::Warning => warn!("[提示] {}: {}", n.title, n.description),
                    _ => info!("[提示] {}: {}", n.title, n.description),
                },
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut faults = logger.subscribe_faults();
    tokio::spawn(async move {
        loop {
            match faults.recv().await {
                Ok(fault) => warn!("[故障] [{}] {}: {}", fault.category.label(), fault.source, fault.message),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    if app_config.auto_connect {
        if let Err(e) = control.connect(&app_config.rosbridge_url).await {
            error!("[主程序] 自动连接 {} 失败: {}", app_config.rosbridge_url, e);
        }
    } else {
        info!("[主程序] 未启用自动连接 (auto_connect = false)。");
    }

    tokio::signal::ctrl_c().await.context("等待 Ctrl-C 信号失败")?;
    info!("[主程序] 收到退出信号，正在关机并断开连接...");
    control.shutdown().await;
    logger.flush();
    info!("[主程序] 已退出。");
    Ok(())
}
