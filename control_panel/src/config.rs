// control_panel/src/config.rs

//! 控制核心配置管理模块。
//!
//! 本模块定义应用所需的配置参数 (`AppConfig`)，并负责把它加载自 / 保存到 JSON 文件
//! (默认是当前目录下的 `app_settings.json`)。配置文件不存在时写入一份默认配置；
//! 内容损坏时由调用方决定回退到默认值。
//!
//! 所有时间参数以毫秒保存。`SpeedScaling` 保存滑块→线上单位的换算系数。

use log::{info, warn, LevelFilter};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::ConfigError;

/// 未指定时使用的配置文件名。
pub const DEFAULT_CONFIG_FILE: &str = "app_settings.json";
/// 指定配置文件路径的环境变量。
pub const CONFIG_PATH_ENV: &str = "CONTROL_PANEL_CONFIG";

/// 连接管理器的时间参数。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// 等待传输层打开的时间上限。
    pub connect_timeout_ms: u64,
    /// 验证往返 (`/connection_establish`) 的时间上限。
    pub verify_timeout_ms: u64,
    /// 意外断线后自动重连的间隔。
    pub reconnect_interval_ms: u64,
    /// 重连成功后恢复运行模式前的等待时间。
    pub mode_restore_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            verify_timeout_ms: 5_000,
            reconnect_interval_ms: 5_000,
            mode_restore_delay_ms: 500,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn mode_restore_delay(&self) -> Duration {
        Duration::from_millis(self.mode_restore_delay_ms)
    }
}

/// 通信包日志参数。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PacketLogConfig {
    /// 服务调用的无响应判定时间。
    pub response_timeout_ms: u64,
    /// 故障记录保留天数。
    pub fault_retention_days: i64,
    /// 持久化文件中最多保留的通信包条数 (故障记录全部保留)。
    pub max_persisted_entries: usize,
    /// 持久化文件路径；为 `None` 时只保存在内存中。
    pub storage_path: Option<PathBuf>,
    /// 后台清理过期记录的周期 (秒)。
    pub retention_sweep_secs: u64,
}

impl Default for PacketLogConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 5_000,
            fault_retention_days: 7,
            max_persisted_entries: 500,
            storage_path: None,
            retention_sweep_secs: 300,
        }
    }
}

impl PacketLogConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_secs.max(1))
    }
}

/// 操作界面滑块数值到线上物理量的换算系数。
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct SpeedScaling {
    /// 滑块单位 → 底盘线速度 (m/s)。
    pub linear_speed_per_unit: f64,
    /// 滑块单位 → 底盘角速度 (°/s)。
    pub rotation_deg_per_unit: f64,
    /// 流量滑块单位 → `pump_speed`。
    pub pump_speed_per_unit: f64,
    /// 开泵时的注液量 `pump_flud`。
    pub pump_flud: f64,
}

impl Default for SpeedScaling {
    fn default() -> Self {
        Self {
            linear_speed_per_unit: 0.001,
            rotation_deg_per_unit: 0.2067,
            pump_speed_per_unit: 2.0,
            pump_flud: 6.0,
        }
    }
}

/// 应用配置，对应配置文件 (`app_settings.json`) 的内容。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// 机器人端 rosbridge 服务地址。
    pub rosbridge_url: String,
    /// 日志级别：`trace` / `debug` / `info` / `warn` / `error`。
    pub log_level: String,
    /// 启动时是否自动连接 `rosbridge_url`。
    pub auto_connect: bool,
    pub connection: ConnectionConfig,
    pub packet_log: PacketLogConfig,
    /// 运行模式持久化文件 (断线重连后据此恢复模式)。
    pub mode_store_path: PathBuf,
    pub scaling: SpeedScaling,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rosbridge_url: "ws://192.168.137.96:9090".to_string(),
            log_level: "info".to_string(),
            auto_connect: false,
            connection: ConnectionConfig::default(),
            packet_log: PacketLogConfig {
                storage_path: Some(PathBuf::from("packet_log.json")),
                ..PacketLogConfig::default()
            },
            mode_store_path: PathBuf::from("operating_mode.json"),
            scaling: SpeedScaling::default(),
        }
    }
}

impl AppConfig {
    /// 把 `log_level` 字符串转换为 `LevelFilter`，无法识别时回退到 `Info`。
    pub fn log_level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }
}

/// 确定配置文件路径：命令行参数优先，其次环境变量，最后是当前目录下的默认文件。
pub fn resolve_config_path(cli_arg: Option<String>) -> PathBuf {
    cli_arg
        .or_else(|| env::var(CONFIG_PATH_ENV).ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// 加载应用配置。
///
/// 文件存在则读取并解析；不存在则生成默认配置并写回该路径，以便下次启动直接加载。
/// 读取或解析失败时返回 `ConfigError`，不会覆盖已有文件。
pub fn load_app_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if path.exists() {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let app_config = serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        info!("[配置模块] 已从 '{}' 加载应用配置。", path.display());
        Ok(app_config)
    } else {
        info!("[配置模块] 配置文件 '{}' 未找到，将使用默认配置创建新文件。", path.display());
        let default_config = AppConfig::default();
        save_app_config(path, &default_config)?;
        Ok(default_config)
    }
}

/// 以格式化 JSON 保存应用配置，必要时创建父目录。
pub fn save_app_config(path: &Path, app_config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(parent_dir) = path.parent() {
        if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
            fs::create_dir_all(parent_dir).map_err(|source| ConfigError::Io {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }
    }
    let content = serde_json::to_string_pretty(app_config).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!("[配置模块] 应用配置已保存至 '{}'。", path.display());
    Ok(())
}

/// 加载配置，任何错误都记录警告并回退到默认配置。
pub fn init_app_config(path: &Path) -> AppConfig {
    match load_app_config(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("[配置模块] {}。将使用默认配置。", e);
            AppConfig::default()
        }
    }
}
