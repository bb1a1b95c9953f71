// control_panel/src/event.rs

//! 控制核心对外发布的事件定义。
//!
//! - [`ConnectionEvent`]：连接管理器的生命周期事件，经 `tokio::sync::broadcast` 分发。
//! - [`Notification`]：控制门面生成的面向操作员的提示 (标题 + 描述)，
//!   对应界面上的 toast 提示，由上层 UI 或日志订阅展示。

use chrono::{DateTime, Local};
use robot_models::OperatingMode;
use serde::Serialize;

/// 广播通道容量。订阅者处理过慢时会丢失最旧的事件 (`RecvError::Lagged`)。
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// 连接生命周期事件。
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// 显式 `connect` 成功并通过验证。
    Connected { address: String },
    /// 已验证的会话意外关闭，自动重连已启动。
    ConnectionLost { address: String },
    /// 自动重连成功；`resumed_mode` 为重新下发的运行模式 (若有)。
    Reconnected {
        address: String,
        resumed_mode: Option<OperatingMode>,
    },
    /// 用户主动断开，或新的 `connect` 关闭了旧会话。
    Disconnected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// 面向操作员的提示消息。
#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Local>,
}

impl Notification {
    pub fn new(level: NotificationLevel, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            description: description.into(),
            timestamp: Local::now(),
        }
    }
}
