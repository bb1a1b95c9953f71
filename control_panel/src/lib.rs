//! `control_panel` 施工机器人控制核心库。
//!
//! 操作界面 (滑块、按钮、管理员页面) 之下的全部逻辑都在这里：
//! - `connection`: 与机器人端 rosbridge 的连接、验证、发布、服务调用与自动重连。
//! - `packet_logger`: 通信包日志、无响应检测与故障台账。
//! - `control`: 控制门面，把界面动作映射为话题/服务，并生成操作员提示。
//! - `mode_store`: 记住最近一次被确认的运行模式，重连后恢复。
//! - `config` / `error` / `event`: 配置、错误类型与对外事件。

pub mod config;
pub mod connection;
pub mod control;
pub mod error;
pub mod event;
pub mod mode_store;
pub mod packet_logger;

pub use config::AppConfig;
pub use connection::{ConnectionManager, ListenerHandle};
pub use control::RobotControl;
pub use error::{ConfigError, ConnectionError, ControlError};
pub use event::{ConnectionEvent, Notification, NotificationLevel};
pub use mode_store::{JsonFileModeStore, MemoryModeStore, ModeStore};
pub use packet_logger::{FaultRecord, PacketError, PacketLogEntry, PacketLogger, PacketStats};
