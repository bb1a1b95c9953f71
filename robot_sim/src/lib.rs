//! `robot_sim` 施工机器人模拟端。
//!
//! 在指定地址上提供一个说 rosbridge v2 协议的 WebSocket 服务，按机器人端 `web_connect`
//! 包的约定应答全部服务，并记录收到的每一帧。可以指定某些服务保持沉默、返回失败或
//! 返回指定的应答值，也可以一次性断开所有连接以模拟链路中断。
//!
//! - `config`: 环境变量配置。
//! - `error`: 模拟端错误类型。
//! - `ws_server`: [`SimRobot`] 与每个连接的会话处理。

pub mod config;
pub mod error;
pub mod ws_server;

pub use error::SimError;
pub use ws_server::SimRobot;
