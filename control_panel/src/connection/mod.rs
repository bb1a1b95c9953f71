// control_panel/src/connection/mod.rs

//! 与机器人端 rosbridge 的连接层。
//!
//! - `manager`: [`ConnectionManager`]，连接、验证、发布、服务调用与自动重连。
//! - `session`: 会话记录与链路句柄 (仅 crate 内部使用)。

pub mod manager;
mod session;

pub use manager::{ConnectionManager, ListenerHandle};
