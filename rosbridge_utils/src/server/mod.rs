// rosbridge_utils/src/server/mod.rs

//! rosbridge 服务端模块。
//!
//! 提供 TCP 监听、WebSocket 握手，并为每个连接派发一个独立的 Tokio 任务。
//! 目前只有机器人模拟端 (`robot_sim`) 使用。

pub mod transport;
