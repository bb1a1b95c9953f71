//! `rosbridge_utils` 提供 rosbridge v2 协议的 WebSocket 传输工具。
//!
//! 控制面板 (`control_panel`) 与机器人模拟端 (`robot_sim`) 都通过本 crate 收发 JSON 操作帧，
//! 因此两端对帧格式的理解始终一致。
//!
//! 主要模块包括：
//! - `message`: rosbridge 操作帧 `RosbridgeOp` (advertise / publish / call_service 等)。
//! - `codec`: 在 tungstenite 消息流与 `RosbridgeOp` 之间编解码。
//! - `error`: 库内统一错误类型 `WsError`。
//! - `client`: 客户端连接建立与发送。
//! - `server`: 服务端监听与按连接派发。

pub mod client;
pub mod codec;
pub mod error;
pub mod message;
pub mod server;

pub use error::WsError;
pub use message::RosbridgeOp;
