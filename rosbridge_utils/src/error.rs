// rosbridge_utils/src/error.rs

//! 定义 rosbridge 传输工具库相关的错误类型。

use thiserror::Error;

/// rosbridge 传输工具库的统一错误类型。
#[derive(Error, Debug)]
pub enum WsError {
    /// 操作帧序列化为 JSON 失败。
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 收到的文本帧无法解析为 rosbridge 操作帧。
    #[error("反序列化错误: {0}")]
    DeserializationError(String),

    /// WebSocket 协议相关的错误，例如握手失败、连接被重置等。
    #[error("WebSocket协议错误: {0}")]
    WebSocketProtocolError(#[from] tokio_tungstenite::tungstenite::Error),

    /// 底层 I/O 错误 (监听端口绑定失败等)。
    #[error("I/O错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 无效的 URL 格式，或协议不是 ws/wss。
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    /// 其他未明确分类的消息错误，例如收到二进制帧。
    #[error("消息错误: {0}")]
    Message(String),
}
