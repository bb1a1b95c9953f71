// control_panel/src/error.rs

//! 控制核心各层的错误类型。
//!
//! - [`ConnectionError`]：连接管理器 (`connect` / `call` 等) 返回给直接调用方的错误。
//! - [`ControlError`]：控制门面返回的错误，在连接错误之外增加参数越界与机器人拒绝。
//! - [`ConfigError`]：配置文件读写错误。
//!
//! 无响应 (`no_response`) 不在此列：它只作为故障记录写入包日志，从不以错误形式抛给调用方。

use robot_models::RangeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectionError {
    /// 连接目标不是合法的 `ws://` / `wss://` 地址，未进行任何网络操作。
    #[error("无效的连接地址: {0}")]
    InvalidAddress(String),

    /// 传输层未能在限定时间内完成打开。
    #[error("连接超时：{timeout_ms} ms 内未能建立连接，请检查服务器、IP/端口和网络")]
    ConnectTimeout { timeout_ms: u64 },

    /// 传输层打开失败 (连接被拒绝、握手失败等)。
    #[error("连接失败：请检查 rosbridge 状态和网络 ({0})")]
    ConnectFailed(String),

    /// 传输已打开，但验证往返超时、出错或返回了否定应答。
    #[error("连接验证失败: {0}")]
    VerificationFailed(String),

    #[error("未连接到机器人，无法执行该操作")]
    NotConnected,

    /// 机器人端对服务调用明确返回了错误 (`result: false`)。
    #[error("服务 {service} 返回错误: {message}")]
    RemoteError { service: String, message: String },

    /// 服务响应的 `values` 无法解析为预期结构。
    #[error("服务 {service} 的响应无法解析: {message}")]
    MalformedResponse { service: String, message: String },

    /// 本次连接尝试已被之后的 `connect` 或 `disconnect` 取代。
    #[error("连接尝试已被更新的连接请求取代")]
    Superseded,

    #[error("请求序列化失败: {0}")]
    Serialization(String),
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("参数超出范围: {0}")]
    OutOfRange(#[from] RangeError),

    /// 机器人收到了请求，但应答为否定 (ack != 1)。
    #[error("机器人拒绝了 {service} 请求 (应答值: {ack})")]
    Rejected { service: String, ack: u8 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("读写配置文件 '{path}' 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("解析配置文件 '{path}' 的内容失败: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
