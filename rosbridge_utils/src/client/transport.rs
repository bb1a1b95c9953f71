// rosbridge_utils/src/client/transport.rs

//! 客户端 WebSocket 传输层。
//!
//! 负责解析 rosbridge 地址、建立连接，并把连接拆分为发送端与接收端，
//! 以便调用方把两者分别交给独立的写任务和读任务。

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt,
    StreamExt,
};
use log::{debug, error, info};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, WebSocketStream};
use url::Url;

use crate::codec::encode_op;
use crate::error::WsError;
use crate::message::RosbridgeOp;

/// 可能经过 TLS 加密的客户端 WebSocket 流。
pub type ClientWsStream = WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// 一个活动的客户端连接。
pub struct ClientConnection {
    /// 发送端，写入 `Message::Text` 或 `Message::Close`。
    pub ws_sender: SplitSink<ClientWsStream, Message>,
    /// 接收端，配合 [`crate::codec::receive_op`] 使用。
    pub ws_receiver: SplitStream<ClientWsStream>,
}

impl ClientConnection {
    /// 发送一条 rosbridge 操作帧。
    pub async fn send_op(&mut self, op: &RosbridgeOp) -> Result<(), WsError> {
        let frame = encode_op(op)?;
        debug!("[rosbridge 客户端] 发送 {} 帧: {:?}", op.op_name(), frame);
        self.ws_sender.send(frame).await?;
        Ok(())
    }

    /// 主动发送 Close 帧并结束发送端。
    pub async fn close(&mut self) -> Result<(), WsError> {
        self.ws_sender.close().await?;
        Ok(())
    }
}

/// 校验 rosbridge 地址：必须能解析为 URL，且协议为 `ws` 或 `wss`。
pub fn parse_ws_url(url_str: &str) -> Result<Url, WsError> {
    let url = Url::parse(url_str)
        .map_err(|e| WsError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", url_str, e)))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(WsError::InvalidUrl(format!(
            "不支持的协议 '{}' (仅支持 ws/wss): {}",
            other, url_str
        ))),
    }
}

/// 连接到指定的 rosbridge 服务器。
///
/// 只负责 WebSocket 握手，不做任何协议层验证；超时由调用方用 `tokio::time::timeout` 包裹。
pub async fn connect_client(url_str: &str) -> Result<ClientConnection, WsError> {
    let url = parse_ws_url(url_str)?;
    info!("[rosbridge 客户端] 开始连接: {}", url);

    match connect_async(url.as_str()).await {
        Ok((ws_stream, response)) => {
            info!("[rosbridge 客户端] 已连接到 {} (HTTP 状态码: {})", url, response.status());
            let (ws_sender, ws_receiver) = ws_stream.split();
            Ok(ClientConnection { ws_sender, ws_receiver })
        }
        Err(e) => {
            error!("[rosbridge 客户端] 连接到 {} 失败: {}", url, e);
            Err(WsError::WebSocketProtocolError(e))
        }
    }
}
