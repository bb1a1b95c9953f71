// rosbridge_utils/src/codec.rs

//! tungstenite 消息与 `RosbridgeOp` 之间的编解码。
//!
//! 客户端与服务端的接收流类型不同 (`MaybeTlsStream` 与裸 `TcpStream`)，
//! 这里的函数对任意 `Stream<Item = Result<Message, _>>` 泛型，两端共用。

use futures_util::stream::{Stream, StreamExt};
use log::{debug, error};
use tokio_tungstenite::tungstenite::{protocol::Message, Error as TungsteniteError};

use crate::error::WsError;
use crate::message::RosbridgeOp;

/// 把操作帧编码为 WebSocket 文本消息。
pub fn encode_op(op: &RosbridgeOp) -> Result<Message, WsError> {
    Ok(Message::Text(op.to_json()?))
}

/// 从接收流中取出下一条 rosbridge 操作帧。
///
/// Ping / Pong / 原始 Frame 会被跳过 (由 tungstenite 自动应答)。
///
/// # Returns
/// * `Some(Ok(op))`：成功解析出一帧。
/// * `Some(Err(e))`：收到二进制帧、无法解析的文本，或底层协议错误。
///   前两种情况下连接仍可继续读取。
/// * `None`：收到 Close 帧或流已结束。
pub async fn receive_op<S>(ws_receiver: &mut S) -> Option<Result<RosbridgeOp, WsError>>
where
    S: Stream<Item = Result<Message, TungsteniteError>> + Unpin,
{
    loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!("[rosbridge] 收到文本帧: '{}'", text);
                break Some(RosbridgeOp::from_json(&text));
            }
            Some(Ok(Message::Binary(bin))) => {
                debug!("[rosbridge] 收到二进制帧，长度: {} 字节", bin.len());
                break Some(Err(WsError::Message("收到了非预期的 WebSocket 二进制消息".to_string())));
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                // 控制帧，继续等待业务帧
            }
            Some(Ok(Message::Close(close_frame))) => {
                debug!("[rosbridge] 收到 Close 帧: {:?}", close_frame);
                break None;
            }
            Some(Err(TungsteniteError::ConnectionClosed)) | Some(Err(TungsteniteError::AlreadyClosed)) => {
                debug!("[rosbridge] 连接已关闭。");
                break None;
            }
            Some(Err(e)) => {
                error!("[rosbridge] 从 WebSocket 流接收消息时发生底层错误: {}", e);
                break Some(Err(WsError::WebSocketProtocolError(e)));
            }
            None => {
                debug!("[rosbridge] 接收流已结束。");
                break None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn skips_control_frames_and_stops_at_close() {
        let frames: Vec<Result<Message, TungsteniteError>> = vec![
            Ok(Message::Ping(vec![1])),
            Ok(Message::Text(r#"{"op":"unadvertise","topic":"/arm_control"}"#.to_string())),
            Ok(Message::Binary(vec![0, 1])),
            Ok(Message::Text("not json".to_string())),
            Ok(Message::Close(None)),
            Ok(Message::Text(r#"{"op":"unadvertise","topic":"/never"}"#.to_string())),
        ];
        let mut rx = stream::iter(frames);

        let first = receive_op(&mut rx).await.unwrap().unwrap();
        assert_eq!(first, RosbridgeOp::unadvertise("/arm_control"));
        assert!(matches!(receive_op(&mut rx).await, Some(Err(WsError::Message(_)))));
        assert!(matches!(receive_op(&mut rx).await, Some(Err(WsError::DeserializationError(_)))));
        assert!(receive_op(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn connection_closed_error_ends_the_stream() {
        let frames: Vec<Result<Message, TungsteniteError>> = vec![Err(TungsteniteError::ConnectionClosed)];
        let mut rx = stream::iter(frames);
        assert!(receive_op(&mut rx).await.is_none());
    }

    #[test]
    fn encode_op_produces_text_frame() {
        let msg = encode_op(&RosbridgeOp::unadvertise("/pump_control")).unwrap();
        match msg {
            Message::Text(text) => assert!(text.contains("\"op\":\"unadvertise\"")),
            other => panic!("应为文本帧: {:?}", other),
        }
    }
}
