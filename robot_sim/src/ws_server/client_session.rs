//! 单个客户端连接的处理循环。

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use rosbridge_utils::codec::{encode_op, receive_op};
use rosbridge_utils::server::transport::WsStream;
use rosbridge_utils::{RosbridgeOp, WsError};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use super::SimState;

/// 处理一个已完成握手的连接，直到客户端关闭、链路出错或收到断开指令。
pub(crate) async fn run(ws_stream: WsStream, peer_addr: SocketAddr, state: Arc<SimState>) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut kill_rx = state.subscribe_kill();
    // 本连接上已 advertise 的话题
    let mut advertised: HashSet<String> = HashSet::new();
    state.connection_opened();
    info!("[模拟端] 客户端 {} 已连接", peer_addr);

    loop {
        let next = tokio::select! {
            _ = kill_rx.recv() => {
                info!("[模拟端] 主动断开客户端 {}", peer_addr);
                break;
            }
            next = receive_op(&mut ws_receiver) => next,
        };
        let op = match next {
            None => break,
            Some(Ok(op)) => op,
            Some(Err(WsError::WebSocketProtocolError(e))) => {
                warn!("[模拟端] 与 {} 的链路出错: {}", peer_addr, e);
                break;
            }
            Some(Err(e)) => {
                warn!("[模拟端] 忽略来自 {} 的无法解析的帧: {}", peer_addr, e);
                continue;
            }
        };
        state.record(&op);

        let reply = match op {
            RosbridgeOp::Advertise { topic, msg_type, .. } => {
                debug!("[模拟端] {} advertise {} ({})", peer_addr, topic, msg_type);
                advertised.insert(topic);
                None
            }
            RosbridgeOp::Unadvertise { topic, .. } => {
                advertised.remove(&topic);
                None
            }
            RosbridgeOp::Publish { topic, msg, .. } => {
                if advertised.contains(&topic) {
                    debug!("[模拟端] {} 发布到 {}: {}", peer_addr, topic, msg);
                    None
                } else {
                    warn!("[模拟端] {} 向未声明的话题 {} 发布消息", peer_addr, topic);
                    Some(RosbridgeOp::Status {
                        level: "warning".to_string(),
                        msg: format!("publish to {} before advertise", topic),
                        id: None,
                    })
                }
            }
            RosbridgeOp::CallService { service, args, id, .. } => {
                let delay = state.response_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                state.answer_call(&service, &args, id)
            }
            other => {
                debug!("[模拟端] 忽略 {} 帧", other.op_name());
                None
            }
        };

        if let Some(reply) = reply {
            let frame = match encode_op(&reply) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("[模拟端] 应答编码失败: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(frame).await {
                warn!("[模拟端] 向 {} 发送应答失败: {}", peer_addr, e);
                break;
            }
        }
    }

    state.connection_closed();
    info!("[模拟端] 客户端 {} 的会话结束", peer_addr);
}
