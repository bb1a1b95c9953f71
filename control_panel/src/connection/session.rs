// control_panel/src/connection/session.rs

//! 会话记录：连接管理器唯一的状态来源。

use log::warn;
use robot_models::Channel;
use rosbridge_utils::codec::encode_op;
use rosbridge_utils::RosbridgeOp;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

use crate::error::ConnectionError;

pub(crate) type CallReply = oneshot::Sender<Result<Value, ConnectionError>>;

/// 一条已打开的传输链路。
///
/// 出站帧经无界队列交给写任务；队列的发送端被释放后，写任务发完剩余的帧并关闭 socket。
pub(crate) struct ActiveLink {
    pub session_id: u64,
    pub outbound: mpsc::UnboundedSender<Message>,
    pub reader_task: JoinHandle<()>,
}

impl ActiveLink {
    pub fn enqueue(&self, op: &RosbridgeOp) -> Result<(), String> {
        let frame = encode_op(op).map_err(|e| e.to_string())?;
        self.outbound
            .send(frame)
            .map_err(|_| "写任务已退出，出站队列已关闭".to_string())
    }

    /// 停止读任务并释放出站队列，写任务随后发送 Close 帧。
    pub fn close(self) {
        self.reader_task.abort();
    }
}

/// 一个等待 `service_response` 的服务调用。
pub(crate) struct PendingCall {
    /// 对应的包日志条目。
    pub log_id: String,
    pub service: String,
    pub reply: CallReply,
}

#[derive(Default)]
pub(crate) struct SessionState {
    /// 每次连接尝试和每次拆除都会递增。
    pub session_id: u64,
    /// 最近一次验证成功的地址，自动重连使用；用户断开时清除。
    pub address: Option<Url>,
    pub link: Option<ActiveLink>,
    pub verified: bool,
    /// 已在当前链路上 advertise 过的话题。
    pub ready_channels: HashSet<Channel>,
    /// 以 `call_service` 帧 id 为键。
    pub pending_calls: HashMap<String, PendingCall>,
    pub reconnect_task: Option<JoinHandle<()>>,
}

impl SessionState {
    pub fn bump(&mut self) -> u64 {
        self.session_id = self.session_id.wrapping_add(1);
        self.session_id
    }

    /// 所有在途调用以 `NotConnected` 结束。
    pub fn fail_pending(&mut self) {
        for (_, call) in self.pending_calls.drain() {
            let _ = call.reply.send(Err(ConnectionError::NotConnected));
        }
    }

    pub fn abort_reconnect(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }

    /// 拆除当前链路：撤销已声明的话题，清除验证状态，结束在途调用。
    ///
    /// 返回的链路需在释放锁之后调用 [`ActiveLink::close`]。
    pub fn teardown(&mut self) -> Option<ActiveLink> {
        let link = self.link.take();
        if let Some(link) = &link {
            for channel in self.ready_channels.iter() {
                if let Err(e) = link.enqueue(&RosbridgeOp::unadvertise(channel.topic())) {
                    warn!("[连接管理] 撤销话题 {} 失败: {}", channel.topic(), e);
                }
            }
        }
        self.ready_channels.clear();
        self.verified = false;
        self.fail_pending();
        link
    }
}
