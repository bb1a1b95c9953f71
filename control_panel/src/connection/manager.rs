// control_panel/src/connection/manager.rs

//! rosbridge 连接管理器。
//!
//! 负责与机器人端 rosbridge 的整个连接生命周期：
//! - `connect`：打开传输 → 验证往返 (`/connection_establish`, establish = 1) → 标记已连接；
//! - `publish` / `call`：仅在已验证的会话上收发，话题按需 advertise；
//! - 已验证的会话意外断开后按固定间隔自动重连，成功后恢复记住的运行模式；
//! - `disconnect`：幂等的完整拆除。
//!
//! 每一次连接尝试和每一次拆除都会递增会话 id。异步步骤完成后先核对会话 id，
//! 不一致说明已被更新的 `connect` / `disconnect` 取代，此时不再修改会话状态。
//! 会话状态放在一把同步锁内，锁从不跨越 `.await`。
//!
//! 连接状态的每次变化 (标记已验证、意外断开、拆除) 与对应的监听器通知都在
//! `transitions` 锁内完成，监听器看到的 `true` / `false` 顺序与状态变化顺序一致。
//! 加锁顺序固定为 `transitions` → `session`。

use futures_util::SinkExt;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, ReentrantMutex};
use robot_models::ws_payloads::{EstablishRequest, EstablishResponse, MachineModeRequest, MachineModeResponse};
use robot_models::{Channel, OperatingMode, PacketKind, Service};
use rosbridge_utils::client::transport::{connect_client, parse_ws_url, ClientConnection};
use rosbridge_utils::codec::{encode_op, receive_op};
use rosbridge_utils::{RosbridgeOp, WsError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use url::Url;

use super::session::{ActiveLink, PendingCall, SessionState};
use crate::config::ConnectionConfig;
use crate::error::ConnectionError;
use crate::event::{ConnectionEvent, EVENT_CHANNEL_CAPACITY};
use crate::mode_store::ModeStore;
use crate::packet_logger::PacketLogger;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;
type ListenerRegistry = Mutex<Vec<(u64, Listener)>>;

/// 服务调用的发送条件。
#[derive(Clone, Copy)]
enum CallGate {
    /// 普通调用：要求会话已验证。
    Verified,
    /// 验证往返与模式恢复：只要求仍是指定的会话。
    Session(u64),
}

struct Shared {
    config: ConnectionConfig,
    logger: PacketLogger,
    mode_store: Arc<dyn ModeStore>,
    /// 可重入：监听器回调里可以再调用 `disconnect`。
    transitions: ReentrantMutex<()>,
    session: Mutex<SessionState>,
    listeners: Arc<ListenerRegistry>,
    listener_seq: AtomicU64,
    call_seq: AtomicU64,
    events: broadcast::Sender<ConnectionEvent>,
}

/// 连接状态监听器的注册句柄。
pub struct ListenerHandle {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl ListenerHandle {
    /// 注销监听器；管理器已被释放时为空操作。
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

/// 连接管理器。克隆得到的句柄共享同一个会话。
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, logger: PacketLogger, mode_store: Arc<dyn ModeStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                logger,
                mode_store,
                transitions: ReentrantMutex::new(()),
                session: Mutex::new(SessionState::default()),
                listeners: Arc::new(Mutex::new(Vec::new())),
                listener_seq: AtomicU64::new(0),
                call_seq: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// 连接并验证。
    ///
    /// 地址必须是 `ws://` 或 `wss://`，否则直接返回 `InvalidAddress` 且不产生任何副作用。
    /// 进行中的自动重连会被停止，旧会话被拆除；只有验证往返成功后才报告已连接。
    /// 显式连接失败不会自动重试。
    pub async fn connect(&self, address: &str) -> Result<(), ConnectionError> {
        let url = parse_ws_url(address).map_err(|e| ConnectionError::InvalidAddress(e.to_string()))?;

        let session_id = {
            let _transition = self.shared.transitions.lock();
            let (session_id, was_connected, old_link) = {
                let mut session = self.shared.session.lock();
                session.abort_reconnect();
                let was_connected = session.verified;
                let old_link = session.teardown();
                session.address = None;
                (session.bump(), was_connected, old_link)
            };
            if let Some(link) = old_link {
                link.close();
            }
            if was_connected {
                info!("[连接管理] 新的连接请求关闭了旧会话。");
                self.notify_listeners(false);
                self.broadcast(ConnectionEvent::Disconnected);
            }
            session_id
        };

        info!("[连接管理] 开始连接 {} (会话 {})", url, session_id);
        match self.open_and_verify(session_id, &url, true).await {
            Ok(()) => {
                info!("[连接管理] 已连接并通过验证: {}", url);
                Ok(())
            }
            Err(e) => {
                match &e {
                    ConnectionError::Superseded => info!("[连接管理] 会话 {} 的连接尝试已被取代。", session_id),
                    other => error!("[连接管理] 连接 {} 失败: {}", url, other),
                }
                Err(e)
            }
        }
    }

    /// 断开连接。可重复调用；只有当前确实处于已连接状态时才通知监听器。
    pub fn disconnect(&self) {
        let _transition = self.shared.transitions.lock();
        let (was_connected, link) = {
            let mut session = self.shared.session.lock();
            session.abort_reconnect();
            let was_connected = session.verified;
            let link = session.teardown();
            session.address = None;
            session.bump();
            (was_connected, link)
        };
        if let Some(link) = link {
            link.close();
        }

        if was_connected {
            info!("[连接管理] 已断开连接。");
            self.notify_listeners(false);
            self.broadcast(ConnectionEvent::Disconnected);
        } else {
            debug!("[连接管理] disconnect: 当前未连接，无需通知。");
        }
    }

    /// 向控制话题发布一条消息。
    ///
    /// 不返回错误：未连接、序列化失败或出站队列已关闭时记录错误日志并丢弃该消息。
    /// 话题在当前链路上第一次发布前会先 advertise。
    pub fn publish<T: Serialize>(&self, channel: Channel, payload: &T) {
        let topic = channel.topic();
        let msg = match serde_json::to_value(payload) {
            Ok(msg) => msg,
            Err(e) => {
                error!("[连接管理] {} 消息序列化失败，已丢弃: {}", topic, e);
                return;
            }
        };
        let frame = match encode_op(&RosbridgeOp::Publish {
            topic: topic.to_string(),
            msg: msg.clone(),
            id: None,
        }) {
            Ok(frame) => frame,
            Err(e) => {
                error!("[连接管理] {} 消息编码失败，已丢弃: {}", topic, e);
                return;
            }
        };

        {
            let mut session = self.shared.session.lock();
            let SessionState {
                link,
                verified,
                ready_channels,
                ..
            } = &mut *session;
            let Some(link) = link.as_ref().filter(|_| *verified) else {
                error!("[连接管理] 未连接到机器人，丢弃发往 {} 的消息。", topic);
                return;
            };

            if !ready_channels.contains(&channel) {
                if let Err(e) = link.enqueue(&RosbridgeOp::advertise(topic, channel.message_type())) {
                    error!("[连接管理] advertise {} 失败，消息已丢弃: {}", topic, e);
                    return;
                }
                debug!("[连接管理] 已声明话题 {}", topic);
                ready_channels.insert(channel);
            }

            if link.outbound.send(frame).is_err() {
                error!("[连接管理] 出站队列已关闭，丢弃发往 {} 的消息。", topic);
                return;
            }
        }
        self.shared.logger.log_send(PacketKind::Topic, topic, msg, false);
    }

    /// 调用服务并等待对应的 `service_response`。
    ///
    /// 本方法没有调用方超时；包日志的计时器只负责把超时记录为故障。
    pub async fn call<Req, Resp>(&self, service: Service, request: &Req) -> Result<Resp, ConnectionError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let reply = self.start_call(CallGate::Verified, &service, request)?;
        let values = reply.await.map_err(|_| ConnectionError::NotConnected)??;
        decode_response(&service, values)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.session.lock().verified
    }

    pub fn session_id(&self) -> u64 {
        self.shared.session.lock().session_id
    }

    /// 自动重连使用的地址 (最近一次验证成功的地址)。
    pub fn remembered_address(&self) -> Option<String> {
        self.shared.session.lock().address.as_ref().map(Url::to_string)
    }

    /// 注册连接状态监听器：连接成功时以 `true` 调用，断开时以 `false` 调用。
    pub fn add_connection_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.shared.listener_seq.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.lock().push((id, Arc::new(listener)));
        ListenerHandle {
            id,
            registry: Arc::downgrade(&self.shared.listeners),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub fn logger(&self) -> &PacketLogger {
        &self.shared.logger
    }

    // --- 内部实现 ---

    /// 打开传输并完成验证往返。成功时会话已被标记为已验证、记住地址并通知监听器；
    /// `initial` 为 true 时 (显式连接) 另外广播 `Connected`。
    async fn open_and_verify(&self, session_id: u64, url: &Url, initial: bool) -> Result<(), ConnectionError> {
        let connect_timeout = self.shared.config.connect_timeout();
        let connection = match time::timeout(connect_timeout, connect_client(url.as_str())).await {
            Err(_) => {
                return Err(ConnectionError::ConnectTimeout {
                    timeout_ms: self.shared.config.connect_timeout_ms,
                })
            }
            Ok(Err(e)) => return Err(ConnectionError::ConnectFailed(e.to_string())),
            Ok(Ok(connection)) => connection,
        };
        self.install_link(session_id, connection)?;

        let verification = match self.start_call(
            CallGate::Session(session_id),
            &Service::ConnectionEstablish,
            &EstablishRequest::power(true),
        ) {
            Ok(reply) => {
                let verify_timeout = self.shared.config.verify_timeout();
                match time::timeout(verify_timeout, reply).await {
                    Err(_) => Err(format!(
                        "{} ms 内未收到验证应答",
                        self.shared.config.verify_timeout_ms
                    )),
                    Ok(Err(_)) => Err(ConnectionError::NotConnected.to_string()),
                    Ok(Ok(Err(e))) => Err(e.to_string()),
                    Ok(Ok(Ok(values))) => match decode_response::<EstablishResponse>(&Service::ConnectionEstablish, values) {
                        Ok(response) if response.establish_ack == 1 => Ok(()),
                        Ok(response) => Err(format!("机器人返回否定应答 (establish_ack = {})", response.establish_ack)),
                        Err(e) => Err(e.to_string()),
                    },
                }
            }
            Err(ConnectionError::Superseded) => return Err(ConnectionError::Superseded),
            Err(e) => Err(e.to_string()),
        };

        self.commit_verification(session_id, url, verification, initial)
    }

    /// 根据验证结果提交会话状态。
    ///
    /// 读任务可能处理完应答后紧接着处理 Close 帧；链路已不属于本会话时按验证失败处理。
    fn commit_verification(
        &self,
        session_id: u64,
        url: &Url,
        verification: Result<(), String>,
        initial: bool,
    ) -> Result<(), ConnectionError> {
        let _transition = self.shared.transitions.lock();
        let mut session = self.shared.session.lock();
        if session.session_id != session_id {
            return Err(ConnectionError::Superseded);
        }
        let link_open = session.link.as_ref().is_some_and(|link| link.session_id == session_id);
        let verification = match verification {
            Ok(()) if !link_open => Err("验证应答到达后链路已关闭".to_string()),
            other => other,
        };
        match verification {
            Ok(()) => {
                session.verified = true;
                session.address = Some(url.clone());
                drop(session);
                self.notify_listeners(true);
                if initial {
                    self.broadcast(ConnectionEvent::Connected {
                        address: url.to_string(),
                    });
                }
                Ok(())
            }
            Err(reason) => {
                let link = session.teardown();
                session.bump();
                drop(session);
                if let Some(link) = link {
                    link.close();
                }
                warn!("[连接管理] 会话 {} 验证失败: {}", session_id, reason);
                Err(ConnectionError::VerificationFailed(reason))
            }
        }
    }

    /// 为已打开的传输启动读写任务并登记到会话中。会话 id 已变化时丢弃该传输。
    fn install_link(&self, session_id: u64, connection: ClientConnection) -> Result<(), ConnectionError> {
        let mut session = self.shared.session.lock();
        if session.session_id != session_id {
            debug!("[连接管理] 会话 {} 已被取代，丢弃新打开的传输。", session_id);
            return Err(ConnectionError::Superseded);
        }

        let ClientConnection {
            mut ws_sender,
            mut ws_receiver,
        } = connection;
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = ws_sender.send(frame).await {
                    warn!("[连接管理] (写任务) 发送失败，停止写入: {}", e);
                    break;
                }
            }
            if let Err(e) = ws_sender.close().await {
                debug!("[连接管理] (写任务) 关闭 socket 时出错: {}", e);
            }
            debug!("[连接管理] (写任务) 会话 {} 的写任务结束。", session_id);
        });

        let manager = self.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(result) = receive_op(&mut ws_receiver).await {
                match result {
                    Ok(op) => manager.dispatch(op),
                    Err(WsError::WebSocketProtocolError(e)) => {
                        warn!("[连接管理] (读任务) 会话 {} 的链路出错: {}", session_id, e);
                        break;
                    }
                    Err(e) => warn!("[连接管理] (读任务) 忽略无法处理的帧: {}", e),
                }
            }
            manager.on_link_closed(session_id);
        });

        session.link = Some(ActiveLink {
            session_id,
            outbound,
            reader_task,
        });
        Ok(())
    }

    /// 发送 `call_service` 帧，登记在途调用并记录包日志。
    fn start_call<Req: Serialize>(
        &self,
        gate: CallGate,
        service: &Service,
        request: &Req,
    ) -> Result<oneshot::Receiver<Result<Value, ConnectionError>>, ConnectionError> {
        let name = service.name();
        let args = serde_json::to_value(request).map_err(|e| ConnectionError::Serialization(e.to_string()))?;
        let seq = self.shared.call_seq.fetch_add(1, Ordering::Relaxed);
        let call_id = format!("call_service:{}:{}", name, seq);
        let op = RosbridgeOp::call_service(call_id.as_str(), name.as_str(), service.service_type(), &args)
            .map_err(|e| ConnectionError::Serialization(e.to_string()))?;

        let gate_error = |session: &SessionState| match gate {
            CallGate::Verified if !session.verified => Some(ConnectionError::NotConnected),
            CallGate::Session(id) if session.session_id != id => Some(ConnectionError::Superseded),
            _ if session.link.is_none() => Some(ConnectionError::NotConnected),
            _ => None,
        };
        if let Some(e) = gate_error(&self.shared.session.lock()) {
            return Err(e);
        }

        // 日志条目要先于帧发出存在，响应才能找到它；写日志时不持有会话锁
        let log_id = self.shared.logger.log_send(PacketKind::Service, &name, args, true);
        let (reply, reply_rx) = oneshot::channel();
        let sent = {
            let mut session = self.shared.session.lock();
            match gate_error(&session) {
                Some(e) => Err(e),
                None => match session.link.as_ref().map(|link| link.enqueue(&op)) {
                    Some(Ok(())) => {
                        session.pending_calls.insert(
                            call_id.clone(),
                            PendingCall {
                                log_id: log_id.clone(),
                                service: name.clone(),
                                reply,
                            },
                        );
                        Ok(())
                    }
                    Some(Err(e)) => {
                        error!("[连接管理] 调用 {} 失败: {}", name, e);
                        Err(ConnectionError::NotConnected)
                    }
                    None => Err(ConnectionError::NotConnected),
                },
            }
        };
        match sent {
            Ok(()) => {
                debug!("[连接管理] 已发送服务调用 {} (id: {})", name, call_id);
                Ok(reply_rx)
            }
            Err(e) => {
                self.shared.logger.discard(&log_id);
                Err(e)
            }
        }
    }

    /// 处理读任务收到的一帧。
    fn dispatch(&self, op: RosbridgeOp) {
        match op {
            RosbridgeOp::ServiceResponse {
                service,
                values,
                result,
                id,
            } => {
                let pending = id
                    .as_deref()
                    .and_then(|call_id| self.shared.session.lock().pending_calls.remove(call_id));
                let Some(call) = pending else {
                    debug!("[连接管理] 收到无对应调用的 {} 响应 (id: {:?})，忽略。", service, id);
                    return;
                };
                self.shared.logger.log_response(&call.log_id, values.clone(), result);
                let reply = if result {
                    debug!("[连接管理] {} 响应: {}", call.service, values);
                    Ok(values)
                } else {
                    let message = match values {
                        Value::String(text) => text,
                        other => other.to_string(),
                    };
                    warn!("[连接管理] {} 返回错误: {}", call.service, message);
                    Err(ConnectionError::RemoteError {
                        service: call.service,
                        message,
                    })
                };
                let _ = call.reply.send(reply);
            }
            RosbridgeOp::Status { level, msg, .. } => match level.as_str() {
                "error" => error!("[连接管理] rosbridge 状态: {}", msg),
                "warning" => warn!("[连接管理] rosbridge 状态: {}", msg),
                _ => info!("[连接管理] rosbridge 状态: {}", msg),
            },
            other => debug!("[连接管理] 忽略 {} 帧。", other.op_name()),
        }
    }

    /// 读任务结束时调用。已验证会话的意外断开会启动自动重连。
    fn on_link_closed(&self, session_id: u64) {
        let _transition = self.shared.transitions.lock();
        let address = {
            let mut session = self.shared.session.lock();
            let is_current = session.session_id == session_id
                && session.link.as_ref().is_some_and(|link| link.session_id == session_id);
            if !is_current {
                return;
            }
            let was_verified = session.verified;
            // 链路已断，撤销话题无意义，直接丢弃
            session.ready_channels.clear();
            session.link = None;
            session.verified = false;
            session.fail_pending();
            if !was_verified {
                info!("[连接管理] 会话 {} 在验证完成前关闭。", session_id);
                return;
            }
            session.bump();

            let Some(address) = session.address.clone() else {
                return;
            };
            session.abort_reconnect();
            let manager = self.clone();
            session.reconnect_task = Some(tokio::spawn(async move { manager.reconnect_loop().await }));
            address
        };

        warn!("[连接管理] 与 {} 的连接意外断开，{} ms 后开始自动重连。", address, self.shared.config.reconnect_interval_ms);
        self.notify_listeners(false);
        self.broadcast(ConnectionEvent::ConnectionLost {
            address: address.to_string(),
        });
    }

    async fn reconnect_loop(self) {
        let period = self.shared.config.reconnect_interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let (session_id, url) = {
                let mut session = self.shared.session.lock();
                if session.verified {
                    break;
                }
                let Some(url) = session.address.clone() else {
                    break;
                };
                (session.bump(), url)
            };

            info!("[连接管理] 尝试重连 {} (会话 {})", url, session_id);
            match self.open_and_verify(session_id, &url, false).await {
                Ok(()) => {
                    self.on_reconnected(session_id, url).await;
                    break;
                }
                Err(ConnectionError::Superseded) => break,
                Err(e) => warn!("[连接管理] 重连失败: {}", e),
            }
        }
    }

    /// 重连成功 (监听器已收到 `true`)：稍候后恢复记住的运行模式，
    /// 会话仍然有效时广播 `Reconnected`。
    async fn on_reconnected(&self, session_id: u64, url: Url) {
        info!("[连接管理] 已重新连接到 {}", url);

        time::sleep(self.shared.config.mode_restore_delay()).await;
        let resumed_mode = self.restore_mode(session_id).await;

        let _transition = self.shared.transitions.lock();
        let current = {
            let session = self.shared.session.lock();
            session.session_id == session_id && session.verified
        };
        if current {
            self.broadcast(ConnectionEvent::Reconnected {
                address: url.to_string(),
                resumed_mode,
            });
        } else {
            debug!("[连接管理] 重连后的会话已结束，不再广播 Reconnected。");
        }
    }

    async fn restore_mode(&self, session_id: u64) -> Option<OperatingMode> {
        {
            let session = self.shared.session.lock();
            if session.session_id != session_id || !session.verified {
                debug!("[连接管理] 会话已变化，跳过模式恢复。");
                return None;
            }
        }
        let mode = self.shared.mode_store.load()?;

        info!("[连接管理] 恢复运行模式: {}", mode);
        let service = Service::MachineMode;
        let reply = match self.start_call(CallGate::Session(session_id), &service, &MachineModeRequest::from(mode)) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("[连接管理] 恢复运行模式失败: {}", e);
                return None;
            }
        };
        let response = match time::timeout(self.shared.config.verify_timeout(), reply).await {
            Ok(Ok(Ok(values))) => decode_response::<MachineModeResponse>(&service, values),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(ConnectionError::NotConnected),
            Err(_) => {
                warn!("[连接管理] 恢复运行模式未收到应答。");
                return None;
            }
        };
        match response {
            Ok(response) if response.mode_ack == 1 => Some(mode),
            Ok(response) => {
                warn!("[连接管理] 机器人拒绝恢复运行模式 (mode_ack = {})", response.mode_ack);
                None
            }
            Err(e) => {
                warn!("[连接管理] 恢复运行模式失败: {}", e);
                None
            }
        }
    }

    fn notify_listeners(&self, connected: bool) {
        let listeners: Vec<Listener> = self
            .shared
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(connected);
        }
    }

    fn broadcast(&self, event: ConnectionEvent) {
        // 没有订阅者时 send 返回错误，忽略即可
        let _ = self.shared.events.send(event);
    }
}

fn decode_response<Resp: DeserializeOwned>(service: &Service, values: Value) -> Result<Resp, ConnectionError> {
    serde_json::from_value(values).map_err(|e| ConnectionError::MalformedResponse {
        service: service.name(),
        message: e.to_string(),
    })
}
