//! 模拟机器人服务端。
//!
//! [`SimRobot`] 绑定端口后在后台任务中接受连接，每个连接由 `client_session` 处理。
//! 行为开关 (沉默、失败、应答值) 与收到的帧记录在共享的 `SimState` 中，
//! 测试和台架工具通过 `SimRobot` 的方法读写。

mod client_session;

use log::info;
use parking_lot::Mutex;
use robot_models::ws_payloads::{EnableRequest, MachineModeRequest};
use robot_models::{OperatingMode, Service};
use rosbridge_utils::server::transport::ServerTransport;
use rosbridge_utils::{RosbridgeOp, WsError};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::SimConfig;
use crate::error::SimError;

#[derive(Default)]
struct Behavior {
    silent: HashSet<String>,
    failing: HashSet<String>,
    /// 指定服务的应答值，未指定时为 1。
    acks: HashMap<String, u8>,
    response_delay: Duration,
}

/// 所有连接共享的模拟端状态。
pub(crate) struct SimState {
    behavior: Mutex<Behavior>,
    received: Mutex<Vec<RosbridgeOp>>,
    mode: Mutex<Option<OperatingMode>>,
    active_connections: AtomicUsize,
    /// 发送一个值即断开所有当前连接。
    kill_tx: broadcast::Sender<()>,
}

impl SimState {
    fn new(response_delay: Duration) -> Self {
        let (kill_tx, _) = broadcast::channel(4);
        Self {
            behavior: Mutex::new(Behavior {
                response_delay,
                ..Behavior::default()
            }),
            received: Mutex::new(Vec::new()),
            mode: Mutex::new(None),
            active_connections: AtomicUsize::new(0),
            kill_tx,
        }
    }

    pub(crate) fn record(&self, op: &RosbridgeOp) {
        self.received.lock().push(op.clone());
    }

    pub(crate) fn response_delay(&self) -> Duration {
        self.behavior.lock().response_delay
    }

    pub(crate) fn subscribe_kill(&self) -> broadcast::Receiver<()> {
        self.kill_tx.subscribe()
    }

    pub(crate) fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }

    /// 计算一次服务调用的应答；返回 `None` 表示保持沉默。
    pub(crate) fn answer_call(&self, service: &str, args: &Value, id: Option<String>) -> Option<RosbridgeOp> {
        let ack = {
            let behavior = self.behavior.lock();
            if behavior.silent.contains(service) {
                info!("[模拟端] 服务 {} 被设置为沉默，不应答。", service);
                return None;
            }
            if behavior.failing.contains(service) {
                return Some(RosbridgeOp::service_response(
                    id,
                    service,
                    Value::String(format!("service {} failed", service)),
                    false,
                ));
            }
            behavior.acks.get(service).copied().unwrap_or(1)
        };

        let Some(known) = Service::from_name(service) else {
            return Some(RosbridgeOp::service_response(
                id,
                service,
                Value::String(format!("Service {} does not exist", service)),
                false,
            ));
        };
        let values = match known {
            Service::ConnectionEstablish => json!({ "establish_ack": ack }),
            Service::ChassisEnable => json!({ "motor_ack": ack, "current_state": motor_cmd(args) }),
            Service::ArmEnable => json!({ "arm_ack": ack, "current_state": motor_cmd(args) }),
            Service::SemiMode => json!({ "ack": ack }),
            Service::Stop => json!({ "stop_ack": ack }),
            Service::MachineMode => {
                if ack == 1 {
                    let requested = serde_json::from_value::<MachineModeRequest>(args.clone())
                        .ok()
                        .and_then(|request| OperatingMode::from_code(request.mode_cmd));
                    if let Some(mode) = requested {
                        info!("[模拟端] 运行模式切换为 {}", mode);
                        *self.mode.lock() = Some(mode);
                    }
                }
                json!({ "mode_ack": ack })
            }
            Service::PumpkinEnable => json!({ "pumpkin_ack": ack }),
            Service::AdminZeroset(_) => json!({ "zero_set_ack": ack }),
        };
        Some(RosbridgeOp::service_response(id, service, values, true))
    }
}

fn motor_cmd(args: &Value) -> u8 {
    serde_json::from_value::<EnableRequest>(args.clone())
        .map(|request| request.motor_cmd)
        .unwrap_or(0)
}

/// 运行中的模拟机器人。释放时停止接受新连接并断开现有连接。
pub struct SimRobot {
    addr: SocketAddr,
    state: Arc<SimState>,
    server_task: JoinHandle<Result<(), WsError>>,
}

impl SimRobot {
    /// 绑定地址并在后台开始服务。
    pub async fn start(config: &SimConfig) -> Result<Self, SimError> {
        let transport = ServerTransport::bind(&config.listen_addr)
            .await
            .map_err(|source| SimError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;
        let addr = transport.local_addr()?;
        let state = Arc::new(SimState::new(config.response_delay));

        let session_state = state.clone();
        let server_task = tokio::spawn(transport.serve(move |ws_stream, peer_addr| {
            client_session::run(ws_stream, peer_addr, session_state.clone())
        }));
        info!("[模拟端] 模拟机器人已在 ws://{} 上运行", addr);
        Ok(Self {
            addr,
            state,
            server_task,
        })
    }

    /// 在 `127.0.0.1` 的随机端口上启动 (测试用)。
    pub async fn start_local() -> Result<Self, SimError> {
        Self::start(&SimConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            ..SimConfig::default()
        })
        .await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// 设置服务是否保持沉默 (收到调用但不应答)。
    pub fn set_silent(&self, service: &str, silent: bool) {
        let mut behavior = self.state.behavior.lock();
        if silent {
            behavior.silent.insert(service.to_string());
        } else {
            behavior.silent.remove(service);
        }
    }

    /// 设置服务是否以 `result: false` 应答。
    pub fn set_failing(&self, service: &str, failing: bool) {
        let mut behavior = self.state.behavior.lock();
        if failing {
            behavior.failing.insert(service.to_string());
        } else {
            behavior.failing.remove(service);
        }
    }

    /// 指定服务应答中的 `*_ack` 值。
    pub fn set_ack(&self, service: &str, ack: u8) {
        self.state.behavior.lock().acks.insert(service.to_string(), ack);
    }

    pub fn set_establish_ack(&self, ack: u8) {
        self.set_ack("/connection_establish", ack);
    }

    pub fn set_response_delay(&self, delay: Duration) {
        self.state.behavior.lock().response_delay = delay;
    }

    /// 断开所有当前连接 (不发送 Close 帧)，之后仍可接受新连接。
    pub fn drop_connections(&self) {
        let dropped = self.state.kill_tx.send(()).unwrap_or(0);
        info!("[模拟端] 断开 {} 个连接。", dropped);
    }

    pub fn active_connections(&self) -> usize {
        self.state.active_connections.load(Ordering::SeqCst)
    }

    /// 按到达顺序返回收到的全部帧。
    pub fn received(&self) -> Vec<RosbridgeOp> {
        self.state.received.lock().clone()
    }

    pub fn clear_received(&self) {
        self.state.received.lock().clear();
    }

    /// 某个服务被调用的次数。
    pub fn call_count(&self, service: &str) -> usize {
        self.state
            .received
            .lock()
            .iter()
            .filter(|op| matches!(op, RosbridgeOp::CallService { service: s, .. } if s == service))
            .count()
    }

    /// 某个服务收到的全部请求参数。
    pub fn call_args(&self, service: &str) -> Vec<Value> {
        self.state
            .received
            .lock()
            .iter()
            .filter_map(|op| match op {
                RosbridgeOp::CallService { service: s, args, .. } if s == service => Some(args.clone()),
                _ => None,
            })
            .collect()
    }

    /// 发布到某个话题的全部消息。
    pub fn published(&self, topic: &str) -> Vec<Value> {
        self.state
            .received
            .lock()
            .iter()
            .filter_map(|op| match op {
                RosbridgeOp::Publish { topic: t, msg, .. } if t == topic => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    /// 机器人当前确认过的运行模式。
    pub fn current_mode(&self) -> Option<OperatingMode> {
        *self.state.mode.lock()
    }
}

impl Drop for SimRobot {
    fn drop(&mut self) {
        self.server_task.abort();
        let _ = self.state.kill_tx.send(());
    }
}
