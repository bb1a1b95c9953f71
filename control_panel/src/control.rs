// control_panel/src/control.rs

//! 控制门面。
//!
//! 把操作界面上的每个动作映射为一次话题发布或服务调用，并生成对应的操作员提示
//! ([`Notification`])。服务应答为否定 (`*_ack != 1`) 时返回 [`ControlError::Rejected`]，
//! 同时发出警告提示；滑块数值经 [`SpeedScaling`] 换算后再发布。

use log::{info, warn};
use robot_models::catalog::ZerosetAxis;
use robot_models::ws_payloads::{
    ArmControl, ArmEnableResponse, ChassisControl, ChassisEnableResponse, EnableRequest, EstablishRequest,
    EstablishResponse, MachineModeRequest, MachineModeResponse, PumpControl, PumpkinEnableRequest,
    PumpkinEnableResponse, SemiModeRequest, SemiModeResponse, StopRequest, StopResponse, ZerosetRequest,
    ZerosetResponse,
};
use robot_models::{Channel, Direction, MotorCommand, OperatingMode, RangeError, Service, StopCommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::SpeedScaling;
use crate::connection::ConnectionManager;
use crate::error::{ConnectionError, ControlError};
use crate::event::{ConnectionEvent, Notification, NotificationLevel, EVENT_CHANNEL_CAPACITY};
use crate::mode_store::ModeStore;
use crate::packet_logger::{FaultRecord, PacketLogEntry, PacketLogger, PacketStats};

/// 退出前发送关机指令时等待应答的上限。
const POWER_OFF_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RobotControl {
    connection: ConnectionManager,
    mode_store: Arc<dyn ModeStore>,
    scaling: SpeedScaling,
    notifications: broadcast::Sender<Notification>,
    event_forwarder: JoinHandle<()>,
}

impl RobotControl {
    /// 创建控制门面。需要在 Tokio 运行时中调用 (会启动连接事件转发任务)。
    pub fn new(connection: ConnectionManager, mode_store: Arc<dyn ModeStore>, scaling: SpeedScaling) -> Self {
        let (notifications, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let event_forwarder = tokio::spawn(forward_connection_events(
            connection.subscribe_events(),
            notifications.clone(),
        ));
        Self {
            connection,
            mode_store,
            scaling,
            notifications,
            event_forwarder,
        }
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    // --- 连接 ---

    pub async fn connect(&self, url: &str) -> Result<(), ControlError> {
        match self.connection.connect(url).await {
            Ok(()) => {
                self.notify(NotificationLevel::Success, "连接成功", "已成功连接到ROS2服务器");
                Ok(())
            }
            Err(e) => {
                self.notify(NotificationLevel::Error, "连接失败", e.to_string());
                Err(e.into())
            }
        }
    }

    pub fn disconnect(&self) {
        let was_connected = self.connection.is_connected();
        self.connection.disconnect();
        if was_connected {
            self.notify(NotificationLevel::Info, "已断开连接", "已断开与ROS2服务器的连接");
        }
    }

    /// 退出：已连接时先发送关机指令 (最多等待 2 秒)，然后断开。
    pub async fn shutdown(&self) {
        if self.connection.is_connected() {
            match tokio::time::timeout(POWER_OFF_TIMEOUT, self.set_power(false)).await {
                Ok(Ok(())) => info!("[控制门面] 关机指令已确认。"),
                Ok(Err(e)) => warn!("[控制门面] 关机指令失败: {}", e),
                Err(_) => warn!("[控制门面] 关机指令在 {:?} 内未得到应答，直接断开。", POWER_OFF_TIMEOUT),
            }
        }
        self.disconnect();
    }

    // --- 服务 ---

    pub async fn set_power(&self, on: bool) -> Result<(), ControlError> {
        let label = if on { "开机" } else { "关机" };
        self.request::<_, EstablishResponse>(label, Service::ConnectionEstablish, &EstablishRequest::power(on), |r| {
            r.establish_ack
        })
        .await
        .map(|_| ())
    }

    pub async fn enable_chassis(&self, cmd: MotorCommand) -> Result<ChassisEnableResponse, ControlError> {
        self.request("底盘操作", Service::ChassisEnable, &EnableRequest::from(cmd), |r: &ChassisEnableResponse| {
            r.motor_ack
        })
        .await
    }

    pub async fn enable_arm(&self, cmd: MotorCommand) -> Result<ArmEnableResponse, ControlError> {
        self.request("机械臂操作", Service::ArmEnable, &EnableRequest::from(cmd), |r: &ArmEnableResponse| {
            r.arm_ack
        })
        .await
    }

    /// 下发半自动施工参数。参数越界时不发送。
    pub async fn start_semi_auto(&self, request: SemiModeRequest) -> Result<(), ControlError> {
        self.checked(request.validate())?;
        self.request("模式设置", Service::SemiMode, &request, |r: &SemiModeResponse| r.ack)
            .await
            .map(|_| ())
    }

    pub async fn stop(&self, cmd: StopCommand) -> Result<(), ControlError> {
        self.request("停止指令", Service::Stop, &StopRequest::from(cmd), |r: &StopResponse| r.stop_ack)
            .await
            .map(|_| ())
    }

    /// 切换运行模式；机器人确认后记住该模式，断线重连后自动恢复。
    pub async fn set_machine_mode(&self, mode: OperatingMode) -> Result<(), ControlError> {
        self.request("模式切换", Service::MachineMode, &MachineModeRequest::from(mode), |r: &MachineModeResponse| {
            r.mode_ack
        })
        .await?;
        self.mode_store.store(mode);
        info!("[控制门面] 运行模式已切换为 {}", mode);
        Ok(())
    }

    /// 管理员：机械臂指定轴归零。
    pub async fn zero_axis(&self, axis: ZerosetAxis) -> Result<(), ControlError> {
        self.request("轴归零", Service::AdminZeroset(axis), &ZerosetRequest { zero_set: 1 }, |r: &ZerosetResponse| {
            r.zero_set_ack
        })
        .await
        .map(|_| ())
    }

    /// 管理员：南瓜泵使能。
    pub async fn enable_pumpkin(&self, on: bool) -> Result<(), ControlError> {
        let request = PumpkinEnableRequest {
            pumpkin_cmd: u8::from(on),
        };
        self.request("南瓜泵操作", Service::PumpkinEnable, &request, |r: &PumpkinEnableResponse| r.pumpkin_ack)
            .await
            .map(|_| ())
    }

    // --- 话题 ---

    pub fn drive_chassis(&self, control: ChassisControl) -> Result<(), ControlError> {
        self.checked(control.validate())?;
        self.publish(Channel::Chassis, &control)
    }

    /// 按方向平移：`x_dir` / `y_dir` 取 -1、0、1，`speed_units` 为速度滑块数值。
    pub fn drive_direction(&self, x_dir: f64, y_dir: f64, speed_units: f64) -> Result<(), ControlError> {
        let speed = speed_units * self.scaling.linear_speed_per_unit;
        self.drive_chassis(ChassisControl {
            x_speed: x_dir * speed,
            y_speed: y_dir * speed,
            z_speed: 0.0,
        })
    }

    /// 原地旋转，向左为正。
    pub fn rotate(&self, direction: Direction, speed_units: f64) -> Result<(), ControlError> {
        let sign = match direction {
            Direction::Left => 1.0,
            Direction::Right => -1.0,
        };
        self.drive_chassis(ChassisControl {
            x_speed: 0.0,
            y_speed: 0.0,
            z_speed: sign * speed_units * self.scaling.rotation_deg_per_unit,
        })
    }

    pub fn stop_chassis(&self) -> Result<(), ControlError> {
        self.drive_chassis(ChassisControl::halt())
    }

    pub fn move_arm(&self, control: ArmControl) -> Result<(), ControlError> {
        self.checked(control.validate())?;
        self.publish(Channel::Arm, &control)
    }

    pub fn reset_arm(&self) -> Result<(), ControlError> {
        self.move_arm(ArmControl::reset())?;
        self.notify(NotificationLevel::Success, "已重置", "机械臂已归位");
        Ok(())
    }

    /// 泵开关。开启时 `pump_speed = flow_units × pump_speed_per_unit` (反转取负)，
    /// `pump_flud` 取配置值；关闭时三项全部为 0。
    pub fn set_pump(&self, on: bool, flow_units: f64, reverse: bool) -> Result<(), ControlError> {
        let control = if on {
            let sign = if reverse { -1.0 } else { 1.0 };
            PumpControl {
                pump_switch: 1,
                pump_speed: sign * flow_units * self.scaling.pump_speed_per_unit,
                pump_flud: self.scaling.pump_flud,
            }
        } else {
            PumpControl {
                pump_switch: 0,
                pump_speed: 0.0,
                pump_flud: 0.0,
            }
        };
        self.checked(control.validate())?;
        self.publish(Channel::Pump, &control)?;
        if on {
            self.notify(NotificationLevel::Info, "泵已开启", "可以调节流速和流量");
        } else {
            self.notify(NotificationLevel::Info, "泵已关闭", "");
        }
        Ok(())
    }

    // --- 管理员视图 ---

    pub fn logger(&self) -> &PacketLogger {
        self.connection.logger()
    }

    pub fn packet_logs(&self) -> Vec<PacketLogEntry> {
        self.logger().get_today_logs()
    }

    pub fn faults(&self, include_resolved: bool) -> Vec<FaultRecord> {
        self.logger().get_faults(include_resolved)
    }

    pub fn stats(&self) -> PacketStats {
        self.logger().get_stats()
    }

    pub fn resolve_fault(&self, id: &str) -> bool {
        self.logger().resolve_fault(id)
    }

    pub fn clear_today_logs(&self) {
        self.logger().clear_today_logs()
    }

    // --- 内部 ---

    async fn request<Req, Resp>(
        &self,
        label: &str,
        service: Service,
        request: &Req,
        ack_of: impl Fn(&Resp) -> u8,
    ) -> Result<Resp, ControlError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let name = service.name();
        let response: Resp = match self.connection.call(service, request).await {
            Ok(response) => response,
            Err(e) => {
                self.notify_call_error(&e);
                return Err(e.into());
            }
        };

        let ack = ack_of(&response);
        if ack == 1 {
            self.notify(NotificationLevel::Success, format!("{}成功", label), format!("{} 已确认", name));
            Ok(response)
        } else {
            warn!("[控制门面] {} 应答为 {}，操作未确认。", name, ack);
            self.notify(NotificationLevel::Warning, format!("{}失败", label), "操作未确认");
            Err(ControlError::Rejected { service: name, ack })
        }
    }

    fn publish<T: Serialize>(&self, channel: Channel, payload: &T) -> Result<(), ControlError> {
        if !self.connection.is_connected() {
            self.notify_call_error(&ConnectionError::NotConnected);
            return Err(ConnectionError::NotConnected.into());
        }
        self.connection.publish(channel, payload);
        Ok(())
    }

    fn checked(&self, validation: Result<(), RangeError>) -> Result<(), ControlError> {
        validation.map_err(|e| {
            self.notify(NotificationLevel::Error, "参数错误", e.to_string());
            ControlError::from(e)
        })
    }

    fn notify_call_error(&self, error: &ConnectionError) {
        match error {
            ConnectionError::NotConnected => {
                self.notify(NotificationLevel::Error, "未连接", "请先连接到ROS2服务器")
            }
            other => self.notify(NotificationLevel::Error, "操作失败", other.to_string()),
        }
    }

    fn notify(&self, level: NotificationLevel, title: impl Into<String>, description: impl Into<String>) {
        let _ = self.notifications.send(Notification::new(level, title, description));
    }
}

impl Drop for RobotControl {
    fn drop(&mut self) {
        self.event_forwarder.abort();
    }
}

/// 把连接事件中需要提示操作员的部分转换为提示消息。
async fn forward_connection_events(
    mut events: broadcast::Receiver<ConnectionEvent>,
    notifications: broadcast::Sender<Notification>,
) {
    loop {
        let notification = match events.recv().await {
            Ok(ConnectionEvent::ConnectionLost { address }) => Notification::new(
                NotificationLevel::Warning,
                "连接已断开",
                format!("与 {} 的连接意外断开，正在自动重连", address),
            ),
            Ok(ConnectionEvent::Reconnected { resumed_mode, .. }) => {
                let description = match resumed_mode {
                    Some(mode) => format!("连接已恢复，已恢复 {} 模式", mode),
                    None => "连接已恢复".to_string(),
                };
                Notification::new(NotificationLevel::Success, "连接已恢复", description)
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!("[控制门面] 连接事件积压，跳过了 {} 条。", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let _ = notifications.send(notification);
    }
}
