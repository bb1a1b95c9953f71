//! 话题通道与服务目录。
//!
//! 机器人端 `web_connect` 包暴露的三个控制话题和全部服务在此登记，
//! 每一项都给出线上名称和 ROS 类型字符串，供 advertise / call_service 使用。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 即发即弃的控制话题。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Pump,
    Chassis,
    Arm,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Pump, Channel::Chassis, Channel::Arm];

    /// 话题名，例如 `/pump_control`。
    pub fn topic(self) -> &'static str {
        match self {
            Channel::Pump => "/pump_control",
            Channel::Chassis => "/chassis_control",
            Channel::Arm => "/arm_control",
        }
    }

    /// 话题的 ROS 消息类型。
    pub fn message_type(self) -> &'static str {
        match self {
            Channel::Pump => "web_connect/msg/Pump",
            Channel::Chassis => "web_connect/msg/Chassis",
            Channel::Arm => "web_connect/msg/Arm",
        }
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        Channel::ALL.into_iter().find(|c| c.topic() == topic)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

/// 管理员归零服务的轴号，只允许 5、6、7。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub struct ZerosetAxis(u8);

impl ZerosetAxis {
    pub const AXES: [u8; 3] = [5, 6, 7];

    pub fn new(axis: u8) -> Option<Self> {
        Self::AXES.contains(&axis).then_some(ZerosetAxis(axis))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ZerosetAxis {
    type Error = String;

    fn try_from(axis: u8) -> Result<Self, Self::Error> {
        ZerosetAxis::new(axis).ok_or_else(|| format!("不支持的归零轴号: {}", axis))
    }
}

impl From<ZerosetAxis> for u8 {
    fn from(axis: ZerosetAxis) -> u8 {
        axis.0
    }
}

/// 请求/响应式服务。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    /// 开机/关机 (`/connection_establish`)，同时用作连接验证往返。
    ConnectionEstablish,
    ChassisEnable,
    ArmEnable,
    SemiMode,
    Stop,
    MachineMode,
    /// 管理员：南瓜泵使能。
    PumpkinEnable,
    /// 管理员：机械臂指定轴归零 (`/admin_zeroset_{5,6,7}`)。
    AdminZeroset(ZerosetAxis),
}

impl Service {
    /// 线上服务名。
    pub fn name(&self) -> String {
        match self {
            Service::ConnectionEstablish => "/connection_establish".to_string(),
            Service::ChassisEnable => "/chassis_enable".to_string(),
            Service::ArmEnable => "/arm_enable".to_string(),
            Service::SemiMode => "/semi_mode".to_string(),
            Service::Stop => "/stop".to_string(),
            Service::MachineMode => "/machine_mode".to_string(),
            Service::PumpkinEnable => "/pumpkin_enable".to_string(),
            Service::AdminZeroset(axis) => format!("/admin_zeroset_{}", axis.get()),
        }
    }

    /// 服务的 ROS 类型字符串。
    pub fn service_type(&self) -> &'static str {
        match self {
            Service::ConnectionEstablish => "web_connect/srv/Establish",
            Service::ChassisEnable | Service::ArmEnable => "web_connect/srv/Enable",
            Service::SemiMode => "web_connect/srv/Semi",
            Service::Stop => "web_connect/srv/Stop",
            Service::MachineMode => "web_connect/srv/Mode",
            Service::PumpkinEnable => "web_connect/srv/Pumpkin",
            Service::AdminZeroset(_) => "web_connect/srv/Zeroset",
        }
    }

    /// 由线上服务名反查服务 (模拟端用来分派请求)。
    pub fn from_name(name: &str) -> Option<Self> {
        let fixed = match name {
            "/connection_establish" => Some(Service::ConnectionEstablish),
            "/chassis_enable" => Some(Service::ChassisEnable),
            "/arm_enable" => Some(Service::ArmEnable),
            "/semi_mode" => Some(Service::SemiMode),
            "/stop" => Some(Service::Stop),
            "/machine_mode" => Some(Service::MachineMode),
            "/pumpkin_enable" => Some(Service::PumpkinEnable),
            _ => None,
        };
        fixed.or_else(|| {
            name.strip_prefix("/admin_zeroset_")
                .and_then(|axis| axis.parse::<u8>().ok())
                .and_then(ZerosetAxis::new)
                .map(Service::AdminZeroset)
        })
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
