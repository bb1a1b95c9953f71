//! 通用枚举模块。
//!
//! 本模块定义控制面板与机器人端之间共享的枚举类型。线上载荷中这些值都是 `u8` 数字，
//! 枚举通过 `code()` / `from_code()` 与之互转；枚举本身以 snake_case 字符串序列化，
//! 用于配置文件、模式持久化与日志。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 机器运行模式，对应 `/machine_mode` 服务的 `mode_cmd`。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// 准备状态 / 紧急暂停 (`mode_cmd = 0`)。
    Idle,
    /// 手动模式 (`mode_cmd = 1`)。
    Manual,
    /// 半自动施工模式 (`mode_cmd = 2`)。
    #[serde(rename = "semiauto")]
    SemiAuto,
}

impl OperatingMode {
    /// 线上 `mode_cmd` 数值。
    pub fn code(self) -> u8 {
        match self {
            OperatingMode::Idle => 0,
            OperatingMode::Manual => 1,
            OperatingMode::SemiAuto => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OperatingMode::Idle),
            1 => Some(OperatingMode::Manual),
            2 => Some(OperatingMode::SemiAuto),
            _ => None,
        }
    }

    /// 持久化时使用的键值 (`idle` / `manual` / `semiauto`)。
    pub fn as_key(self) -> &'static str {
        match self {
            OperatingMode::Idle => "idle",
            OperatingMode::Manual => "manual",
            OperatingMode::SemiAuto => "semiauto",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "idle" => Some(OperatingMode::Idle),
            "manual" => Some(OperatingMode::Manual),
            "semiauto" => Some(OperatingMode::SemiAuto),
            _ => None,
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

/// 底盘/机械臂使能指令 (`motor_cmd`)。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MotorCommand {
    Disable,
    Enable,
    /// 紧急故障。
    Fault,
}

impl MotorCommand {
    pub fn code(self) -> u8 {
        match self {
            MotorCommand::Disable => 0,
            MotorCommand::Enable => 1,
            MotorCommand::Fault => 2,
        }
    }
}

/// `/stop` 服务的 `stop_cmd`。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopCommand {
    /// 清除 (不发送紧急情况)。
    Clear,
    /// 紧急停止。
    Emergency,
    /// 需要更换料筒。
    SwapMaterial,
}

impl StopCommand {
    pub fn code(self) -> u8 {
        match self {
            StopCommand::Clear => 0,
            StopCommand::Emergency => 1,
            StopCommand::SwapMaterial => 2,
        }
    }
}

/// 半自动施工方式：刮涂或辊涂。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BladeRoller {
    Blade,
    Roller,
}

impl BladeRoller {
    pub fn code(self) -> u8 {
        match self {
            BladeRoller::Blade => 0,
            BladeRoller::Roller => 1,
        }
    }
}

/// 半自动施工行进方向。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    pub fn code(self) -> u8 {
        match self {
            Direction::Left => 0,
            Direction::Right => 1,
        }
    }
}

/// 故障记录类别。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FaultCategory {
    /// 通信超时：服务调用在超时窗口内无响应。
    NoResponse,
    Error,
    Motor,
    Pump,
    Power,
    Arm,
    Chassis,
    Other,
}

impl FaultCategory {
    /// 管理界面上显示的中文标签。
    pub fn label(self) -> &'static str {
        match self {
            FaultCategory::NoResponse => "通信超时",
            FaultCategory::Error => "错误",
            FaultCategory::Motor => "电机故障",
            FaultCategory::Pump => "泵故障",
            FaultCategory::Power => "电源故障",
            FaultCategory::Arm => "机械臂故障",
            FaultCategory::Chassis => "底盘故障",
            FaultCategory::Other => "其他",
        }
    }
}

/// 通信包类型：需要响应的服务调用，或即发即弃的话题消息。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    Service,
    Topic,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PacketDirection {
    Sent,
    Received,
}
