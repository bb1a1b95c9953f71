// robot_models/src/ws_payloads.rs

//! 话题消息与服务请求/响应载荷。
//!
//! 字段名、取值含义与机器人端 `web_connect` 的 msg/srv 定义一一对应，
//! 序列化后即为 rosbridge `publish.msg` / `call_service.args` / `service_response.values` 的内容。

use serde::{Deserialize, Serialize};

use crate::enums::{BladeRoller, Direction, MotorCommand, OperatingMode, StopCommand};
use crate::{check_range, RangeError};

/// 泵转速绝对值上限 (ml/s)，符号表示方向。
pub const PUMP_SPEED_MAX: f64 = 200.0;
/// 单次注液量绝对值上限 (ml)。
pub const PUMP_FLUD_MAX: f64 = 12.0;
pub const ARM_YAW_LIMIT: f32 = 90.0;
pub const ARM_ROLL_LIMIT: f32 = 180.0;
/// 机械臂升降行程上限 (cm)。
pub const ARM_UPDOWN_MAX: f32 = 8.0;
pub const SEMI_WIDTH_MAX_MM: f32 = 2600.0;
pub const SEMI_LENGTH_MAX_MM: f32 = 20000.0;
pub const SEMI_THICKNESS_MAX_MM: f32 = 20.0;

// --- 话题消息 ---

/// `/pump_control` 泵控制消息。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PumpControl {
    /// 0: 关, 1: 开。
    pub pump_switch: u8,
    /// 转速，绝对值 0-200，符号表示方向。
    pub pump_speed: f64,
    /// 注液量，绝对值 0-12。
    pub pump_flud: f64,
}

impl PumpControl {
    pub fn validate(&self) -> Result<(), RangeError> {
        check_range("pump_switch", f64::from(self.pump_switch), 0.0, 1.0)?;
        check_range("pump_speed", self.pump_speed, -PUMP_SPEED_MAX, PUMP_SPEED_MAX)?;
        check_range("pump_flud", self.pump_flud, -PUMP_FLUD_MAX, PUMP_FLUD_MAX)
    }
}

/// `/chassis_control` 底盘速度消息。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ChassisControl {
    /// m/s
    pub x_speed: f64,
    /// m/s
    pub y_speed: f64,
    /// °/s
    pub z_speed: f64,
}

impl ChassisControl {
    /// 全零速度，松开方向键时发送。
    pub fn halt() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), RangeError> {
        check_range("x_speed", self.x_speed, f64::MIN, f64::MAX)?;
        check_range("y_speed", self.y_speed, f64::MIN, f64::MAX)?;
        check_range("z_speed", self.z_speed, f64::MIN, f64::MAX)
    }
}

/// `/arm_control` 机械臂姿态消息。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ArmControl {
    /// -90 ~ 90
    pub yaw_angle: f32,
    /// -180 ~ 180
    pub roll_angle: f32,
    /// 0 ~ 8 cm
    pub updown_angle: f32,
    /// 0/1
    pub arm_reset: u8,
}

impl ArmControl {
    /// 复位姿态：偏航、翻滚归零，升降回到中位，并置复位标志。
    pub fn reset() -> Self {
        Self {
            yaw_angle: 0.0,
            roll_angle: 0.0,
            updown_angle: ARM_UPDOWN_MAX / 2.0,
            arm_reset: 1,
        }
    }

    pub fn validate(&self) -> Result<(), RangeError> {
        let yaw = f64::from(ARM_YAW_LIMIT);
        let roll = f64::from(ARM_ROLL_LIMIT);
        check_range("yaw_angle", f64::from(self.yaw_angle), -yaw, yaw)?;
        check_range("roll_angle", f64::from(self.roll_angle), -roll, roll)?;
        check_range("updown_angle", f64::from(self.updown_angle), 0.0, f64::from(ARM_UPDOWN_MAX))?;
        check_range("arm_reset", f64::from(self.arm_reset), 0.0, 1.0)
    }
}

// --- 服务请求/响应 ---

/// `/connection_establish` 请求。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstablishRequest {
    /// 0: 关机, 1: 开机。
    pub establish: u8,
}

impl EstablishRequest {
    pub fn power(on: bool) -> Self {
        Self { establish: u8::from(on) }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstablishResponse {
    pub establish_ack: u8,
}

/// `/chassis_enable` 与 `/arm_enable` 共用的使能请求。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnableRequest {
    /// 0: 未使能, 1: 使能, 2: 紧急故障。
    pub motor_cmd: u8,
}

impl From<MotorCommand> for EnableRequest {
    fn from(cmd: MotorCommand) -> Self {
        Self { motor_cmd: cmd.code() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChassisEnableResponse {
    pub motor_ack: u8,
    /// 底盘当前状态 (0/1/2)，旧固件不回传。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmEnableResponse {
    pub arm_ack: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<u8>,
}

/// `/semi_mode` 半自动施工参数。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SemiModeRequest {
    /// 0: 刮涂, 1: 辊涂。
    pub blade_roller: u8,
    /// 0: 向左, 1: 向右。
    pub direction: u8,
    /// 0-2600 mm
    pub width: f32,
    /// 0-20000 mm
    pub length: f32,
    /// 0-20 mm
    pub thickness: f32,
}

impl SemiModeRequest {
    pub fn new(blade_roller: BladeRoller, direction: Direction, width: f32, length: f32, thickness: f32) -> Self {
        Self {
            blade_roller: blade_roller.code(),
            direction: direction.code(),
            width,
            length,
            thickness,
        }
    }

    pub fn validate(&self) -> Result<(), RangeError> {
        check_range("blade_roller", f64::from(self.blade_roller), 0.0, 1.0)?;
        check_range("direction", f64::from(self.direction), 0.0, 1.0)?;
        check_range("width", f64::from(self.width), 0.0, f64::from(SEMI_WIDTH_MAX_MM))?;
        check_range("length", f64::from(self.length), 0.0, f64::from(SEMI_LENGTH_MAX_MM))?;
        check_range("thickness", f64::from(self.thickness), 0.0, f64::from(SEMI_THICKNESS_MAX_MM))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemiModeResponse {
    /// 0: 执行失败, 1: 确认收到。
    pub ack: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopRequest {
    /// 0: 清除, 1: 紧急情况, 2: 需要更换料筒。
    pub stop_cmd: u8,
}

impl From<StopCommand> for StopRequest {
    fn from(cmd: StopCommand) -> Self {
        Self { stop_cmd: cmd.code() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopResponse {
    pub stop_ack: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineModeRequest {
    /// 0: 准备状态/紧急暂停, 1: 手动模式, 2: 半自动。
    pub mode_cmd: u8,
}

impl From<OperatingMode> for MachineModeRequest {
    fn from(mode: OperatingMode) -> Self {
        Self { mode_cmd: mode.code() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineModeResponse {
    pub mode_ack: u8,
}

/// `/admin_zeroset_{5,6,7}` 归零请求 (仅供出厂测试)。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZerosetRequest {
    pub zero_set: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZerosetResponse {
    pub zero_set_ack: u8,
}

/// `/pumpkin_enable` 管理员请求。
///
/// 字段名与类型名仿照 `/chassis_enable` 的形状推定，尚未与机器人固件核对。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpkinEnableRequest {
    /// 0: 关闭, 1: 开启。
    pub pumpkin_cmd: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpkinEnableResponse {
    pub pumpkin_ack: u8,
}
