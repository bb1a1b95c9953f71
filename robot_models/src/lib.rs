//! `robot_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了施工机器人控制面板与机器人端 rosbridge 服务之间共享的数据结构，
//! 被 `control_panel` (控制核心) 与 `robot_sim` (机器人模拟端) 共同使用。
//!
//! 主要包含：
//! - **话题/服务载荷 (`ws_payloads`)**: 泵、底盘、机械臂话题消息，以及开机、使能、半自动、
//!   停止、机器模式、管理员归零等服务的请求/响应结构体。
//! - **通用枚举 (`enums`)**: 运行模式、电机指令、停止指令、故障类别、包类型等。
//! - **通道与服务目录 (`catalog`)**: 话题名/服务名与 ROS 类型字符串的对应关系。
//!
//! 所有模型都派生 `Serialize`/`Deserialize`/`Debug`/`Clone`，字段名与机器人端
//! `web_connect` 包中的 msg/srv 定义保持一致。

pub mod catalog;
pub mod enums;
pub mod ws_payloads;

pub use catalog::{Channel, Service};
pub use enums::{
    BladeRoller, Direction, FaultCategory, MotorCommand, OperatingMode, PacketDirection,
    PacketKind, StopCommand,
};

use thiserror::Error;

/// 载荷字段超出其文档约定范围时返回的错误。
#[derive(Error, Debug, Clone, PartialEq)]
#[error("字段 `{field}` 的取值 {value} 超出范围 [{min}, {max}]")]
pub struct RangeError {
    /// 出错的字段名 (与线上字段名一致)。
    pub field: &'static str,
    /// 实际取值。
    pub value: f64,
    /// 允许的最小值。
    pub min: f64,
    /// 允许的最大值。
    pub max: f64,
}

/// 检查 `value` 是否落在闭区间 `[min, max]` 内 (NaN 视为越界)。
pub(crate) fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), RangeError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(RangeError { field, value, min, max })
    }
}
