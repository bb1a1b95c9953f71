//! 模拟端配置。
//!
//! 模拟端没有配置文件，参数全部来自环境变量，便于在台架脚本中直接覆盖。

use log::{info, warn};
use std::env;
use std::time::Duration;

/// 默认监听地址 (与机器人端 rosbridge 的默认端口一致)。
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9090";
/// 覆盖监听地址的环境变量。
pub const LISTEN_ADDR_ENV: &str = "ROBOT_SIM_ADDR";
/// 为所有服务应答增加固定延迟 (毫秒) 的环境变量。
pub const RESPONSE_DELAY_ENV: &str = "ROBOT_SIM_RESPONSE_DELAY_MS";

#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub listen_addr: String,
    /// 每次服务应答前的等待时间，用于模拟慢速机器人。
    pub response_delay: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            response_delay: Duration::ZERO,
        }
    }
}

impl SimConfig {
    /// 从环境变量读取配置，未设置或无法解析的项使用默认值。
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup(LISTEN_ADDR_ENV) {
            info!("[模拟端配置] 使用 {} 指定的监听地址: {}", LISTEN_ADDR_ENV, addr);
            config.listen_addr = addr;
        }
        if let Some(raw) = lookup(RESPONSE_DELAY_ENV) {
            match raw.parse::<u64>() {
                Ok(ms) => config.response_delay = Duration::from_millis(ms),
                Err(e) => warn!("[模拟端配置] 忽略无效的 {}='{}': {}", RESPONSE_DELAY_ENV, raw, e),
            }
        }
        config
    }
}
