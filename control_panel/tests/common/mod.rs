// control_panel/tests/common/mod.rs

//! 集成测试共用的装配与等待工具。

#![allow(dead_code)]

use control_panel::config::{ConnectionConfig, PacketLogConfig};
use control_panel::{ConnectionEvent, ConnectionManager, MemoryModeStore, ModeStore, PacketLogger};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 缩短到毫秒级的连接参数。
pub fn fast_connection_config() -> ConnectionConfig {
    ConnectionConfig {
        connect_timeout_ms: 1_000,
        verify_timeout_ms: 500,
        reconnect_interval_ms: 200,
        mode_restore_delay_ms: 50,
    }
}

pub fn fast_logger() -> PacketLogger {
    PacketLogger::new(PacketLogConfig {
        response_timeout_ms: 200,
        ..PacketLogConfig::default()
    })
}

pub struct Harness {
    pub manager: ConnectionManager,
    pub mode_store: Arc<MemoryModeStore>,
    /// 监听器收到的全部通知，按顺序。
    pub notifications: Arc<Mutex<Vec<bool>>>,
}

pub fn harness() -> Harness {
    init_test_logger();
    let mode_store = Arc::new(MemoryModeStore::new());
    let store: Arc<dyn ModeStore> = mode_store.clone();
    let manager = ConnectionManager::new(fast_connection_config(), fast_logger(), store);
    let notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = notifications.clone();
    // 测试期间不注销
    let _handle = manager.add_connection_listener(move |connected| sink.lock().push(connected));
    Harness {
        manager,
        mode_store,
        notifications,
    }
}

impl Harness {
    pub fn seen(&self) -> Vec<bool> {
        self.notifications.lock().clone()
    }
}

pub async fn next_event(events: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(WAIT_LIMIT, events.recv())
        .await
        .expect("等待连接事件超时")
        .expect("连接事件通道已关闭")
}

/// 轮询直到条件成立，超过 5 秒则失败。
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(WAIT_LIMIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "等待超时: {}", what);
}

pub async fn within<F: Future>(what: &str, future: F) -> F::Output {
    tokio::time::timeout(WAIT_LIMIT, future)
        .await
        .unwrap_or_else(|_| panic!("等待超时: {}", what))
}
