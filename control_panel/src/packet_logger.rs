// control_panel/src/packet_logger.rs

//! 通信包日志与故障台账。
//!
//! 记录当天发出的每一个话题消息和服务调用，以及最近若干天 (默认 7 天) 的故障记录。
//! 服务调用在发出时启动一个一次性计时器 (默认 5 秒)，超时仍未收到响应则把该条目标记为
//! 无响应，并且只生成一条 `no_response` 故障记录。计时器只负责报告，不会中止调用本身。
//!
//! 所有状态都在同一把锁内"检查后执行"，计时器回调与 `log_response` 交错执行时，
//! 先拿到锁的一方生效，另一方成为空操作。
//!
//! 配置了持久化文件时，修改只把日志标记为待写入；在 Tokio 运行时中由后台任务合并后
//! 经 `spawn_blocking` 写盘，记录调用本身不做文件 I/O。运行时之外直接同步写入。

use chrono::{DateTime, Duration as ChronoDuration, Local};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use robot_models::{FaultCategory, PacketDirection, PacketKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::PacketLogConfig;
use crate::event::EVENT_CHANNEL_CAPACITY;

/// 后台写盘前合并连续修改的时间。
const FLUSH_DELAY: Duration = Duration::from_millis(200);

/// 条目上的错误标记。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PacketError {
    /// 超时窗口内没有收到响应。
    NoResponse,
    /// 收到了响应，但 `result` 为 false。
    ResponseFailed,
}

impl PacketError {
    pub fn label(self) -> &'static str {
        match self {
            PacketError::NoResponse => "无响应",
            PacketError::ResponseFailed => "响应失败",
        }
    }
}

/// 一条通信包记录。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PacketLogEntry {
    pub id: String,
    pub timestamp: DateTime<Local>,
    pub kind: PacketKind,
    /// 话题名或服务名。
    pub name: String,
    pub direction: PacketDirection,
    pub payload: Value,
    /// 话题消息创建即为 true；服务调用在收到响应后变为 true。
    pub response_received: bool,
    /// 仅在超时窗口内收到响应时记录。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PacketError>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FaultRecord {
    pub id: String,
    pub timestamp: DateTime<Local>,
    pub category: FaultCategory,
    /// 故障来源，例如服务名 `/chassis_enable`。
    pub source: String,
    pub message: String,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Local>>,
}

/// 统计信息，每次查询时根据当前日志重新计算。
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketStats {
    /// 今日发出的包数量。
    pub total_sent: usize,
    /// 今日被标记为无响应的服务调用数量。
    pub no_response_count: usize,
    /// 窗口内收到响应的调用的平均延迟 (毫秒，取整)。
    pub avg_response_ms: u64,
    pub unresolved_faults: usize,
}

/// 持久化文件格式。
#[derive(Serialize, Deserialize, Default)]
struct PersistedLog {
    #[serde(default)]
    logs: Vec<PacketLogEntry>,
    #[serde(default)]
    faults: Vec<FaultRecord>,
}

#[derive(Default)]
struct LoggerState {
    logs: Vec<PacketLogEntry>,
    faults: Vec<FaultRecord>,
    /// 等待响应的服务调用及其超时计时器。
    pending: HashMap<String, JoinHandle<()>>,
}

impl LoggerState {
    /// 按当前时间丢弃非今日的包记录和超过保留期的故障记录，返回丢弃的条数。
    fn purge(&mut self, now: DateTime<Local>, fault_retention_days: i64) -> usize {
        let today = now.date_naive();
        let before = self.logs.len() + self.faults.len();

        self.logs.retain(|entry| entry.timestamp.date_naive() == today);
        let cutoff = now - ChronoDuration::days(fault_retention_days);
        self.faults.retain(|fault| fault.timestamp > cutoff);

        let logs = &self.logs;
        self.pending.retain(|id, timer| {
            let alive = logs.iter().any(|entry| &entry.id == id);
            if !alive {
                timer.abort();
            }
            alive
        });

        before - (self.logs.len() + self.faults.len())
    }
}

struct LoggerInner {
    config: PacketLogConfig,
    state: Mutex<LoggerState>,
    /// 串行化持久化写入，避免旧快照覆盖新快照。
    persist_lock: Mutex<()>,
    /// 有尚未写盘的修改。
    dirty: AtomicBool,
    flush_signal: Arc<Notify>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    fault_tx: broadcast::Sender<FaultRecord>,
}

impl LoggerInner {
    /// 把待写入的修改同步写盘。
    fn flush(&self) {
        let Some(path) = self.config.storage_path.as_deref() else {
            return;
        };
        let _guard = self.persist_lock.lock();
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return;
        }
        let snapshot = {
            let state = self.state.lock();
            let keep_from = state.logs.len().saturating_sub(self.config.max_persisted_entries);
            PersistedLog {
                logs: state.logs[keep_from..].to_vec(),
                faults: state.faults.clone(),
            }
        };
        if let Err(e) = write_persisted(path, &snapshot) {
            error!("[包日志] 保存日志到 '{}' 失败: {}", path.display(), e);
        }
    }
}

impl Drop for LoggerInner {
    fn drop(&mut self) {
        // 唤醒后台任务使其退出，并补写最后的修改
        self.flush_signal.notify_one();
        self.flush();
    }
}

/// 通信包日志记录器。克隆得到的句柄共享同一份日志。
#[derive(Clone)]
pub struct PacketLogger {
    inner: Arc<LoggerInner>,
}

impl PacketLogger {
    /// 创建记录器；配置了持久化文件时先从文件恢复，随后立即清理过期记录。
    pub fn new(config: PacketLogConfig) -> Self {
        let mut state = LoggerState::default();
        if let Some(path) = config.storage_path.as_deref() {
            if let Some(persisted) = load_persisted(path) {
                state.logs = persisted.logs;
                state.faults = persisted.faults;
            }
        }
        let purged = state.purge(Local::now(), config.fault_retention_days);
        if purged > 0 {
            info!("[包日志] 启动时清理了 {} 条过期记录。", purged);
        }

        let (fault_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let logger = Self {
            inner: Arc::new(LoggerInner {
                config,
                state: Mutex::new(state),
                persist_lock: Mutex::new(()),
                dirty: AtomicBool::new(false),
                flush_signal: Arc::new(Notify::new()),
                flusher: Mutex::new(None),
                fault_tx,
            }),
        };
        if purged > 0 {
            logger.schedule_persist();
        }
        logger
    }

    /// 只保存在内存中的记录器 (测试与无盘场景)。
    pub fn in_memory() -> Self {
        Self::new(PacketLogConfig::default())
    }

    /// 记录一个发出的包并返回其日志 id。
    ///
    /// `expect_response` 为 true 时启动无响应计时器；当前线程不在 Tokio 运行时中时
    /// 无法计时，只记录一条警告。
    pub fn log_send(&self, kind: PacketKind, name: &str, payload: Value, expect_response: bool) -> String {
        let id = Uuid::new_v4().to_string();
        let entry = PacketLogEntry {
            id: id.clone(),
            timestamp: Local::now(),
            kind,
            name: name.to_string(),
            direction: PacketDirection::Sent,
            payload,
            response_received: !expect_response,
            response_latency_ms: None,
            response: None,
            error: None,
        };

        {
            let mut state = self.inner.state.lock();
            state.logs.push(entry);
            if expect_response {
                if let Some(timer) = self.arm_response_timer(&id, name) {
                    state.pending.insert(id.clone(), timer);
                }
            }
        }
        debug!("[包日志] 记录发送: {} (id: {}, 等待响应: {})", name, id, expect_response);
        self.schedule_persist();
        id
    }

    fn arm_response_timer(&self, id: &str, name: &str) -> Option<JoinHandle<()>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("[包日志] 不在异步运行时中，无法为 {} 启动无响应计时器。", name);
                return None;
            }
        };
        let weak: Weak<LoggerInner> = Arc::downgrade(&self.inner);
        let timeout = self.inner.config.response_timeout();
        let id = id.to_string();
        let name = name.to_string();
        Some(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                PacketLogger { inner }.mark_no_response(&id, &name);
            }
        }))
    }

    /// 计时器到期：仅当该 id 仍在等待中且尚未收到响应时生效。
    fn mark_no_response(&self, id: &str, name: &str) {
        let fault = {
            let mut state = self.inner.state.lock();
            if state.pending.remove(id).is_none() {
                return;
            }
            match state.logs.iter_mut().find(|entry| entry.id == id) {
                Some(entry) if !entry.response_received => entry.error = Some(PacketError::NoResponse),
                _ => return,
            }
            let fault = new_fault(FaultCategory::NoResponse, name, format!("服务 {} 无响应", name));
            state.faults.push(fault.clone());
            fault
        };
        warn!("[包日志] 服务 {} 在 {} ms 内无响应 (id: {})", name, self.inner.config.response_timeout_ms, id);
        self.schedule_persist();
        let _ = self.inner.fault_tx.send(fault);
    }

    /// 记录服务响应。
    ///
    /// 未知 id 或已经记录过响应的 id 静默忽略。超时之后才到达的响应只把条目标记为已收到，
    /// 保留无响应标记，也不记录延迟，不会产生新的故障。
    pub fn log_response(&self, id: &str, response: Value, success: bool) {
        {
            let mut state = self.inner.state.lock();
            let in_window = match state.pending.remove(id) {
                Some(timer) => {
                    timer.abort();
                    true
                }
                None => false,
            };
            let Some(entry) = state.logs.iter_mut().find(|entry| entry.id == id) else {
                debug!("[包日志] 忽略未知 id 的响应: {}", id);
                return;
            };
            if entry.response_received {
                debug!("[包日志] 忽略重复响应: {}", id);
                return;
            }

            entry.response_received = true;
            entry.response = Some(response);
            if entry.error == Some(PacketError::NoResponse) {
                info!("[包日志] {} 的响应在超时后到达 (id: {})", entry.name, id);
            } else {
                if in_window {
                    let elapsed = Local::now() - entry.timestamp;
                    entry.response_latency_ms = Some(elapsed.num_milliseconds().max(0) as u64);
                }
                if !success {
                    entry.error = Some(PacketError::ResponseFailed);
                }
            }
        }
        self.schedule_persist();
    }

    /// 新增一条未解决的故障记录并广播给订阅者。
    pub fn add_fault(&self, category: FaultCategory, source: &str, message: impl Into<String>) -> FaultRecord {
        let fault = new_fault(category, source, message.into());
        self.inner.state.lock().faults.push(fault.clone());
        warn!("[包日志] 新故障 [{}] {}: {}", category.label(), source, fault.message);
        self.schedule_persist();
        let _ = self.inner.fault_tx.send(fault.clone());
        fault
    }

    /// 标记故障已解决；不存在或已解决时返回 false。
    pub fn resolve_fault(&self, id: &str) -> bool {
        let resolved = {
            let mut state = self.inner.state.lock();
            match state.faults.iter_mut().find(|fault| fault.id == id && !fault.resolved) {
                Some(fault) => {
                    fault.resolved = true;
                    fault.resolved_at = Some(Local::now());
                    true
                }
                None => false,
            }
        };
        if resolved {
            self.schedule_persist();
        }
        resolved
    }

    pub fn get_today_logs(&self) -> Vec<PacketLogEntry> {
        let today = Local::now().date_naive();
        self.inner
            .state
            .lock()
            .logs
            .iter()
            .filter(|entry| entry.timestamp.date_naive() == today)
            .cloned()
            .collect()
    }

    pub fn get_faults(&self, include_resolved: bool) -> Vec<FaultRecord> {
        self.inner
            .state
            .lock()
            .faults
            .iter()
            .filter(|fault| include_resolved || !fault.resolved)
            .cloned()
            .collect()
    }

    pub fn get_stats(&self) -> PacketStats {
        let today = Local::now().date_naive();
        let state = self.inner.state.lock();
        let sent: Vec<&PacketLogEntry> = state
            .logs
            .iter()
            .filter(|entry| entry.timestamp.date_naive() == today && entry.direction == PacketDirection::Sent)
            .collect();

        let latencies: Vec<u64> = sent.iter().filter_map(|entry| entry.response_latency_ms).collect();
        let avg_response_ms = if latencies.is_empty() {
            0
        } else {
            let total: u64 = latencies.iter().sum();
            (total as f64 / latencies.len() as f64).round() as u64
        };

        PacketStats {
            total_sent: sent.len(),
            no_response_count: sent
                .iter()
                .filter(|entry| entry.error == Some(PacketError::NoResponse))
                .count(),
            avg_response_ms,
            unresolved_faults: state.faults.iter().filter(|fault| !fault.resolved).count(),
        }
    }

    /// 清空今日的包记录 (故障记录不受影响)。
    pub fn clear_today_logs(&self) {
        {
            let mut state = self.inner.state.lock();
            let today = Local::now().date_naive();
            state.logs.retain(|entry| entry.timestamp.date_naive() != today);
            for (_, timer) in state.pending.drain() {
                timer.abort();
            }
        }
        info!("[包日志] 已清空今日通信记录。");
        self.schedule_persist();
    }

    /// 立即执行一次过期清理。
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Local::now())
    }

    pub(crate) fn purge_expired_at(&self, now: DateTime<Local>) -> usize {
        let purged = self
            .inner
            .state
            .lock()
            .purge(now, self.inner.config.fault_retention_days);
        if purged > 0 {
            info!("[包日志] 清理了 {} 条过期记录。", purged);
            self.schedule_persist();
        }
        purged
    }

    /// 启动后台定期清理任务；记录器的所有句柄被释放后任务自行结束。
    pub fn spawn_retention_sweep(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.retention_sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // interval 的第一次 tick 立即完成，构造时已经清理过
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => {
                        PacketLogger { inner }.purge_expired();
                    }
                    None => break,
                }
            }
        })
    }

    /// 订阅新增故障。
    pub fn subscribe_faults(&self) -> broadcast::Receiver<FaultRecord> {
        self.inner.fault_tx.subscribe()
    }

    /// 立即把尚未写盘的修改写入持久化文件 (阻塞)。退出前调用。
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// 撤销一条最终没有发出的记录，连同其计时器。
    pub(crate) fn discard(&self, id: &str) {
        let removed = {
            let mut state = self.inner.state.lock();
            if let Some(timer) = state.pending.remove(id) {
                timer.abort();
            }
            let before = state.logs.len();
            state.logs.retain(|entry| entry.id != id);
            state.logs.len() != before
        };
        if removed {
            debug!("[包日志] 撤销未发出的记录: {}", id);
            self.schedule_persist();
        }
    }

    fn schedule_persist(&self) {
        if self.inner.config.storage_path.is_none() {
            return;
        }
        self.inner.dirty.store(true, Ordering::SeqCst);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                self.ensure_flusher(&runtime);
                self.inner.flush_signal.notify_one();
            }
            Err(_) => self.inner.flush(),
        }
    }

    fn ensure_flusher(&self, runtime: &tokio::runtime::Handle) {
        let mut flusher = self.inner.flusher.lock();
        if flusher.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let signal = self.inner.flush_signal.clone();
        *flusher = Some(runtime.spawn(async move {
            loop {
                signal.notified().await;
                tokio::time::sleep(FLUSH_DELAY).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = tokio::task::spawn_blocking(move || inner.flush()).await {
                    error!("[包日志] 后台写盘任务异常结束: {}", e);
                }
            }
            debug!("[包日志] 后台写盘任务结束。");
        }));
    }
}

fn new_fault(category: FaultCategory, source: &str, message: String) -> FaultRecord {
    FaultRecord {
        id: format!("fault-{}", Uuid::new_v4()),
        timestamp: Local::now(),
        category,
        source: source.to_string(),
        message,
        resolved: false,
        resolved_at: None,
    }
}

fn load_persisted(path: &Path) -> Option<PersistedLog> {
    if !path.exists() {
        return None;
    }
    let parsed = fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|content| serde_json::from_str::<PersistedLog>(&content).map_err(|e| e.to_string()));
    match parsed {
        Ok(persisted) => {
            info!(
                "[包日志] 从 '{}' 恢复了 {} 条通信记录和 {} 条故障记录。",
                path.display(),
                persisted.logs.len(),
                persisted.faults.len()
            );
            Some(persisted)
        }
        Err(e) => {
            error!("[包日志] 加载日志文件 '{}' 失败: {}，将从空日志开始。", path.display(), e);
            None
        }
    }
}

fn write_persisted(path: &Path, snapshot: &PersistedLog) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
    }
    let content = serde_json::to_string(snapshot).map_err(|e| e.to_string())?;
    fs::write(path, content).map_err(|e| e.to_string())
}
