// control_panel/src/mode_store.rs

//! 运行模式存储。
//!
//! 机器人确认 `/machine_mode` 后，控制门面把模式写入存储；
//! 自动重连成功后，连接管理器读取它并重新下发。

use log::{debug, error, info};
use parking_lot::Mutex;
use robot_models::OperatingMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// "最近一次被机器人确认的运行模式" 的存储抽象。
pub trait ModeStore: Send + Sync {
    fn load(&self) -> Option<OperatingMode>;
    fn store(&self, mode: OperatingMode);
    fn clear(&self);
}

/// 仅保存在内存中的实现，进程退出即丢失。
#[derive(Default)]
pub struct MemoryModeStore {
    mode: Mutex<Option<OperatingMode>>,
}

impl MemoryModeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModeStore for MemoryModeStore {
    fn load(&self) -> Option<OperatingMode> {
        *self.mode.lock()
    }

    fn store(&self, mode: OperatingMode) {
        *self.mode.lock() = Some(mode);
    }

    fn clear(&self) {
        *self.mode.lock() = None;
    }
}

#[derive(Serialize, Deserialize)]
struct ModeFile {
    operating_mode: String,
}

/// 以 JSON 文件保存模式，例如 `{"operating_mode":"semiauto"}`。
///
/// 读写失败只记录日志；文件缺失、损坏或模式名无法识别都视为"没有记住的模式"。
pub struct JsonFileModeStore {
    path: PathBuf,
}

impl JsonFileModeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModeStore for JsonFileModeStore {
    fn load(&self) -> Option<OperatingMode> {
        if !self.path.exists() {
            return None;
        }
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                error!("[模式存储] 读取 '{}' 失败: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str::<ModeFile>(&content) {
            Ok(file) => {
                let mode = OperatingMode::from_key(&file.operating_mode);
                if mode.is_none() {
                    error!("[模式存储] 无法识别的运行模式 '{}'", file.operating_mode);
                }
                mode
            }
            Err(e) => {
                error!("[模式存储] 解析 '{}' 失败: {}", self.path.display(), e);
                None
            }
        }
    }

    fn store(&self, mode: OperatingMode) {
        let file = ModeFile {
            operating_mode: mode.as_key().to_string(),
        };
        let result = serde_json::to_string(&file)
            .map_err(|e| e.to_string())
            .and_then(|content| fs::write(&self.path, content).map_err(|e| e.to_string()));
        match result {
            Ok(()) => debug!("[模式存储] 已记录运行模式: {}", mode.as_key()),
            Err(e) => error!("[模式存储] 写入 '{}' 失败: {}", self.path.display(), e),
        }
    }

    fn clear(&self) {
        if self.path.exists() {
            match fs::remove_file(&self.path) {
                Ok(()) => info!("[模式存储] 已清除记录的运行模式。"),
                Err(e) => error!("[模式存储] 删除 '{}' 失败: {}", self.path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryModeStore::new();
        assert_eq!(store.load(), None);
        store.store(OperatingMode::SemiAuto);
        assert_eq!(store.load(), Some(OperatingMode::SemiAuto));
        store.clear();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn file_store_uses_mode_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileModeStore::new(dir.path().join("operating_mode.json"));
        assert_eq!(store.load(), None);

        store.store(OperatingMode::SemiAuto);
        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, r#"{"operating_mode":"semiauto"}"#);
        assert_eq!(store.load(), Some(OperatingMode::SemiAuto));

        store.clear();
        assert!(!store.path().exists());
        assert_eq!(store.load(), None);
    }

    #[test]
    fn unreadable_file_means_no_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operating_mode.json");
        fs::write(&path, r#"{"operating_mode":"turbo"}"#).unwrap();
        assert_eq!(JsonFileModeStore::new(&path).load(), None);

        fs::write(&path, "not json").unwrap();
        assert_eq!(JsonFileModeStore::new(&path).load(), None);
    }
}
