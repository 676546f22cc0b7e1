// FleetConsole/src/preferences.rs

//! 偏好设置存储。
//!
//! 一个以 JSON 文件为后端的简单键值存储，用于保存会话令牌和表格偏好 (每页条数、列可见性)。
//! 存储对值的结构不做任何假设，读写时由调用方指定类型。

use log::{debug, warn};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::ConsoleError;

/// 会话令牌的存储键。
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// JSON 文件键值存储。`path` 为 `None` 时只保存在内存中。
#[derive(Debug)]
pub struct PreferenceStore {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, Value>>,
}

impl PreferenceStore {
    /// 打开 (或新建) 指定路径的存储文件。文件不存在时得到空存储，首次写入时才创建文件。
    pub fn open(path: &Path) -> Result<Self, ConsoleError> {
        let values = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                ConsoleError::Preferences(format!("读取偏好设置文件 '{}' 失败: {}", path.display(), e))
            })?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    ConsoleError::Preferences(format!("解析偏好设置文件 '{}' 失败: {}", path.display(), e))
                })?
            }
        } else {
            debug!("[偏好设置] 文件 '{}' 不存在，使用空存储。", path.display());
            BTreeMap::new()
        };
        Ok(Self { path: Some(path.to_path_buf()), values: Mutex::new(values) })
    }

    /// 仅存在于内存中的存储。
    pub fn in_memory() -> Self {
        Self { path: None, values: Mutex::new(BTreeMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 读取并反序列化某个键的值。键不存在或类型不符时返回 `None`。
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.lock().get(key).cloned()?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("[偏好设置] 键 '{}' 的值与期望类型不符，已忽略: {}", key, e);
                None
            }
        }
    }

    /// 写入某个键的值并立即持久化。
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConsoleError> {
        let value = serde_json::to_value(value)
            .map_err(|e| ConsoleError::Preferences(format!("序列化键 '{}' 的值失败: {}", key, e)))?;
        let mut values = self.lock();
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    /// 删除某个键并立即持久化。键不存在时什么也不做。
    pub fn remove(&self, key: &str) -> Result<(), ConsoleError> {
        let mut values = self.lock();
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }

    pub fn session_token(&self) -> Option<String> {
        self.get(ACCESS_TOKEN_KEY)
    }

    pub fn set_session_token(&self, token: &str) -> Result<(), ConsoleError> {
        self.set(ACCESS_TOKEN_KEY, &token)
    }

    pub fn clear_session_token(&self) -> Result<(), ConsoleError> {
        self.remove(ACCESS_TOKEN_KEY)
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> Result<(), ConsoleError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    ConsoleError::Preferences(format!("创建偏好设置目录 '{}' 失败: {}", parent.display(), e))
                })?;
            }
        }
        let content = serde_json::to_string_pretty(values)
            .map_err(|e| ConsoleError::Preferences(format!("序列化偏好设置失败: {}", e)))?;
        fs::write(path, content).map_err(|e| {
            ConsoleError::Preferences(format!("写入偏好设置文件 '{}' 失败: {}", path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs").join("preferences.json");

        let store = PreferenceStore::open(&path).expect("打开偏好设置失败");
        assert_eq!(store.session_token(), None);
        store.set_session_token("tok-123").expect("保存令牌失败");

        let reopened = PreferenceStore::open(&path).expect("重新打开偏好设置失败");
        assert_eq!(reopened.session_token().as_deref(), Some("tok-123"));

        reopened.clear_session_token().unwrap();
        assert_eq!(PreferenceStore::open(&path).unwrap().session_token(), None);
    }

    #[test]
    /// 测试类型不符的值被当作不存在，而不是报错。
    fn test_mismatched_type_reads_as_none() {
        let store = PreferenceStore::in_memory();
        store.set("devices.page_size", &"twenty").unwrap();
        assert_eq!(store.get::<usize>("devices.page_size"), None);

        store.set("devices.page_size", &25usize).unwrap();
        assert_eq!(store.get::<usize>("devices.page_size"), Some(25));
    }

    #[test]
    fn test_corrupted_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        fs::write(&path, "[not a map").unwrap();
        assert!(matches!(PreferenceStore::open(&path), Err(ConsoleError::Preferences(_))));
    }
}
