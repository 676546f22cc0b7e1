// FleetConsole/src/config.rs

//! `FleetConsole` 控制台配置管理模块。
//!
//! 本模块定义控制台运行所需的配置参数 (`ConsoleConfig`)，
//! 并提供从 JSON 配置文件加载、保存配置以及生成默认配置的功能。
//! 配置文件不存在时会自动写入一份默认配置，便于用户在此基础上修改。

use common_models::enums::ChannelKind;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::ConsoleError;

/// 各逻辑频道的 WebSocket 端点。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ChannelEndpoints {
    pub controller: String,
    pub provisioning: String,
    pub firmware: String,
    pub security: String,
}

impl ChannelEndpoints {
    /// 取得指定频道的端点 URL。
    pub fn endpoint_for(&self, kind: ChannelKind) -> &str {
        match kind {
            ChannelKind::Controller => &self.controller,
            ChannelKind::Provisioning => &self.provisioning,
            ChannelKind::Firmware => &self.firmware,
            ChannelKind::Security => &self.security,
        }
    }
}

impl Default for ChannelEndpoints {
    fn default() -> Self {
        Self {
            controller: "ws://localhost:16002/api/v1/ws".to_string(),
            provisioning: "ws://localhost:16005/api/v1/ws".to_string(),
            firmware: "ws://localhost:16004/api/v1/ws".to_string(),
            security: "ws://localhost:16001/api/v1/ws".to_string(),
        }
    }
}

/// 防抖搜索相关参数。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// 输入停止变化多久后才真正发出搜索命令，单位为毫秒。
    pub debounce_ms: u64,
    /// 序列号搜索的最小输入长度。
    pub serial_min_length: usize,
    /// 订阅者搜索的最小输入长度。
    pub subscriber_min_length: usize,
    /// 位置 (地址补全) 搜索的最小输入长度。
    pub location_min_length: usize,
}

impl SearchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            serial_min_length: 2,
            subscriber_min_length: 2,
            location_min_length: 3,
        }
    }
}

/// 控制台配置，对应配置文件 (`fleet_console.json`) 中的内容。
///
/// 所有字段都带有默认值，配置文件中缺失的字段会使用默认值补齐。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConsoleConfig {
    /// 各频道的 WebSocket 端点。
    pub endpoints: ChannelEndpoints,
    /// 防抖搜索参数。
    pub search: SearchConfig,
    /// 日志级别，例如 `"info"`、`"debug"`。
    pub log_level: String,
    /// 偏好设置 (会话令牌、表格偏好) 的存储文件路径。
    pub preferences_path: PathBuf,
    /// 主动关闭连接时等待关闭握手完成的最长时间，单位为毫秒。
    pub close_grace_ms: u64,
}

impl ConsoleConfig {
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            endpoints: ChannelEndpoints::default(),
            search: SearchConfig::default(),
            log_level: "info".to_string(),
            preferences_path: PathBuf::from(".").join("config").join("preferences.json"),
            close_grace_ms: 1000,
        }
    }
}

/// 默认配置文件路径：当前工作目录下的 `config/fleet_console.json`。
pub fn default_config_path() -> PathBuf {
    PathBuf::from(".").join("config").join("fleet_console.json")
}

/// 配置的来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// 从已有的配置文件读取。
    File,
    /// 配置文件不存在，已写入一份默认配置。
    CreatedDefault,
}

/// 加载控制台配置。
///
/// 配置文件存在时读取并解析；不存在时生成默认配置、写入该路径并返回。
/// 调用时日志服务可能尚未初始化，调用方可根据返回的 [`ConfigSource`] 补记日志。
///
/// # 返回值
/// * `Err(ConsoleError::Config)`: 读取、解析或写入默认配置失败。
pub fn load_console_config(config_file_path: &Path) -> Result<(ConsoleConfig, ConfigSource), ConsoleError> {
    if config_file_path.exists() {
        let config_content = fs::read_to_string(config_file_path).map_err(|e| {
            ConsoleError::Config(format!("读取配置文件 '{}' 失败: {}", config_file_path.display(), e))
        })?;
        let console_config: ConsoleConfig = serde_json::from_str(&config_content).map_err(|e| {
            ConsoleError::Config(format!("解析配置文件 '{}' 的内容失败: {}", config_file_path.display(), e))
        })?;
        Ok((console_config, ConfigSource::File))
    } else {
        info!(
            "[配置模块] 配置文件 '{}' 未找到，将使用默认配置参数创建新文件。",
            config_file_path.display()
        );
        let default_config = ConsoleConfig::default();
        save_console_config(config_file_path, &default_config)?;
        Ok((default_config, ConfigSource::CreatedDefault))
    }
}

/// 保存控制台配置为格式化的 JSON，必要时创建父目录。
pub fn save_console_config(config_file_path: &Path, console_config: &ConsoleConfig) -> Result<(), ConsoleError> {
    if let Some(parent_dir) = config_file_path.parent() {
        if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
            fs::create_dir_all(parent_dir).map_err(|e| {
                ConsoleError::Config(format!("创建配置目录 '{}' 失败: {}", parent_dir.display(), e))
            })?;
        }
    }

    let config_content = serde_json::to_string_pretty(console_config)
        .map_err(|e| ConsoleError::Config(format!("序列化控制台配置到 JSON 字符串失败: {}", e)))?;

    fs::write(config_file_path, config_content).map_err(|e| {
        ConsoleError::Config(format!("写入配置文件 '{}' 失败: {}", config_file_path.display(), e))
    })?;

    info!("[配置模块] 控制台配置已保存至: '{}'", config_file_path.display());
    Ok(())
}
