// FleetConsole/src/error.rs

//! `FleetConsole` 控制台的错误类型定义模块。
//!
//! 传输层错误 (`WsError`) 通过 `From` 转换合并进 `ConsoleError`。
//! 注意：无法识别的入站帧不会产生错误，分发器只记录日志后丢弃。

use common_models::enums::ChannelKind;
use rust_websocket_utils::error::WsError;
use thiserror::Error;

/// 控制台统一错误类型。
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// 频道当前不处于 `open` 状态，命令未发送，挂起集合保持不变。
    #[error("频道 {0} 未连接")]
    NotConnected(ChannelKind),

    /// 尚未设置会话令牌，无法启动连接。
    #[error("缺少会话令牌，无法启动频道 {0}")]
    MissingToken(ChannelKind),

    /// 频道端点 URL 无效。
    #[error("频道 {channel} 的端点无效: {reason}")]
    InvalidEndpoint { channel: ChannelKind, reason: String },

    /// 配置文件读写或解析失败。
    #[error("配置错误: {0}")]
    Config(String),

    /// 偏好设置存储读写或解析失败。
    #[error("偏好设置错误: {0}")]
    Preferences(String),

    /// 传输层错误。
    #[error(transparent)]
    Transport(#[from] WsError),
}
