//! `rust_websocket_utils` 是一个提供 WebSocket 通信实用功能的 Rust Crate。
//!
//! 主要模块包括：
//! - `message`: 协议信封，包括认证帧、命令帧 `OutgoingCommand` 与服务端推送帧 `InboundMessage`。
//! - `error`: 库中使用的统一错误类型 `WsError`。
//! - `client`: 客户端传输层 (连接、发送文本帧、逐帧接收)。
//! - `server`: 服务端传输层，主要用于测试中的模拟后端。

pub mod client;
pub mod error;
pub mod message;
pub mod server;
