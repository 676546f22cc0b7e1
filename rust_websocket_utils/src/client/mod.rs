// rust_websocket_utils/src/client/mod.rs

//! WebSocket 客户端模块。
//!
//! `transport` 子模块负责连接建立、文本帧的发送与逐帧接收；
//! 帧内容的解析与分发由上层 (例如 `fleet_console::ws_client`) 完成。

pub mod transport;
