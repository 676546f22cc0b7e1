// rust_websocket_utils/src/server/mod.rs

//! WebSocket 服务端模块。
//!
//! 提供最小化的服务端传输 (`transport`)：绑定监听、接受连接、完成握手后把
//! `WsStream` 交给调用方的回调。控制台的集成测试用它来模拟后端。

pub mod transport;
