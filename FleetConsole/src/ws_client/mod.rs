// FleetConsole/src/ws_client/mod.rs

//! WebSocket 客户端模块：频道连接、挂起命令追踪与入站消息分发。

pub mod context;
pub mod dispatcher;
pub mod pending;
pub mod service;

pub use context::ConnectionContext;
pub use dispatcher::{DispatchOutcome, MessageDispatcher};
pub use pending::{PendingCommandTracker, PendingReply};
pub use service::ChannelConnection;
