// FleetConsole/src/lib.rs

//! `FleetConsole`：无线网络设备管理控制台的 WebSocket 命令/回复关联层。
//!
//! - [`ws_client`]：各逻辑频道的连接、挂起命令追踪与入站帧分发。
//! - [`search`]：序列号、订阅者与地址补全的防抖搜索。
//! - [`live`]：设备事件与遥测的实时推送。
//! - [`table`]：结果表格的排序、过滤、分页与列可见性。
//! - [`config`] / [`preferences`]：配置文件与偏好设置 (会话令牌、表格偏好)。

pub mod config;
pub mod error;
pub mod event;
pub mod live;
pub mod preferences;
pub mod search;
pub mod table;
pub mod validation;
pub mod ws_client;

pub use error::ConsoleError;
