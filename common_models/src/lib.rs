//! `common_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了 `FleetConsole` 控制台客户端与 `rust_websocket_utils` 传输库之间
//! 共享的数据结构和枚举类型，它们对应设备管理平台 WebSocket 接口上的各类业务数据。
//!
//! 主要包含以下类型的模型：
//! - **通用枚举 (`enums`)**: 后端逻辑频道 (`ChannelKind`)、连接就绪状态 (`ConnectionState`)。
//! - **WebSocket 消息负载 (`ws_payloads`)**: 各类搜索命令的请求与回复负载，以及通知数据的分类 (`DeviceEvent`)。
//!
//! 设计原则：
//! - 所有模型都派生 `Serialize`/`Deserialize` (状态类枚举除外时另行说明)、`Debug` 与 `Clone`。
//! - 字段命名与后端 JSON 保持一致，必要时通过 `#[serde(rename = ...)]` 映射。

pub mod enums; // 项目中通用的枚举类型定义
pub mod ws_payloads; // WebSocket 通信中使用的各种负载结构体
