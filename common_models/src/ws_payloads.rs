// common_models/src/ws_payloads.rs

//! 包含 WebSocket 通信中使用的各种 Payload 结构体定义。
//!
//! 命令请求负载会被 `rust_websocket_utils::message::OutgoingCommand` 展平到命令帧的顶层，
//! 回复负载则从 `COMMAND` 回复帧的 `data` 对象中反序列化得到。
//! 通知数据结构较为松散，统一由 [`DeviceEvent::classify`] 做一次分类。

use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- 序列号搜索 (controller 频道) ---

/// 序列号前缀搜索命令名称。
pub const SERIAL_NUMBER_SEARCH_COMMAND: &str = "serial_number_search";

/// 序列号搜索请求负载。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SerialNumberSearchPayload {
    /// 用户已输入的序列号前缀。
    pub serial_prefix: String,
}

/// 序列号搜索回复。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SerialNumberSearchReply {
    /// 匹配前缀的设备序列号，顺序由后端决定。
    #[serde(rename = "serialNumbers", default)]
    pub serial_numbers: Vec<String>,
}

// --- 订阅者搜索 (security 频道) ---

/// 订阅者 (用户账户) 搜索命令名称。
pub const SUBSCRIBER_SEARCH_COMMAND: &str = "subscriber_search";

/// 订阅者搜索请求负载。`emailSearch` 与 `nameSearch` 二选一。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubscriberSearchPayload {
    #[serde(rename = "emailSearch", skip_serializing_if = "Option::is_none", default)]
    pub email_search: Option<String>,
    #[serde(rename = "nameSearch", skip_serializing_if = "Option::is_none", default)]
    pub name_search: Option<String>,
}

impl SubscriberSearchPayload {
    /// 根据输入内容选择搜索方式：包含 `@` 时按邮箱搜索，否则按名称搜索。
    pub fn for_query(query: &str) -> Self {
        if query.contains('@') {
            Self { email_search: Some(query.to_string()), name_search: None }
        } else {
            Self { email_search: None, name_search: Some(query.to_string()) }
        }
    }
}

/// 订阅者搜索结果中的单条记录。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SubscriberRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// 订阅者搜索回复。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SubscriberSearchReply {
    #[serde(default)]
    pub users: Vec<SubscriberRecord>,
}

// --- 位置 / 地址补全 (provisioning 频道) ---

/// 地址补全命令名称。
pub const ADDRESS_COMPLETION_COMMAND: &str = "address_completion";

/// 地址补全请求负载。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AddressCompletionPayload {
    pub address: String,
}

/// 地址补全结果中的单条位置记录。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct LocationRecord {
    /// 格式化后的完整地址。
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// 地址补全回复。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AddressCompletionReply {
    #[serde(default)]
    pub results: Vec<LocationRecord>,
}

// --- 通知 ---

/// 通知数据中标识事件类型的字段名。
pub const NOTIFICATION_KIND_FIELD: &str = "type";
/// 通知数据中设备序列号的字段名。
pub const NOTIFICATION_SERIAL_FIELD: &str = "serialNumber";
/// 通知数据中事件内容的字段名。
pub const NOTIFICATION_CONTENT_FIELD: &str = "content";

pub const DEVICE_CONNECTION_NOTIFICATION: &str = "device_connection";
pub const DEVICE_DISCONNECTION_NOTIFICATION: &str = "device_disconnection";
pub const DEVICE_STATISTICS_NOTIFICATION: &str = "device_statistics";
pub const DEVICE_LOG_NOTIFICATION: &str = "device_log";
pub const DEVICE_TELEMETRY_NOTIFICATION: &str = "device_telemetry";

/// 对 `NOTIFICATION` 帧中 `data` 对象的分类结果。
///
/// 形如 `{ "type": "device_connection", "serialNumber": "...", "content": {...} }` 的数据
/// 会被识别为具体的设备事件；缺少序列号的已知类型以及所有未知类型都归入 `Other`，
/// 原始数据原样保留。
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// 设备上线。
    Connected { serial_number: String },
    /// 设备下线。
    Disconnected { serial_number: String },
    /// 设备统计推送。
    Statistics { serial_number: String, content: Value },
    /// 设备日志推送。
    Log { serial_number: String, content: Value },
    /// 设备遥测推送。
    Telemetry { serial_number: String, content: Value },
    /// 其他无法识别的通知。
    Other { kind: String, data: Value },
}

impl DeviceEvent {
    /// 将通知数据分类为 `DeviceEvent`。此函数从不失败。
    pub fn classify(data: &Value) -> DeviceEvent {
        let kind = data
            .get(NOTIFICATION_KIND_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default();
        let serial = data.get(NOTIFICATION_SERIAL_FIELD).and_then(Value::as_str);
        let content = data.get(NOTIFICATION_CONTENT_FIELD).cloned().unwrap_or(Value::Null);

        match (kind, serial) {
            (DEVICE_CONNECTION_NOTIFICATION, Some(sn)) => DeviceEvent::Connected { serial_number: sn.to_string() },
            (DEVICE_DISCONNECTION_NOTIFICATION, Some(sn)) => DeviceEvent::Disconnected { serial_number: sn.to_string() },
            (DEVICE_STATISTICS_NOTIFICATION, Some(sn)) => DeviceEvent::Statistics { serial_number: sn.to_string(), content },
            (DEVICE_LOG_NOTIFICATION, Some(sn)) => DeviceEvent::Log { serial_number: sn.to_string(), content },
            (DEVICE_TELEMETRY_NOTIFICATION, Some(sn)) => DeviceEvent::Telemetry { serial_number: sn.to_string(), content },
            _ => DeviceEvent::Other { kind: kind.to_string(), data: data.clone() },
        }
    }

    /// 事件关联的设备序列号 (`Other` 没有序列号)。
    pub fn serial_number(&self) -> Option<&str> {
        match self {
            DeviceEvent::Connected { serial_number }
            | DeviceEvent::Disconnected { serial_number }
            | DeviceEvent::Statistics { serial_number, .. }
            | DeviceEvent::Log { serial_number, .. }
            | DeviceEvent::Telemetry { serial_number, .. } => Some(serial_number),
            DeviceEvent::Other { .. } => None,
        }
    }

    /// 是否属于遥测类事件 (遥测或统计推送)。
    pub fn is_telemetry(&self) -> bool {
        matches!(self, DeviceEvent::Telemetry { .. } | DeviceEvent::Statistics { .. })
    }
}
