// rust_websocket_utils/src/message.rs

//! 定义 WebSocket 通信中使用的消息信封。
//!
//! 后端协议约定：
//! - 连接建立后的第一帧是纯文本认证帧 `token:<value>` (见 [`auth_frame`])。
//! - 客户端发出的命令帧是一个 JSON 对象 `{ "command": ..., "id": ..., ...负载字段 }`
//!   (见 [`OutgoingCommand`])。
//! - 服务端推送的帧为 `{ "type": "NOTIFICATION", "data": ... }` 或
//!   `{ "type": "COMMAND", "data": { "command_response_id": ..., ... } }` (见 [`InboundMessage`])。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::error::WsError;

/// 认证帧前缀。
pub const AUTH_FRAME_PREFIX: &str = "token:";

/// 生成连接建立后必须首先发送的认证帧文本。
pub fn auth_frame(token: &str) -> String {
    format!("{}{}", AUTH_FRAME_PREFIX, token)
}

/// 客户端发出的命令帧。
///
/// 负载字段被展平到帧的顶层，因此负载中不能出现 `command` 或 `id` 字段。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutgoingCommand {
    /// 命令名称，例如 `"serial_number_search"`。
    pub command: String,
    /// 本地生成的命令 ID，回复帧通过 `command_response_id` 回显此值。
    pub id: u64,
    /// 命令的其余字段。
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl OutgoingCommand {
    /// 创建一个新的命令帧。
    ///
    /// # Arguments
    /// * `id` - 由挂起命令追踪器分配的命令 ID。
    /// * `command` - 命令名称。
    /// * `payload_data` - 命令负载，序列化结果必须是 JSON 对象 (单元结构体序列化为 `null` 时视为空对象)。
    ///
    /// # Returns
    /// * `Err(WsError::SerializationError)` - 负载序列化失败。
    /// * `Err(WsError::InvalidPayload)` - 负载不是对象，或包含保留字段。
    pub fn new<T: Serialize>(id: u64, command: &str, payload_data: &T) -> Result<OutgoingCommand, WsError> {
        let value = serde_json::to_value(payload_data)
            .map_err(|e| WsError::SerializationError(format!("命令 '{}' 的负载序列化失败: {}", command, e)))?;
        let payload = match value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(WsError::InvalidPayload(format!(
                    "命令 '{}' 的负载必须是 JSON 对象，实际为: {}",
                    command, other
                )));
            }
        };
        if let Some(reserved) = ["command", "id"].iter().find(|key| payload.contains_key(**key)) {
            return Err(WsError::InvalidPayload(format!(
                "命令 '{}' 的负载包含保留字段 '{}'",
                command, reserved
            )));
        }
        Ok(OutgoingCommand { command: command.to_string(), id, payload })
    }

    /// 序列化为可直接发送的文本帧。
    pub fn to_text(&self) -> Result<String, WsError> {
        serde_json::to_string(self)
            .map_err(|e| WsError::SerializationError(format!("命令帧序列化为JSON失败: {}", e)))
    }
}

/// 对某条命令的回复，即 `COMMAND` 帧中的 `data` 对象。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CommandReply {
    /// 回显的命令 ID。
    pub command_response_id: u64,
    /// 回复中的其余字段。
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CommandReply {
    /// 将回复字段反序列化为指定的目标类型 `T`。
    pub fn deserialize_fields<T: for<'de> Deserialize<'de>>(&self) -> Result<T, WsError> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|e| {
            WsError::DeserializationError(format!(
                "命令回复 (ID: {}) 的字段反序列化为目标类型失败: {}",
                self.command_response_id, e
            ))
        })
    }
}

/// 服务端推送的帧。未带标签或无法解析的帧不会产生 `InboundMessage`。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum InboundMessage {
    /// 非请求触发的推送，数据结构由具体通知类型决定。
    #[serde(rename = "NOTIFICATION")]
    Notification(Value),
    /// 对某条已发送命令的回复。
    #[serde(rename = "COMMAND")]
    Command(CommandReply),
}

impl InboundMessage {
    /// 尝试从文本帧解析。
    ///
    /// 返回 `WsError::DeserializationError` 的情况包括：非 JSON 文本、未知的 `type`、
    /// `COMMAND` 帧缺少数值型 `command_response_id` 等。调用方通常直接忽略这些帧。
    pub fn parse(text: &str) -> Result<InboundMessage, WsError> {
        serde_json::from_str::<InboundMessage>(text).map_err(|e| {
            WsError::DeserializationError(format!("收到的文本帧无法识别: {}, 原始文本: '{}'", e, text))
        })
    }
}
