//! 通用枚举模块。
//!
//! 本模块定义了控制台各组件之间共享的枚举类型：后端逻辑频道以及频道连接的就绪状态。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 后端的逻辑频道。
///
/// 每个频道对应一个独立的 WebSocket 端点，同一频道上的所有功能 (例如所有序列号搜索框)
/// 共享同一条连接。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// 设备控制器 (网关) 频道：设备上下线、统计、日志、遥测以及序列号搜索。
    Controller,
    /// 配置下发 (Provisioning) 频道：地址补全等位置搜索。
    Provisioning,
    /// 固件频道。
    Firmware,
    /// 安全 / 账户频道：用户 (订阅者) 搜索。
    Security,
}

impl ChannelKind {
    /// 全部频道，按固定顺序排列。
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Controller,
        ChannelKind::Provisioning,
        ChannelKind::Firmware,
        ChannelKind::Security,
    ];

    /// 频道在配置文件与日志中使用的短名称。
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Controller => "controller",
            ChannelKind::Provisioning => "provisioning",
            ChannelKind::Firmware => "firmware",
            ChannelKind::Security => "security",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单条频道连接的就绪状态。
///
/// 状态只会沿 `Closed -> Connecting -> Open -> Closed` 方向变化；
/// 连接失败时直接从 `Connecting` 回到 `Closed`。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// 正在建立连接 (握手或认证帧尚未发送)。
    Connecting,
    /// 连接已建立且认证帧已发送，可以发送命令。
    Open,
    /// 未连接，或连接已关闭。
    #[default]
    Closed,
}

impl ConnectionState {
    /// 是否处于 `Connecting` 或 `Open`，即 `start` 应视为无操作的状态。
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    /// 测试 `ChannelKind` 的序列化名称与 `Display` 输出一致。
    fn test_channel_kind_names_match_serialized_form() {
        for kind in ChannelKind::ALL {
            let json = serde_json::to_string(&kind).expect("序列化 ChannelKind 失败");
            assert_eq!(json, format!("\"{}\"", kind), "频道 {:?} 的序列化名称与 Display 不一致", kind);
        }
        let unique: HashSet<_> = ChannelKind::ALL.iter().collect();
        assert_eq!(unique.len(), 4, "ChannelKind::ALL 中存在重复项");
    }

    #[test]
    fn test_connection_state_activity() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Open.is_active());
        assert!(!ConnectionState::Closed.is_active());
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
    }
}
