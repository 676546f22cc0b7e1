// FleetConsole/src/ws_client/context.rs

//! 连接上下文：按频道类型懒创建并持有各频道的连接，统一管理会话令牌。

use common_models::enums::ChannelKind;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use crate::config::{ChannelEndpoints, ConsoleConfig};
use crate::error::ConsoleError;
use crate::ws_client::service::ChannelConnection;

#[derive(Debug, Default)]
struct ChannelEntry {
    connection: Option<Arc<ChannelConnection>>,
    attempts: u32,
}

/// 所有频道连接的共享上下文。
#[derive(Debug)]
pub struct ConnectionContext {
    endpoints: ChannelEndpoints,
    close_grace: Duration,
    token: RwLock<Option<String>>,
    channels: Mutex<HashMap<ChannelKind, ChannelEntry>>,
}

impl ConnectionContext {
    pub fn new(config: &ConsoleConfig) -> Arc<Self> {
        Arc::new(Self {
            endpoints: config.endpoints.clone(),
            close_grace: config.close_grace(),
            token: RwLock::new(None),
            channels: Mutex::new(HashMap::new()),
        })
    }

    fn lock_channels(&self) -> MutexGuard<'_, HashMap<ChannelKind, ChannelEntry>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 设置 (或清除) 会话令牌。只影响之后发起的连接。
    pub fn set_token(&self, token: Option<String>) {
        let mut guard = self.token.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = token.filter(|t| !t.is_empty());
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// 取得指定频道的连接，首次访问时创建 (处于 `closed` 状态)。
    pub fn channel(&self, kind: ChannelKind) -> Arc<ChannelConnection> {
        let mut channels = self.lock_channels();
        let entry = channels.entry(kind).or_default();
        let connection = entry.connection.get_or_insert_with(|| {
            debug!("[连接上下文] 创建频道 {} 的连接对象。", kind);
            ChannelConnection::new(kind, self.endpoints.endpoint_for(kind), self.close_grace)
        });
        Arc::clone(connection)
    }

    /// 使用当前令牌启动指定频道的连接。连接已在进行中或已打开时什么也不做。
    ///
    /// # 错误
    /// * `ConsoleError::MissingToken` - 尚未设置会话令牌。
    /// * `ConsoleError::InvalidEndpoint` - 该频道的端点无效。
    pub fn start(&self, kind: ChannelKind) -> Result<bool, ConsoleError> {
        let token = self.token().ok_or(ConsoleError::MissingToken(kind))?;
        let connection = self.channel(kind);
        let attempts = self.lock_channels().get(&kind).map(|entry| entry.attempts).unwrap_or_default();

        let started = connection.start(&token, attempts)?;
        if started {
            if let Some(entry) = self.lock_channels().get_mut(&kind) {
                entry.attempts += 1;
            }
        }
        Ok(started)
    }

    /// 关闭指定频道的连接 (如果已创建)。
    pub async fn close(&self, kind: ChannelKind) {
        let connection = self.lock_channels().get(&kind).and_then(|entry| entry.connection.clone());
        if let Some(connection) = connection {
            connection.close().await;
        }
    }

    /// 关闭所有已创建的频道连接。
    pub async fn close_all(&self) {
        let connections: Vec<Arc<ChannelConnection>> =
            self.lock_channels().values().filter_map(|entry| entry.connection.clone()).collect();
        for connection in connections {
            connection.close().await;
        }
        info!("[连接上下文] 所有频道连接已关闭。");
    }
}
