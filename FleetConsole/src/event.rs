// FleetConsole/src/event.rs

//! 通知事件与监听者注册表。
//!
//! 服务端推送的 `NOTIFICATION` 帧会被包装成 [`Notification`]，按到达顺序广播给
//! 当前已注册的所有监听者。监听通过 [`NotificationSubscription`] 句柄表示：
//! 调用 `unsubscribe` 或直接丢弃句柄都会注销监听，之后的通知不再投递。
//! 迟到的订阅者不会收到订阅之前的通知。

use chrono::{DateTime, Utc};
use common_models::enums::ChannelKind;
use common_models::ws_payloads::DeviceEvent;
use log::debug;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use uuid::Uuid;

/// 一条已接收的通知。
#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    /// 通知来自哪个频道。
    pub channel: ChannelKind,
    /// 本地收到该帧的时间 (UTC)。
    pub received_at: DateTime<Utc>,
    /// `NOTIFICATION` 帧中的原始 `data`。
    pub data: Value,
}

impl Notification {
    pub fn new(channel: ChannelKind, data: Value) -> Self {
        Self { channel, received_at: Utc::now(), data }
    }

    /// 将通知数据分类为设备事件。
    pub fn device_event(&self) -> DeviceEvent {
        DeviceEvent::classify(&self.data)
    }
}

/// 通知监听者注册表，每个频道连接持有一个。
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<(Uuid, mpsc::UnboundedSender<Notification>)>>,
}

impl ListenerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(Uuid, mpsc::UnboundedSender<Notification>)>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 注册一个新的监听者。
    pub fn subscribe(self: &Arc<Self>) -> NotificationSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.lock().push((id, tx));
        debug!("[通知] 新的监听者已注册: {}", id);
        NotificationSubscription { id, receiver: rx, registry: Arc::downgrade(self) }
    }

    /// 注销监听者。返回该 ID 之前是否处于注册状态。
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        before != listeners.len()
    }

    /// 把通知投递给所有监听者，返回成功投递的数量。接收端已关闭的监听者会被顺带移除。
    pub fn broadcast(&self, notification: &Notification) -> usize {
        let mut listeners = self.lock();
        listeners.retain(|(_, tx)| tx.send(notification.clone()).is_ok());
        listeners.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// 通知订阅句柄。丢弃句柄即注销监听。
#[derive(Debug)]
pub struct NotificationSubscription {
    id: Uuid,
    receiver: mpsc::UnboundedReceiver<Notification>,
    registry: Weak<ListenerRegistry>,
}

impl NotificationSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 等待下一条通知。注销后 (或注册表已被释放) 在取完缓冲的通知后返回 `None`。
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }

    /// 非阻塞地取出一条已缓冲的通知。
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }

    /// 显式注销监听。
    pub fn unsubscribe(self) {
        // 注销逻辑在 Drop 中
    }
}

impl Drop for NotificationSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.unsubscribe(self.id) {
                debug!("[通知] 监听者已注销: {}", self.id);
            }
        }
    }
}
