// FleetConsole/src/ws_client/pending.rs

//! 挂起命令追踪器。
//!
//! 为每条发出的命令分配一个在本连接内唯一的 ID，并记录哪些 ID 仍在等待回复。
//! 每个 ID 恰好被移除一次：要么收到匹配的回复 (`resolve`)，要么消费者放弃等待
//! (`cancel`，或丢弃 [`PendingReply`] 句柄)，要么连接被拆除 (`clear`)。
//! 追踪器不设超时。

use common_models::enums::ChannelKind;
use dashmap::DashMap;
use log::{debug, warn};
use rust_websocket_utils::message::CommandReply;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;

/// 单个连接的挂起命令集合。
#[derive(Debug)]
pub struct PendingCommandTracker {
    channel: ChannelKind,
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<CommandReply>>,
}

impl PendingCommandTracker {
    pub fn new(channel: ChannelKind) -> Arc<Self> {
        Arc::new(Self { channel, next_id: AtomicU64::new(1), pending: DashMap::new() })
    }

    /// 分配一个新的命令 ID。ID 从 1 开始单调递增，在本连接的生命周期内不会重复。
    pub fn issue_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 记录 `id` 正在等待回复，返回用于接收回复的句柄。
    pub fn track(self: &Arc<Self>, id: u64) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        if self.pending.insert(id, tx).is_some() {
            warn!("[{}] 命令 ID {} 被重复追踪，之前的等待者将收不到回复。", self.channel, id);
        }
        PendingReply { id, receiver: Some(rx), tracker: Arc::downgrade(self) }
    }

    /// 把回复交给对应的等待者，并将其 ID 移出挂起集合。
    ///
    /// # 返回
    /// * `true`: ID 处于挂起状态并已被解决。
    /// * `false`: ID 未被追踪 (迟到、重复或不属于本连接的回复)，回复被忽略。
    pub fn resolve(&self, reply: CommandReply) -> bool {
        let id = reply.command_response_id;
        match self.pending.remove(&id) {
            Some((_, tx)) => {
                if tx.send(reply).is_err() {
                    debug!("[{}] 命令 {} 的等待者已不在，回复被丢弃。", self.channel, id);
                }
                true
            }
            None => false,
        }
    }

    /// 放弃等待某条命令。返回该 ID 之前是否处于挂起状态。
    pub fn cancel(&self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 清空挂起集合 (连接拆除时调用)。所有等待者都会收到 "无回复"。返回被清除的数量。
    pub fn clear(&self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        if count > 0 {
            debug!("[{}] 已清除 {} 条未得到回复的挂起命令。", self.channel, count);
        }
        count
    }
}

/// 等待某条命令回复的句柄。
///
/// 丢弃句柄等同于取消：对应的 ID 会立即从挂起集合中移除。
#[derive(Debug)]
pub struct PendingReply {
    id: u64,
    receiver: Option<oneshot::Receiver<CommandReply>>,
    tracker: Weak<PendingCommandTracker>,
}

impl PendingReply {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 等待回复。
    ///
    /// 返回 `None` 表示不会再有回复：命令已被取消，或连接已被拆除。
    pub async fn recv(mut self) -> Option<CommandReply> {
        let receiver = self.receiver.take()?;
        receiver.await.ok()
    }

    /// 放弃等待。
    pub fn cancel(self) {
        // 取消逻辑在 Drop 中
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.upgrade() {
            if tracker.cancel(self.id) {
                debug!("[{}] 命令 {} 的等待已被取消。", tracker.channel, self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn reply(id: u64) -> CommandReply {
        CommandReply { command_response_id: id, fields: Map::new() }
    }

    #[test]
    fn test_issue_id_is_monotonic_and_starts_at_one() {
        let tracker = PendingCommandTracker::new(ChannelKind::Controller);
        let ids: Vec<u64> = (0..5).map(|_| tracker.issue_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    /// 测试同一个回复到达两次时只解决一次：第二次因 ID 已不在挂起集合中而被忽略。
    async fn test_resolve_is_idempotent() {
        let tracker = PendingCommandTracker::new(ChannelKind::Controller);
        let id = tracker.issue_id();
        let waiter = tracker.track(id);

        assert!(tracker.resolve(reply(id)), "第一次回复应被解决");
        assert!(!tracker.resolve(reply(id)), "重复的回复应被忽略");
        assert!(tracker.is_empty());

        let received = waiter.recv().await.expect("等待者应收到回复");
        assert_eq!(received.command_response_id, id);
    }

    #[test]
    fn test_unknown_reply_has_no_effect() {
        let tracker = PendingCommandTracker::new(ChannelKind::Controller);
        let id = tracker.issue_id();
        let _waiter = tracker.track(id);

        assert!(!tracker.resolve(reply(999)));
        assert!(tracker.is_pending(id), "无关回复不应影响已挂起的命令");
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    /// 测试丢弃等待句柄会移除挂起项，之后到达的回复被忽略。
    async fn test_dropping_waiter_cancels() {
        let tracker = PendingCommandTracker::new(ChannelKind::Security);
        let id = tracker.issue_id();
        let waiter = tracker.track(id);
        assert!(tracker.is_pending(id));

        drop(waiter);
        assert!(!tracker.is_pending(id));
        assert!(!tracker.resolve(reply(id)));
    }

    #[tokio::test]
    async fn test_clear_wakes_waiters_with_none() {
        let tracker = PendingCommandTracker::new(ChannelKind::Controller);
        let first = tracker.track(tracker.issue_id());
        let second = tracker.track(tracker.issue_id());

        assert_eq!(tracker.clear(), 2);
        assert!(first.recv().await.is_none());
        assert!(second.recv().await.is_none());
    }
}
