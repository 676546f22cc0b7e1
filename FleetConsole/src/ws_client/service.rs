// FleetConsole/src/ws_client/service.rs

//! 单个逻辑频道的 WebSocket 连接服务。
//!
//! `ChannelConnection` 持有一个频道 (controller、provisioning、firmware 或 security) 的连接生命周期：
//! `start` 发起连接并在握手成功后首先发送认证帧，随后进入 `open` 状态；
//! 后台连接任务在一个 `select!` 循环中同时处理出站帧与入站帧，入站帧交给
//! [`MessageDispatcher`]。连接结束 (主动关闭、对端关闭或出错) 时状态回到 `closed`，
//! 挂起命令集合被清空。本模块不做自动重连。

use chrono::{DateTime, Utc};
use common_models::enums::{ChannelKind, ConnectionState};
use futures_util::SinkExt;
use log::{debug, error, info, warn};
use rust_websocket_utils::client::transport::{self, ClientConnection};
use rust_websocket_utils::error::WsError;
use rust_websocket_utils::message::{auth_frame, OutgoingCommand};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::ConsoleError;
use crate::event::{ListenerRegistry, NotificationSubscription};
use crate::ws_client::dispatcher::MessageDispatcher;
use crate::ws_client::pending::{PendingCommandTracker, PendingReply};

/// 连接任务之外需要共享的可变部分。
#[derive(Debug, Default)]
struct ConnectionSlot {
    /// 每次 `start` / `close` 都会递增，连接任务只在纪元未变时回写状态。
    epoch: u64,
    /// 仅在 `open` 状态下存在。
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
    last_retry_count: u32,
    opened_at: Option<DateTime<Utc>>,
}

/// 单个频道的连接。
#[derive(Debug)]
pub struct ChannelConnection {
    kind: ChannelKind,
    endpoint: String,
    close_grace: Duration,
    dispatcher: MessageDispatcher,
    state_tx: watch::Sender<ConnectionState>,
    slot: Mutex<ConnectionSlot>,
}

impl ChannelConnection {
    /// 创建一个处于 `closed` 状态的连接。
    ///
    /// # 参数
    /// * `kind` - 频道类型。
    /// * `endpoint` - 该频道的 WebSocket URL。
    /// * `close_grace` - 主动关闭时等待关闭握手完成的最长时间。
    pub fn new(kind: ChannelKind, endpoint: impl Into<String>, close_grace: Duration) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let dispatcher = MessageDispatcher::new(kind, PendingCommandTracker::new(kind), ListenerRegistry::new());
        Arc::new(Self {
            kind,
            endpoint: endpoint.into(),
            close_grace,
            dispatcher,
            state_tx,
            slot: Mutex::new(ConnectionSlot::default()),
        })
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// 订阅连接状态变化。
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// 注册一个通知监听者。监听在重连之间保持有效。
    pub fn subscribe_notifications(&self) -> NotificationSubscription {
        self.dispatcher.listeners().subscribe()
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    /// 当前仍在等待回复的命令数量。
    pub fn pending_count(&self) -> usize {
        self.dispatcher.tracker().len()
    }

    /// 最近一次 `start` 时调用方给出的重试次数。
    pub fn last_retry_count(&self) -> u32 {
        self.lock_slot().last_retry_count
    }

    /// 最近一次进入 `open` 状态的时间。
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.lock_slot().opened_at
    }

    fn lock_slot(&self) -> MutexGuard<'_, ConnectionSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 发起连接。
    ///
    /// 已处于 `connecting` 或 `open` 状态时什么也不做并返回 `Ok(false)`。
    /// 否则进入 `connecting` 状态，在后台任务中建立连接并返回 `Ok(true)`。
    /// `retry_count` 只用于记录和日志，不会触发任何自动重试。
    ///
    /// # 错误
    /// * `ConsoleError::InvalidEndpoint` - 端点 URL 无效，状态保持 `closed`。
    pub fn start(self: &Arc<Self>, token: &str, retry_count: u32) -> Result<bool, ConsoleError> {
        transport::parse_ws_url(&self.endpoint).map_err(|e| ConsoleError::InvalidEndpoint {
            channel: self.kind,
            reason: e.to_string(),
        })?;

        let mut slot = self.lock_slot();
        if self.state().is_active() {
            debug!("[{}] 连接已在进行中或已打开 (状态: {})，忽略本次启动请求。", self.kind, self.state());
            return Ok(false);
        }

        slot.epoch += 1;
        slot.last_retry_count = retry_count;
        let epoch = slot.epoch;
        self.state_tx.send_replace(ConnectionState::Connecting);
        info!("[{}] 开始连接 {} (第 {} 次重试)。", self.kind, self.endpoint, retry_count);

        let connection = Arc::clone(self);
        let token = token.to_string();
        slot.task = Some(tokio::spawn(async move {
            connection.run(epoch, token).await;
        }));
        Ok(true)
    }

    /// 后台连接任务。
    async fn run(self: Arc<Self>, epoch: u64, token: String) {
        let failure = match transport::connect_client(&self.endpoint).await {
            Ok(connection) => self.serve(epoch, &token, connection).await,
            Err(e) => Some(e),
        };
        if let Some(e) = &failure {
            error!("[{}] 连接异常结束: {}", self.kind, e);
        }
        self.finish(epoch);
    }

    /// 发送认证帧后进入收发循环，直到连接结束。返回导致连接结束的错误 (如有)。
    async fn serve(&self, epoch: u64, token: &str, connection: ClientConnection) -> Option<WsError> {
        let ClientConnection { mut ws_sender, mut ws_receiver } = connection;

        // 认证帧必须是连接上的第一帧
        if let Err(e) = transport::send_text(&mut ws_sender, &auth_frame(token)).await {
            return Some(e);
        }

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        if !self.mark_open(epoch, outbound_tx) {
            debug!("[{}] 连接在握手期间已被关闭，放弃该连接。", self.kind);
            return None;
        }

        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => match outbound {
                    Some(text) => {
                        if let Err(e) = transport::send_text(&mut ws_sender, &text).await {
                            return Some(e);
                        }
                    }
                    None => {
                        info!("[{}] 主动关闭连接。", self.kind);
                        if let Err(e) = ws_sender.close().await {
                            debug!("[{}] 发送关闭帧失败: {}", self.kind, e);
                        }
                        return None;
                    }
                },
                incoming = transport::receive_text(&mut ws_receiver) => match incoming {
                    Some(Ok(text)) => {
                        // 纪元已变化时挂起集合属于新的连接，旧连接的帧不再分发
                        if !self.is_current(epoch) {
                            debug!("[{}] 连接已被关闭或取代，停止分发入站帧。", self.kind);
                            return None;
                        }
                        self.dispatcher.handle_frame(&text);
                    }
                    Some(Err(WsError::Message(reason))) => {
                        debug!("[{}] 忽略非文本帧: {}", self.kind, reason);
                    }
                    Some(Err(e)) => return Some(e),
                    None => {
                        info!("[{}] 连接已被服务端关闭。", self.kind);
                        return None;
                    }
                },
            }
        }
    }

    fn mark_open(&self, epoch: u64, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut slot = self.lock_slot();
        if slot.epoch != epoch {
            return false;
        }
        slot.outbound = Some(outbound);
        slot.opened_at = Some(Utc::now());
        self.state_tx.send_replace(ConnectionState::Open);
        info!("[{}] 连接已打开，认证帧已发送。", self.kind);
        true
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock_slot().epoch == epoch
    }

    /// 连接任务结束时的清理。纪元已变化说明连接已被 `close` 或新的 `start` 接管。
    fn finish(&self, epoch: u64) {
        let mut slot = self.lock_slot();
        if slot.epoch != epoch {
            return;
        }
        slot.outbound = None;
        slot.task = None;
        self.state_tx.send_replace(ConnectionState::Closed);
        self.dispatcher.tracker().clear();
        drop(slot);
        info!("[{}] 连接已关闭。", self.kind);
    }

    /// 发送一条原始文本帧。
    ///
    /// 仅在 `open` 状态下发送；其他状态下该帧被丢弃并返回 `false`，不会排队等待。
    pub fn send(&self, raw: &str) -> bool {
        let slot = self.lock_slot();
        let outbound = match (&slot.outbound, self.state()) {
            (Some(outbound), ConnectionState::Open) => outbound,
            (_, state) => {
                debug!("[{}] 连接状态为 {}，丢弃出站帧。", self.kind, state);
                return false;
            }
        };
        outbound.send(raw.to_string()).is_ok()
    }

    /// 分配 ID、发送命令帧并返回等待回复的句柄。
    ///
    /// # 错误
    /// * `ConsoleError::NotConnected` - 连接不处于 `open` 状态，命令未发送，挂起集合不变。
    /// * `ConsoleError::Transport` - 负载不是 JSON 对象或包含 `command` / `id` 字段。
    pub fn send_command<P: Serialize>(&self, command: &str, payload: &P) -> Result<PendingReply, ConsoleError> {
        if !self.is_connected() {
            return Err(ConsoleError::NotConnected(self.kind));
        }

        let tracker = self.dispatcher.tracker();
        let id = tracker.issue_id();
        let text = OutgoingCommand::new(id, command, payload)?.to_text()?;

        // 先登记再发送，回复不会早于登记到达
        let reply = tracker.track(id);
        if !self.send(&text) {
            warn!("[{}] 命令 '{}' (ID: {}) 发送时连接已不可用。", self.kind, command, id);
            return Err(ConsoleError::NotConnected(self.kind));
        }
        debug!("[{}] 命令 '{}' 已发送 (ID: {})。", self.kind, command, id);
        Ok(reply)
    }

    /// 关闭连接。重复调用是安全的。
    ///
    /// 状态立即变为 `closed`，挂起命令集合被清空。已打开的连接会先尝试发送关闭帧，
    /// 超过 `close_grace` 仍未结束的连接任务会被中止。
    ///
    /// 挂起集合在持有锁时清空，只涉及被关闭的这次连接；等待关闭握手期间新 `start` 登记的命令不受影响。
    pub async fn close(&self) {
        let (outbound, task) = {
            let mut slot = self.lock_slot();
            slot.epoch += 1;
            let was_active = self.state().is_active();
            if was_active {
                self.state_tx.send_replace(ConnectionState::Closed);
            }
            self.dispatcher.tracker().clear();
            (slot.outbound.take(), slot.task.take())
        };

        if let Some(mut task) = task {
            if outbound.is_some() {
                // 丢弃出站通道，连接任务会发送关闭帧后退出
                drop(outbound);
                if tokio::time::timeout(self.close_grace, &mut task).await.is_err() {
                    warn!("[{}] 关闭握手超时，强制中止连接任务。", self.kind);
                    task.abort();
                }
            } else {
                task.abort();
            }
            info!("[{}] 连接已关闭。", self.kind);
        }
    }

    /// 测试用：不经网络直接进入 `open` 状态，返回出站帧的接收端。
    #[cfg(test)]
    pub(crate) fn attach_loopback(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut slot = self.lock_slot();
        slot.epoch += 1;
        slot.outbound = Some(tx);
        slot.opened_at = Some(Utc::now());
        self.state_tx.send_replace(ConnectionState::Open);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws_client::dispatcher::DispatchOutcome;
    use serde_json::{json, Value};

    fn connection() -> Arc<ChannelConnection> {
        ChannelConnection::new(ChannelKind::Controller, "ws://127.0.0.1:9/api/v1/ws", Duration::from_millis(100))
    }

    #[tokio::test]
    /// 测试未连接时命令被拒绝且挂起集合不变，原始帧被丢弃。
    async fn test_send_while_closed_is_rejected() {
        let conn = connection();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.send("hello"));

        let result = conn.send_command("serial_number_search", &json!({ "serial_prefix": "aa" }));
        assert!(matches!(result, Err(ConsoleError::NotConnected(ChannelKind::Controller))));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_command_tracks_id_and_resolves_reply() {
        let conn = connection();
        let mut outbound = conn.attach_loopback();

        let reply = conn
            .send_command("serial_number_search", &json!({ "serial_prefix": "aabb" }))
            .expect("open 状态下发送命令应成功");
        let id = reply.id();
        assert_eq!(conn.pending_count(), 1);

        let sent: Value = serde_json::from_str(&outbound.recv().await.expect("应有出站帧")).unwrap();
        assert_eq!(sent, json!({ "command": "serial_number_search", "id": id, "serial_prefix": "aabb" }));

        let frame = json!({ "type": "COMMAND", "data": { "command_response_id": id, "serialNumbers": [] } });
        assert_eq!(conn.dispatcher().handle_frame(&frame.to_string()), DispatchOutcome::Resolved(id));
        assert!(reply.recv().await.is_some());
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reserved_payload_key_is_rejected_without_tracking() {
        let conn = connection();
        let _outbound = conn.attach_loopback();
        let result = conn.send_command("x", &json!({ "command": "y" }));
        assert!(matches!(result, Err(ConsoleError::Transport(WsError::InvalidPayload(_)))));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    /// 测试关闭会清空挂起命令、唤醒等待者，并且可以重复调用。
    async fn test_close_clears_pending_and_is_idempotent() {
        let conn = connection();
        let _outbound = conn.attach_loopback();
        let reply = conn.send_command("serial_number_search", &json!({ "serial_prefix": "aa" })).unwrap();
        let mut state_rx = conn.watch_state();

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(*state_rx.borrow_and_update(), ConnectionState::Closed);
        assert_eq!(conn.pending_count(), 0);
        assert!(reply.recv().await.is_none(), "拆除后等待者应得到 None");

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.send("after close"));
    }

    #[tokio::test(start_paused = true)]
    /// 测试关闭握手等待期间重新打开的连接上登记的命令，不会被旧的 `close` 清除。
    async fn test_close_does_not_clear_commands_of_reopened_connection() {
        let conn = connection();
        let _old_outbound = conn.attach_loopback();
        let stale = conn.send_command("serial_number_search", &json!({ "serial_prefix": "aa" })).unwrap();
        // 一个迟迟不结束的连接任务，使 close 等满 close_grace
        conn.lock_slot().task = Some(tokio::spawn(std::future::pending::<()>()));

        let mut state_rx = conn.watch_state();
        let closer = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.close().await }
        });
        state_rx.wait_for(|s| *s == ConnectionState::Closed).await.expect("状态通道已关闭");
        assert!(stale.recv().await.is_none(), "旧连接的命令应在关闭时被清除");

        let mut new_outbound = conn.attach_loopback();
        let fresh = conn.send_command("serial_number_search", &json!({ "serial_prefix": "bb" })).unwrap();
        let id = fresh.id();
        assert!(new_outbound.recv().await.is_some());

        closer.await.unwrap();
        assert_eq!(conn.pending_count(), 1, "旧的 close 结束后新连接的命令应仍在挂起");
        let frame = json!({ "type": "COMMAND", "data": { "command_response_id": id, "serialNumbers": [] } });
        assert_eq!(conn.dispatcher().handle_frame(&frame.to_string()), DispatchOutcome::Resolved(id));
        assert!(fresh.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_endpoint() {
        let conn = ChannelConnection::new(ChannelKind::Firmware, "http://not-a-websocket", Duration::from_millis(10));
        let result = conn.start("tok", 0);
        assert!(matches!(result, Err(ConsoleError::InvalidEndpoint { channel: ChannelKind::Firmware, .. })));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_start_is_noop_while_open() {
        let conn = connection();
        let _outbound = conn.attach_loopback();
        assert!(!conn.start("tok", 3).expect("启动不应报错"));
        assert_eq!(conn.state(), ConnectionState::Open);
    }
}
