// FleetConsole/src/search/query.rs

//! 防抖搜索。
//!
//! 每个搜索框对应一个 [`DebouncedSearch`]，状态机为
//! `Idle -> Pending (防抖中) -> AwaitingReply -> Idle`。
//! 输入短于最小长度 (或不被该搜索接受) 时立即回到 `Idle` 并清空结果，不发出任何命令。
//!
//! 每条发出的命令都带有一个本地递增的发出序号。回复只有在其序号大于上一次显示的序号、
//! 且大于最近一次清空时的序号时才会被显示，因此乱序到达的旧回复不会覆盖新结果。

use log::{debug, warn};
use rust_websocket_utils::message::CommandReply;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::SearchConfig;
use crate::error::ConsoleError;
use crate::search::debounce::Debouncer;
use crate::search::kinds::SearchKind;
use crate::ws_client::{ChannelConnection, ConnectionContext};

/// 搜索框所处的阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    /// 输入已变化，正在等待防抖静默期结束。
    Pending,
    /// 命令已发出，正在等待回复。
    AwaitingReply,
}

/// 对外可见的搜索状态快照。
#[derive(Debug, Clone, PartialEq)]
pub struct SearchState<T> {
    pub phase: SearchPhase,
    /// 最近一次输入的内容。
    pub query: String,
    /// 当前显示的结果。
    pub results: Vec<T>,
    /// 当前结果对应的发出序号，尚无结果时为 0。
    pub displayed_seq: u64,
}

impl<T> Default for SearchState<T> {
    fn default() -> Self {
        Self { phase: SearchPhase::Idle, query: String::new(), results: Vec::new(), displayed_seq: 0 }
    }
}

#[derive(Debug, Default)]
struct SeqMarks {
    last_issued: u64,
    last_displayed: u64,
    cleared_after: u64,
    outstanding: BTreeSet<u64>,
    scheduled: bool,
}

impl SeqMarks {
    fn is_fresh(&self, seq: u64) -> bool {
        seq > self.last_displayed && seq > self.cleared_after
    }

    fn phase(&self) -> SearchPhase {
        if self.scheduled {
            SearchPhase::Pending
        } else if self.outstanding.iter().any(|seq| self.is_fresh(*seq)) {
            SearchPhase::AwaitingReply
        } else {
            SearchPhase::Idle
        }
    }
}

struct SearchInner<K: SearchKind> {
    context: Arc<ConnectionContext>,
    channel: Arc<ChannelConnection>,
    min_length: usize,
    debouncer: Debouncer,
    marks: Mutex<SeqMarks>,
    in_flight: Mutex<JoinSet<()>>,
    state_tx: watch::Sender<SearchState<K::Item>>,
}

impl<K: SearchKind> SearchInner<K> {
    fn lock_marks(&self) -> MutexGuard<'_, SeqMarks> {
        self.marks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 在持有序号锁的前提下更新对外状态，阶段总是由序号记录重新计算。
    fn publish(&self, marks: &SeqMarks, update: impl FnOnce(&mut SearchState<K::Item>)) {
        let phase = marks.phase();
        self.state_tx.send_modify(|state| {
            update(state);
            state.phase = phase;
        });
    }

    fn clear(&self, query: &str) {
        let mut marks = self.lock_marks();
        marks.scheduled = false;
        marks.cleared_after = marks.last_issued;
        marks.outstanding.clear();
        self.publish(&marks, |state| {
            state.query = query.to_string();
            state.results.clear();
        });
    }

    /// 防抖静默期结束后发出命令。
    fn issue(self: &Arc<Self>, query: String) {
        let seq = {
            let mut marks = self.lock_marks();
            marks.scheduled = false;
            marks.last_issued += 1;
            marks.last_issued
        };

        let pending = match self.channel.send_command(K::COMMAND, &K::payload(&query)) {
            Ok(pending) => pending,
            Err(ConsoleError::NotConnected(channel)) => {
                debug!("[搜索] 频道 {} 未连接，'{}' 的搜索未发出。", channel, K::COMMAND);
                let marks = self.lock_marks();
                self.publish(&marks, |_| {});
                return;
            }
            Err(e) => {
                warn!("[搜索] 发出 '{}' 命令失败: {}", K::COMMAND, e);
                let marks = self.lock_marks();
                self.publish(&marks, |_| {});
                return;
            }
        };

        {
            let mut marks = self.lock_marks();
            marks.outstanding.insert(seq);
            self.publish(&marks, |_| {});
        }
        debug!("[搜索] '{}' 已发出 (序号: {}, 命令 ID: {}, 查询: '{}')。", K::COMMAND, seq, pending.id(), query);

        let inner = Arc::clone(self);
        let mut in_flight = self.lock_in_flight();
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move {
            let reply = pending.recv().await;
            inner.complete(seq, reply);
        });
    }

    fn complete(&self, seq: u64, reply: Option<CommandReply>) {
        let items = reply.as_ref().map(K::extract);

        let mut marks = self.lock_marks();
        marks.outstanding.remove(&seq);
        if !marks.is_fresh(seq) {
            debug!("[搜索] 丢弃过期的 '{}' 回复 (序号: {})。", K::COMMAND, seq);
            self.publish(&marks, |_| {});
            return;
        }

        match items {
            Some(Ok(items)) => {
                marks.last_displayed = seq;
                self.publish(&marks, |state| {
                    state.results = items;
                    state.displayed_seq = seq;
                });
            }
            Some(Err(e)) => {
                warn!("[搜索] '{}' 的回复无法解析 (序号: {}): {}", K::COMMAND, seq, e);
                self.publish(&marks, |_| {});
            }
            None => {
                debug!("[搜索] '{}' 没有收到回复 (序号: {})，连接可能已断开。", K::COMMAND, seq);
                self.publish(&marks, |_| {});
            }
        }
    }

    fn shutdown(&self) {
        self.debouncer.cancel();
        self.lock_in_flight().abort_all();
    }
}

/// 一个搜索框的防抖搜索。丢弃时停止计时器并放弃所有未完成的命令。
pub struct DebouncedSearch<K: SearchKind> {
    inner: Arc<SearchInner<K>>,
}

impl<K: SearchKind> DebouncedSearch<K> {
    pub fn new(context: Arc<ConnectionContext>, config: &SearchConfig) -> Self {
        let channel = context.channel(K::CHANNEL);
        let (state_tx, _) = watch::channel(SearchState::default());
        Self {
            inner: Arc::new(SearchInner {
                context,
                channel,
                min_length: K::min_length(config),
                debouncer: Debouncer::new(config.debounce()),
                marks: Mutex::new(SeqMarks::default()),
                in_flight: Mutex::new(JoinSet::new()),
                state_tx,
            }),
        }
    }

    /// 输入内容变化。
    pub fn set_input(&self, value: &str) {
        let inner = &self.inner;
        if value.chars().count() < inner.min_length || !K::accepts(value) {
            inner.debouncer.cancel();
            inner.clear(value);
            return;
        }

        {
            let mut marks = inner.lock_marks();
            marks.scheduled = true;
            inner.publish(&marks, |state| state.query = value.to_string());
        }
        let task_inner = Arc::clone(inner);
        let query = value.to_string();
        inner.debouncer.schedule(async move {
            task_inner.issue(query);
        });
    }

    /// 搜索框获得焦点：频道未连接时用上下文中的令牌重新发起连接。
    ///
    /// # 返回
    /// * `Ok(true)` - 发起了新的连接。
    /// * `Ok(false)` - 频道已在连接中或已打开。
    pub fn focus(&self) -> Result<bool, ConsoleError> {
        if self.inner.channel.state().is_active() {
            return Ok(false);
        }
        self.inner.context.start(K::CHANNEL)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.channel.is_connected()
    }

    pub fn state(&self) -> SearchState<K::Item> {
        self.inner.state_tx.borrow().clone()
    }

    pub fn results(&self) -> Vec<K::Item> {
        self.inner.state_tx.borrow().results.clone()
    }

    /// 订阅搜索状态变化。
    pub fn subscribe(&self) -> watch::Receiver<SearchState<K::Item>> {
        self.inner.state_tx.subscribe()
    }

    /// 输入内容并等待这次搜索结束。
    ///
    /// 返回新显示的结果。输入被拒绝、命令未能发出、回复无法解析或连接在回复前断开时，
    /// 搜索回到 `Idle` 且没有新结果，此时返回 `None`。
    pub async fn run_query(&self, value: &str) -> Option<Vec<K::Item>> {
        let mut state_rx = self.subscribe();
        let baseline = state_rx.borrow_and_update().displayed_seq;
        self.set_input(value);

        let state = state_rx
            .wait_for(|s| s.displayed_seq > baseline || s.phase == SearchPhase::Idle)
            .await
            .ok()?;
        (state.displayed_seq > baseline).then(|| state.results.clone())
    }
}

impl<K: SearchKind> Drop for DebouncedSearch<K> {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsoleConfig;
    use crate::search::kinds::{SerialNumberSearch, SubscriberSearch};
    use common_models::enums::ChannelKind;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn setup(kind: ChannelKind) -> (Arc<ConnectionContext>, mpsc::UnboundedReceiver<String>) {
        let context = ConnectionContext::new(&ConsoleConfig::default());
        let outbound = context.channel(kind).attach_loopback();
        (context, outbound)
    }

    fn drain(outbound: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        std::iter::from_fn(|| outbound.try_recv().ok())
            .map(|text| serde_json::from_str(&text).expect("出站帧应为 JSON"))
            .collect()
    }

    fn reply_frame(id: &Value, serials: &[&str]) -> String {
        json!({ "type": "COMMAND", "data": { "command_response_id": id, "serialNumbers": serials } }).to_string()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    /// 测试快速连续输入只在静默期结束后发出一条命令，且使用最后一次输入。
    async fn test_rapid_typing_issues_single_command() {
        let (context, mut outbound) = setup(ChannelKind::Controller);
        let search = DebouncedSearch::<SerialNumberSearch>::new(context.clone(), &ConsoleConfig::default().search);

        for input in ["aa", "aab", "aabb"] {
            search.set_input(input);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(drain(&mut outbound).is_empty(), "静默期内不应发出命令");
        assert_eq!(search.state().phase, SearchPhase::Pending);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let frames = drain(&mut outbound);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["command"], "serial_number_search");
        assert_eq!(frames[0]["serial_prefix"], "aabb");
        assert_eq!(search.state().phase, SearchPhase::AwaitingReply);

        let channel = context.channel(ChannelKind::Controller);
        channel.dispatcher().handle_frame(&reply_frame(&frames[0]["id"], &["aabb00000001"]));
        let mut state_rx = search.subscribe();
        let state = state_rx.wait_for(|s| s.displayed_seq == 1).await.expect("搜索状态通道已关闭").clone();
        assert_eq!(state.results, vec!["aabb00000001"]);
        assert_eq!(state.phase, SearchPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    /// 测试过短或非十六进制的输入不发出命令，并清空已显示的结果。
    async fn test_short_or_rejected_input_clears_results() {
        let (context, mut outbound) = setup(ChannelKind::Controller);
        let search = DebouncedSearch::<SerialNumberSearch>::new(context.clone(), &ConsoleConfig::default().search);

        search.set_input("aabb");
        tokio::time::sleep(Duration::from_millis(350)).await;
        let frames = drain(&mut outbound);
        context.channel(ChannelKind::Controller).dispatcher().handle_frame(&reply_frame(&frames[0]["id"], &["aabb00000001"]));
        settle().await;
        assert_eq!(search.results().len(), 1);

        search.set_input("a");
        assert!(search.results().is_empty(), "过短输入应清空结果");
        assert_eq!(search.state().phase, SearchPhase::Idle);

        search.set_input("zz");
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(drain(&mut outbound).is_empty(), "非十六进制输入不应发出命令");
        assert!(search.results().is_empty());
    }

    #[tokio::test(start_paused = true)]
    /// 测试 A、B 依次发出而 B 的回复先到时，最终显示 B 的结果。
    async fn test_stale_reply_is_discarded() {
        let (context, mut outbound) = setup(ChannelKind::Controller);
        let channel = context.channel(ChannelKind::Controller);
        let search = DebouncedSearch::<SerialNumberSearch>::new(context.clone(), &ConsoleConfig::default().search);

        search.set_input("aa");
        tokio::time::sleep(Duration::from_millis(350)).await;
        search.set_input("aab");
        tokio::time::sleep(Duration::from_millis(350)).await;
        let frames = drain(&mut outbound);
        assert_eq!(frames.len(), 2);
        let (a, b) = (&frames[0]["id"], &frames[1]["id"]);

        channel.dispatcher().handle_frame(&reply_frame(b, &["aab000000001"]));
        settle().await;
        channel.dispatcher().handle_frame(&reply_frame(a, &["aa0000000001"]));
        settle().await;

        let state = search.state();
        assert_eq!(state.results, vec!["aab000000001"]);
        assert_eq!(state.displayed_seq, 2);
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_after_clear_is_not_displayed() {
        let (context, mut outbound) = setup(ChannelKind::Controller);
        let channel = context.channel(ChannelKind::Controller);
        let search = DebouncedSearch::<SerialNumberSearch>::new(context.clone(), &ConsoleConfig::default().search);

        search.set_input("aabb");
        tokio::time::sleep(Duration::from_millis(350)).await;
        let frames = drain(&mut outbound);
        search.set_input("");

        channel.dispatcher().handle_frame(&reply_frame(&frames[0]["id"], &["aabb00000001"]));
        settle().await;
        assert!(search.results().is_empty());
        assert_eq!(search.state().phase, SearchPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscriber_search_uses_email_field() {
        let (context, mut outbound) = setup(ChannelKind::Security);
        let search = DebouncedSearch::<SubscriberSearch>::new(context, &ConsoleConfig::default().search);

        search.set_input("ann@ex");
        tokio::time::sleep(Duration::from_millis(350)).await;
        let frames = drain(&mut outbound);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["command"], "subscriber_search");
        assert_eq!(frames[0]["emailSearch"], "ann@ex");
        assert!(frames[0].get("nameSearch").is_none());
    }

    #[tokio::test(start_paused = true)]
    /// 测试丢弃搜索会停止计时器并移除未完成命令的挂起项。
    async fn test_drop_abandons_in_flight_commands() {
        let (context, mut outbound) = setup(ChannelKind::Controller);
        let channel = context.channel(ChannelKind::Controller);
        let search = DebouncedSearch::<SerialNumberSearch>::new(context.clone(), &ConsoleConfig::default().search);

        search.set_input("aabb");
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(channel.pending_count(), 1);
        search.set_input("aabbc");

        drop(search);
        settle().await;
        assert_eq!(channel.pending_count(), 0);
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(drain(&mut outbound).len(), 1, "丢弃后计时器不应再发出命令");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_query_returns_new_results() {
        let (context, mut outbound) = setup(ChannelKind::Controller);
        let channel = context.channel(ChannelKind::Controller);
        let search = DebouncedSearch::<SerialNumberSearch>::new(context.clone(), &ConsoleConfig::default().search);

        assert_eq!(search.run_query("zz").await, None, "被拒绝的输入应立即结束");

        let replier = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            let frames = drain(&mut outbound);
            channel.dispatcher().handle_frame(&reply_frame(&frames[0]["id"], &["aabb00000001"]));
        });
        assert_eq!(search.run_query("aabb").await, Some(vec!["aabb00000001".to_string()]));
        replier.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    /// 测试命令发出后连接断开时，等待中的查询随即结束，不会一直等到超时。
    async fn test_run_query_ends_when_connection_drops() {
        let (context, mut outbound) = setup(ChannelKind::Controller);
        let channel = context.channel(ChannelKind::Controller);
        let search = DebouncedSearch::<SerialNumberSearch>::new(context.clone(), &ConsoleConfig::default().search);

        let closer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            channel.close().await;
        });
        let started = tokio::time::Instant::now();
        assert_eq!(search.run_query("aabb").await, None);
        assert!(started.elapsed() < Duration::from_secs(1), "断开后应立即结束等待");
        assert_eq!(drain(&mut outbound).len(), 1);
        closer.await.unwrap();
    }

    #[tokio::test]
    async fn test_search_while_disconnected_stays_idle() {
        let context = ConnectionContext::new(&ConsoleConfig::default());
        let mut config = ConsoleConfig::default().search;
        config.debounce_ms = 10;
        let search = DebouncedSearch::<SerialNumberSearch>::new(context, &config);
        assert!(!search.is_connected());

        search.set_input("aabb");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(search.state().phase, SearchPhase::Idle);
        assert!(matches!(search.focus(), Err(ConsoleError::MissingToken(ChannelKind::Controller))));
    }
}
