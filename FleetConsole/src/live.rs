// FleetConsole/src/live.rs

//! 设备事件与遥测的实时推送。
//!
//! 两种推送都建立在频道的通知订阅之上，把通知分类为 [`DeviceEvent`] 后按条件过滤。
//! 推送对象被丢弃时，底层的通知订阅随之注销。
//!
//! 通知订阅本身在重连之间保持有效，不会因为连接断开而结束；
//! 需要感知断开的调用方使用 `next_update`，它同时留意频道的连接状态。

use chrono::{DateTime, Utc};
use common_models::enums::ConnectionState;
use common_models::ws_payloads::DeviceEvent;
use log::{debug, trace};
use tokio::sync::watch;

use crate::event::NotificationSubscription;
use crate::ws_client::ChannelConnection;

/// 一条带接收时间的设备事件。
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub received_at: DateTime<Utc>,
    pub event: DeviceEvent,
}

/// `next_update` 的结果。
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    Event(TimedEvent),
    /// 频道连接已回到 `closed`。
    Disconnected,
    /// 通知订阅已结束。
    Ended,
}

async fn wait_closed(mut state_rx: watch::Receiver<ConnectionState>) {
    // 发送端被丢弃同样视为断开
    let _ = state_rx.wait_for(|state| *state == ConnectionState::Closed).await;
}

/// 设备事件推送，可限定为某一台设备。
#[derive(Debug)]
pub struct DeviceEventFeed {
    subscription: NotificationSubscription,
    serial_filter: Option<String>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl DeviceEventFeed {
    /// 订阅频道上的全部设备事件。
    pub fn all(channel: &ChannelConnection) -> Self {
        Self { subscription: channel.subscribe_notifications(), serial_filter: None, state_rx: channel.watch_state() }
    }

    /// 只订阅指定序列号的设备事件 (序列号比较不区分大小写)。
    pub fn for_device(channel: &ChannelConnection, serial_number: &str) -> Self {
        Self {
            subscription: channel.subscribe_notifications(),
            serial_filter: Some(serial_number.to_ascii_lowercase()),
            state_rx: channel.watch_state(),
        }
    }

    fn matches(&self, event: &DeviceEvent) -> bool {
        match &self.serial_filter {
            None => true,
            Some(wanted) => event.serial_number().is_some_and(|sn| sn.eq_ignore_ascii_case(wanted)),
        }
    }

    /// 等待下一条符合条件的事件。订阅结束时返回 `None`。
    pub async fn next_event(&mut self) -> Option<TimedEvent> {
        loop {
            let notification = self.subscription.recv().await?;
            let event = notification.device_event();
            if self.matches(&event) {
                return Some(TimedEvent { received_at: notification.received_at, event });
            }
            trace!("[实时推送] 跳过不相关的事件: {:?}", event);
        }
    }

    /// 等待下一条事件或连接断开。已到达的事件先于断开被交出。
    pub async fn next_update(&mut self) -> FeedUpdate {
        let state_rx = self.state_rx.clone();
        tokio::select! {
            biased;
            event = self.next_event() => event.map_or(FeedUpdate::Ended, FeedUpdate::Event),
            _ = wait_closed(state_rx) => {
                debug!("[实时推送] 频道连接已断开。");
                FeedUpdate::Disconnected
            }
        }
    }
}

/// 单台设备的遥测推送，只产出遥测与统计事件。
#[derive(Debug)]
pub struct TelemetryFeed {
    feed: DeviceEventFeed,
}

impl TelemetryFeed {
    pub fn new(channel: &ChannelConnection, serial_number: &str) -> Self {
        Self { feed: DeviceEventFeed::for_device(channel, serial_number) }
    }

    pub async fn next_sample(&mut self) -> Option<TimedEvent> {
        loop {
            let timed = self.feed.next_event().await?;
            if timed.event.is_telemetry() {
                return Some(timed);
            }
        }
    }

    /// 等待下一条遥测事件或连接断开。
    pub async fn next_update(&mut self) -> FeedUpdate {
        let state_rx = self.feed.state_rx.clone();
        tokio::select! {
            biased;
            sample = self.next_sample() => sample.map_or(FeedUpdate::Ended, FeedUpdate::Event),
            _ = wait_closed(state_rx) => FeedUpdate::Disconnected,
        }
    }
}
