// FleetConsole/src/ws_client/dispatcher.rs

//! 入站消息分发器。
//!
//! 对每一条入站文本帧：尝试按协议信封解析；解析失败的帧静默丢弃。
//! `NOTIFICATION` 帧广播给该连接上的所有监听者；`COMMAND` 帧交给挂起命令追踪器，
//! 按 `command_response_id` 解决对应的等待者，未匹配的回复同样被忽略。

use common_models::enums::ChannelKind;
use log::{debug, trace};
use rust_websocket_utils::message::InboundMessage;
use std::sync::Arc;

use crate::event::{ListenerRegistry, Notification};
use crate::ws_client::pending::PendingCommandTracker;

/// 一条入站帧的处理结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 通知已广播，`delivered` 为收到通知的监听者数量。
    Notification { delivered: usize },
    /// 命令回复已交给对应的等待者。
    Resolved(u64),
    /// 命令回复的 ID 不在挂起集合中，已忽略。
    Unmatched(u64),
    /// 无法识别的帧，已忽略。
    Ignored,
}

/// 单个频道连接的消息分发器。
#[derive(Debug)]
pub struct MessageDispatcher {
    channel: ChannelKind,
    tracker: Arc<PendingCommandTracker>,
    listeners: Arc<ListenerRegistry>,
}

impl MessageDispatcher {
    pub fn new(channel: ChannelKind, tracker: Arc<PendingCommandTracker>, listeners: Arc<ListenerRegistry>) -> Self {
        Self { channel, tracker, listeners }
    }

    /// 处理一条入站文本帧。此方法从不失败。
    pub fn handle_frame(&self, text: &str) -> DispatchOutcome {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("[{}] 丢弃无法识别的入站帧: {}", self.channel, e);
                return DispatchOutcome::Ignored;
            }
        };

        match message {
            InboundMessage::Notification(data) => {
                let delivered = self.listeners.broadcast(&Notification::new(self.channel, data));
                trace!("[{}] 通知已投递给 {} 个监听者。", self.channel, delivered);
                DispatchOutcome::Notification { delivered }
            }
            InboundMessage::Command(reply) => {
                let id = reply.command_response_id;
                if self.tracker.resolve(reply) {
                    debug!("[{}] 命令 {} 已收到回复。", self.channel, id);
                    DispatchOutcome::Resolved(id)
                } else {
                    debug!("[{}] 忽略未匹配的命令回复 (ID: {})。", self.channel, id);
                    DispatchOutcome::Unmatched(id)
                }
            }
        }
    }

    pub fn tracker(&self) -> &Arc<PendingCommandTracker> {
        &self.tracker
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }
}
