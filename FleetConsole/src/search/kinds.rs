// FleetConsole/src/search/kinds.rs

//! 三种防抖搜索的命令、频道、负载与回复提取规则。

use common_models::enums::ChannelKind;
use common_models::ws_payloads::{
    AddressCompletionPayload, AddressCompletionReply, LocationRecord, SerialNumberSearchPayload,
    SerialNumberSearchReply, SubscriberRecord, SubscriberSearchPayload, SubscriberSearchReply,
    ADDRESS_COMPLETION_COMMAND, SERIAL_NUMBER_SEARCH_COMMAND, SUBSCRIBER_SEARCH_COMMAND,
};
use rust_websocket_utils::error::WsError;
use rust_websocket_utils::message::CommandReply;
use serde::Serialize;
use std::fmt::Debug;

use crate::config::SearchConfig;
use crate::validation::is_serial_number_fragment;

/// 一种搜索的静态描述。
pub trait SearchKind: Send + Sync + 'static {
    /// 结果列表中的单项。
    type Item: Clone + Debug + PartialEq + Send + Sync + 'static;
    /// 请求负载。
    type Payload: Serialize;

    /// 命令名称。
    const COMMAND: &'static str;
    /// 命令发往的频道。
    const CHANNEL: ChannelKind;

    /// 触发搜索所需的最小输入长度 (按字符计)。
    fn min_length(config: &SearchConfig) -> usize;

    /// 输入是否允许发起搜索。不被接受的输入与过短的输入处理方式相同。
    fn accepts(_query: &str) -> bool {
        true
    }

    fn payload(query: &str) -> Self::Payload;

    /// 从回复中取出结果列表。
    fn extract(reply: &CommandReply) -> Result<Vec<Self::Item>, WsError>;
}

/// 按前缀搜索设备序列号 (controller 频道)。
#[derive(Debug, Clone, Copy)]
pub struct SerialNumberSearch;

impl SearchKind for SerialNumberSearch {
    type Item = String;
    type Payload = SerialNumberSearchPayload;

    const COMMAND: &'static str = SERIAL_NUMBER_SEARCH_COMMAND;
    const CHANNEL: ChannelKind = ChannelKind::Controller;

    fn min_length(config: &SearchConfig) -> usize {
        config.serial_min_length
    }

    fn accepts(query: &str) -> bool {
        is_serial_number_fragment(query)
    }

    fn payload(query: &str) -> SerialNumberSearchPayload {
        SerialNumberSearchPayload { serial_prefix: query.to_string() }
    }

    fn extract(reply: &CommandReply) -> Result<Vec<String>, WsError> {
        Ok(reply.deserialize_fields::<SerialNumberSearchReply>()?.serial_numbers)
    }
}

/// 按邮箱或名称搜索订阅者 (security 频道)。
#[derive(Debug, Clone, Copy)]
pub struct SubscriberSearch;

impl SearchKind for SubscriberSearch {
    type Item = SubscriberRecord;
    type Payload = SubscriberSearchPayload;

    const COMMAND: &'static str = SUBSCRIBER_SEARCH_COMMAND;
    const CHANNEL: ChannelKind = ChannelKind::Security;

    fn min_length(config: &SearchConfig) -> usize {
        config.subscriber_min_length
    }

    fn payload(query: &str) -> SubscriberSearchPayload {
        SubscriberSearchPayload::for_query(query)
    }

    fn extract(reply: &CommandReply) -> Result<Vec<SubscriberRecord>, WsError> {
        Ok(reply.deserialize_fields::<SubscriberSearchReply>()?.users)
    }
}

/// 地址补全 (provisioning 频道)。
#[derive(Debug, Clone, Copy)]
pub struct LocationSearch;

impl SearchKind for LocationSearch {
    type Item = LocationRecord;
    type Payload = AddressCompletionPayload;

    const COMMAND: &'static str = ADDRESS_COMPLETION_COMMAND;
    const CHANNEL: ChannelKind = ChannelKind::Provisioning;

    fn min_length(config: &SearchConfig) -> usize {
        config.location_min_length
    }

    fn payload(query: &str) -> AddressCompletionPayload {
        AddressCompletionPayload { address: query.to_string() }
    }

    fn extract(reply: &CommandReply) -> Result<Vec<LocationRecord>, WsError> {
        Ok(reply.deserialize_fields::<AddressCompletionReply>()?.results)
    }
}
