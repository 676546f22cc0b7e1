// rust_websocket_utils/src/client/transport.rs

//! 客户端 WebSocket 传输层核心逻辑。
//!
//! 本模块负责建立与服务器的连接、发送文本帧，以及从接收端逐帧读取文本内容。
//! 帧内容的解析 (命令回复、通知) 不在这里进行，而是交给上层的消息分发器，
//! 因为按照协议约定，无法识别的帧只需丢弃，不应中断接收循环。

use log::{info, error, debug};
use tokio_tungstenite::{
    connect_async,
    WebSocketStream,
    tungstenite::protocol::Message,
    tungstenite::Error as TungsteniteError,
};
use url::Url;
use crate::error::WsError;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt,
    StreamExt,
};

/// `ClientWsStream` 类型别名，代表一个可能经过 TLS 加密的 TCP WebSocket 流。
pub type ClientWsStream = WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// `ClientConnection` 结构体代表一个活动的客户端 WebSocket 连接。
///
/// 它封装了发送端 (`SplitSink`) 和接收端 (`SplitStream`)，两者可以被拆开交给不同的任务。
pub struct ClientConnection {
    /// 用于向 WebSocket 服务器异步发送消息的 `Sink` (发送端)。
    pub ws_sender: SplitSink<ClientWsStream, Message>,
    /// 用于从 WebSocket 服务器异步接收消息的 `Stream` (接收端)。
    pub ws_receiver: SplitStream<ClientWsStream>,
}

impl ClientConnection {
    /// 发送一条原始文本帧。
    pub async fn send_text(&mut self, text: &str) -> Result<(), WsError> {
        send_text(&mut self.ws_sender, text).await
    }
}

/// 通过给定的发送端发送一条文本帧。
pub async fn send_text(ws_sender: &mut SplitSink<ClientWsStream, Message>, text: &str) -> Result<(), WsError> {
    debug!("客户端：准备发送文本帧: {}", text);
    ws_sender.send(Message::Text(text.to_string())).await?;
    Ok(())
}

/// 解析并校验 WebSocket URL，只接受 `ws` 与 `wss` 协议。
pub fn parse_ws_url(url_str: &str) -> Result<Url, WsError> {
    let parsed_url = Url::parse(url_str)
        .map_err(|e| WsError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", url_str, e)))?;
    match parsed_url.scheme() {
        "ws" | "wss" => Ok(parsed_url),
        other => Err(WsError::InvalidUrl(format!(
            "WebSocket URL '{}' 的协议必须是 ws 或 wss，实际为 '{}'",
            url_str, other
        ))),
    }
}

/// 异步连接到指定的 WebSocket 服务器。
///
/// # Arguments
/// * `url_str` - WebSocket 服务器的完整 URL 字符串 (例如 "ws://127.0.0.1:8080/ws" 或 "wss://example.com/api/v1/ws")。
///
/// # Returns
/// * `Result<ClientConnection, WsError>` - 成功时返回已拆分为发送端与接收端的连接；
///   URL 无效、连接失败或握手失败时返回相应的 `WsError`。
pub async fn connect_client(url_str: &str) -> Result<ClientConnection, WsError> {
    info!("客户端：开始尝试连接到 WebSocket 服务器，URL: {}", url_str);
    let parsed_url = parse_ws_url(url_str)?;

    match connect_async(parsed_url.as_str()).await {
        Ok((ws_stream, response)) => {
            info!("客户端：已成功连接到 {} (HTTP 状态码: {})", url_str, response.status());
            debug!("客户端：WebSocket 连接响应头: {:?}", response.headers());
            let (ws_sender, ws_receiver) = ws_stream.split();
            Ok(ClientConnection { ws_sender, ws_receiver })
        }
        Err(e) => {
            error!("客户端：连接到 {} 失败，错误: {}", url_str, e);
            Err(WsError::WebSocketProtocolError(e))
        }
    }
}

/// 从给定的接收流中异步读取下一条文本帧。
///
/// Ping/Pong 等控制帧由底层库处理，这里直接跳过。
///
/// # Returns
/// * `Some(Ok(text))`：收到一条文本帧。
/// * `Some(Err(WsError::Message))`：收到二进制帧；协议中不使用二进制帧，调用方可忽略后继续读取。
/// * `Some(Err(WsError::WebSocketProtocolError))`：底层传输错误，连接通常已不可用。
/// * `None`：连接已关闭 (收到 Close 帧或流已结束)。
pub async fn receive_text(
    ws_receiver: &mut SplitStream<ClientWsStream>,
) -> Option<Result<String, WsError>> {
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    debug!("客户端：收到原始文本帧，内容: '{}'", text);
                    break Some(Ok(text));
                }
                Message::Binary(bin) => {
                    debug!("客户端：收到原始二进制帧，长度: {} 字节", bin.len());
                    break Some(Err(WsError::Message(
                        "客户端收到了非预期的 WebSocket 二进制帧".to_string(),
                    )));
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // 由 tokio-tungstenite 自动处理
                }
                Message::Close(close_frame) => {
                    debug!("客户端：收到 Close 控制帧，详细信息: {:?}", close_frame);
                    break None;
                }
                Message::Frame(_) => {
                    debug!("客户端：收到一个非预期的底层原始 Frame，正在跳过。");
                }
            },
            Some(Err(e)) => match e {
                TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed => {
                    debug!("客户端：连接已关闭 (接收时检测到 ConnectionClosed 或 AlreadyClosed)。");
                    break None;
                }
                _ => {
                    error!("客户端：从 WebSocket 流接收消息时发生底层错误: {}", e);
                    break Some(Err(WsError::WebSocketProtocolError(e)));
                }
            },
            None => {
                debug!("客户端：WebSocket 接收流已结束。");
                break None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{auth_frame, InboundMessage, OutgoingCommand};
    use crate::server::transport::{ServerTransport, WsStream};
    use common_models::ws_payloads::{SerialNumberSearchPayload, SERIAL_NUMBER_SEARCH_COMMAND};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_parse_ws_url_accepts_only_websocket_schemes() {
        assert!(parse_ws_url("ws://127.0.0.1:16002/api/v1/ws").is_ok());
        assert!(parse_ws_url("wss://gw.example.com/api/v1/ws").is_ok());
        assert!(matches!(parse_ws_url("https://gw.example.com"), Err(WsError::InvalidUrl(_))));
        assert!(matches!(parse_ws_url("not a url"), Err(WsError::InvalidUrl(_))));
    }

    // 测试用的回复服务端：第一帧必须是认证帧，之后把每条命令帧的 id 作为 command_response_id 回显。
    async fn reply_server_handler(mut ws_stream: WsStream) {
        use futures_util::{SinkExt, StreamExt};
        let first = ws_stream.next().await;
        let authenticated = matches!(first, Some(Ok(Message::Text(ref t))) if t.starts_with("token:"));
        if !authenticated {
            error!("[测试回复服务端]：第一帧不是认证帧: {:?}", first);
            return;
        }
        while let Some(Ok(Message::Text(text))) = ws_stream.next().await {
            let request: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let reply = json!({
                "type": "COMMAND",
                "data": { "command_response_id": request["id"], "echo": request["serial_prefix"] }
            });
            if ws_stream.send(Message::Text(reply.to_string())).await.is_err() {
                break;
            }
        }
    }

    #[tokio::test]
    /// 集成测试：客户端连接、发送认证帧与命令帧，并收到带有相同 ID 的回复。
    async fn test_client_connect_authenticate_and_receive_reply() {
        let _ = env_logger::builder().is_test(true).try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("无法绑定到随机端口");
        let addr = listener.local_addr().expect("无法获取本地监听地址");
        let server_handle = tokio::spawn(ServerTransport::serve(listener, |ws_stream, _peer| {
            reply_server_handler(ws_stream)
        }));

        let mut client_conn = connect_client(&format!("ws://{}", addr)).await.expect("客户端连接测试服务器失败");
        client_conn.send_text(&auth_frame("test-token")).await.expect("发送认证帧失败");

        let command = OutgoingCommand::new(41, SERIAL_NUMBER_SEARCH_COMMAND, &SerialNumberSearchPayload {
            serial_prefix: "aabb".to_string(),
        })
        .unwrap();
        client_conn.send_text(&command.to_text().unwrap()).await.expect("发送命令帧失败");

        let text = match timeout(Duration::from_secs(5), receive_text(&mut client_conn.ws_receiver)).await {
            Ok(Some(Ok(text))) => text,
            other => panic!("[测试客户端]：未收到预期的回复帧: {:?}", other.map(|o| o.map(|r| r.is_ok()))),
        };
        match InboundMessage::parse(&text).expect("回复帧应能解析") {
            InboundMessage::Command(reply) => {
                assert_eq!(reply.command_response_id, 41);
                assert_eq!(reply.fields["echo"], "aabb");
            }
            other => panic!("预期为 COMMAND 帧，实际为: {:?}", other),
        }

        server_handle.abort();
    }

    #[tokio::test]
    async fn test_connect_client_reports_refused_connection() {
        // 先绑定再释放，得到一个当前无人监听的端口
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect_client(&format!("ws://{}", addr)).await;
        assert!(matches!(result, Err(WsError::WebSocketProtocolError(_))), "连接无人监听的端口应失败");
    }
}
