// rust_websocket_utils/src/server/transport.rs

//! 包含服务端 WebSocket 监听、接受连接和握手逻辑。
//!
//! 控制台本身只作为客户端运行；这里的服务端传输主要用于在测试中搭建一个本地的模拟后端，
//! 以验证认证帧、命令帧与回复帧的完整往返。

use crate::error::WsError;
use log::{info, error};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, WebSocketStream};

/// `WsStream` 是一个类型别名，代表经过 WebSocket 握手后的 TCP 流。
pub type WsStream = WebSocketStream<TcpStream>;

/// `ServerTransport` 结构体负责处理 WebSocket 服务端的监听和连接接受。
pub struct ServerTransport;

impl ServerTransport {
    /// 在一个已经绑定好的监听器上接受连接，此函数将无限期运行。
    ///
    /// 测试中通常先绑定 `127.0.0.1:0` 取得实际端口，再把监听器交给此函数，避免端口竞争。
    ///
    /// # Arguments
    /// * `on_connect`: 每个握手成功的连接都会在独立的 Tokio 任务中调用此回调。
    pub async fn serve<F, Fut>(listener: TcpListener, on_connect: F) -> Result<(), WsError>
    where
        F: Fn(WsStream, SocketAddr) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if let Ok(local_addr) = listener.local_addr() {
            info!("WebSocket 服务器正在监听地址: {}", local_addr);
        }

        loop {
            match listener.accept().await {
                Ok((tcp_stream, peer_addr)) => {
                    info!("从 {} 接受了新的 TCP 连接", peer_addr);
                    let on_connect_callback = on_connect.clone();

                    // 为每个连接创建一个新的 Tokio 任务来处理 WebSocket 握手和后续逻辑
                    tokio::spawn(async move {
                        match accept_async(tcp_stream).await {
                            Ok(ws_stream) => {
                                info!("与 {} 的 WebSocket 握手成功", peer_addr);
                                on_connect_callback(ws_stream, peer_addr).await;
                            }
                            Err(e) => {
                                error!("与 {} 的 WebSocket 握手失败: {}", peer_addr, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    // 单个连接接受失败不影响服务器继续运行
                    error!("接受 TCP 连接失败: {}。服务器将继续运行。", e);
                }
            }
        }
    }
}
