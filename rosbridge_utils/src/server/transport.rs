// rosbridge_utils/src/server/transport.rs

//! 服务端 WebSocket 监听、接受连接与派发逻辑。

use log::{error, info};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::error::WsError;

/// 经过 WebSocket 握手后的服务端 TCP 流。
pub type WsStream = WebSocketStream<TcpStream>;

/// 已绑定端口、尚未开始接受连接的服务端。
///
/// 先 `bind` 再 `serve` 的两段式设计让调用方可以绑定 `127.0.0.1:0`，
/// 通过 `local_addr` 取得实际端口后再启动服务。
pub struct ServerTransport {
    listener: TcpListener,
}

impl ServerTransport {
    /// 绑定监听地址。
    pub async fn bind(addr: &str) -> Result<Self, WsError> {
        let listener = TcpListener::bind(addr).await?;
        info!("[rosbridge 服务端] 已绑定监听地址: {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    /// 实际监听的地址 (绑定 0 端口时用于获取分配到的端口)。
    pub fn local_addr(&self) -> Result<SocketAddr, WsError> {
        Ok(self.listener.local_addr()?)
    }

    /// 持续接受连接。
    ///
    /// 每个 TCP 连接在独立任务中完成 WebSocket 握手，握手成功后调用 `on_connect`。
    /// 握手失败或单次 accept 失败只记录日志，不会终止监听循环。
    /// 本函数不会主动返回，停止服务请 abort 其所在任务。
    pub async fn serve<F, Fut>(self, on_connect: F) -> Result<(), WsError>
    where
        F: Fn(WsStream, SocketAddr) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.listener.accept().await {
                Ok((tcp_stream, peer_addr)) => {
                    info!("[rosbridge 服务端] 接受了来自 {} 的 TCP 连接", peer_addr);
                    let on_connect_callback = on_connect.clone();
                    tokio::spawn(async move {
                        match accept_async(tcp_stream).await {
                            Ok(ws_stream) => {
                                info!("[rosbridge 服务端] 与 {} 的 WebSocket 握手成功", peer_addr);
                                on_connect_callback(ws_stream, peer_addr).await;
                            }
                            Err(e) => {
                                error!("[rosbridge 服务端] 与 {} 的 WebSocket 握手失败: {}", peer_addr, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("[rosbridge 服务端] 接受 TCP 连接失败: {}。服务器将继续运行。", e);
                }
            }
        }
    }
}
