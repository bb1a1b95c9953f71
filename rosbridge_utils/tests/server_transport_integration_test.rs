// rosbridge_utils/tests/server_transport_integration_test.rs

use futures_util::{SinkExt, StreamExt};
use log::{info, LevelFilter};
use rosbridge_utils::codec::{encode_op, receive_op};
use rosbridge_utils::server::transport::{ServerTransport, WsStream};
use rosbridge_utils::RosbridgeOp;
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

fn init_test_logger() {
    let _ = env_logger::builder().filter_level(LevelFilter::Info).is_test(true).try_init();
}

/// 收到 advertise 后把话题名通过通道报告给测试主流程，收到 publish 后回一条 status。
async fn recording_handler(ws_stream: WsStream, peer_addr: SocketAddr, seen: mpsc::UnboundedSender<String>) {
    info!("[测试服务端] 新连接: {}", peer_addr);
    let (mut tx, mut rx) = ws_stream.split();
    while let Some(result) = receive_op(&mut rx).await {
        match result {
            Ok(RosbridgeOp::Advertise { topic, .. }) => {
                let _ = seen.send(topic);
            }
            Ok(RosbridgeOp::Publish { topic, .. }) => {
                let status = RosbridgeOp::Status {
                    level: "info".to_string(),
                    msg: format!("published {}", topic),
                    id: None,
                };
                if tx.send(encode_op(&status).unwrap()).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => info!("[测试服务端] 忽略无法解析的帧: {}", e),
        }
    }
    info!("[测试服务端] 连接 {} 结束", peer_addr);
}

#[tokio::test]
async fn serves_multiple_clients_on_an_ephemeral_port() {
    init_test_logger();

    let server = ServerTransport::bind("127.0.0.1:0").await.expect("绑定端口失败");
    let addr = server.local_addr().unwrap();
    assert_ne!(addr.port(), 0);

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let server_task = tokio::spawn(server.serve(move |ws, peer| recording_handler(ws, peer, seen_tx.clone())));

    let url = format!("ws://{}", addr);
    for topic in ["/pump_control", "/arm_control"] {
        let (mut ws, _) = connect_async(url.as_str()).await.expect("客户端连接失败");
        ws.send(Message::Text(
            RosbridgeOp::advertise(topic, "web_connect/msg/Pump").to_json().unwrap(),
        ))
        .await
        .unwrap();
        let reported = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .expect("服务端未在 5 秒内处理 advertise")
            .unwrap();
        assert_eq!(reported, topic);
        ws.close(None).await.unwrap();
    }

    server_task.abort();
}

#[tokio::test]
async fn garbage_frames_do_not_end_the_session() {
    init_test_logger();

    let server = ServerTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let (seen_tx, _seen_rx) = mpsc::unbounded_channel();
    let server_task = tokio::spawn(server.serve(move |ws, peer| recording_handler(ws, peer, seen_tx.clone())));

    let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    ws.send(Message::Text("{ not json".to_string())).await.unwrap();
    let publish = RosbridgeOp::publish("/chassis_control", &json!({"x_speed": 0.1, "y_speed": 0.0, "z_speed": 0.0}))
        .unwrap();
    ws.send(Message::Text(publish.to_json().unwrap())).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), receive_op(&mut ws))
        .await
        .expect("等待 status 帧超时")
        .expect("连接意外关闭")
        .unwrap();
    match reply {
        RosbridgeOp::Status { msg, .. } => assert_eq!(msg, "published /chassis_control"),
        other => panic!("应收到 status 帧，实际为 {:?}", other),
    }

    server_task.abort();
}

#[tokio::test]
async fn bind_reports_address_in_use() {
    init_test_logger();

    let first = ServerTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = first.local_addr().unwrap().to_string();
    assert!(ServerTransport::bind(&addr).await.is_err());
}
