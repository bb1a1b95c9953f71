// control_panel/tests/connection_manager_integration_test.rs

mod common;

use common::{harness, next_event, wait_until, within, WAIT_LIMIT};
use control_panel::{ConnectionError, ConnectionEvent, ModeStore as _, PacketError};
use futures_util::SinkExt;
use robot_models::ws_payloads::{ChassisControl, MachineModeResponse, StopRequest, StopResponse};
use robot_models::{Channel, FaultCategory, OperatingMode, Service, StopCommand};
use robot_sim::SimRobot;
use rosbridge_utils::codec::{encode_op, receive_op};
use rosbridge_utils::RosbridgeOp;
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[tokio::test]
async fn connect_success_notifies_true_once() {
    let h = harness();
    let robot = SimRobot::start_local().await.unwrap();
    let mut events = h.manager.subscribe_events();

    h.manager.connect(&robot.url()).await.unwrap();

    assert!(h.manager.is_connected());
    assert_eq!(h.seen(), vec![true]);
    assert!(matches!(next_event(&mut events).await, ConnectionEvent::Connected { .. }));
    assert!(h
        .manager
        .remembered_address()
        .is_some_and(|address| address.starts_with(&robot.url())));
    assert_eq!(robot.call_args("/connection_establish"), vec![json!({"establish": 1})]);

    // 验证往返作为服务包记录
    let logs = h.manager.logger().get_today_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].name, "/connection_establish");
    assert!(logs[0].response_received);
}

#[tokio::test]
async fn silent_verification_never_reports_connected() {
    let h = harness();
    let robot = SimRobot::start_local().await.unwrap();
    robot.set_silent("/connection_establish", true);

    let result = h.manager.connect(&robot.url()).await;
    assert!(matches!(result, Err(ConnectionError::VerificationFailed(_))), "{:?}", result);
    assert!(!h.manager.is_connected());
    assert!(h.seen().is_empty());
    assert_eq!(h.manager.remembered_address(), None);

    // 未验证的会话上 publish 只记录错误日志，不会到达机器人
    h.manager.publish(Channel::Chassis, &ChassisControl::halt());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(robot.published("/chassis_control").is_empty());
}

#[tokio::test]
async fn negative_or_failed_establish_fails_verification() {
    let h = harness();
    let robot = SimRobot::start_local().await.unwrap();

    robot.set_establish_ack(0);
    let result = h.manager.connect(&robot.url()).await;
    assert!(matches!(result, Err(ConnectionError::VerificationFailed(_))), "{:?}", result);

    robot.set_establish_ack(1);
    robot.set_failing("/connection_establish", true);
    let result = h.manager.connect(&robot.url()).await;
    assert!(matches!(result, Err(ConnectionError::VerificationFailed(_))), "{:?}", result);

    assert!(h.seen().is_empty());
    assert!(!h.manager.is_connected());
}

#[tokio::test]
async fn newer_connect_supersedes_pending_attempt() {
    let h = harness();
    let slow = SimRobot::start_local().await.unwrap();
    slow.set_silent("/connection_establish", true);
    let good = SimRobot::start_local().await.unwrap();

    let manager = h.manager.clone();
    let slow_url = slow.url();
    let first = tokio::spawn(async move { manager.connect(&slow_url).await });
    wait_until("第一次连接发出验证请求", || slow.call_count("/connection_establish") == 1).await;

    h.manager.connect(&good.url()).await.unwrap();
    let first_result = within("第一次连接返回", first).await.unwrap();
    assert!(matches!(first_result, Err(ConnectionError::Superseded)), "{:?}", first_result);

    assert!(h.manager.is_connected());
    assert!(h
        .manager
        .remembered_address()
        .is_some_and(|address| address.starts_with(&good.url())));
    assert_eq!(h.seen(), vec![true]);
}

#[tokio::test]
async fn disconnect_is_idempotent_and_unadvertises() {
    let h = harness();
    let robot = SimRobot::start_local().await.unwrap();
    let mut events = h.manager.subscribe_events();

    h.manager.disconnect();
    assert!(h.seen().is_empty());

    h.manager.connect(&robot.url()).await.unwrap();
    h.manager.publish(Channel::Chassis, &ChassisControl::halt());
    wait_until("底盘消息到达", || !robot.published("/chassis_control").is_empty()).await;

    h.manager.disconnect();
    h.manager.disconnect();
    assert_eq!(h.seen(), vec![true, false]);
    assert!(!h.manager.is_connected());
    assert_eq!(h.manager.remembered_address(), None);

    assert!(matches!(next_event(&mut events).await, ConnectionEvent::Connected { .. }));
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
    assert!(events.try_recv().is_err());

    wait_until("撤销话题声明", || {
        robot
            .received()
            .iter()
            .any(|op| matches!(op, RosbridgeOp::Unadvertise { topic, .. } if topic == "/chassis_control"))
    })
    .await;
    wait_until("连接关闭", || robot.active_connections() == 0).await;
}

#[tokio::test]
async fn publish_right_after_connect_advertises_first() {
    let h = harness();
    let robot = SimRobot::start_local().await.unwrap();
    h.manager.connect(&robot.url()).await.unwrap();

    let control = ChassisControl {
        x_speed: 0.5,
        y_speed: 0.0,
        z_speed: 0.0,
    };
    h.manager.publish(Channel::Chassis, &control);
    h.manager.publish(Channel::Chassis, &control);
    wait_until("两条底盘消息到达", || robot.published("/chassis_control").len() == 2).await;

    let chassis_ops: Vec<&'static str> = robot
        .received()
        .iter()
        .filter_map(|op| match op {
            RosbridgeOp::Advertise { topic, .. } if topic == "/chassis_control" => Some("advertise"),
            RosbridgeOp::Publish { topic, .. } if topic == "/chassis_control" => Some("publish"),
            _ => None,
        })
        .collect();
    assert_eq!(chassis_ops, vec!["advertise", "publish", "publish"]);
    assert_eq!(
        robot.published("/chassis_control")[0],
        json!({"x_speed": 0.5, "y_speed": 0.0, "z_speed": 0.0})
    );

    let topic_entries = h
        .manager
        .logger()
        .get_today_logs()
        .into_iter()
        .filter(|entry| entry.name == "/chassis_control")
        .count();
    assert_eq!(topic_entries, 2);
}

#[tokio::test]
async fn call_reports_remote_and_malformed_responses() {
    let h = harness();
    let robot = SimRobot::start_local().await.unwrap();
    h.manager.connect(&robot.url()).await.unwrap();

    let request = StopRequest::from(StopCommand::Emergency);
    let ok: StopResponse = h.manager.call(Service::Stop, &request).await.unwrap();
    assert_eq!(ok.stop_ack, 1);

    let malformed = h.manager.call::<_, MachineModeResponse>(Service::Stop, &request).await;
    assert!(matches!(malformed, Err(ConnectionError::MalformedResponse { .. })), "{:?}", malformed);

    robot.set_failing("/stop", true);
    let remote = h.manager.call::<_, StopResponse>(Service::Stop, &request).await;
    assert!(matches!(remote, Err(ConnectionError::RemoteError { .. })), "{:?}", remote);
    let last = h.manager.logger().get_today_logs().pop().unwrap();
    assert_eq!(last.error, Some(PacketError::ResponseFailed));
}

#[tokio::test]
async fn silent_service_is_logged_as_no_response_once() {
    let h = harness();
    let robot = SimRobot::start_local().await.unwrap();
    h.manager.connect(&robot.url()).await.unwrap();
    robot.set_silent("/stop", true);

    let manager = h.manager.clone();
    let call = tokio::spawn(async move {
        manager
            .call::<_, StopResponse>(Service::Stop, &StopRequest::from(StopCommand::Clear))
            .await
    });

    let logger = h.manager.logger().clone();
    wait_until("无响应故障", || !logger.get_faults(false).is_empty()).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    let faults = logger.get_faults(true);
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].category, FaultCategory::NoResponse);
    assert_eq!(faults[0].source, "/stop");
    assert_eq!(logger.get_stats().no_response_count, 1);

    // 计时器只负责报告，调用本身一直等到链路拆除
    assert!(!call.is_finished());
    h.manager.disconnect();
    let result = within("在途调用结束", call).await.unwrap();
    assert!(matches!(result, Err(ConnectionError::NotConnected)), "{:?}", result);
}

#[tokio::test]
async fn reconnect_restores_remembered_mode_exactly_once() {
    let h = harness();
    let robot = SimRobot::start_local().await.unwrap();
    h.mode_store.store(OperatingMode::SemiAuto);
    let mut events = h.manager.subscribe_events();

    h.manager.connect(&robot.url()).await.unwrap();
    assert!(matches!(next_event(&mut events).await, ConnectionEvent::Connected { .. }));
    assert_eq!(robot.call_count("/machine_mode"), 0);

    robot.drop_connections();
    assert!(matches!(next_event(&mut events).await, ConnectionEvent::ConnectionLost { .. }));
    match next_event(&mut events).await {
        ConnectionEvent::Reconnected { resumed_mode, .. } => assert_eq!(resumed_mode, Some(OperatingMode::SemiAuto)),
        other => panic!("应收到 Reconnected 事件，实际为 {:?}", other),
    }

    assert!(h.manager.is_connected());
    assert_eq!(h.seen(), vec![true, false, true]);
    assert_eq!(robot.call_args("/machine_mode"), vec![json!({"mode_cmd": 2})]);
    assert_eq!(robot.current_mode(), Some(OperatingMode::SemiAuto));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(robot.call_count("/machine_mode"), 1);
    assert_eq!(robot.call_count("/connection_establish"), 2);
}

#[tokio::test]
async fn reconnect_without_remembered_mode_sends_no_mode_request() {
    let h = harness();
    let robot = SimRobot::start_local().await.unwrap();
    let mut events = h.manager.subscribe_events();
    h.manager.connect(&robot.url()).await.unwrap();
    next_event(&mut events).await;

    robot.drop_connections();
    next_event(&mut events).await;
    match next_event(&mut events).await {
        ConnectionEvent::Reconnected { resumed_mode, .. } => assert_eq!(resumed_mode, None),
        other => panic!("{:?}", other),
    }
    assert_eq!(robot.call_count("/machine_mode"), 0);
}

#[tokio::test]
async fn disconnect_stops_the_reconnect_loop() {
    let h = harness();
    let robot = SimRobot::start_local().await.unwrap();
    let mut events = h.manager.subscribe_events();
    h.manager.connect(&robot.url()).await.unwrap();
    next_event(&mut events).await;

    // 机器人不再应答验证，重连只能反复失败
    robot.set_silent("/connection_establish", true);
    robot.drop_connections();
    assert!(matches!(next_event(&mut events).await, ConnectionEvent::ConnectionLost { .. }));
    wait_until("至少一次重连尝试", || robot.call_count("/connection_establish") >= 2).await;

    h.manager.disconnect();
    assert_eq!(h.manager.remembered_address(), None);
    // 已入队的帧仍会发出，稍等再取基准
    tokio::time::sleep(Duration::from_millis(100)).await;
    let attempts = robot.call_count("/connection_establish");
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(robot.call_count("/connection_establish"), attempts);
    assert!(!h.manager.is_connected());
    // 断线时已经通知过 false，disconnect 不再重复通知
    assert_eq!(h.seen(), vec![true, false]);
}

#[tokio::test]
async fn link_loss_fails_in_flight_calls() {
    let h = harness();
    let robot = SimRobot::start_local().await.unwrap();
    h.manager.connect(&robot.url()).await.unwrap();
    robot.set_silent("/semi_mode", true);

    let manager = h.manager.clone();
    let call = tokio::spawn(async move {
        manager
            .call::<_, serde_json::Value>(Service::SemiMode, &json!({"blade_roller": 0}))
            .await
    });
    wait_until("调用到达机器人", || robot.call_count("/semi_mode") == 1).await;

    robot.drop_connections();
    let result = within("在途调用结束", call).await.unwrap();
    assert!(matches!(result, Err(ConnectionError::NotConnected)), "{:?}", result);
    h.manager.disconnect();
}

#[tokio::test]
async fn handshake_that_never_completes_times_out() {
    let h = harness();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // 接受 TCP 连接但从不回应 WebSocket 握手
    let _hold = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let result = h.manager.connect(&format!("ws://{}", addr)).await;
    assert!(
        matches!(result, Err(ConnectionError::ConnectTimeout { timeout_ms: 1_000 })),
        "{:?}",
        result
    );
    assert!(h.seen().is_empty());
}

#[tokio::test]
async fn refused_connection_is_reported_and_not_retried() {
    let h = harness();
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let result = h.manager.connect(&format!("ws://{}", addr)).await;
    assert!(matches!(result, Err(ConnectionError::ConnectFailed(_))), "{:?}", result);
    assert_eq!(h.manager.remembered_address(), None);
    assert!(h.seen().is_empty());
}

#[tokio::test]
async fn explicit_reconnect_closes_previous_session() {
    let h = harness();
    let first = SimRobot::start_local().await.unwrap();
    let second = SimRobot::start_local().await.unwrap();

    h.manager.connect(&first.url()).await.unwrap();
    h.manager.connect(&second.url()).await.unwrap();

    assert_eq!(h.seen(), vec![true, false, true]);
    wait_until("旧连接关闭", || first.active_connections() == 0).await;
    assert_eq!(second.active_connections(), 1);
}

/// 接受一个连接：应答验证请求后立即发送 Close 帧并断开。
async fn ack_then_close(listener: TcpListener) {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
    let Some(Ok(RosbridgeOp::CallService { id, service, .. })) = receive_op(&mut ws).await else {
        panic!("第一帧应为验证请求");
    };
    let ack = RosbridgeOp::service_response(id, &service, json!({"establish_ack": 1}), true);
    ws.send(encode_op(&ack).unwrap()).await.unwrap();
    let _ = ws.close(None).await;
}

#[tokio::test]
async fn link_closed_right_after_verification_never_stays_connected() {
    for _ in 0..10 {
        let h = harness();
        let mut events = h.manager.subscribe_events();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let peer = tokio::spawn(ack_then_close(listener));

        let result = h.manager.connect(&url).await;
        within("对端结束", peer).await.unwrap();
        wait_until("不再报告已连接", || !h.manager.is_connected()).await;

        match result {
            Ok(()) => {
                // 已报告连接，随后按意外断开处理
                assert!(matches!(next_event(&mut events).await, ConnectionEvent::Connected { .. }));
                assert!(matches!(next_event(&mut events).await, ConnectionEvent::ConnectionLost { .. }));
                assert_eq!(h.seen(), vec![true, false]);
            }
            Err(e) => {
                assert!(matches!(e, ConnectionError::VerificationFailed(_)), "{:?}", e);
                assert!(h.seen().is_empty());
                assert!(events.try_recv().is_err());
            }
        }

        h.manager.disconnect();
        assert!(!h.manager.is_connected());
        assert_ne!(h.seen().last(), Some(&true));
    }
}

#[tokio::test]
async fn superseded_attempt_drops_transport_that_opens_late() {
    let h = harness();
    let good = SimRobot::start_local().await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let slow_url = format!("ws://{}", listener.local_addr().unwrap());
    let (accepted_tx, accepted_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    // 先接受 TCP，放行后才完成 WebSocket 握手
    let slow_peer = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let _ = accepted_tx.send(());
        let _ = release_rx.await;
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        tokio::time::timeout(WAIT_LIMIT, receive_op(&mut ws)).await.unwrap()
    });

    let manager = h.manager.clone();
    let first = tokio::spawn(async move { manager.connect(&slow_url).await });
    within("慢速对端收到 TCP 连接", accepted_rx).await.unwrap();

    h.manager.connect(&good.url()).await.unwrap();
    release_tx.send(()).unwrap();

    let first_result = within("第一次连接返回", first).await.unwrap();
    assert!(matches!(first_result, Err(ConnectionError::Superseded)), "{:?}", first_result);
    let after_open = within("慢速对端结束", slow_peer).await.unwrap();
    assert!(!matches!(after_open, Some(Ok(_))), "被取代的传输上不应发出任何帧: {:?}", after_open);

    assert!(h.manager.is_connected());
    assert!(h
        .manager
        .remembered_address()
        .is_some_and(|address| address.starts_with(&good.url())));
    assert_eq!(h.seen(), vec![true]);
    assert_eq!(good.call_count("/connection_establish"), 1);
}
