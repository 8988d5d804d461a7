use futures::{SinkExt as _, StreamExt as _};
use std::time::Duration;
use tiller_api::{
    AppSnapshot, ClientAction, ThreadSnapshot, TurnState, WorkspaceId, WsClientMessage,
    WsServerMessage,
};
use tokio_tungstenite::tungstenite::Message;

mod support;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect_ws(addr: std::net::SocketAddr) -> WsStream {
    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/events"))
        .await
        .expect("ws connect");
    socket
}

async fn recv_ws_msg(socket: &mut WsStream, timeout: Duration) -> WsServerMessage {
    loop {
        let next = tokio::time::timeout(timeout, socket.next())
            .await
            .expect("timed out waiting for ws message")
            .expect("websocket stream ended")
            .expect("websocket recv failed");
        let Message::Text(text) = next else { continue };
        return serde_json::from_str(&text).expect("failed to parse ws server message");
    }
}

async fn send_action(socket: &mut WsStream, request_id: &str, action: ClientAction) {
    let message = WsClientMessage::Action {
        request_id: request_id.to_owned(),
        action: Box::new(action),
    };
    socket
        .send(Message::Text(
            serde_json::to_string(&message).expect("encode").into(),
        ))
        .await
        .expect("ws send");
}

async fn await_ack(socket: &mut WsStream, request_id: &str) {
    loop {
        match recv_ws_msg(socket, Duration::from_secs(5)).await {
            WsServerMessage::Ack { request_id: id, .. } if id == request_id => return,
            WsServerMessage::Error { message, .. } => panic!("ws error: {message}"),
            _ => {}
        }
    }
}

async fn fetch_app(addr: std::net::SocketAddr) -> AppSnapshot {
    reqwest::get(format!("http://{addr}/api/app"))
        .await
        .expect("GET /api/app")
        .json()
        .await
        .expect("parse app snapshot")
}

#[tokio::test]
async fn health_endpoint_responds() {
    let (addr, _services) = support::start_test_server().await;
    let body = reqwest::get(format!("http://{addr}/api/health"))
        .await
        .expect("GET /api/health")
        .text()
        .await
        .expect("read body");
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn register_workspace_appears_in_app_snapshot() {
    let (addr, _services) = support::start_test_server().await;
    let mut socket = connect_ws(addr).await;
    assert!(matches!(
        recv_ws_msg(&mut socket, Duration::from_secs(5)).await,
        WsServerMessage::Hello { .. }
    ));

    send_action(
        &mut socket,
        "req_1",
        ClientAction::RegisterWorkspace {
            name: "demo".to_owned(),
            root_path: "/tmp/demo".to_owned(),
        },
    )
    .await;
    await_ack(&mut socket, "req_1").await;

    let snapshot = fetch_app(addr).await;
    assert_eq!(snapshot.workspaces.len(), 1);
    assert_eq!(snapshot.workspaces[0].name, "demo");
}

#[tokio::test]
async fn composer_submission_runs_a_turn_to_completion() {
    let (addr, _services) = support::start_test_server().await;
    let mut socket = connect_ws(addr).await;
    recv_ws_msg(&mut socket, Duration::from_secs(5)).await;

    send_action(
        &mut socket,
        "req_1",
        ClientAction::RegisterWorkspace {
            name: "demo".to_owned(),
            root_path: "/tmp/demo".to_owned(),
        },
    )
    .await;
    await_ack(&mut socket, "req_1").await;

    send_action(
        &mut socket,
        "req_2",
        ClientAction::SubmitComposer {
            workspace_id: WorkspaceId(1),
            thread_id: None,
            text: "hello".to_owned(),
            attachments: Vec::new(),
        },
    )
    .await;
    await_ack(&mut socket, "req_2").await;

    let mut thread_id = None;
    for _ in 0..100 {
        let snapshot = fetch_app(addr).await;
        if let Some(workspace) = snapshot.workspaces.first()
            && let Some(meta) = workspace.threads.first()
            && meta.turn == TurnState::Completed
        {
            thread_id = Some(meta.thread_id.clone());
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let thread_id = thread_id.expect("turn should complete");

    let thread: ThreadSnapshot = reqwest::get(format!(
        "http://{addr}/api/workspaces/1/threads/{thread_id}"
    ))
    .await
    .expect("GET thread")
    .json()
    .await
    .expect("parse thread snapshot");

    assert!(thread.entries.iter().any(|entry| matches!(
        entry,
        tiller_api::ThreadEntrySnapshot::UserMessage { text, .. } if text == "hello"
    )));
    assert!(thread.entries.iter().any(|entry| matches!(
        entry,
        tiller_api::ThreadEntrySnapshot::AgentItem { item }
            if item.kind == tiller_api::AgentItemKind::AgentMessage
    )));
    assert!(thread.usage.is_some());
}
