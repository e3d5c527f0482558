use super::*;
use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use shared::{
    domain::RequestId,
    protocol::{events, EventFrame, MusicianRequest},
};
use tokio::{net::TcpListener, sync::mpsc, time::timeout};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimal matching backend: records every inbound frame and answers
/// `new_event_request` with a `musician_accepted` for the same request id.
async fn spawn_match_server() -> Result<(String, mpsc::UnboundedReceiver<EventFrame>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();

    let app = Router::new().route(
        "/ws",
        get(move |ws: WebSocketUpgrade| {
            let frames_tx = frames_tx.clone();
            async move { ws.on_upgrade(move |socket| serve_matcher(socket, frames_tx)) }
        }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok((format!("http://{addr}"), frames_rx))
}

async fn serve_matcher(mut socket: WebSocket, frames: mpsc::UnboundedSender<EventFrame>) {
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<EventFrame>(&text) else {
            continue;
        };
        let _ = frames.send(frame.clone());

        if frame.event == events::NEW_EVENT_REQUEST {
            let request_id = frame.data.get("id").cloned().unwrap_or(Value::Null);
            let reply = EventFrame::new(
                events::MUSICIAN_ACCEPTED,
                json!({
                    "requestId": request_id,
                    "musician": { "id": "m1", "name": "Carlos", "instrument": "piano" },
                }),
            );
            let Ok(text) = serde_json::to_string(&reply) else {
                continue;
            };
            if socket.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    }
}

fn sample_request(id: &str) -> MusicianRequest {
    MusicianRequest {
        id: RequestId::from(id),
        instrument: "piano".to_string(),
        event_description: Some("wedding reception".to_string()),
        budget: Some(350.0),
        location: None,
        event_date: None,
        requested_by: None,
    }
}

#[tokio::test]
async fn connect_rejects_unknown_url_schemes() {
    let err = WsEventChannel::connect("ftp://localhost:9")
        .await
        .expect_err("must reject");
    assert!(err.to_string().contains("server_url must start with"));
}

#[tokio::test]
async fn emitted_frames_reach_the_server() {
    let (server_url, mut frames) = spawn_match_server().await.expect("spawn server");
    let channel = WsEventChannel::connect(&server_url).await.expect("connect");

    let request = sample_request("r1");
    channel.emit(
        events::NEW_EVENT_REQUEST,
        serde_json::to_value(&request).expect("request payload"),
    );

    let frame = timeout(RECV_TIMEOUT, frames.recv())
        .await
        .expect("frame in time")
        .expect("frame");
    assert_eq!(frame.event, events::NEW_EVENT_REQUEST);
    assert_eq!(frame.data["id"], "r1");
    assert_eq!(frame.data["budget"], 350.0);
}

#[tokio::test]
async fn inbound_events_dispatch_to_registered_handlers_until_off() {
    let (server_url, _frames) = spawn_match_server().await.expect("spawn server");
    let channel = WsEventChannel::connect(&server_url).await.expect("connect");

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();
    // Keep a sender alive independent of the handler so the channel stays open
    // after `off` drops the handler; otherwise `recv` would observe a closed
    // channel rather than the intended absence of further events.
    let _seen_guard = seen_tx.clone();
    let listener = channel.on(
        events::MUSICIAN_ACCEPTED,
        Arc::new(move |payload| {
            let _ = seen_tx.send(payload);
        }),
    );

    let request = sample_request("r2");
    channel.emit(
        events::NEW_EVENT_REQUEST,
        serde_json::to_value(&request).expect("request payload"),
    );

    let payload = timeout(RECV_TIMEOUT, seen_rx.recv())
        .await
        .expect("acceptance in time")
        .expect("acceptance");
    assert_eq!(payload["requestId"], "r2");
    assert_eq!(payload["musician"]["name"], "Carlos");

    channel.off(events::MUSICIAN_ACCEPTED, listener);
    channel.emit(
        events::NEW_EVENT_REQUEST,
        serde_json::to_value(&request).expect("request payload"),
    );
    let silence = timeout(Duration::from_millis(300), seen_rx.recv()).await;
    assert!(silence.is_err(), "handler fired after off");
}

#[tokio::test]
async fn full_search_resolves_found_over_the_websocket() {
    let (server_url, _frames) = spawn_match_server().await.expect("spawn server");
    let channel = WsEventChannel::connect(&server_url).await.expect("connect");
    let coordinator = RequestCoordinator::new(channel);
    coordinator.activate();

    let mut updates = coordinator.subscribe_updates();
    coordinator.submit(&sample_request("r3"));

    let found = timeout(RECV_TIMEOUT, async {
        loop {
            let state = updates.recv().await.expect("update");
            if state.status == RequestStatus::Found {
                break state;
            }
        }
    })
    .await
    .expect("found in time");

    assert_eq!(
        found.musician.as_ref().map(|musician| musician.name.as_str()),
        Some("Carlos")
    );
    assert_eq!(found.current_request_id, Some(RequestId::from("r3")));
    coordinator.dispose();
}

#[tokio::test]
async fn emit_after_close_is_dropped() {
    let (server_url, mut frames) = spawn_match_server().await.expect("spawn server");
    let channel = WsEventChannel::connect(&server_url).await.expect("connect");

    channel.close();
    channel.emit(events::NEW_EVENT_REQUEST, json!({ "id": "r4" }));

    let silence = timeout(Duration::from_millis(300), frames.recv()).await;
    assert!(silence.is_err(), "frame delivered after close");
}
