// End-to-end tests: an in-process signaling server, two session clients and
// a stub storage sink, exercising join, negotiation, synchronized recording
// and chunk upload without any external services.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use warp::Filter;

use studio_core::api::{routes, ApiContext};
use studio_core::config::UploadConfig;
use studio_core::peer::PeerLinkState;
use studio_core::recording::{
    CaptureConstraints, CaptureSource, MediaType, RecorderConfig, SyntheticCapture,
};
use studio_core::session::{SessionConfig, SessionEvent, SessionOrchestrator};
use studio_core::signaling::{ParticipantRole, SignalingHub};
use studio_core::tokens::GuestTokenService;

/// Start a hub server on an ephemeral port; returns its host:port
async fn spawn_server() -> (String, Arc<GuestTokenService>) {
    let hub = SignalingHub::new(8, Duration::from_secs(15));
    let _sweeper = hub.spawn_liveness_sweeper();
    let tokens = GuestTokenService::new();
    let ctx = Arc::new(ApiContext {
        hub,
        tokens: tokens.clone(),
        session_service: None,
        start_countdown_ms: 300,
        default_max_participants: 8,
        public_origin: "http://localhost:8080".to_string(),
        token_validity: Duration::from_secs(3600),
    });
    let (addr, server) = warp::serve(routes(ctx)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (format!("{}", addr), tokens)
}

/// Storage sink stub collecting raw multipart bodies
async fn spawn_storage() -> (String, Arc<Mutex<Vec<String>>>) {
    let bodies: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let store = bodies.clone();
    let route = warp::path("chunks")
        .and(warp::post())
        .and(warp::body::bytes())
        .map(move |body: warp::hyper::body::Bytes| {
            store
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(&body).to_string());
            warp::reply::with_status("ok", warp::http::StatusCode::OK)
        });
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (format!("http://{}/chunks", addr), bodies)
}

/// Pull one multipart text field out of a raw body
fn extract_field(body: &str, name: &str) -> Option<String> {
    let marker = format!("name=\"{}\"", name);
    let start = body.find(&marker)?;
    let rest = &body[start..];
    let value_start = rest.find("\r\n\r\n")? + 4;
    let rest = &rest[value_start..];
    let value_end = rest.find("\r\n")?;
    Some(rest[..value_end].to_string())
}

fn capture_factory() -> studio_core::session::CaptureFactory {
    Box::new(|| {
        Ok(Box::new(SyntheticCapture::new(MediaType::Video)) as Box<dyn CaptureSource>)
    })
}

fn session_config(
    server: &str,
    room_id: &str,
    participant_id: &str,
    role: ParticipantRole,
    token: Option<String>,
    upload_endpoint: &str,
) -> SessionConfig {
    SessionConfig {
        server_url: format!("ws://{}/session", server),
        room_id: room_id.to_string(),
        participant_id: participant_id.to_string(),
        role,
        display_name: Some(format!("{} display", participant_id)),
        invite_token: token,
        media: CaptureConstraints::default(),
        recorder: RecorderConfig {
            slice_duration: Duration::from_millis(400),
            restart_delay: Duration::from_millis(20),
        },
        upload: UploadConfig {
            endpoint: upload_endpoint.to_string(),
            max_attempts: 3,
            retry_base_delay_ms: 50,
            concurrency: 4,
            timeout_secs: 10,
        },
        heartbeat_interval: Duration::from_secs(2),
    }
}

async fn issue_token(server: &str, room_id: &str) -> String {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/session/token", server))
        .json(&json!({ "room_id": room_id }))
        .send()
        .await
        .expect("token request");
    assert!(response.status().is_success());
    let grant: serde_json::Value = response.json().await.unwrap();
    grant["token"].as_str().unwrap().to_string()
}

async fn wait_for_event<F>(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    what: &str,
    mut predicate: F,
) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

#[tokio::test]
async fn test_health_and_config_endpoints() {
    let (server, _tokens) = spawn_server().await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("http://{}/session/health", server))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");

    let config: serde_json::Value = client
        .get(format!("http://{}/session/config", server))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["default_max_participants"], 8);
    assert_eq!(config["start_countdown_ms"], 300);
}

#[tokio::test]
async fn test_guest_token_is_single_use() {
    let (server, _tokens) = spawn_server().await;
    let token = issue_token(&server, "room-1").await;
    let url = format!("ws://{}/session", server);

    // host opens the room
    let (host_socket, _) = connect_async(url.as_str()).await.unwrap();
    let (mut host_write, mut host_read) = host_socket.split();
    host_write
        .send(Message::Text(
            json!({
                "type": "join_room",
                "room_id": "room-1",
                "participant_id": "host-1",
                "role": "host",
                "name": null,
                "token": null,
            })
            .to_string(),
        ))
        .await
        .unwrap();
    let reply = timeout(Duration::from_secs(5), host_read.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let reply: serde_json::Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert_eq!(reply["type"], "room_joined");

    // first guest use succeeds
    let (guest_socket, _) = connect_async(url.as_str()).await.unwrap();
    let (mut guest_write, mut guest_read) = guest_socket.split();
    guest_write
        .send(Message::Text(
            json!({
                "type": "join_room",
                "room_id": "room-1",
                "participant_id": "guest-1",
                "role": "guest",
                "name": "Guest One",
                "token": token,
            })
            .to_string(),
        ))
        .await
        .unwrap();
    let reply = timeout(Duration::from_secs(5), guest_read.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let reply: serde_json::Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert_eq!(reply["type"], "room_joined");

    // the same token is rejected as already used
    let (second_socket, _) = connect_async(url.as_str()).await.unwrap();
    let (mut second_write, mut second_read) = second_socket.split();
    second_write
        .send(Message::Text(
            json!({
                "type": "join_room",
                "room_id": "room-1",
                "participant_id": "guest-2",
                "role": "guest",
                "name": null,
                "token": token,
            })
            .to_string(),
        ))
        .await
        .unwrap();
    let reply = timeout(Duration::from_secs(5), second_read.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let reply: serde_json::Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert_eq!(reply["type"], "error");
    assert!(reply["message"]
        .as_str()
        .unwrap()
        .contains("already been used"));
}

#[tokio::test]
async fn test_guest_without_token_is_rejected() {
    let (server, _tokens) = spawn_server().await;
    let url = format!("ws://{}/session", server);

    let (socket, _) = connect_async(url.as_str()).await.unwrap();
    let (mut write, mut read) = socket.split();
    write
        .send(Message::Text(
            json!({
                "type": "join_room",
                "room_id": "room-1",
                "participant_id": "guest-1",
                "role": "guest",
                "name": null,
                "token": null,
            })
            .to_string(),
        ))
        .await
        .unwrap();
    let reply = timeout(Duration::from_secs(5), read.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let reply: serde_json::Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().contains("token"));
}

#[tokio::test]
async fn test_later_joiner_offers_and_both_sides_negotiate() {
    let (server, _tokens) = spawn_server().await;
    let (storage, _bodies) = spawn_storage().await;
    let token = issue_token(&server, "room-neg").await;

    let (host, mut host_events) = SessionOrchestrator::join(
        session_config(&server, "room-neg", "host-1", ParticipantRole::Host, None, &storage),
        capture_factory(),
    )
    .await
    .unwrap();
    wait_for_event(&mut host_events, "host room_joined", |e| {
        matches!(e, SessionEvent::RoomJoined { .. })
    })
    .await;

    let (guest, mut guest_events) = SessionOrchestrator::join(
        session_config(
            &server,
            "room-neg",
            "guest-1",
            ParticipantRole::Guest,
            Some(token),
            &storage,
        ),
        capture_factory(),
    )
    .await
    .unwrap();
    match wait_for_event(&mut guest_events, "guest room_joined", |e| {
        matches!(e, SessionEvent::RoomJoined { .. })
    })
    .await
    {
        SessionEvent::RoomJoined { members } => assert_eq!(members.len(), 2),
        _ => unreachable!(),
    }
    wait_for_event(&mut host_events, "host sees guest", |e| {
        matches!(e, SessionEvent::MemberJoined { participant_id } if participant_id == "guest-1")
    })
    .await;

    // the guest joined later, so the guest offers and the host answers
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let guest_side = guest.peer_state("host-1").await;
        let host_side = host.peer_state("guest-1").await;
        let guest_ok = matches!(
            guest_side,
            Some(PeerLinkState::AwaitingAnswer) | Some(PeerLinkState::Connected)
        );
        let host_ok = matches!(
            host_side,
            Some(PeerLinkState::Answering) | Some(PeerLinkState::Connected)
        );
        if guest_ok && host_ok {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "negotiation stalled: guest={:?} host={:?}",
            guest_side,
            host_side
        );
        sleep(Duration::from_millis(50)).await;
    }

    guest.leave().await;
    host.leave().await;
}

#[tokio::test]
async fn test_recording_flow_uploads_contiguous_chunks() {
    let (server, _tokens) = spawn_server().await;
    let (storage, bodies) = spawn_storage().await;
    let token = issue_token(&server, "room-rec").await;

    let (host, mut host_events) = SessionOrchestrator::join(
        session_config(&server, "room-rec", "host-1", ParticipantRole::Host, None, &storage),
        capture_factory(),
    )
    .await
    .unwrap();
    let (guest, mut guest_events) = SessionOrchestrator::join(
        session_config(
            &server,
            "room-rec",
            "guest-1",
            ParticipantRole::Guest,
            Some(token),
            &storage,
        ),
        capture_factory(),
    )
    .await
    .unwrap();
    wait_for_event(&mut host_events, "host room_joined", |e| {
        matches!(e, SessionEvent::RoomJoined { .. })
    })
    .await;
    wait_for_event(&mut guest_events, "guest room_joined", |e| {
        matches!(e, SessionEvent::RoomJoined { .. })
    })
    .await;

    host.request_recording_start().unwrap();

    // the broadcast reaches every participant with one shared start target
    wait_for_event(&mut host_events, "host recording start", |e| {
        matches!(e, SessionEvent::RecordingStarted { .. })
    })
    .await;
    wait_for_event(&mut guest_events, "guest recording start", |e| {
        matches!(e, SessionEvent::RecordingStarted { .. })
    })
    .await;

    // let a few slices accumulate, then stop for the whole room
    sleep(Duration::from_millis(1_300)).await;
    host.request_recording_stop().unwrap();

    let host_uploaded = match wait_for_event(&mut host_events, "host recording stop", |e| {
        matches!(e, SessionEvent::RecordingStopped { .. })
    })
    .await
    {
        SessionEvent::RecordingStopped { uploaded } => uploaded,
        _ => unreachable!(),
    };
    let guest_uploaded = match wait_for_event(&mut guest_events, "guest recording stop", |e| {
        matches!(e, SessionEvent::RecordingStopped { .. })
    })
    .await
    {
        SessionEvent::RecordingStopped { uploaded } => uploaded,
        _ => unreachable!(),
    };
    assert!(host_uploaded >= 1);
    assert!(guest_uploaded >= 1);

    // every uploaded chunk sequence is 1-based, contiguous, and seamless
    let bodies = bodies.lock().unwrap();
    for participant in ["host-1", "guest-1"] {
        let mut chunks: Vec<(u32, f64, f64)> = bodies
            .iter()
            .filter(|body| {
                extract_field(body, "participant_id").as_deref() == Some(participant)
            })
            .map(|body| {
                let index: u32 = extract_field(body, "chunk_index").unwrap().parse().unwrap();
                let start: f64 = extract_field(body, "start_time").unwrap().parse().unwrap();
                let end: f64 = extract_field(body, "end_time").unwrap().parse().unwrap();
                (index, start, end)
            })
            .collect();
        chunks.sort_by_key(|(index, _, _)| *index);

        assert!(!chunks.is_empty(), "no chunks for {}", participant);
        assert_eq!(chunks[0].0, 1);
        assert_eq!(chunks[0].1, 0.0);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].0, pair[0].0 + 1, "gap in indices for {}", participant);
            assert!(
                (pair[1].1 - pair[0].2).abs() < 1e-6,
                "offset gap for {}: {} vs {}",
                participant,
                pair[1].1,
                pair[0].2
            );
        }
        for (_, start, end) in &chunks {
            assert!(end >= start);
        }
    }

    guest.leave().await;
    host.leave().await;
}

#[tokio::test]
async fn test_guest_cannot_start_recording() {
    let (server, _tokens) = spawn_server().await;
    let (storage, _bodies) = spawn_storage().await;
    let token = issue_token(&server, "room-auth").await;

    let (_host, mut host_events) = SessionOrchestrator::join(
        session_config(&server, "room-auth", "host-1", ParticipantRole::Host, None, &storage),
        capture_factory(),
    )
    .await
    .unwrap();
    wait_for_event(&mut host_events, "host room_joined", |e| {
        matches!(e, SessionEvent::RoomJoined { .. })
    })
    .await;

    let (guest, mut guest_events) = SessionOrchestrator::join(
        session_config(
            &server,
            "room-auth",
            "guest-1",
            ParticipantRole::Guest,
            Some(token),
            &storage,
        ),
        capture_factory(),
    )
    .await
    .unwrap();
    wait_for_event(&mut guest_events, "guest room_joined", |e| {
        matches!(e, SessionEvent::RoomJoined { .. })
    })
    .await;

    // rejected locally before a request is even sent
    assert!(guest.request_recording_start().is_err());
}

#[tokio::test]
async fn test_stopping_twice_reports_once() {
    let (server, _tokens) = spawn_server().await;
    let (storage, _bodies) = spawn_storage().await;

    let (host, mut host_events) = SessionOrchestrator::join(
        session_config(&server, "room-stop", "host-1", ParticipantRole::Host, None, &storage),
        capture_factory(),
    )
    .await
    .unwrap();
    wait_for_event(&mut host_events, "host room_joined", |e| {
        matches!(e, SessionEvent::RoomJoined { .. })
    })
    .await;

    host.request_recording_start().unwrap();
    wait_for_event(&mut host_events, "recording start", |e| {
        matches!(e, SessionEvent::RecordingStarted { .. })
    })
    .await;

    sleep(Duration::from_millis(600)).await;
    host.request_recording_stop().unwrap();
    wait_for_event(&mut host_events, "recording stop", |e| {
        matches!(e, SessionEvent::RecordingStopped { .. })
    })
    .await;

    // a second stop is a no-op: no further stop report arrives
    host.request_recording_stop().unwrap();
    sleep(Duration::from_millis(500)).await;
    let mut extra_stops = 0;
    while let Ok(event) = host_events.try_recv() {
        if matches!(event, SessionEvent::RecordingStopped { .. }) {
            extra_stops += 1;
        }
    }
    assert_eq!(extra_stops, 0);

    host.leave().await;
}
