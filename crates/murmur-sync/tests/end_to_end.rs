//! Whole-pipeline tests: session -> router -> reconciler -> entity views.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use glam::Vec3;
use murmur_net::{
    ChatMessage, DomainEvent, EventTag, MemoryConnector, MemoryPeer, WebSocketConnector,
};
use murmur_sync::{
    Clock, DisconnectReason, EntityView, LocalIdentity, LodTier, ManualClock, PoseSink, Session,
    SyncSettings,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

#[derive(Default)]
struct Renderer {
    poses: HashMap<String, Vec3>,
    hidden: Vec<String>,
    removed: Vec<String>,
}

impl PoseSink for Renderer {
    fn update_remote_pose(&mut self, view: &EntityView) {
        if let Some(pose) = view.pose() {
            self.poses.insert(view.id().to_string(), pose.position);
        }
    }

    fn hide_remote(&mut self, id: &str) {
        self.hidden.push(id.to_string());
    }

    fn remove_remote(&mut self, id: &str) {
        self.poses.remove(id);
        self.removed.push(id.to_string());
    }
}

fn near_frame(id: &str, x: f32) -> Value {
    json!({
        "type": "state",
        "nearEntities": [{
            "id": id,
            "position": {"x": x, "y": 0.0, "z": 0.0},
            "yaw": 0.0, "pitch": 0.0, "heat": 0.0,
            "wanted": false, "matchState": "idle", "stunned": false
        }]
    })
}

async fn connected(clock: Arc<ManualClock>) -> (Session<MemoryConnector>, MemoryPeer) {
    let mut session = Session::new(MemoryConnector::new(), SyncSettings::default(), clock);
    let mut peer = session.connector().accept();
    peer.send_json(&json!({"type": "welcome", "playerId": "p1"}));
    let id = session
        .connect(LocalIdentity::new("p1", "Ava"))
        .await
        .unwrap();
    assert_eq!(id, "p1");
    peer.drain();
    (session, peer)
}

#[tokio::test]
async fn test_connect_interpolate_and_remove() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut session, peer) = connected(clock.clone()).await;
    assert!(session.is_connected());

    clock.set(1_000);
    peer.send_json(&near_frame("p2", 10.0));
    session.pump();
    clock.set(1_100);
    peer.send_json(&near_frame("p2", 20.0));
    session.pump();

    // Render time 1050 sits halfway between the two samples.
    clock.set(1_150);
    let mut renderer = Renderer::default();
    session.advance_entities(clock.now_ms(), &mut renderer);
    let position = renderer.poses["p2"];
    assert!((position - Vec3::new(15.0, 0.0, 0.0)).length() < 1e-4, "{position:?}");

    clock.set(1_200);
    peer.send_json(&json!({"type": "state", "removedIds": ["p2"]}));
    session.pump();
    assert_eq!(session.entities().get("p2").unwrap().tier(), LodTier::Hidden);

    session.advance_entities(clock.now_ms(), &mut renderer);
    assert_eq!(renderer.hidden, vec!["p2".to_string()]);
}

#[tokio::test]
async fn test_bunched_frames_in_one_pump_keep_newest_pose() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut session, peer) = connected(clock.clone()).await;

    clock.set(1_000);
    peer.send_json(&near_frame("p2", 10.0));
    peer.send_json(&near_frame("p2", 20.0));
    assert_eq!(session.pump(), 2);

    let buffer = session.entities().get("p2").unwrap().buffer();
    assert_eq!(buffer.len(), 2);
    assert_eq!(buffer.latest().unwrap().position.x, 20.0);

    // Rendering moves on toward the newer sample, never back.
    let mut renderer = Renderer::default();
    clock.set(1_100);
    session.advance_entities(clock.now_ms(), &mut renderer);
    assert!((renderer.poses["p2"].x - 10.0).abs() < 1e-4);
    clock.set(1_200);
    session.advance_entities(clock.now_ms(), &mut renderer);
    let x = renderer.poses["p2"].x;
    assert!(x > 10.0 && x <= 20.0, "x = {x}");
}

#[tokio::test]
async fn test_tiers_events_and_disconnect() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut session, mut peer) = connected(clock.clone()).await;

    let transfers = Arc::new(Mutex::new(Vec::new()));
    let t = Arc::clone(&transfers);
    session
        .relay_mut()
        .register(EventTag::TagTransfer, move |event: &DomainEvent| {
            t.lock().unwrap().push(event.payload["to"].clone());
        });
    let chats = Arc::new(Mutex::new(Vec::<ChatMessage>::new()));
    let c = Arc::clone(&chats);
    session.relay_mut().on_chat(move |chat| c.lock().unwrap().push(chat));

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&reasons);
    session.on_disconnect(move |reason| r.lock().unwrap().push(reason));

    clock.set(100);
    peer.send_json(&json!({
        "type": "state",
        "nearEntities": [
            {"id": "p1", "position": {"x": 0, "y": 0, "z": 0}},
            {"id": "p2", "position": {"x": 1, "y": 0, "z": 0}, "wanted": true}
        ],
        "midEntities": [{"id": "p3", "position": {"x": 80, "y": 0, "z": 0}}],
        "events": [
            {"type": "tag-transfer", "from": "p2", "to": "p3"},
            {"type": "not-a-real-event"}
        ]
    }));
    peer.send_json(&json!({"type": "chat", "username": "Bo", "message": "gg", "timestamp": 100}));
    peer.send_text("definitely not json");
    peer.send_json(&json!({"type": "leaderboard", "rows": []}));
    session.pump();

    // The local player never gets a view.
    assert!(session.entities().get("p1").is_none());
    assert_eq!(session.entities().get("p2").unwrap().tier(), LodTier::Near);
    assert!(session.entities().get("p2").unwrap().state.wanted);
    assert_eq!(session.entities().get("p3").unwrap().tier(), LodTier::Mid);
    assert_eq!(*transfers.lock().unwrap(), vec![json!("p3")]);
    assert_eq!(chats.lock().unwrap()[0].message, "gg");

    let stats = session.stats();
    assert_eq!(stats.frames_applied, 1);
    assert_eq!(stats.events_relayed, 2);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.ignored, 1);
    assert!(session.is_connected());

    // p3 silently drops out of interest; removedIds does not mention it.
    clock.set(200);
    peer.send_json(&near_frame("p2", 2.0));
    session.pump();
    assert_eq!(session.entities().get("p3").unwrap().tier(), LodTier::Hidden);

    peer.send_json(&json!({"type": "player_left", "playerId": "p2"}));
    session.pump();
    assert!(session.entities().get("p2").is_none());

    session.disconnect();
    assert!(session.entities().is_empty());
    assert_eq!(*reasons.lock().unwrap(), vec![DisconnectReason::Requested]);
    let sent: Vec<Value> = peer
        .drain()
        .iter()
        .map(|text| serde_json::from_str(text).unwrap())
        .collect();
    assert_eq!(sent, vec![json!({"type": "leave"})]);
}

#[tokio::test]
async fn test_server_drop_then_reconnect_starts_clean() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut session, peer) = connected(clock.clone()).await;

    peer.send_json(&near_frame("p2", 5.0));
    session.pump();
    assert_eq!(session.entities().len(), 1);

    peer.close();
    session.pump();
    assert_eq!(session.last_disconnect(), Some(DisconnectReason::ConnectionLost));
    assert!(session.entities().is_empty());

    let mut renderer = Renderer::default();
    session.advance_entities(clock.now_ms(), &mut renderer);
    assert_eq!(renderer.removed, vec!["p2".to_string()]);

    let next = session.connector().accept();
    next.send_json(&json!({"type": "welcome", "playerId": "p1"}));
    session
        .connect(LocalIdentity::new("p1", "Ava"))
        .await
        .unwrap();
    assert!(session.is_connected());
    assert!(session.entities().is_empty());
}

#[tokio::test]
async fn test_websocket_session_against_local_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let Some(Ok(Message::Text(join))) = ws.next().await else {
            panic!("expected join frame");
        };
        let join: Value = serde_json::from_str(join.as_str()).unwrap();
        assert_eq!(join["type"], "join");
        assert_eq!(join["username"], "Ava");

        let welcome = json!({
            "type": "welcome",
            "playerId": join["playerId"],
            "worldState": {"players": [{"id": "p9", "position": {"x": 3, "y": 0, "z": 0}}]}
        });
        ws.send(Message::text(welcome.to_string())).await.unwrap();

        // Wait for the client's leave, then hang up.
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg
                && text.as_str().contains("\"leave\"")
            {
                return true;
            }
        }
        false
    });

    let clock = Arc::new(ManualClock::new(0));
    let connector = WebSocketConnector::new(format!("ws://{addr}"));
    let mut session = Session::new(connector, SyncSettings::default(), clock);
    session
        .connect(LocalIdentity::new("p1", "Ava"))
        .await
        .unwrap();
    assert_eq!(session.entities().get("p9").unwrap().tier(), LodTier::Near);

    session.disconnect();
    let saw_leave = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert!(saw_leave);
}
