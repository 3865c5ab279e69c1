//! WebSocket end-to-end tests: a real axum server, real sockets, and the
//! wire protocol as clients see it.

mod test_helpers;

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use grimoire_server::engine::Command;
use grimoire_server::protocol::{
    ClientFrame, CommandEnvelope, CommandStatus, RoomId, Seq, ServerFrame, SubscribeMode, UserId,
};
use grimoire_server::server::GameServer;
use grimoire_server::websocket;
use test_helpers::{five_seat_roles, must_apply, started_room, test_server};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server() -> (SocketAddr, GameServer) {
    let server = test_server();
    let app = websocket::create_router("*").with_state(server.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    (addr, server)
}

async fn connect(addr: SocketAddr, server: &GameServer, user_id: UserId, name: &str) -> WsClient {
    let token = server.tokens().mint(user_id, name);
    let url = format!("ws://{addr}/ws?token={token}");
    let (stream, _) = connect_async(&url).await.expect("ws connect");
    stream
}

async fn send_frame(client: &mut WsClient, frame: &ClientFrame) {
    let json = serde_json::to_string(frame).expect("serialize frame");
    client
        .send(WsMessage::Text(json.into()))
        .await
        .expect("send frame");
}

/// Next JSON frame from the server, skipping protocol pings.
async fn next_frame(client: &mut WsClient) -> ServerFrame {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("frame before timeout")
            .expect("stream open")
            .expect("clean read");
        match message {
            WsMessage::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("parse server frame");
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

async fn subscribe(client: &mut WsClient, room_id: RoomId, after_seq: Seq) {
    send_frame(
        client,
        &ClientFrame::Subscribe {
            room_id,
            after_seq: Some(after_seq),
            mode: SubscribeMode::Events,
        },
    )
    .await;
}

fn command_frame(room_id: RoomId, key: &str, command: Command) -> ClientFrame {
    ClientFrame::Command {
        envelope: CommandEnvelope {
            command_id: Uuid::new_v4(),
            idempotency_key: key.to_string(),
            room_id,
            command,
            last_seen_seq: None,
        },
    }
}

#[tokio::test]
async fn test_connection_requires_valid_token() {
    let (addr, _server) = spawn_server().await;

    let err = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect_err("no token must be refused");
    let text = err.to_string();
    assert!(text.contains("401"), "unexpected error: {text}");

    let err = connect_async(format!("ws://{addr}/ws?token=bogus"))
        .await
        .expect_err("bad token must be refused");
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn test_ping_pong() {
    let (addr, server) = spawn_server().await;
    let mut client = connect(addr, &server, Uuid::new_v4(), "pinger").await;
    send_frame(&mut client, &ClientFrame::Ping).await;
    assert!(matches!(next_frame(&mut client).await, ServerFrame::Pong));
}

#[tokio::test]
async fn test_subscribe_requires_membership() {
    let (addr, server) = spawn_server().await;
    let (room_id, _dm, _players) = started_room(&server, &five_seat_roles()).await;

    let outsider = Uuid::new_v4();
    let mut client = connect(addr, &server, outsider, "lurker").await;
    subscribe(&mut client, room_id, 0).await;
    match next_frame(&mut client).await {
        ServerFrame::Error { code, .. } => {
            assert_eq!(code, grimoire_server::protocol::ErrorReason::Forbidden);
        }
        other => panic!("expected error frame, got {other:?}"),
    }
}

/// Command round trip: join over the socket, observe the result and the
/// event on a live subscription.
#[tokio::test]
async fn test_command_roundtrip_with_live_events() {
    let (addr, server) = spawn_server().await;
    let dm = Uuid::new_v4();
    let meta = server.create_room(dm).await.expect("create room");
    let room_id = meta.id;

    let player = Uuid::new_v4();
    let mut client = connect(addr, &server, player, "alice").await;

    // Join first (via the same socket), then subscribe.
    send_frame(
        &mut client,
        &command_frame(
            room_id,
            "join-alice",
            Command::Join {
                name: "alice".to_string(),
            },
        ),
    )
    .await;
    let result = match next_frame(&mut client).await {
        ServerFrame::CommandResult { result } => result,
        other => panic!("expected command result, got {other:?}"),
    };
    assert_eq!(result.status, CommandStatus::Ok);

    subscribe(&mut client, room_id, 0).await;
    // Replay includes room.created and our join; seed must not leak.
    let first = match next_frame(&mut client).await {
        ServerFrame::Event { event } => event,
        other => panic!("expected event, got {other:?}"),
    };
    assert_eq!(first.seq, 1);
    assert_eq!(first.event_type, "room.created");
    assert!(first.data.get("seed").is_none(), "seed is DM-only");

    let second = match next_frame(&mut client).await {
        ServerFrame::Event { event } => event,
        other => panic!("expected event, got {other:?}"),
    };
    assert_eq!(second.event_type, "player.joined");

    // A live command lands as a streamed event with the next seq.
    let other_player = Uuid::new_v4();
    must_apply(
        &server,
        other_player,
        room_id,
        "join-bob",
        Command::Join {
            name: "bob".to_string(),
        },
    )
    .await;
    let live = match next_frame(&mut client).await {
        ServerFrame::Event { event } => event,
        other => panic!("expected event, got {other:?}"),
    };
    assert_eq!(live.event_type, "player.joined");
    assert_eq!(live.seq, second.seq + 1);
}

/// Privacy projection: role.assigned reaches the affected player and
/// the DM, never a bystander.
#[tokio::test]
async fn test_role_assignment_privacy_over_sockets() {
    let (addr, server) = spawn_server().await;
    let dm = Uuid::new_v4();
    let meta = server.create_room(dm).await.expect("create room");
    let room_id = meta.id;

    let mut players = Vec::new();
    for i in 0..5 {
        let player = Uuid::new_v4();
        players.push(player);
        must_apply(
            &server,
            player,
            room_id,
            &format!("join-{i}"),
            Command::Join {
                name: format!("p{i}"),
            },
        )
        .await;
    }

    let mut alice = connect(addr, &server, players[0], "p0").await;
    let mut bob = connect(addr, &server, players[1], "p1").await;
    let mut storyteller = connect(addr, &server, dm, "dm").await;
    let start_from = server.storage().last_seq(&room_id).await.unwrap();
    subscribe(&mut alice, room_id, start_from).await;
    subscribe(&mut bob, room_id, start_from).await;
    subscribe(&mut storyteller, room_id, start_from).await;

    must_apply(&server, dm, room_id, "start", Command::StartGame).await;

    // Collect every frame each viewer sees up to phase.changed.
    async fn collect(client: &mut WsClient) -> Vec<(String, serde_json::Value)> {
        let mut seen = Vec::new();
        loop {
            match next_frame(client).await {
                ServerFrame::Event { event } => {
                    let done = event.event_type == "phase.changed";
                    seen.push((event.event_type, event.data));
                    if done {
                        return seen;
                    }
                }
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    let alice_events = collect(&mut alice).await;
    let bob_events = collect(&mut bob).await;
    let dm_events = collect(&mut storyteller).await;

    let assignments = |events: &[(String, serde_json::Value)]| -> Vec<String> {
        events
            .iter()
            .filter(|(kind, _)| kind == "role.assigned")
            .map(|(_, data)| data["user_id"].as_str().unwrap().to_string())
            .collect()
    };

    // Each player sees exactly their own assignment.
    assert_eq!(assignments(&alice_events), vec![players[0].to_string()]);
    assert_eq!(assignments(&bob_events), vec![players[1].to_string()]);
    // The DM sees all five, plus the evil roster.
    assert_eq!(assignments(&dm_events).len(), 5);
    assert!(dm_events.iter().any(|(k, _)| k == "minions.revealed"));
    assert!(!alice_events.iter().any(|(k, _)| k == "minions.revealed"));
    assert!(!bob_events.iter().any(|(k, _)| k == "minions.revealed"));
}

/// Resume after disconnect: a subscriber with `after_seq=N` sees
/// N+1.. in order with no gaps, then live events keep flowing.
#[tokio::test]
async fn test_resume_replays_tail_without_gaps() {
    let (addr, server) = spawn_server().await;
    let (room_id, dm, players) = started_room(&server, &five_seat_roles()).await;
    must_apply(
        &server,
        dm,
        room_id,
        "dawn-1",
        Command::PhaseAdvance {
            to: grimoire_server::engine::PhaseTarget::Day,
        },
    )
    .await;

    let current = server.storage().last_seq(&room_id).await.unwrap();
    let after_seq = 3;
    assert!(current > after_seq, "need a tail to replay");

    let mut dm_client = connect(addr, &server, dm, "dm").await;
    subscribe(&mut dm_client, room_id, after_seq).await;

    // Tail replays densely from after_seq + 1 (the DM sees every event,
    // so seqs are contiguous for this viewer).
    let mut expected = after_seq + 1;
    while expected <= current {
        match next_frame(&mut dm_client).await {
            ServerFrame::Event { event } => {
                assert_eq!(event.seq, expected, "no gaps in replay");
                expected += 1;
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    // New activity streams seamlessly after the tail.
    must_apply(
        &server,
        players[0],
        room_id,
        "post-resume",
        Command::Whisper {
            to: players[1],
            text: "did you see that".to_string(),
        },
    )
    .await;
    match next_frame(&mut dm_client).await {
        ServerFrame::Event { event } => {
            assert_eq!(event.seq, current + 1);
            assert_eq!(event.event_type, "whisper.sent");
        }
        other => panic!("expected event, got {other:?}"),
    }
}

/// `snapshot_then_events` delivers a projected state first, then streams.
#[tokio::test]
async fn test_snapshot_then_events_resync() {
    let (addr, server) = spawn_server().await;
    let (room_id, dm, players) = started_room(&server, &five_seat_roles()).await;

    let mut client = connect(addr, &server, players[0], "p0").await;
    send_frame(
        &mut client,
        &ClientFrame::Subscribe {
            room_id,
            after_seq: None,
            mode: SubscribeMode::SnapshotThenEvents,
        },
    )
    .await;

    let (snapshot_seq, state) = match next_frame(&mut client).await {
        ServerFrame::State { seq, state, .. } => (seq, state),
        other => panic!("expected state frame, got {other:?}"),
    };
    assert_eq!(
        snapshot_seq,
        server.storage().last_seq(&room_id).await.unwrap()
    );
    // The snapshot is projected for this player: own role only.
    let seats = state["players"].as_array().unwrap();
    for seat in seats {
        if seat["user_id"] == players[0].to_string() {
            assert!(seat.get("role").is_some());
        } else {
            assert!(seat.get("true_role").is_none());
        }
    }
    assert!(state.get("demon_id").is_none());

    // Live events continue after the snapshot seq.
    must_apply(
        &server,
        dm,
        room_id,
        "dawn-1",
        Command::PhaseAdvance {
            to: grimoire_server::engine::PhaseTarget::Day,
        },
    )
    .await;
    match next_frame(&mut client).await {
        ServerFrame::Event { event } => {
            assert!(event.seq > snapshot_seq);
        }
        other => panic!("expected event, got {other:?}"),
    }
}

/// HTTP reads agree with the socket view and enforce auth.
#[tokio::test]
async fn test_http_surface_room_reads() {
    let (addr, server) = spawn_server().await;
    let (room_id, dm, _players) = started_room(&server, &five_seat_roles()).await;
    let token = server.tokens().mint(dm, "dm");
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    // Health needs no auth.
    let health = client
        .get(format!("{base}/health"))
        .send()
        .await
        .expect("health request");
    assert_eq!(health.status(), 200);

    // Events require a bearer token.
    let unauthorized = client
        .get(format!("{base}/v1/rooms/{room_id}/events"))
        .send()
        .await
        .expect("events request");
    assert_eq!(unauthorized.status(), 401);

    let response = client
        .get(format!("{base}/v1/rooms/{room_id}/events?after_seq=0"))
        .bearer_auth(&token)
        .send()
        .await
        .expect("events request");
    assert_eq!(response.status(), 200);
    let parsed: serde_json::Value = response.json().await.expect("events body");
    let events = parsed["events"].as_array().unwrap();
    assert!(!events.is_empty());
    assert_eq!(events[0]["seq"], 1);

    let response = client
        .get(format!("{base}/v1/rooms/{room_id}/state"))
        .bearer_auth(&token)
        .send()
        .await
        .expect("state request");
    assert_eq!(response.status(), 200);
    let parsed: serde_json::Value = response.json().await.expect("state body");
    assert_eq!(parsed["state"]["players"].as_array().unwrap().len(), 5);
}
