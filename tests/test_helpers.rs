//! Shared helpers for integration tests.

#![allow(dead_code)]

use uuid::Uuid;

use grimoire_server::config::Config;
use grimoire_server::engine::{Command, RoleId};
use grimoire_server::protocol::{CommandEnvelope, CommandResult, CommandStatus, RoomId, UserId};
use grimoire_server::server::GameServer;

pub const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

/// A server with fast timings suitable for tests.
pub fn test_server() -> GameServer {
    let mut config = Config::default();
    config.auth.jwt_secret = TEST_SECRET.to_string();
    config.engine.snapshot_interval = 10;
    config.engine.command_deadline_ms = 2_000;
    config.engine.subscriber_queue_depth = 64;
    GameServer::new(config).expect("test server")
}

/// Build a command envelope with a fresh command id.
pub fn envelope(room_id: RoomId, key: &str, command: Command) -> CommandEnvelope {
    CommandEnvelope {
        command_id: Uuid::new_v4(),
        idempotency_key: key.to_string(),
        room_id,
        command,
        last_seen_seq: None,
    }
}

/// Submit a command and panic if it is rejected.
pub async fn must_apply(
    server: &GameServer,
    actor: UserId,
    room_id: RoomId,
    key: &str,
    command: Command,
) -> CommandResult {
    let result = server
        .submit_command(actor, envelope(room_id, key, command))
        .await;
    assert_eq!(
        result.status,
        CommandStatus::Ok,
        "command rejected: {:?} {:?}",
        result.reason,
        result.message
    );
    result
}

/// Create a room, seat `roles.len()` players with preassigned roles, and
/// start the game. Returns (room, dm, players in seat order).
pub async fn started_room(
    server: &GameServer,
    roles: &[RoleId],
) -> (RoomId, UserId, Vec<UserId>) {
    let dm = Uuid::new_v4();
    let meta = server.create_room(dm).await.expect("create room");
    let room_id = meta.id;

    let mut players = Vec::new();
    for (i, role) in roles.iter().enumerate() {
        let player = Uuid::new_v4();
        players.push(player);
        must_apply(
            server,
            player,
            room_id,
            &format!("join-{i}"),
            Command::Join {
                name: format!("player{i}"),
            },
        )
        .await;
        must_apply(
            server,
            dm,
            room_id,
            &format!("assign-{i}"),
            Command::DmAssignRole {
                target: player,
                role: *role,
                believed_role: None,
            },
        )
        .await;
    }
    must_apply(server, dm, room_id, "start", Command::StartGame).await;
    (room_id, dm, players)
}

/// The classic five-seat test table: demon, minion, three townsfolk.
pub fn five_seat_roles() -> Vec<RoleId> {
    vec![
        RoleId::Imp,
        RoleId::Poisoner,
        RoleId::Monk,
        RoleId::Empath,
        RoleId::Slayer,
    ]
}
