use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::TokenClaims;
use crate::hub::Subscription;
use crate::projection::Viewer;
use crate::protocol::{
    ClientFrame, ErrorReason, RoomId, Seq, ServerFrame, SubscribeMode, UserId,
};
use crate::room::room_error_result;
use crate::server::GameServer;

/// Outbound queue between the receive side and the socket writer.
const OUT_QUEUE_DEPTH: usize = 64;
/// WebSocket close code for policy violations ("too slow", idle timeout).
const CLOSE_POLICY: u16 = 1008;

enum Outbound {
    Frame(Arc<ServerFrame>),
    /// Close the socket with a reason after flushing.
    Shutdown(String),
}

/// One live WebSocket connection: an outbound writer task with heartbeat,
/// an inbound frame loop, and at most one hub subscription at a time.
pub(super) async fn handle_socket(
    socket: WebSocket,
    server: GameServer,
    claims: TokenClaims,
    addr: SocketAddr,
) {
    let user_id = claims.sub;
    tracing::info!(%user_id, client_addr = %addr, "WebSocket connection established");

    let (sender, receiver) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<Outbound>(OUT_QUEUE_DEPTH);
    let last_inbound = Arc::new(AtomicI64::new(chrono::Utc::now().timestamp_millis()));

    let heartbeat_interval =
        Duration::from_secs(server.config().gateway.heartbeat_interval.max(1));
    let heartbeat_timeout_ms = server
        .config()
        .gateway
        .heartbeat_timeout
        .saturating_mul(1_000) as i64;

    let send_task = tokio::spawn(write_loop(
        sender,
        out_rx,
        last_inbound.clone(),
        heartbeat_interval,
        heartbeat_timeout_ms,
    ));
    let receive_task = tokio::spawn(read_loop(
        receiver,
        server.clone(),
        user_id,
        out_tx,
        last_inbound,
    ));

    tokio::select! {
        _ = send_task => {
            tracing::debug!(%user_id, "send task completed");
        }
        _ = receive_task => {
            tracing::debug!(%user_id, "receive task completed");
        }
    }
    tracing::info!(%user_id, client_addr = %addr, "WebSocket connection closed");
}

/// Drain outbound frames to the socket; heartbeat and idle-close on a
/// timer.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Outbound>,
    last_inbound: Arc<AtomicI64>,
    heartbeat_interval: Duration,
    heartbeat_timeout_ms: i64,
) {
    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                match outbound {
                    Some(Outbound::Frame(frame)) => {
                        let json = match serde_json::to_string(frame.as_ref()) {
                            Ok(json) => json,
                            Err(err) => {
                                tracing::error!(error = %err, "failed to serialize frame");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Shutdown(reason)) => {
                        let _ = sender
                            .send(Message::Close(Some(CloseFrame {
                                code: CLOSE_POLICY,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                let idle_ms = chrono::Utc::now().timestamp_millis()
                    - last_inbound.load(Ordering::Relaxed);
                if idle_ms > heartbeat_timeout_ms {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_POLICY,
                            reason: "idle timeout".into(),
                        })))
                        .await;
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// The connection's single active subscription.
struct ActiveSubscription {
    session_id: crate::hub::SessionId,
    forward: JoinHandle<()>,
}

async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    server: GameServer,
    user_id: UserId,
    out_tx: mpsc::Sender<Outbound>,
    last_inbound: Arc<AtomicI64>,
) {
    let max_frame = server.config().gateway.max_frame_bytes;
    let mut active: Option<ActiveSubscription> = None;

    while let Some(message) = receiver.next().await {
        last_inbound.store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(%user_id, error = %err, "WebSocket read error");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                if text.len() > max_frame {
                    send_error(
                        &out_tx,
                        ErrorReason::BadRequest,
                        format!("frame too large ({} bytes, max {max_frame})", text.len()),
                    )
                    .await;
                    continue;
                }
                let frame = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(frame) => frame,
                    Err(err) => {
                        send_error(
                            &out_tx,
                            ErrorReason::BadRequest,
                            format!("unparseable frame: {err}"),
                        )
                        .await;
                        continue;
                    }
                };
                match frame {
                    ClientFrame::Ping => {
                        let _ = out_tx.send(Outbound::Frame(Arc::new(ServerFrame::Pong))).await;
                    }
                    ClientFrame::Command { envelope } => {
                        let command_id = envelope.command_id;
                        match server.enqueue_command(user_id, envelope).await {
                            Ok(result_rx) => {
                                // Await out of line so a slow room never
                                // stalls this loop; mailbox order is
                                // already fixed at enqueue.
                                let server = server.clone();
                                let out_tx = out_tx.clone();
                                tokio::spawn(async move {
                                    let result =
                                        server.await_result(command_id, result_rx).await;
                                    let _ = out_tx
                                        .send(Outbound::Frame(Arc::new(
                                            ServerFrame::CommandResult { result },
                                        )))
                                        .await;
                                });
                            }
                            Err(err) => {
                                let result = room_error_result(command_id, &err);
                                let _ = out_tx
                                    .send(Outbound::Frame(Arc::new(ServerFrame::CommandResult {
                                        result,
                                    })))
                                    .await;
                            }
                        }
                    }
                    ClientFrame::Subscribe {
                        room_id,
                        after_seq,
                        mode,
                    } => {
                        if let Some(previous) = active.take() {
                            previous.forward.abort();
                            server.hub().unsubscribe(&previous.session_id);
                        }
                        match start_subscription(
                            &server, user_id, room_id, after_seq, mode, &out_tx,
                        )
                        .await
                        {
                            Ok(subscription) => active = Some(subscription),
                            Err((reason, message)) => send_error(&out_tx, reason, message).await,
                        }
                    }
                }
            }
            Message::Close(_) => break,
            // Pings are answered at the protocol layer; pongs and binary
            // frames only refresh the idle clock.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    if let Some(active) = active {
        active.forward.abort();
        server.hub().unsubscribe(&active.session_id);
    }
}

async fn send_error(out_tx: &mpsc::Sender<Outbound>, code: ErrorReason, message: String) {
    let _ = out_tx
        .send(Outbound::Frame(Arc::new(ServerFrame::Error {
            code,
            message,
        })))
        .await;
}

/// Bind this connection to a room: verify membership, register with the
/// hub, bring the client up to date from the log, then stream.
async fn start_subscription(
    server: &GameServer,
    user_id: UserId,
    room_id: RoomId,
    after_seq: Option<Seq>,
    mode: SubscribeMode,
    out_tx: &mpsc::Sender<Outbound>,
) -> Result<ActiveSubscription, (ErrorReason, String)> {
    let info = server
        .resync(room_id, user_id)
        .await
        .map_err(|err| (room_error_reason(&err), err.to_string()))?;
    if !info.member {
        return Err((
            ErrorReason::Forbidden,
            "subscribe requires room membership".to_string(),
        ));
    }

    // Register for live events before reading the tail so no seq can fall
    // between replay and stream; the seq filter drops the overlap.
    let subscription = server.hub().subscribe(room_id, info.viewer);
    let last_delivered = Arc::new(AtomicU64::new(0));

    let replay_from = match mode {
        SubscribeMode::SnapshotThenEvents => {
            let frame = ServerFrame::State {
                room_id,
                seq: info.seq,
                state: info.state,
            };
            if out_tx
                .send(Outbound::Frame(Arc::new(frame)))
                .await
                .is_err()
            {
                server.hub().unsubscribe(&subscription.session_id);
                return Err((ErrorReason::Internal, "connection closing".to_string()));
            }
            info.seq
        }
        SubscribeMode::Events => after_seq.unwrap_or(0),
    };
    last_delivered.store(replay_from, Ordering::Relaxed);

    let tail = server
        .tail_events(room_id, &info.viewer, replay_from, 0)
        .await
        .map_err(|err| {
            server.hub().unsubscribe(&subscription.session_id);
            (room_error_reason(&err), err.to_string())
        })?;
    for event in tail {
        let seq = event.seq;
        if out_tx
            .send(Outbound::Frame(Arc::new(ServerFrame::Event { event })))
            .await
            .is_err()
        {
            server.hub().unsubscribe(&subscription.session_id);
            return Err((ErrorReason::Internal, "connection closing".to_string()));
        }
        last_delivered.store(seq, Ordering::Relaxed);
    }

    let session_id = subscription.session_id;
    let forward = tokio::spawn(forward_live_events(
        subscription,
        out_tx.clone(),
        last_delivered,
    ));
    tracing::info!(%user_id, %room_id, ?mode, "subscribed to room");
    Ok(ActiveSubscription {
        session_id,
        forward,
    })
}

/// Pump hub frames to the socket, suppressing seqs the replay already
/// covered. Ends when the hub drops the session; an eviction surfaces as a
/// close with reason so the client knows to resync.
async fn forward_live_events(
    mut subscription: Subscription,
    out_tx: mpsc::Sender<Outbound>,
    last_delivered: Arc<AtomicU64>,
) {
    while let Some(frame) = subscription.receiver.recv().await {
        if let ServerFrame::Event { event } = frame.as_ref() {
            if event.seq <= last_delivered.load(Ordering::Relaxed) {
                continue;
            }
            last_delivered.store(event.seq, Ordering::Relaxed);
        }
        if out_tx.send(Outbound::Frame(frame)).await.is_err() {
            return;
        }
    }
    if subscription.evicted.load(Ordering::Acquire) {
        let _ = out_tx
            .send(Outbound::Shutdown("too slow".to_string()))
            .await;
    }
}

fn room_error_reason(err: &crate::room::RoomError) -> ErrorReason {
    match err {
        crate::room::RoomError::NotFound => ErrorReason::NotFound,
        crate::room::RoomError::NotAMember => ErrorReason::Forbidden,
        _ => ErrorReason::Internal,
    }
}

