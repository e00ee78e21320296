//! `realm_tests`
//!
//! Loopback stub server and fixtures for integration tests.
//!
//! The stub speaks the client's wire contract and nothing more: join requests
//! with capacity and room id checks, and a realtime channel that relays
//! positions between the members of a room. It keeps no game state beyond the
//! last known position of each player.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use realm_client::{
    sync::{NetworkSyncClient, SyncSettings},
    GameplayController,
};
use realm_shared::{
    config::ClientConfig,
    math::Vec2,
    net::{
        ClientMsg, JoinReply, JoinRequest, PlayerSummary, RejectCode, ReliableConn, ReliableListener,
        RoomSnapshot, ServerEvent, MAX_ROOM_ID_LEN, ROOM_CAPACITY,
    },
    realm::RealmData,
    sprite::SpriteCatalog,
};
use serde_json::Value;
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

/// Room used when a join names none.
pub const DEFAULT_ROOM: &str = "lobby";

/// Demo realm shipped with the client binary.
pub fn demo_realm() -> anyhow::Result<RealmData> {
    RealmData::from_json_str(include_str!("../../demos/realm.json"))
}

pub fn demo_sprites() -> anyhow::Result<SpriteCatalog> {
    SpriteCatalog::from_json_str(include_str!("../../demos/sprites.json"))
}

/// One simulated frame at 60 Hz.
pub const FRAME: Duration = Duration::from_millis(16);

/// Gameplay controller over the demo realm, talking to `addr`.
pub fn demo_game(addr: &str, player_name: &str) -> anyhow::Result<GameplayController> {
    let config = ClientConfig {
        server_addr: addr.to_string(),
        player_name: player_name.to_string(),
        ..ClientConfig::default()
    };
    let sync = NetworkSyncClient::tcp(addr, SyncSettings::default());
    let realm = demo_realm()?;
    let game = GameplayController::new(config, &realm, Arc::new(demo_sprites()?), sync)?;
    Ok(game)
}

/// Runs frames, yielding to the runtime between them, until `done` holds.
/// Returns false if it did not within `limit`.
pub async fn frames_until(
    game: &mut GameplayController,
    limit: Duration,
    mut done: impl FnMut(&GameplayController) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        game.frame(FRAME);
        if done(game) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    false
}

/// Installs a test tracing subscriber; repeated calls are harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
struct RoomState {
    players: HashMap<String, Vec2>,
    sessions: HashMap<String, mpsc::UnboundedSender<Value>>,
}

#[derive(Debug, Default)]
struct ServerState {
    rooms: HashMap<String, RoomState>,
    /// Which room each identity joined last.
    membership: HashMap<String, String>,
}

impl ServerState {
    fn join(&mut self, request: &JoinRequest) -> JoinReply {
        let identity = request.authorization.trim();
        if identity.is_empty() {
            return reject(RejectCode::MissingIdentity, "authorization required");
        }
        let room_id = request.room_id.as_deref().unwrap_or(DEFAULT_ROOM);
        if room_id.chars().count() > MAX_ROOM_ID_LEN {
            return reject(RejectCode::RoomIdTooLong, "room id is too long");
        }
        if room_id.is_empty()
            || !room_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return reject(RejectCode::InvalidRoomId, "room id is not valid");
        }

        let room = self.rooms.entry(room_id.to_string()).or_default();
        if !room.players.contains_key(identity) && room.players.len() >= ROOM_CAPACITY {
            return reject(RejectCode::RoomFull, "room is full");
        }
        room.players.entry(identity.to_string()).or_insert(Vec2::ZERO);
        self.membership
            .insert(identity.to_string(), room_id.to_string());

        let mut players: Vec<_> = room
            .players
            .iter()
            .map(|(id, position)| PlayerSummary {
                id: id.clone(),
                position: *position,
            })
            .collect();
        players.sort_by(|a, b| a.id.cmp(&b.id));
        JoinReply::Ok(RoomSnapshot {
            room_id: room_id.to_string(),
            players,
        })
    }

    /// Sends `event` to every session in `room_id` except `except`.
    fn broadcast(&self, room_id: &str, except: &str, event: &Value) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        for (id, tx) in &room.sessions {
            if id != except {
                let _ = tx.send(event.clone());
            }
        }
    }

    fn remove(&mut self, identity: &str) {
        let Some(room_id) = self.membership.remove(identity) else {
            return;
        };
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.players.remove(identity);
            room.sessions.remove(identity);
        }
        let left = to_value(&ServerEvent::PlayerLeft {
            player_id: identity.to_string(),
        });
        self.broadcast(&room_id, identity, &left);
    }
}

fn reject(code: RejectCode, message: &str) -> JoinReply {
    JoinReply::Rejected {
        code: code.as_str().to_string(),
        message: message.to_string(),
    }
}

fn to_value(event: &ServerEvent) -> Value {
    serde_json::to_value(event).unwrap_or(Value::Null)
}

/// Loopback server bound to an ephemeral port.
pub struct StubServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    accept: JoinHandle<()>,
}

/// Binds a stub server on `127.0.0.1:0` and starts accepting.
pub async fn bind_ephemeral() -> anyhow::Result<StubServer> {
    let listener = ReliableListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).await?;
    let addr = listener.local_addr()?;
    let state = Arc::new(Mutex::new(ServerState::default()));

    let shared = Arc::clone(&state);
    let accept = tokio::spawn(async move {
        loop {
            let (conn, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Stub accept failed");
                    return;
                }
            };
            let state = Arc::clone(&shared);
            tokio::spawn(async move {
                if let Err(e) = serve(conn, state).await {
                    let error = format!("{e:#}");
                    debug!(%peer, error = %error, "Stub connection ended");
                }
            });
        }
    });

    info!(%addr, "Stub server listening");
    Ok(StubServer { addr, state, accept })
}

impl StubServer {
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// Registers `n` placeholder players in `room_id` without connections.
    pub fn fill_room(&self, room_id: &str, n: usize) {
        if let Ok(mut state) = self.state.lock() {
            let room = state.rooms.entry(room_id.to_string()).or_default();
            for i in 0..n {
                room.players.insert(format!("filler-{i}"), Vec2::ZERO);
            }
        }
    }

    /// Last position the server knows for `identity`.
    pub fn position_of(&self, identity: &str) -> Option<Vec2> {
        let state = self.state.lock().ok()?;
        let room_id = state.membership.get(identity)?;
        let position = state.rooms.get(room_id)?.players.get(identity).copied();
        position
    }

    /// Identities with an open realtime session in `room_id`.
    pub fn sessions(&self, room_id: &str) -> Vec<String> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut ids: Vec<_> = state
            .rooms
            .get(room_id)
            .map(|r| r.sessions.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Pushes a raw frame to every session in `room_id`.
    pub fn inject(&self, room_id: &str, event: Value) {
        if let Ok(state) = self.state.lock() {
            state.broadcast(room_id, "", &event);
        }
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(mut conn: ReliableConn<TcpStream>, state: Arc<Mutex<ServerState>>) -> anyhow::Result<()> {
    match conn.recv::<ClientMsg>().await? {
        ClientMsg::Join(request) => {
            let reply = {
                let mut state = state.lock().map_err(|_| anyhow::anyhow!("state poisoned"))?;
                state.join(&request)
            };
            debug!(identity = %request.authorization, ?reply, "Stub join");
            conn.send(&reply).await
        }
        ClientMsg::Hello { token } => session(conn, state, token).await,
        other => anyhow::bail!("unexpected first frame {other:?}"),
    }
}

async fn session(conn: ReliableConn<TcpStream>, state: Arc<Mutex<ServerState>>, identity: String) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let room_id = {
        let mut guard = state.lock().map_err(|_| anyhow::anyhow!("state poisoned"))?;
        let room_id = guard
            .membership
            .get(&identity)
            .cloned()
            .with_context(|| format!("{identity} has not joined a room"))?;
        let room = guard.rooms.entry(room_id.clone()).or_default();
        room.sessions.insert(identity.clone(), tx);
        let position = room.players.get(&identity).copied().unwrap_or(Vec2::ZERO);
        let joined = to_value(&ServerEvent::PlayerJoined {
            player_id: identity.clone(),
            position,
            username: Some(identity.clone()),
        });
        guard.broadcast(&room_id, &identity, &joined);
        room_id
    };
    info!(identity = %identity, room = %room_id, "Stub session open");

    let (mut reader, mut writer) = tokio::io::split(conn.into_inner());
    let writer_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if realm_shared::net::send_json(&mut writer, &event).await.is_err() {
                break;
            }
        }
    });

    loop {
        let Some(frame) = realm_shared::net::read_frame(&mut reader).await? else {
            break;
        };
        let msg: ClientMsg = match serde_json::from_slice(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Stub got malformed frame");
                continue;
            }
        };
        match msg {
            ClientMsg::PositionUpdate { position } => {
                let mut guard = state.lock().map_err(|_| anyhow::anyhow!("state poisoned"))?;
                if let Some(room) = guard.rooms.get_mut(&room_id) {
                    room.players.insert(identity.clone(), position);
                }
                let update = to_value(&ServerEvent::PositionUpdate {
                    player_id: identity.clone(),
                    position,
                    username: Some(identity.clone()),
                });
                guard.broadcast(&room_id, &identity, &update);
            }
            ClientMsg::LeaveRoom => break,
            ClientMsg::ChatMessage { message } => {
                debug!(identity = %identity, message = %message, "Stub chat");
            }
            other => warn!(?other, "Stub ignoring frame"),
        }
    }

    if let Ok(mut guard) = state.lock() {
        guard.remove(&identity);
    }
    writer_task.abort();
    info!(identity = %identity, "Stub session closed");
    Ok(())
}

/// Joins over a raw connection, bypassing client-side validation.
pub async fn raw_join(addr: &str, identity: &str, room_id: Option<&str>) -> anyhow::Result<JoinReply> {
    let mut conn = ReliableConn::connect(addr).await?;
    conn.send(&ClientMsg::Join(JoinRequest {
        authorization: identity.to_string(),
        room_id: room_id.map(str::to_string),
    }))
    .await?;
    conn.recv().await
}

/// A scripted peer: joins and opens a realtime channel by hand.
pub struct RawPeer {
    pub identity: String,
    conn: ReliableConn<TcpStream>,
}

impl RawPeer {
    pub async fn connect(addr: &str, identity: &str, room_id: Option<&str>) -> anyhow::Result<Self> {
        match raw_join(addr, identity, room_id).await? {
            JoinReply::Ok(_) => {}
            JoinReply::Rejected { code, message } => anyhow::bail!("join rejected: {code} {message}"),
        }
        let mut conn = ReliableConn::connect(addr).await?;
        conn.send(&ClientMsg::Hello {
            token: identity.to_string(),
        })
        .await?;
        Ok(Self {
            identity: identity.to_string(),
            conn,
        })
    }

    pub async fn send_position(&mut self, position: Vec2) -> anyhow::Result<()> {
        self.conn.send(&ClientMsg::PositionUpdate { position }).await
    }

    pub async fn leave(mut self) -> anyhow::Result<()> {
        self.conn.send(&ClientMsg::LeaveRoom).await
    }

    /// Next event whose `type` is `kind`, skipping others; fails after `timeout`.
    pub async fn expect(&mut self, kind: &str, timeout: std::time::Duration) -> anyhow::Result<Value> {
        tokio::time::timeout(timeout, async {
            loop {
                let event: Value = self.conn.recv().await?;
                if event["type"] == kind {
                    return Ok::<_, anyhow::Error>(event);
                }
            }
        })
        .await
        .with_context(|| format!("timed out waiting for {kind}"))?
    }
}
