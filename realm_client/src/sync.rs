//! Network sync client.
//!
//! Owns the room join request and the realtime channel. All I/O runs on tokio
//! tasks; their results come back over an mpsc queue and are applied by
//! [`NetworkSyncClient::poll`] from the frame loop, so the rest of the engine
//! never sees a callback mid-frame.
//!
//! ```text
//!   Disconnected --connect--> Connecting --opened--> Open --leave--> Closing --> Disconnected
//!                                 |                    |
//!                                 +--handshake error---+--> Failed      (drop -> Disconnected)
//! ```
//!
//! Every `join`/`connect` takes a fresh token. A result carrying an older token
//! was superseded and is discarded.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use realm_shared::{
    math::Vec2,
    net::{
        decode_server_event, read_frame, send_json, ClientMsg, Inbound, JoinReply, JoinRequest,
        RejectCode, ReliableConn, RoomSnapshot, ServerEvent, MAX_ROOM_ID_LEN,
    },
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    /// The last handshake failed; an explicit `connect` starts over.
    Failed,
}

/// Why a join did not produce a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    MissingIdentity,
    RoomFull,
    InvalidRoomId,
    RoomIdTooLong,
    Rejected { code: String, message: String },
    Transport(String),
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::MissingIdentity => write!(f, "no identity was provided"),
            JoinError::RoomFull => write!(f, "room is full"),
            JoinError::InvalidRoomId => write!(f, "room id is invalid"),
            JoinError::RoomIdTooLong => {
                write!(f, "room id is longer than {MAX_ROOM_ID_LEN} characters")
            }
            JoinError::Rejected { code, message } => write!(f, "join rejected ({code}): {message}"),
            JoinError::Transport(e) => write!(f, "join failed: {e}"),
        }
    }
}

impl std::error::Error for JoinError {}

impl JoinError {
    /// Maps a server rejection onto a specific error kind.
    pub fn from_rejection(code: &str, message: &str) -> Self {
        match RejectCode::parse(code) {
            RejectCode::MissingIdentity => JoinError::MissingIdentity,
            RejectCode::RoomFull => JoinError::RoomFull,
            RejectCode::InvalidRoomId => JoinError::InvalidRoomId,
            RejectCode::RoomIdTooLong => JoinError::RoomIdTooLong,
            RejectCode::Other => JoinError::Rejected {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}

/// Checks what can be checked without asking the server.
pub fn validate_join(identity: &str, room_id: Option<&str>) -> Result<(), JoinError> {
    if identity.trim().is_empty() {
        return Err(JoinError::MissingIdentity);
    }
    if let Some(room_id) = room_id {
        if room_id.trim().is_empty() {
            return Err(JoinError::InvalidRoomId);
        }
        if room_id.chars().count() > MAX_ROOM_ID_LEN {
            return Err(JoinError::RoomIdTooLong);
        }
    }
    Ok(())
}

/// Room join endpoint.
#[async_trait]
pub trait RoomApi: Send + Sync {
    async fn join(&self, request: JoinRequest) -> Result<RoomSnapshot, JoinError>;
}

/// Byte stream carrying a realtime channel.
pub trait ChannelStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ChannelStream for T {}

/// Opens the raw stream for a realtime channel. The client sends `hello`.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn open(&self, identity: &str) -> anyhow::Result<Box<dyn ChannelStream>>;
}

/// Join over a short-lived framed TCP connection.
#[derive(Debug, Clone)]
pub struct TcpRoomApi {
    addr: String,
}

impl TcpRoomApi {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl RoomApi for TcpRoomApi {
    async fn join(&self, request: JoinRequest) -> Result<RoomSnapshot, JoinError> {
        let transport = |e: anyhow::Error| JoinError::Transport(format!("{e:#}"));
        let mut conn = ReliableConn::connect(&self.addr).await.map_err(transport)?;
        conn.send(&ClientMsg::Join(request)).await.map_err(transport)?;
        match conn.recv::<JoinReply>().await.map_err(transport)? {
            JoinReply::Ok(snapshot) => Ok(snapshot),
            JoinReply::Rejected { code, message } => Err(JoinError::from_rejection(&code, &message)),
        }
    }
}

/// Realtime channel over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl ChannelConnector for TcpConnector {
    async fn open(&self, _identity: &str) -> anyhow::Result<Box<dyn ChannelStream>> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .with_context(|| format!("tcp connect {}", self.addr))?;
        stream.set_nodelay(true).context("set nodelay")?;
        Ok(Box::new(stream))
    }
}

/// Something `poll` observed since the last call.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotice {
    Joined(RoomSnapshot),
    JoinFailed(JoinError),
    Connected { identity: String },
    ConnectFailed { identity: String, error: String },
    Event(ServerEvent),
    Disconnected { reason: String },
}

/// Handle returned by [`NetworkSyncClient::add_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

type Observer = Box<dyn FnMut(&ServerEvent) + Send>;

/// Sync client tuning.
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub position_interval: Duration,
    pub leave_grace: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            position_interval: Duration::from_millis(100),
            leave_grace: Duration::from_millis(100),
        }
    }
}

enum TaskResult {
    Join {
        token: u64,
        result: Result<RoomSnapshot, JoinError>,
    },
    Opened {
        token: u64,
        identity: String,
        result: anyhow::Result<Box<dyn ChannelStream>>,
    },
    Frame {
        generation: u64,
        inbound: Inbound,
    },
    Closed {
        generation: u64,
        reason: String,
    },
    Left {
        generation: u64,
    },
}

struct Channel {
    identity: String,
    generation: u64,
    outbound: mpsc::UnboundedSender<ClientMsg>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Client side of the room protocol.
pub struct NetworkSyncClient {
    api: Arc<dyn RoomApi>,
    connector: Arc<dyn ChannelConnector>,
    settings: SyncSettings,

    state: ConnectionState,
    identity: Option<String>,
    channel: Option<Channel>,
    closing_generation: Option<u64>,

    join_token: u64,
    connect_token: u64,

    results_tx: mpsc::UnboundedSender<TaskResult>,
    results_rx: mpsc::UnboundedReceiver<TaskResult>,

    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,

    since_broadcast: Duration,
    last_broadcast: Option<Vec2>,
}

impl NetworkSyncClient {
    pub fn new(
        api: Arc<dyn RoomApi>,
        connector: Arc<dyn ChannelConnector>,
        settings: SyncSettings,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            api,
            connector,
            settings,
            state: ConnectionState::Disconnected,
            identity: None,
            channel: None,
            closing_generation: None,
            join_token: 0,
            connect_token: 0,
            results_tx,
            results_rx,
            observers: Vec::new(),
            next_observer: 0,
            since_broadcast: Duration::ZERO,
            last_broadcast: None,
        }
    }

    /// TCP transport for both conversations.
    pub fn tcp(addr: &str, settings: SyncSettings) -> Self {
        Self::new(
            Arc::new(TcpRoomApi::new(addr)),
            Arc::new(TcpConnector::new(addr)),
            settings,
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Identity of the open or opening channel.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    // -------------------------------------------------------------------------
    // Join
    // -------------------------------------------------------------------------

    /// Starts a join. Local validation errors are returned immediately; the
    /// outcome otherwise arrives as `Joined`/`JoinFailed` from `poll`.
    pub fn join(&mut self, identity: &str, room_id: Option<&str>) -> Result<(), JoinError> {
        validate_join(identity, room_id)?;

        self.join_token += 1;
        let token = self.join_token;
        let request = JoinRequest {
            authorization: identity.to_string(),
            room_id: room_id.map(str::to_string),
        };
        info!(identity, room_id = ?room_id, token, "Joining room");

        let api = Arc::clone(&self.api);
        let tx = self.results_tx.clone();
        tokio::spawn(async move {
            let result = api.join(request).await;
            let _ = tx.send(TaskResult::Join { token, result });
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Channel
    // -------------------------------------------------------------------------

    /// Opens the realtime channel for `identity`.
    ///
    /// Returns false when a channel for the same identity is already open or
    /// opening. A channel for another identity is closed first.
    pub fn connect(&mut self, identity: &str) -> Result<bool, JoinError> {
        validate_join(identity, None)?;

        let same_identity = self.identity.as_deref() == Some(identity);
        if same_identity && matches!(self.state, ConnectionState::Open | ConnectionState::Connecting) {
            debug!(identity, "Reusing realtime channel");
            return Ok(false);
        }
        if let Some(old) = self.channel.take() {
            info!(old = %old.identity, new = identity, "Replacing realtime channel");
            drop(old.outbound);
            old.reader.abort();
        }

        self.connect_token += 1;
        let token = self.connect_token;
        self.identity = Some(identity.to_string());
        self.set_state(ConnectionState::Connecting);

        let connector = Arc::clone(&self.connector);
        let tx = self.results_tx.clone();
        let identity = identity.to_string();
        tokio::spawn(async move {
            let result = open_channel(connector.as_ref(), &identity).await;
            let _ = tx.send(TaskResult::Opened {
                token,
                identity,
                result,
            });
        });
        Ok(true)
    }

    /// Best-effort goodbye, then close.
    ///
    /// The `leave_room` frame gets the grace period to flush; the channel is
    /// torn down either way. Observers are detached and the position cadence
    /// resets so a later `connect` starts clean.
    pub fn leave(&mut self) {
        // Any join or connect still in flight is superseded.
        self.join_token += 1;
        self.connect_token += 1;
        self.observers.clear();
        self.identity = None;
        self.since_broadcast = Duration::ZERO;
        self.last_broadcast = None;

        let Some(channel) = self.channel.take() else {
            self.set_state(ConnectionState::Disconnected);
            return;
        };

        self.set_state(ConnectionState::Closing);
        if channel.outbound.send(ClientMsg::LeaveRoom).is_err() {
            debug!("Writer already gone; skipping leave_room");
        }
        drop(channel.outbound);
        channel.reader.abort();

        let generation = channel.generation;
        self.closing_generation = Some(generation);
        let grace = self.settings.leave_grace;
        let tx = self.results_tx.clone();
        let mut writer = channel.writer;
        tokio::spawn(async move {
            if tokio::time::timeout(grace, &mut writer).await.is_err() {
                warn!(?grace, "leave_room not flushed within grace period");
                writer.abort();
            }
            let _ = tx.send(TaskResult::Left { generation });
        });
    }

    /// Queues a frame on the open channel. Returns false when there is none.
    pub fn send(&mut self, msg: ClientMsg) -> bool {
        match (&self.channel, self.state) {
            (Some(channel), ConnectionState::Open) => channel.outbound.send(msg).is_ok(),
            _ => false,
        }
    }

    /// Passes a chat line through for the chat collaborator.
    pub fn send_chat(&mut self, message: &str) -> bool {
        self.send(ClientMsg::ChatMessage {
            message: message.to_string(),
        })
    }

    /// Advances the broadcast timer; sends `position` when the interval has
    /// elapsed and it differs from the last value sent.
    pub fn tick(&mut self, delta: Duration, position: Vec2) -> bool {
        self.since_broadcast += delta;
        if self.since_broadcast < self.settings.position_interval {
            return false;
        }
        self.since_broadcast = Duration::ZERO;

        if self.state != ConnectionState::Open || self.last_broadcast == Some(position) {
            return false;
        }
        if self.send(ClientMsg::PositionUpdate { position }) {
            self.last_broadcast = Some(position);
            return true;
        }
        false
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    /// Registers a callback for every inbound event, across channel
    /// replacements, until `remove_observer` or `leave`.
    pub fn add_observer(&mut self, f: impl FnMut(&ServerEvent) + Send + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(f)));
        id
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    // -------------------------------------------------------------------------
    // Poll
    // -------------------------------------------------------------------------

    /// Applies every finished task result, oldest first.
    pub fn poll(&mut self) -> Vec<SyncNotice> {
        let mut notices = Vec::new();
        while let Ok(result) = self.results_rx.try_recv() {
            self.apply(result, &mut notices);
        }
        notices
    }

    fn apply(&mut self, result: TaskResult, notices: &mut Vec<SyncNotice>) {
        match result {
            TaskResult::Join { token, result } => {
                if token != self.join_token {
                    warn!(token, current = self.join_token, "Discarding superseded join result");
                    return;
                }
                match result {
                    Ok(snapshot) => {
                        info!(room = %snapshot.room_id, players = snapshot.players.len(), "Joined room");
                        notices.push(SyncNotice::Joined(snapshot));
                    }
                    Err(e) => {
                        warn!(error = %e, "Join failed");
                        notices.push(SyncNotice::JoinFailed(e));
                    }
                }
            }

            TaskResult::Opened {
                token,
                identity,
                result,
            } => {
                if token != self.connect_token {
                    warn!(token, identity = %identity, "Discarding superseded channel");
                    return;
                }
                match result {
                    Ok(stream) => {
                        self.channel = Some(self.spawn_channel(identity.clone(), token, stream));
                        self.last_broadcast = None;
                        self.set_state(ConnectionState::Open);
                        notices.push(SyncNotice::Connected { identity });
                    }
                    Err(e) => {
                        let error = format!("{e:#}");
                        warn!(identity = %identity, error = %error, "Channel handshake failed");
                        self.set_state(ConnectionState::Failed);
                        notices.push(SyncNotice::ConnectFailed { identity, error });
                    }
                }
            }

            TaskResult::Frame {
                generation,
                inbound,
            } => {
                if !self.is_current(generation) {
                    return;
                }
                match inbound {
                    Inbound::Event(event) => {
                        debug!(kind = event.kind(), player_id = %event.player_id(), "Server event");
                        for (_, observer) in self.observers.iter_mut() {
                            observer(&event);
                        }
                        notices.push(SyncNotice::Event(event));
                    }
                    Inbound::Unknown(kind) => {
                        debug!(kind = %kind, "Ignoring unknown event kind");
                    }
                }
            }

            TaskResult::Closed { generation, reason } => {
                if !self.is_current(generation) {
                    return;
                }
                warn!(reason = %reason, "Realtime channel dropped");
                self.channel = None;
                self.set_state(ConnectionState::Disconnected);
                notices.push(SyncNotice::Disconnected { reason });
            }

            TaskResult::Left { generation } => {
                if self.closing_generation != Some(generation) {
                    return;
                }
                self.closing_generation = None;
                if self.state == ConnectionState::Closing {
                    self.set_state(ConnectionState::Disconnected);
                    notices.push(SyncNotice::Disconnected {
                        reason: "left room".to_string(),
                    });
                }
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state == ConnectionState::Open
            && self.channel.as_ref().map(|c| c.generation) == Some(generation)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            info!(from = ?self.state, to = ?state, "Connection state changed");
            self.state = state;
        }
    }

    fn spawn_channel(&self, identity: String, generation: u64, stream: Box<dyn ChannelStream>) -> Channel {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMsg>();

        let tx = self.results_tx.clone();
        let reader = tokio::spawn(async move {
            let reason = loop {
                match read_frame(&mut read_half).await {
                    Ok(Some(frame)) => match decode_server_event(&frame) {
                        Ok(inbound) => {
                            if tx.send(TaskResult::Frame { generation, inbound }).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "Dropping malformed event"),
                    },
                    Ok(None) => break "closed by server".to_string(),
                    Err(e) => break format!("{e:#}"),
                }
            };
            let _ = tx.send(TaskResult::Closed { generation, reason });
        });

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = send_json(&mut write_half, &msg).await {
                    warn!(error = %e, "Realtime write failed");
                    return;
                }
            }
            let _ = write_half.shutdown().await;
        });

        Channel {
            identity,
            generation,
            outbound,
            reader,
            writer,
        }
    }
}

impl Drop for NetworkSyncClient {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.reader.abort();
            channel.writer.abort();
        }
    }
}

async fn open_channel(
    connector: &dyn ChannelConnector,
    identity: &str,
) -> anyhow::Result<Box<dyn ChannelStream>> {
    let mut stream = connector.open(identity).await?;
    send_json(
        &mut stream,
        &ClientMsg::Hello {
            token: identity.to_string(),
        },
    )
    .await
    .context("send hello")?;
    Ok(stream)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn local_validation_distinguishes_errors() {
        assert_eq!(validate_join("", None), Err(JoinError::MissingIdentity));
        assert_eq!(validate_join("   ", None), Err(JoinError::MissingIdentity));
        assert_eq!(validate_join("alice", Some("")), Err(JoinError::InvalidRoomId));
        let long = "r".repeat(MAX_ROOM_ID_LEN + 1);
        assert_eq!(validate_join("alice", Some(&long)), Err(JoinError::RoomIdTooLong));
        assert_eq!(validate_join("alice", Some("lobby")), Ok(()));
    }

    #[test]
    fn rejections_map_to_kinds() {
        assert_eq!(JoinError::from_rejection("room_full", "x"), JoinError::RoomFull);
        assert_eq!(JoinError::from_rejection("invalid_room_id", "x"), JoinError::InvalidRoomId);
        assert_eq!(
            JoinError::from_rejection("banned", "nope"),
            JoinError::Rejected {
                code: "banned".into(),
                message: "nope".into()
            }
        );
    }

    #[tokio::test]
    async fn join_reports_snapshot() {
        let (mut client, _ends) = pipe_client(FakeRoomApi::ok("r1"));
        client.join("alice", None).unwrap();
        let notice = poll_until(&mut client, |n| matches!(n, SyncNotice::Joined(_))).await;
        assert!(matches!(notice, Some(SyncNotice::Joined(ref s)) if s.room_id == "r1"));
    }

    #[tokio::test]
    async fn superseded_join_is_discarded() {
        let api = FakeRoomApi {
            reply: Mutex::new(Ok(RoomSnapshot {
                room_id: "slow".into(),
                players: Vec::new(),
            })),
            delay: Duration::from_millis(30),
        };
        let (mut client, _ends) = pipe_client(api);
        client.join("alice", None).unwrap();
        client.join("alice", Some("other")).unwrap();

        let mut joined = 0;
        for _ in 0..30 {
            joined += client
                .poll()
                .iter()
                .filter(|n| matches!(n, SyncNotice::Joined(_)))
                .count();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(joined, 1);
    }

    #[tokio::test]
    async fn connect_sends_hello_and_dispatches_events() -> anyhow::Result<()> {
        let (mut client, mut ends) = pipe_client(FakeRoomApi::ok("r1"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.add_observer(move |e| {
            if let Ok(mut v) = sink.lock() {
                v.push(e.player_id().to_string());
            }
        });

        assert!(client.connect("alice")?);
        assert!(!client.connect("alice")?);
        let (identity, server) = ends.recv().await.context("no pipe")?;
        assert_eq!(identity, "alice");
        let mut server = ReliableConn::new(server);
        assert_eq!(
            server.recv::<ClientMsg>().await?,
            ClientMsg::Hello {
                token: "alice".into()
            }
        );

        poll_until(&mut client, |n| matches!(n, SyncNotice::Connected { .. }))
            .await
            .context("never connected")?;
        assert_eq!(client.state(), ConnectionState::Open);

        server
            .send(&serde_json::json!({ "type": "emote", "player_id": "p9" }))
            .await?;
        server
            .send(&serde_json::json!({ "type": "player_joined", "player_id": "p2", "position": { "x": 64, "y": 96 } }))
            .await?;
        let event = poll_until(&mut client, |n| matches!(n, SyncNotice::Event(_))).await;
        assert!(matches!(
            event,
            Some(SyncNotice::Event(ServerEvent::PlayerJoined { ref player_id, .. })) if player_id == "p2"
        ));
        assert_eq!(*seen.lock().unwrap(), vec!["p2".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn position_broadcast_only_on_change() -> anyhow::Result<()> {
        let (mut client, mut ends) = pipe_client(FakeRoomApi::ok("r1"));
        client.connect("alice")?;
        let (_, server) = ends.recv().await.context("no pipe")?;
        let mut server = ReliableConn::new(server);
        let _hello: ClientMsg = server.recv().await?;
        poll_until(&mut client, |n| matches!(n, SyncNotice::Connected { .. })).await;

        let frame = Duration::from_millis(50);
        let a = Vec2::new(16.0, 24.0);
        let b = Vec2::new(48.0, 24.0);
        assert!(!client.tick(frame, a));
        assert!(client.tick(frame, a));
        // Unchanged position: interval elapses but nothing is sent.
        client.tick(frame, a);
        assert!(!client.tick(frame, a));
        client.tick(frame, b);
        assert!(client.tick(frame, b));

        assert_eq!(server.recv::<ClientMsg>().await?, ClientMsg::PositionUpdate { position: a });
        assert_eq!(server.recv::<ClientMsg>().await?, ClientMsg::PositionUpdate { position: b });
        Ok(())
    }

    #[tokio::test]
    async fn leave_flushes_goodbye_and_detaches_observers() -> anyhow::Result<()> {
        let (mut client, mut ends) = pipe_client(FakeRoomApi::ok("r1"));
        client.add_observer(|_| {});
        client.connect("alice")?;
        let (_, server) = ends.recv().await.context("no pipe")?;
        let mut server = ReliableConn::new(server);
        let _hello: ClientMsg = server.recv().await?;
        poll_until(&mut client, |n| matches!(n, SyncNotice::Connected { .. })).await;

        client.leave();
        assert_eq!(client.state(), ConnectionState::Closing);
        assert_eq!(client.observer_count(), 0);
        assert_eq!(server.recv::<ClientMsg>().await?, ClientMsg::LeaveRoom);

        poll_until(&mut client, |n| matches!(n, SyncNotice::Disconnected { .. }))
            .await
            .context("never disconnected")?;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.send_chat("hello?"));
        Ok(())
    }

    #[tokio::test]
    async fn reconnect_with_new_identity_replaces_channel() -> anyhow::Result<()> {
        let (mut client, mut ends) = pipe_client(FakeRoomApi::ok("r1"));
        client.connect("alice")?;
        let (_, first) = ends.recv().await.context("no pipe")?;
        poll_until(&mut client, |n| matches!(n, SyncNotice::Connected { .. })).await;

        assert!(client.connect("bob")?);
        let (identity, _second) = ends.recv().await.context("no pipe")?;
        assert_eq!(identity, "bob");
        let connected = poll_until(&mut client, |n| matches!(n, SyncNotice::Connected { .. })).await;
        assert_eq!(
            connected,
            Some(SyncNotice::Connected {
                identity: "bob".into()
            })
        );

        // The old pipe is closed once its writer drains.
        let (mut r, _w) = tokio::io::split(first);
        let mut saw_eof = false;
        for _ in 0..4 {
            match read_frame(&mut r).await? {
                Some(_) => continue,
                None => {
                    saw_eof = true;
                    break;
                }
            }
        }
        assert!(saw_eof);
        Ok(())
    }

    #[tokio::test]
    async fn failed_handshake_is_terminal_until_reconnect() {
        let mut client = NetworkSyncClient::new(
            Arc::new(FakeRoomApi::ok("r1")),
            Arc::new(RefusingConnector),
            SyncSettings::default(),
        );
        client.connect("alice").unwrap();
        let notice = poll_until(&mut client, |n| matches!(n, SyncNotice::ConnectFailed { .. })).await;
        assert!(notice.is_some());
        assert_eq!(client.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn server_close_moves_to_disconnected() -> anyhow::Result<()> {
        let (mut client, mut ends) = pipe_client(FakeRoomApi::ok("r1"));
        client.connect("alice")?;
        let (_, server) = ends.recv().await.context("no pipe")?;
        poll_until(&mut client, |n| matches!(n, SyncNotice::Connected { .. })).await;
        drop(server);

        let notice = poll_until(&mut client, |n| matches!(n, SyncNotice::Disconnected { .. })).await;
        assert!(notice.is_some());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        Ok(())
    }
}
