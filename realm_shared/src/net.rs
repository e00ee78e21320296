//! Wire contract and framing.
//!
//! Two conversations share one codec and one port; the first frame of a
//! connection decides which it is:
//! - Room join: a single request/response (`join {authorization, room_id?}` ->
//!   `JoinReply`), then the connection is closed.
//! - Realtime channel: a persistent duplex stream. The client opens with
//!   `hello {token}` and then sends `ClientMsg`s; the server pushes events shaped
//!   `{type, player_id, position?, username?}`.
//!
//! Every payload is JSON inside a 4-byte big-endian length-prefixed frame. The
//! framing is generic over any async byte stream so tests can run it over
//! in-memory pipes.

use std::fmt;

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::math::Vec2;

/// Players allowed in one room.
pub const ROOM_CAPACITY: usize = 20;

/// Longest room id the server accepts.
pub const MAX_ROOM_ID_LEN: usize = 64;

/// Upper bound for a single frame payload.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Messages the client sends on the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// First and only frame of a join connection.
    Join(JoinRequest),
    /// First frame; carries the identity as the connection credential.
    Hello { token: String },
    PositionUpdate { position: Vec2 },
    LeaveRoom,
    /// Owned by the chat collaborator; passed through untouched.
    ChatMessage { message: String },
}

/// Events the client consumes from the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    PositionUpdate {
        player_id: String,
        position: Vec2,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    PlayerJoined {
        player_id: String,
        position: Vec2,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    PlayerLeft {
        player_id: String,
    },
}

impl ServerEvent {
    pub fn player_id(&self) -> &str {
        match self {
            ServerEvent::PositionUpdate { player_id, .. }
            | ServerEvent::PlayerJoined { player_id, .. }
            | ServerEvent::PlayerLeft { player_id } => player_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::PositionUpdate { .. } => "position_update",
            ServerEvent::PlayerJoined { .. } => "player_joined",
            ServerEvent::PlayerLeft { .. } => "player_left",
        }
    }
}

/// Loose shape of any inbound frame; validated by [`decode_server_event`].
#[derive(Debug, Deserialize)]
struct RawServerMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, alias = "playerId")]
    player_id: Option<String>,
    #[serde(default)]
    position: Option<Vec2>,
    #[serde(default)]
    username: Option<String>,
}

/// Result of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(ServerEvent),
    /// A kind this client does not understand; ignored for forward compatibility.
    Unknown(String),
}

/// An inbound frame that could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDecodeError {
    Malformed(String),
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

impl fmt::Display for EventDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventDecodeError::Malformed(e) => write!(f, "malformed event: {e}"),
            EventDecodeError::MissingField { kind, field } => {
                write!(f, "{kind} event missing required field {field}")
            }
        }
    }
}

impl std::error::Error for EventDecodeError {}

/// Decodes one inbound realtime frame.
pub fn decode_server_event(payload: &[u8]) -> Result<Inbound, EventDecodeError> {
    let raw: RawServerMessage = serde_json::from_slice(payload)
        .map_err(|e| EventDecodeError::Malformed(e.to_string()))?;

    let kind: &'static str = match raw.kind.as_str() {
        "position_update" => "position_update",
        "player_joined" => "player_joined",
        "player_left" => "player_left",
        _ => return Ok(Inbound::Unknown(raw.kind)),
    };
    let player_id = raw
        .player_id
        .filter(|id| !id.is_empty())
        .ok_or(EventDecodeError::MissingField {
            kind,
            field: "player_id",
        })?;

    let event = match kind {
        "player_left" => ServerEvent::PlayerLeft { player_id },
        _ => {
            let position = raw.position.ok_or(EventDecodeError::MissingField {
                kind,
                field: "position",
            })?;
            if kind == "player_joined" {
                ServerEvent::PlayerJoined {
                    player_id,
                    position,
                    username: raw.username,
                }
            } else {
                ServerEvent::PositionUpdate {
                    player_id,
                    position,
                    username: raw.username,
                }
            }
        }
    };
    Ok(Inbound::Event(event))
}

/// One peer in a join response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub id: String,
    pub position: Vec2,
}

/// Room id and full roster returned by a successful join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub players: Vec<PlayerSummary>,
}

/// Join request; `room_id` selects a specific room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub authorization: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

/// Join response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JoinReply {
    Ok(RoomSnapshot),
    Rejected { code: String, message: String },
}

/// Machine-readable rejection reasons carried in `JoinReply::Rejected::code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    MissingIdentity,
    RoomFull,
    InvalidRoomId,
    RoomIdTooLong,
    Other,
}

impl RejectCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectCode::MissingIdentity => "missing_identity",
            RejectCode::RoomFull => "room_full",
            RejectCode::InvalidRoomId => "invalid_room_id",
            RejectCode::RoomIdTooLong => "room_id_too_long",
            RejectCode::Other => "other",
        }
    }

    pub fn parse(code: &str) -> Self {
        match code {
            "missing_identity" => RejectCode::MissingIdentity,
            "room_full" => RejectCode::RoomFull,
            "invalid_room_id" => RejectCode::InvalidRoomId,
            "room_id_too_long" => RejectCode::RoomIdTooLong,
            _ => RejectCode::Other,
        }
    }
}

/// Reads one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> anyhow::Result<Option<Bytes>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("read frame len"),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {len} bytes exceeds limit");
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .context("read frame payload")?;
    Ok(Some(Bytes::from(payload)))
}

/// Writes one frame and flushes.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> anyhow::Result<()> {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await.context("write frame")?;
    writer.flush().await.context("flush frame")?;
    Ok(())
}

/// Serializes `msg` and writes it as one frame.
pub async fn send_json<W: AsyncWrite + Unpin, T: Serialize>(writer: &mut W, msg: &T) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    write_frame(writer, &payload).await
}

/// Reliable framed connection over any byte stream.
#[derive(Debug)]
pub struct ReliableConn<S = TcpStream> {
    stream: S,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ReliableConn<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> anyhow::Result<()> {
        send_json(&mut self.stream, msg).await
    }

    /// Receives one frame; errors if the peer closed.
    pub async fn recv_frame(&mut self) -> anyhow::Result<Bytes> {
        read_frame(&mut self.stream)
            .await?
            .context("connection closed by peer")
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> anyhow::Result<T> {
        let frame = self.recv_frame().await?;
        serde_json::from_slice(&frame).context("deserialize msg")
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl ReliableConn<TcpStream> {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("tcp connect {addr}"))?;
        stream.set_nodelay(true).context("set nodelay")?;
        Ok(Self::new(stream))
    }

    pub fn peer_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }
}

/// TCP listener producing framed connections.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: std::net::SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, std::net::SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_use_snake_case_type_tags() {
        let json = serde_json::to_value(ClientMsg::PositionUpdate {
            position: Vec2::new(16.0, 24.0),
        })
        .unwrap();
        assert_eq!(json["type"], "position_update");
        assert_eq!(json["position"]["x"], 16.0);

        let json = serde_json::to_value(ClientMsg::LeaveRoom).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "leave_room" }));

        let json = serde_json::to_value(ClientMsg::Join(JoinRequest {
            authorization: "alice".into(),
            room_id: None,
        }))
        .unwrap();
        assert_eq!(json, serde_json::json!({ "type": "join", "authorization": "alice" }));
    }

    #[test]
    fn decodes_known_events() {
        let joined = decode_server_event(
            br#"{"type":"player_joined","player_id":"p2","position":{"x":64,"y":96},"username":"ann"}"#,
        )
        .unwrap();
        assert_eq!(
            joined,
            Inbound::Event(ServerEvent::PlayerJoined {
                player_id: "p2".into(),
                position: Vec2::new(64.0, 96.0),
                username: Some("ann".into()),
            })
        );

        let left = decode_server_event(br#"{"type":"player_left","playerId":"p2"}"#).unwrap();
        assert_eq!(
            left,
            Inbound::Event(ServerEvent::PlayerLeft {
                player_id: "p2".into()
            })
        );
    }

    #[test]
    fn unknown_kinds_are_not_errors() {
        let inbound = decode_server_event(br#"{"type":"emote","player_id":"p2"}"#).unwrap();
        assert_eq!(inbound, Inbound::Unknown("emote".into()));
    }

    #[test]
    fn known_kinds_missing_fields_are_rejected() {
        assert_eq!(
            decode_server_event(br#"{"type":"position_update","player_id":"p2"}"#),
            Err(EventDecodeError::MissingField {
                kind: "position_update",
                field: "position"
            })
        );
        assert!(matches!(
            decode_server_event(br#"{"type":"player_left"}"#),
            Err(EventDecodeError::MissingField { field: "player_id", .. })
        ));
        assert!(matches!(
            decode_server_event(b"not json"),
            Err(EventDecodeError::Malformed(_))
        ));
    }

    #[test]
    fn join_reply_is_tagged_by_status() {
        let ok: JoinReply = serde_json::from_str(
            r#"{"status":"ok","room_id":"r1","players":[{"id":"p2","position":{"x":1,"y":2}}]}"#,
        )
        .unwrap();
        assert!(matches!(ok, JoinReply::Ok(ref snap) if snap.players.len() == 1));

        let rejected: JoinReply =
            serde_json::from_str(r#"{"status":"rejected","code":"room_full","message":"full"}"#)
                .unwrap();
        match rejected {
            JoinReply::Rejected { code, .. } => assert_eq!(RejectCode::parse(&code), RejectCode::RoomFull),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn frames_survive_a_pipe() -> anyhow::Result<()> {
        let (a, b) = tokio::io::duplex(1024);
        let mut tx = ReliableConn::new(a);
        let mut rx = ReliableConn::new(b);
        tx.send(&ClientMsg::Hello {
            token: "alice".into(),
        })
        .await?;
        let msg: ClientMsg = rx.recv().await?;
        assert_eq!(
            msg,
            ClientMsg::Hello {
                token: "alice".into()
            }
        );

        drop(tx);
        let (mut r, _w) = tokio::io::split(rx.into_inner());
        assert!(read_frame(&mut r).await?.is_none());
        Ok(())
    }
}
