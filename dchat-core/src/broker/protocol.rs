//! Wire protocol for client and route connections
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────┐
//! │ length (u32, BE) │ bincode(ClientFrame | ...)   │
//! └──────────────────┴──────────────────────────────┘
//! ```
//!
//! Client connection:
//! ```text
//! server ── Info ──► client
//! client ── Connect, Ping ──► server
//! server ── Pong (or Err + close) ──► client
//! ```
//!
//! Route connection: both sides send `Info` first, then replay their
//! interest as `Sub` frames. `Info` is sent again to every route whenever a
//! new route is established, listing the servers the sender is connected
//! to. Receivers dial the ones they do not know yet, so every server ends up
//! with a direct route to every other server.

use super::error::{BrokerError, BrokerResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload a client may publish
pub const MAX_PAYLOAD: usize = 1024 * 1024;

/// Largest encoded frame accepted on any connection
pub const MAX_FRAME_SIZE: usize = MAX_PAYLOAD + 4 * 1024;

pub const PROTOCOL_VERSION: &str = "dchat-broker/1";

/// Greeting sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server_id: String,
    pub server_name: String,
    pub version: String,
    pub auth_required: bool,
    /// Random challenge the client signs when authenticating with an nkey
    pub nonce: Option<String>,
    pub max_payload: usize,
}

/// Client handshake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectInfo {
    pub name: String,
    pub token: Option<String>,
    /// User public key (`U...`)
    pub nkey: Option<String>,
    /// Base64 Ed25519 signature over the server nonce
    pub sig: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    Connect(ConnectInfo),
    Pub {
        subject: String,
        reply: Option<String>,
        payload: Vec<u8>,
    },
    Sub {
        subject: String,
        sid: u64,
    },
    Unsub {
        sid: u64,
        max: Option<u64>,
    },
    Ping,
    Pong,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    Info(ServerInfo),
    Msg {
        subject: String,
        sid: u64,
        reply: Option<String>,
        payload: Vec<u8>,
    },
    Ok,
    Err(String),
    Ping,
    Pong,
}

/// Greeting exchanged on route connections, repeated as routes change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub server_id: String,
    pub server_name: String,
    pub cluster: String,
    /// Port of the sender's cluster listener
    pub route_port: u16,
    /// Servers the sender currently has a route to
    pub known_routes: Vec<KnownRoute>,
}

/// A server reachable through `url`, as seen by the server gossiping it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KnownRoute {
    pub server_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteFrame {
    Info(RouteInfo),
    /// Remote gained interest in a subject pattern
    Sub(String),
    /// Remote lost all interest in a subject pattern
    Unsub(String),
    Msg {
        subject: String,
        reply: Option<String>,
        payload: Vec<u8>,
    },
    Ping,
    Pong,
    Err(String),
}

/// Encode a frame with its length prefix
pub fn encode_frame<T: Serialize>(frame: &T) -> BrokerResult<Vec<u8>> {
    let body = bincode::serialize(frame)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(BrokerError::FrameTooLarge {
            size: body.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> BrokerResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let buf = encode_frame(frame)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `Ok(None)` on a clean close between frames
pub async fn read_frame<R, T>(reader: &mut R) -> BrokerResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(BrokerError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(bincode::deserialize(&body)?))
}
