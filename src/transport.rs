// Framed transport (§4.1): every message on the wire is a 4-byte
// big-endian length prefix followed by exactly that many payload bytes.
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::codec;
use crate::fields;

const CONTROL_LENGTH_TIMEOUT: Duration = Duration::from_secs(5);
const CONTROL_BODY_TIMEOUT: Duration = Duration::from_secs(5);
const IN_GAME_LENGTH_TIMEOUT: Duration = Duration::from_millis(800);
const IN_GAME_BODY_TIMEOUT: Duration = Duration::from_millis(500);
const WRITE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Result of a control-phase read: either a parsed message or the
/// "closed" sentinel, which callers must treat as a hard disconnect.
pub enum ControlRead {
    Message(Value),
    Closed,
}

/// Result of an in-game read: distinct from a hard disconnect, §4.1
/// requires a "no update this tick" sentinel separate from the
/// "connection lost" one.
pub enum InGameRead {
    Message(Value),
    NoUpdate,
    ConnectionLost,
}

pub async fn read_control(reader: &mut OwnedReadHalf) -> ControlRead {
    match timeout(CONTROL_LENGTH_TIMEOUT, reader.read_u32()).await {
        Ok(Ok(len)) => read_control_body(reader, len).await,
        _ => ControlRead::Closed,
    }
}

async fn read_control_body(reader: &mut OwnedReadHalf, len: u32) -> ControlRead {
    if len == 0 || len > MAX_PAYLOAD_LEN {
        return ControlRead::Closed;
    }
    let mut buf = vec![0u8; len as usize];
    match timeout(CONTROL_BODY_TIMEOUT, reader.read_exact(&mut buf)).await {
        Ok(Ok(n)) if n == len as usize => match codec::decode(&buf) {
            Ok(value) => ControlRead::Message(value),
            Err(e) => {
                warn!({ fields::ERROR } = %e, "failed to decode control payload");
                ControlRead::Closed
            }
        },
        _ => ControlRead::Closed,
    }
}

pub async fn read_in_game(reader: &mut OwnedReadHalf) -> InGameRead {
    match timeout(IN_GAME_LENGTH_TIMEOUT, reader.read_u32()).await {
        Ok(Ok(len)) => read_in_game_body(reader, len).await,
        Ok(Err(_)) => InGameRead::ConnectionLost,
        Err(_) => InGameRead::NoUpdate,
    }
}

async fn read_in_game_body(reader: &mut OwnedReadHalf, len: u32) -> InGameRead {
    if len == 0 || len > MAX_PAYLOAD_LEN {
        return InGameRead::ConnectionLost;
    }
    let mut buf = vec![0u8; len as usize];
    match timeout(IN_GAME_BODY_TIMEOUT, reader.read_exact(&mut buf)).await {
        Ok(Ok(n)) if n == len as usize => match codec::decode(&buf) {
            Ok(value) => InGameRead::Message(value),
            Err(_) => InGameRead::ConnectionLost,
        },
        Ok(Ok(_)) => InGameRead::ConnectionLost,
        Ok(Err(_)) => InGameRead::ConnectionLost,
        Err(_) => InGameRead::NoUpdate,
    }
}

/// Single length-prefixed write + flush, bounded by a drain timeout. On
/// any fault this fails silently to the transport layer's own log; the
/// caller is expected to disconnect the peer (§4.1).
pub async fn write_framed(writer: &mut OwnedWriteHalf, value: &Value) -> bool {
    let payload = codec::encode(value);
    let len = payload.len() as u32;

    let result = timeout(WRITE_DRAIN_TIMEOUT, async {
        writer.write_u32(len).await?;
        writer.write_all(&payload).await?;
        writer.flush().await
    })
    .await;

    match result {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!({ fields::ERROR } = %e, "write fault, caller should disconnect peer");
            false
        }
        Err(_) => {
            debug!("write drain timed out, caller should disconnect peer");
            false
        }
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Reads one message bounded by the liveness-probe's 1 s budget (§4.7),
/// covering both the length prefix and the body in a single timeout.
pub async fn read_probe(reader: &mut OwnedReadHalf) -> Option<Value> {
    timeout(PROBE_TIMEOUT, async {
        let len = reader.read_u32().await.ok()?;
        if len == 0 || len > MAX_PAYLOAD_LEN {
            return None;
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await.ok()?;
        codec::decode(&buf).ok()
    })
    .await
    .ok()
    .flatten()
}

pub fn set_nodelay(stream: &tokio::net::TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!({ fields::ERROR } = %e, "failed to set TCP_NODELAY");
    }
}
