//! Peer wire metadata exchange
//!
//! Implements just enough of the peer protocol to download a torrent's info
//! dictionary: the base handshake (BEP 3), the extension protocol (BEP 10)
//! and `ut_metadata` (BEP 9). Piece data is never requested.

use sha1::{Digest, Sha1};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::bencode::{self, Value};
use crate::error::PeerError;
use crate::types::InfoHash;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";
pub(crate) const HANDSHAKE_LEN: usize = 68;

/// Metadata is transferred in pieces of this size (the last may be shorter)
pub const METADATA_PIECE_SIZE: usize = 16 * 1024;

/// Largest frame accepted from a peer
const MAX_FRAME_LEN: usize = 1024 * 1024;

pub(crate) const MSG_EXTENDED: u8 = 20;
pub(crate) const EXT_HANDSHAKE: u8 = 0;
/// Id peers must use when sending us `ut_metadata` messages
pub(crate) const LOCAL_UT_METADATA: u8 = 1;

const METADATA_REQUEST: i64 = 0;
pub(crate) const METADATA_DATA: i64 = 1;
pub(crate) const METADATA_REJECT: i64 = 2;

/// Bounds applied to one peer session
#[derive(Debug, Clone, Copy)]
pub struct WireLimits {
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Upper bound on the whole exchange after connecting
    pub session_timeout: Duration,
    /// Largest `metadata_size` accepted
    pub max_metadata_size: usize,
}

/// Connect to a peer and download the verified info dictionary
pub async fn fetch_metadata(
    addr: SocketAddr,
    info_hash: InfoHash,
    peer_id: [u8; 20],
    limits: WireLimits,
) -> Result<Vec<u8>, PeerError> {
    let stream = tokio::time::timeout(limits.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| PeerError::Timeout { addr })?
        .map_err(|source| PeerError::Io { addr, source })?;

    tokio::time::timeout(
        limits.session_timeout,
        exchange_metadata(stream, addr, info_hash, peer_id, limits.max_metadata_size),
    )
    .await
    .map_err(|_| PeerError::Timeout { addr })?
}

/// Run the metadata exchange over an established connection
pub async fn exchange_metadata<S>(
    mut stream: S,
    addr: SocketAddr,
    info_hash: InfoHash,
    peer_id: [u8; 20],
    max_metadata_size: usize,
) -> Result<Vec<u8>, PeerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io = |source| PeerError::Io { addr, source };
    let protocol = |reason: String| PeerError::Protocol { addr, reason };

    stream
        .write_all(&handshake(&info_hash, &peer_id))
        .await
        .map_err(io)?;

    let mut theirs = [0u8; HANDSHAKE_LEN];
    stream.read_exact(&mut theirs).await.map_err(io)?;
    if theirs[0] as usize != PROTOCOL.len() || &theirs[1..20] != PROTOCOL {
        return Err(protocol("not a BitTorrent handshake".to_string()));
    }
    if &theirs[28..48] != info_hash.as_bytes() {
        return Err(protocol("handshake for a different torrent".to_string()));
    }
    if theirs[25] & 0x10 == 0 {
        return Err(PeerError::Unsupported { addr });
    }

    let ours = bencode::encode(&Value::dict([
        (
            "m",
            Value::dict([("ut_metadata", Value::Int(LOCAL_UT_METADATA.into()))]),
        ),
        ("v", Value::bytes(concat!("info-fetcher ", env!("CARGO_PKG_VERSION")))),
    ]));
    send_extended(&mut stream, EXT_HANDSHAKE, &ours)
        .await
        .map_err(io)?;

    let mut assembly: Option<Assembly> = None;

    loop {
        let frame = read_frame(&mut stream, addr).await?;
        // Keep-alive, or a message we have no use for
        let Some((&MSG_EXTENDED, body)) = frame.split_first() else {
            continue;
        };
        let Some((&ext_id, payload)) = body.split_first() else {
            return Err(protocol("empty extended message".to_string()));
        };

        match ext_id {
            EXT_HANDSHAKE if assembly.is_some() => {
                tracing::debug!(peer = %addr, "Ignoring repeated extended handshake");
            }
            EXT_HANDSHAKE => {
                let (remote_id, size) =
                    parse_extended_handshake(payload, addr, max_metadata_size)?;
                let pieces = size.div_ceil(METADATA_PIECE_SIZE);
                tracing::debug!(
                    peer = %addr,
                    info_hash = %info_hash,
                    metadata_size = size,
                    pieces,
                    "Peer offers metadata"
                );

                for piece in 0..pieces {
                    let request = bencode::encode(&Value::dict([
                        ("msg_type", Value::Int(METADATA_REQUEST)),
                        ("piece", Value::Int(piece as i64)),
                    ]));
                    send_extended(&mut stream, remote_id, &request)
                        .await
                        .map_err(io)?;
                }
                assembly = Some(Assembly::new(size));
            }
            LOCAL_UT_METADATA => {
                let Some(state) = assembly.as_mut() else {
                    return Err(protocol("metadata before extended handshake".to_string()));
                };

                let (header, consumed) = bencode::decode_prefix(payload)
                    .map_err(|e| protocol(format!("bad ut_metadata message: {e}")))?;
                let piece = header
                    .get("piece")
                    .and_then(Value::as_int)
                    .and_then(|p| usize::try_from(p).ok())
                    .ok_or_else(|| protocol("ut_metadata message without piece".to_string()))?;

                match header.get("msg_type").and_then(Value::as_int) {
                    Some(METADATA_DATA) => {
                        state.insert(piece, &payload[consumed..], addr)?;
                        if state.is_complete() {
                            let metadata = state.take();
                            if Sha1::digest(&metadata).as_slice() != info_hash.as_bytes() {
                                return Err(PeerError::HashMismatch { addr });
                            }
                            return Ok(metadata);
                        }
                    }
                    Some(METADATA_REJECT) => return Err(PeerError::Rejected { addr, piece }),
                    // We do not serve metadata
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

fn handshake(info_hash: &InfoHash, peer_id: &[u8; 20]) -> [u8; HANDSHAKE_LEN] {
    let mut out = [0u8; HANDSHAKE_LEN];
    out[0] = PROTOCOL.len() as u8;
    out[1..20].copy_from_slice(PROTOCOL);
    // Extension protocol bit
    out[25] |= 0x10;
    out[28..48].copy_from_slice(info_hash.as_bytes());
    out[48..68].copy_from_slice(peer_id);
    out
}

/// Extract the peer's `ut_metadata` id and the advertised metadata size
fn parse_extended_handshake(
    payload: &[u8],
    addr: SocketAddr,
    max_metadata_size: usize,
) -> Result<(u8, usize), PeerError> {
    let (value, _) = bencode::decode_prefix(payload).map_err(|e| PeerError::Protocol {
        addr,
        reason: format!("bad extended handshake: {e}"),
    })?;

    let remote_id = value
        .get("m")
        .and_then(|m| m.get("ut_metadata"))
        .and_then(Value::as_int)
        .and_then(|id| u8::try_from(id).ok())
        .filter(|id| *id != 0)
        .ok_or(PeerError::Unsupported { addr })?;

    let size = value
        .get("metadata_size")
        .and_then(Value::as_int)
        .and_then(|s| usize::try_from(s).ok())
        .ok_or(PeerError::Unsupported { addr })?;

    if size == 0 || size > max_metadata_size {
        return Err(PeerError::Protocol {
            addr,
            reason: format!("metadata_size {size} outside 1..={max_metadata_size}"),
        });
    }

    Ok((remote_id, size))
}

async fn send_extended<S>(stream: &mut S, ext_id: u8, payload: &[u8]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let len = (payload.len() + 2) as u32;
    let mut frame = Vec::with_capacity(payload.len() + 6);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.push(MSG_EXTENDED);
    frame.push(ext_id);
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await
}

async fn read_frame<S>(stream: &mut S, addr: SocketAddr) -> Result<Vec<u8>, PeerError>
where
    S: AsyncRead + Unpin,
{
    let len = stream
        .read_u32()
        .await
        .map_err(|source| PeerError::Io { addr, source })? as usize;
    if len > MAX_FRAME_LEN {
        return Err(PeerError::Protocol {
            addr,
            reason: format!("frame of {len} bytes exceeds {MAX_FRAME_LEN}"),
        });
    }
    let mut frame = vec![0u8; len];
    stream
        .read_exact(&mut frame)
        .await
        .map_err(|source| PeerError::Io { addr, source })?;
    Ok(frame)
}

/// Metadata pieces received so far
struct Assembly {
    buffer: Vec<u8>,
    received: Vec<bool>,
}

impl Assembly {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0u8; size],
            received: vec![false; size.div_ceil(METADATA_PIECE_SIZE)],
        }
    }

    fn insert(&mut self, piece: usize, data: &[u8], addr: SocketAddr) -> Result<(), PeerError> {
        if piece >= self.received.len() {
            return Err(PeerError::Protocol {
                addr,
                reason: format!(
                    "metadata piece {piece} out of range (0..{})",
                    self.received.len()
                ),
            });
        }
        // In range, so this cannot overflow: start < buffer.len()
        let start = piece * METADATA_PIECE_SIZE;
        let end = (start + METADATA_PIECE_SIZE).min(self.buffer.len());
        if data.len() != end - start {
            return Err(PeerError::Protocol {
                addr,
                reason: format!("metadata piece {piece} has unexpected length {}", data.len()),
            });
        }
        self.buffer[start..end].copy_from_slice(data);
        self.received[piece] = true;
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.received.iter().all(|r| *r)
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}
