use std::io::{self, ErrorKind};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::HEADER_SIZE;

/// Wire framing for the file transfer protocol.
///
/// Every message is a fixed-width header region followed by `payload_size`
/// raw payload bytes:
///
/// ```text
/// +----------------------------------+-----------------------------+
/// | header (exactly 1024 bytes)      | payload (payload_size bytes)|
/// | JSON, zero-padded to the width   | arbitrary bytes             |
/// +----------------------------------+-----------------------------+
/// ```
///
/// The header is `{"msg_type": int, "payload_size": int, "metadata": {...}}`
/// serialized as compact JSON and right-padded with `\0` (a byte that never
/// appears inside serialized JSON text). The explicit length prefix keeps
/// payloads binary safe - they may contain the padding sentinel - and the
/// fixed header width makes header parsing O(1) regardless of payload size.

/// Padding sentinel for the header region.
const HEADER_PAD: u8 = 0;

/// Message types carried in the header. 4-6 are reserved for an
/// authentication exchange that the services do not use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    FileHeader = 1,
    FileChunk = 2,
    FileComplete = 3,
    AuthRequest = 4,
    AuthResponse = 5,
    Error = 6,
}

impl MsgType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MsgType::FileHeader),
            2 => Some(MsgType::FileChunk),
            3 => Some(MsgType::FileComplete),
            4 => Some(MsgType::AuthRequest),
            5 => Some(MsgType::AuthResponse),
            6 => Some(MsgType::Error),
            _ => None,
        }
    }
}

/// Free-form key/value metadata carried in the frame header.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// The JSON document occupying the header region.
#[derive(Serialize, Deserialize)]
struct WireHeader {
    msg_type: u8,
    payload_size: u64,
    metadata: Metadata,
}

/// One decoded header-plus-payload unit.
#[derive(Debug)]
pub struct Frame {
    pub msg_type: MsgType,
    pub metadata: Metadata,
    pub payload: Vec<u8>,
}

/// Encode a frame to bytes: serialized header padded to HEADER_SIZE,
/// followed by the raw payload.
///
/// Fails if the serialized header exceeds HEADER_SIZE before padding,
/// which bounds how much metadata a frame can carry.
pub fn encode(msg_type: MsgType, payload: &[u8], metadata: Metadata) -> io::Result<Vec<u8>> {
    let header = WireHeader {
        msg_type: msg_type as u8,
        payload_size: payload.len() as u64,
        metadata,
    };

    let mut bytes = serde_json::to_vec(&header)
        .map_err(|e| io::Error::new(ErrorKind::InvalidData, format!("header serialize error: {}", e)))?;

    if bytes.len() > HEADER_SIZE {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("frame header is {} bytes, limit is {}", bytes.len(), HEADER_SIZE),
        ));
    }

    bytes.resize(HEADER_SIZE, HEADER_PAD);
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Encode and write one frame, flushing so it reaches the peer immediately.
pub async fn write_frame<W>(
    stream: &mut W,
    msg_type: MsgType,
    payload: &[u8],
    metadata: Metadata,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode(msg_type, payload, metadata)?;
    stream.write_all(&bytes).await?;
    stream.flush().await
}

/// Read one frame from the stream.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly (zero
/// bytes available before the first header byte). A close mid-header or
/// mid-payload is a truncated frame and reported as `UnexpectedEof`.
///
/// The transport may deliver fewer bytes than requested per read, so both
/// the header and payload are accumulated with repeated bounded reads.
pub async fn read_frame<R>(stream: &mut R) -> io::Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = stream.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("connection closed mid-header ({}/{} bytes)", filled, HEADER_SIZE),
            ));
        }
        filled += n;
    }

    // Strip the trailing padding before parsing. Only trailing sentinels are
    // padding; the serialized JSON itself never contains a zero byte.
    let end = header
        .iter()
        .rposition(|&b| b != HEADER_PAD)
        .map(|i| i + 1)
        .unwrap_or(0);

    let wire: WireHeader = serde_json::from_slice(&header[..end])
        .map_err(|e| io::Error::new(ErrorKind::InvalidData, format!("header parse error: {}", e)))?;

    let msg_type = MsgType::from_u8(wire.msg_type).ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidData,
            format!("unknown message type: {}", wire.msg_type),
        )
    })?;

    let mut payload = vec![0u8; wire.payload_size as usize];
    let mut got = 0;
    while got < payload.len() {
        let n = stream.read(&mut payload[got..]).await?;
        if n == 0 {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("connection closed mid-payload ({}/{} bytes)", got, payload.len()),
            ));
        }
        got += n;
    }

    Ok(Some(Frame {
        msg_type,
        metadata: wire.metadata,
        payload,
    }))
}
