//! Framing of the Source remote console protocol.
//!
//! Every packet is `size | id | type | body | 0x00 0x00` with all integers
//! little-endian `i32`. `size` counts everything after itself, so an empty body
//! gives a size of 10.

use thiserror::Error;

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Id the server answers an authentication with when the password is wrong.
pub const AUTH_FAILED_ID: i32 = -1;
/// Id of the empty packet sent after each command to mark the end of its answer.
pub const SENTINEL_ID: i32 = -20;

/// id + type + two terminating null bytes
const MIN_SIZE: i32 = 10;
/// Upper bound for the size field; anything larger means the stream is out of sync.
pub const MAX_PACKET_SIZE: i32 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub id: i32,
    pub kind: i32,
    pub body: Vec<u8>,
}

impl RconPacket {
    pub fn new(id: i32, kind: i32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    pub fn auth(password: &str) -> Self {
        Self::new(0, SERVERDATA_AUTH, password)
    }

    pub fn command(id: i32, command: &str) -> Self {
        Self::new(id, SERVERDATA_EXECCOMMAND, command)
    }

    pub fn sentinel() -> Self {
        Self::new(SENTINEL_ID, SERVERDATA_EXECCOMMAND, Vec::new())
    }

    pub fn size(&self) -> i32 {
        self.body.len() as i32 + MIN_SIZE
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.body.len() + 14);
        bytes.extend_from_slice(&self.size().to_le_bytes());
        bytes.extend_from_slice(&self.id.to_le_bytes());
        bytes.extend_from_slice(&self.kind.to_le_bytes());
        bytes.extend_from_slice(&self.body);
        bytes.extend_from_slice(&[0, 0]);
        bytes
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid packet size {0}")]
    InvalidSize(i32),
}

/// Collects bytes read from a stream and cuts complete packets off its front.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    bytes: Vec<u8>,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Returns the next complete packet, `None` while more bytes are needed.
    ///
    /// A size field outside `10..=MAX_PACKET_SIZE` is an error and leaves the
    /// buffer untouched; callers are expected to drop the connection.
    pub fn next_packet(&mut self) -> Result<Option<RconPacket>, FrameError> {
        if self.bytes.len() < 4 {
            return Ok(None);
        }

        let size = read_i32(&self.bytes[0..4]);
        if !(MIN_SIZE..=MAX_PACKET_SIZE).contains(&size) {
            return Err(FrameError::InvalidSize(size));
        }

        let total = size as usize + 4;
        if self.bytes.len() < total {
            return Ok(None);
        }

        let id = read_i32(&self.bytes[4..8]);
        let kind = read_i32(&self.bytes[8..12]);
        let body = self.bytes[12..total - 2].to_vec();
        self.bytes.drain(..total);

        Ok(Some(RconPacket { id, kind, body }))
    }
}

fn read_i32(bytes: &[u8]) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    i32::from_le_bytes(raw)
}
