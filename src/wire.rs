//! Wire framing and snapshot cursors
//!
//! Every payload exchanged between participants is a frame: a 1-byte
//! packet kind, a fixed-width little-endian `u32` entity (or owner)
//! identifier, then a kind-specific body. The envelope is framed by hand
//! because peers of different builds must agree on it byte for byte;
//! structured data inside a body goes through serde + bincode.
//!
//! Reads are bounds-checked. A truncated or garbled body surfaces as a
//! [`WireError`], which callers treat as "drop this one payload" — never
//! as a reason to abort the receive loop.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes of envelope before the body: kind tag plus entity id.
pub const FRAME_HEADER_LEN: usize = 5;

/// Errors produced while decoding inbound payloads.
///
/// All of these are local to a single payload; the entity it addressed
/// keeps its last-known-good state.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("buffer underrun: needed {needed} more bytes, {remaining} left")]
    Underrun { needed: usize, remaining: usize },
    #[error("unknown packet kind {0}")]
    UnknownKind(u8),
    #[error("unknown entity kind {0}")]
    UnknownEntityKind(u8),
    #[error("payload decode failed: {0}")]
    Payload(#[from] bincode::Error),
}

/// The 1-byte frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// One entity's serialized state for this snapshot interval.
    Snapshot = 0,
    /// Death notification, with optional kind-specific death data.
    Death = 1,
    /// Damage applied to an entity.
    Damage = 2,
    /// Out-of-band admission signal: the id field names a banned owner.
    Ban = 3,
}

impl PacketKind {
    pub fn from_u8(byte: u8) -> Result<Self, WireError> {
        match byte {
            0 => Ok(PacketKind::Snapshot),
            1 => Ok(PacketKind::Death),
            2 => Ok(PacketKind::Damage),
            3 => Ok(PacketKind::Ban),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

/// Body of a [`PacketKind::Ban`] frame: a short human-readable reason
/// tagged (via the frame header) with the banned owner's identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BanNotice {
    pub reason: String,
}

/// Builds one outbound frame.
pub fn encode_frame(kind: PacketKind, id: u32, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.push(kind as u8);
    frame.extend_from_slice(&id.to_le_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Splits an inbound frame into its kind, addressed id and body.
pub fn decode_frame(bytes: &[u8]) -> Result<(PacketKind, u32, &[u8]), WireError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(WireError::Underrun {
            needed: FRAME_HEADER_LEN - bytes.len(),
            remaining: bytes.len(),
        });
    }
    let kind = PacketKind::from_u8(bytes[0])?;
    let id = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok((kind, id, &bytes[FRAME_HEADER_LEN..]))
}

/// Growable sink an entity serializes one snapshot into.
///
/// Preallocated from the entity's `buffer_size` bound so steady-state
/// emission does not reallocate.
#[derive(Debug, Default)]
pub struct SnapshotWriter {
    buf: Vec<u8>,
}

impl SnapshotWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Serializes a structured payload with a 2-byte length prefix, so a
    /// reader can skip it without understanding its contents.
    pub fn write_payload<T: Serialize>(&mut self, value: &T) -> Result<(), WireError> {
        let bytes = bincode::serialize(value)?;
        debug_assert!(bytes.len() <= u16::MAX as usize);
        self.buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        self.buf.extend_from_slice(&bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Bounds-checked cursor over one inbound snapshot body.
#[derive(Debug)]
pub struct SnapshotReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SnapshotReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < count {
            return Err(WireError::Underrun {
                needed: count - self.remaining(),
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads back a length-prefixed payload written by
    /// [`SnapshotWriter::write_payload`].
    pub fn read_payload<T: DeserializeOwned>(&mut self) -> Result<T, WireError> {
        let len = {
            let bytes = self.take(2)?;
            u16::from_le_bytes([bytes[0], bytes[1]]) as usize
        };
        let body = self.take(len)?;
        Ok(bincode::deserialize(body)?)
    }
}
