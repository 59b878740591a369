//! Source RCON framing over TCP.
//!
//! Each frame is `int32 size | int32 id | int32 type | body | 0x00 | 0x00`,
//! all integers little-endian, with `size` counting everything after itself
//! (`8 + body length + 2`). The decoder buffers partial reads: until a full,
//! valid frame is available it consumes nothing and reports "not ready",
//! letting the framed transport retry once more bytes arrive.
//!
//! Validity checks run in a fixed order: minimum length, declared size within
//! the readable window, request id in the valid set, recognized type, and both
//! terminator bytes zero. A terminator-sentinel frame (id 999) with non-zero
//! trailing bytes is a known server quirk; its bytes are discarded outright
//! instead of stalling the stream.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use crate::error::{ProtocolError, Result};

/// Reserved request id the server uses for terminator packets.
///
/// Treated as a protocol-level sentinel: the request-id generator never emits
/// it, so a collision with a real command id cannot occur on our side.
pub const TERMINATOR_REQUEST_ID: i32 = 999;

/// Smallest possible frame: size + id + type + empty body NUL + terminator NUL.
pub const MIN_FRAME_LEN: usize = 14;

/// Inclusive bounds of the id space used for real requests.
pub const REQUEST_ID_MIN: i32 = 100_000_000;
pub const REQUEST_ID_MAX: i32 = 999_999_999;

/// Recognized RCON packet types.
///
/// The wire value 2 is direction-dependent: outbound it is an EXECCOMMAND
/// request, inbound an AUTH_RESPONSE. The decoder only ever sees inbound
/// traffic, so 2 always decodes as [`RconPacketType::AuthResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RconPacketType {
    /// SERVERDATA_AUTH (outbound, wire value 3)
    Auth,
    /// SERVERDATA_AUTH_RESPONSE (inbound, wire value 2)
    AuthResponse,
    /// SERVERDATA_EXECCOMMAND (outbound, wire value 2)
    ExecCommand,
    /// SERVERDATA_RESPONSE_VALUE (inbound, wire value 0)
    ResponseValue,
}

impl RconPacketType {
    fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(RconPacketType::ResponseValue),
            2 => Some(RconPacketType::AuthResponse),
            3 => Some(RconPacketType::Auth),
            _ => None,
        }
    }

    fn to_wire(self) -> i32 {
        match self {
            RconPacketType::Auth => 3,
            RconPacketType::AuthResponse | RconPacketType::ExecCommand => 2,
            RconPacketType::ResponseValue => 0,
        }
    }
}

/// One RCON frame, decoded or ready to encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub id: i32,
    pub packet_type: RconPacketType,
    pub body: String,
}

impl RconPacket {
    pub fn auth(id: i32, password: &str) -> Self {
        Self {
            id,
            packet_type: RconPacketType::Auth,
            body: password.to_string(),
        }
    }

    pub fn exec(id: i32, command: &str) -> Self {
        Self {
            id,
            packet_type: RconPacketType::ExecCommand,
            body: command.to_string(),
        }
    }

    /// Empty probe sent after a command so the server echoes a recognizable
    /// terminator once all response fragments have been flushed.
    pub fn terminator_probe() -> Self {
        Self {
            id: TERMINATOR_REQUEST_ID,
            packet_type: RconPacketType::ResponseValue,
            body: String::new(),
        }
    }

    pub fn is_terminator(&self) -> bool {
        self.id == TERMINATOR_REQUEST_ID
    }

    /// Encoded frame size for this packet's body.
    pub fn declared_size(&self) -> i32 {
        (8 + self.body.len() + 2) as i32
    }
}

fn valid_request_id(id: i32) -> bool {
    id == -1 || id == TERMINATOR_REQUEST_ID || (REQUEST_ID_MIN..=REQUEST_ID_MAX).contains(&id)
}

/// Tokio codec for RCON frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct RconCodec;

impl Decoder for RconCodec {
    type Item = RconPacket;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RconPacket>> {
        loop {
            if src.len() < MIN_FRAME_LEN {
                return Ok(None);
            }

            let size = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
            if size < (MIN_FRAME_LEN - 4) as i32 {
                // Declared size cannot hold a minimal frame; wait for the
                // stream to resynchronize on further bytes.
                trace!(size, "declared frame size below minimum, waiting");
                return Ok(None);
            }

            let total = size as usize + 4;
            if total > src.len() {
                // Incomplete frame: leave the cursor untouched and retry on
                // the next read.
                return Ok(None);
            }

            let id = i32::from_le_bytes([src[4], src[5], src[6], src[7]]);
            if !valid_request_id(id) {
                trace!(id, "request id outside valid set, waiting");
                return Ok(None);
            }

            let raw_type = i32::from_le_bytes([src[8], src[9], src[10], src[11]]);
            let Some(packet_type) = RconPacketType::from_wire(raw_type) else {
                trace!(raw_type, "unrecognized packet type, waiting");
                return Ok(None);
            };

            if src[total - 2] != 0 || src[total - 1] != 0 {
                if id == TERMINATOR_REQUEST_ID {
                    // Malformed terminator frames are a known quirk; drop the
                    // bytes and try to decode whatever follows.
                    warn!(size, "discarding malformed terminator packet");
                    src.advance(total);
                    continue;
                }
                return Ok(None);
            }

            let frame = src.split_to(total);
            let body_len = size as usize - 10;
            // Server command output may be latin-1, not UTF-8; decode lossily.
            let body = String::from_utf8_lossy(&frame[12..12 + body_len]).into_owned();

            trace!(id, ?packet_type, body_len, "decoded rcon frame");
            return Ok(Some(RconPacket {
                id,
                packet_type,
                body,
            }));
        }
    }
}

impl Encoder<RconPacket> for RconCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: RconPacket, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(packet.declared_size() as usize + 4);
        dst.put_i32_le(packet.declared_size());
        dst.put_i32_le(packet.id);
        dst.put_i32_le(packet.packet_type.to_wire());
        dst.put_slice(packet.body.as_bytes());
        dst.put_u8(0);
        dst.put_u8(0);
        Ok(())
    }
}
