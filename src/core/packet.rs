//! Source Query packet model: wire headers, type discriminators, and the
//! typed request/response payloads they carry.
//!
//! Every UDP datagram starts with a 4-byte little-endian header that
//! distinguishes single packets (`-1`) from split packets (`-2`). Single
//! packets continue with a one-byte type discriminator and a type-specific
//! payload; split packets continue with fragment bookkeeping and a slice of
//! the logical payload (reassembled by
//! [`SplitPacketAssembler`](crate::protocol::split::SplitPacketAssembler)).
//!
//! Decoding validates the discriminator against the known registry. An
//! unrecognized discriminator is not an error at this layer: the raw buffer is
//! handed back unmodified as [`Decoded::Rejected`] so a later stage can decide
//! what to do with it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Header marking a self-contained datagram.
pub const SINGLE_PACKET_HEADER: i32 = -1;

/// Header marking one fragment of a split response.
pub const SPLIT_PACKET_HEADER: i32 = -2;

/// Sentinel meaning "no challenge obtained yet".
pub const NO_CHALLENGE: i32 = -1;

/// Top bit of a split-packet request id doubles as the compression flag.
pub const COMPRESSION_FLAG: u32 = 0x8000_0000;

/// Request body sent with every A2S_INFO query.
pub const INFO_REQUEST_BODY: &str = "Source Engine Query";

// Request discriminators (client to server)
pub const A2S_INFO: u8 = 0x54;
pub const A2S_PLAYER: u8 = 0x55;
pub const A2S_RULES: u8 = 0x56;

// Response discriminators (server to client)
pub const S2C_CHALLENGE: u8 = 0x41;
pub const S2A_INFO: u8 = 0x49;
pub const S2A_PLAYER: u8 = 0x44;
pub const S2A_RULES: u8 = 0x45;

/// The two datagram headers the protocol defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryHeader {
    Single,
    Split,
}

impl TryFrom<i32> for QueryHeader {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            SINGLE_PACKET_HEADER => Ok(QueryHeader::Single),
            SPLIT_PACKET_HEADER => Ok(QueryHeader::Split),
            other => Err(ProtocolError::UnknownPacketHeader(other)),
        }
    }
}

/// Cursor-style reader over a packet payload.
///
/// All multi-byte integers on the wire are little-endian; strings are
/// NUL-terminated UTF-8. Running past the end of the buffer yields
/// `MalformedPacket` rather than panicking.
#[derive(Debug)]
pub struct PayloadReader {
    buf: Bytes,
}

impl PayloadReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn ensure(&self, len: usize) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(ProtocolError::MalformedPacket(format!(
                "unexpected end of packet: needed {len} more bytes, had {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.ensure(2)?;
        Ok(self.buf.get_i16_le())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.ensure(4)?;
        Ok(self.buf.get_f32_le())
    }

    /// Read a NUL-terminated UTF-8 string, consuming the terminator.
    pub fn read_cstring(&mut self) -> Result<String> {
        let nul = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ProtocolError::MalformedPacket("unterminated string".into()))?;
        let raw = self.buf.split_to(nul);
        self.buf.advance(1); // terminator
        String::from_utf8(raw.to_vec())
            .map_err(|e| ProtocolError::MalformedPacket(format!("invalid UTF-8 in string: {e}")))
    }

    /// Remaining bytes, consumed as one slice.
    pub fn read_rest(&mut self) -> Bytes {
        self.buf.split_to(self.buf.len())
    }
}

/// A typed Source Query request bound for a server.
///
/// Requests that require a challenge token carry [`NO_CHALLENGE`] until the
/// challenge handshake attaches the server-supplied value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryRequest {
    Info { challenge: i32 },
    Players { challenge: i32 },
    Rules { challenge: i32 },
}

impl QueryRequest {
    pub fn info() -> Self {
        QueryRequest::Info {
            challenge: NO_CHALLENGE,
        }
    }

    pub fn players() -> Self {
        QueryRequest::Players {
            challenge: NO_CHALLENGE,
        }
    }

    pub fn rules() -> Self {
        QueryRequest::Rules {
            challenge: NO_CHALLENGE,
        }
    }

    pub fn challenge(&self) -> i32 {
        match self {
            QueryRequest::Info { challenge }
            | QueryRequest::Players { challenge }
            | QueryRequest::Rules { challenge } => *challenge,
        }
    }

    /// The same logical request with a server-supplied challenge attached.
    pub fn with_challenge(&self, challenge: i32) -> Self {
        match self {
            QueryRequest::Info { .. } => QueryRequest::Info { challenge },
            QueryRequest::Players { .. } => QueryRequest::Players { challenge },
            QueryRequest::Rules { .. } => QueryRequest::Rules { challenge },
        }
    }

    /// Name of the response variant this request expects.
    pub fn expected_response(&self) -> &'static str {
        match self {
            QueryRequest::Info { .. } => "info",
            QueryRequest::Players { .. } => "players",
            QueryRequest::Rules { .. } => "rules",
        }
    }

    /// Serialize the request to wire bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32);
        buf.put_i32_le(SINGLE_PACKET_HEADER);
        match self {
            QueryRequest::Info { challenge } => {
                buf.put_u8(A2S_INFO);
                buf.put_slice(INFO_REQUEST_BODY.as_bytes());
                buf.put_u8(0);
                // A2S_INFO only carries the challenge once one was issued
                if *challenge != NO_CHALLENGE {
                    buf.put_i32_le(*challenge);
                }
            }
            QueryRequest::Players { challenge } => {
                buf.put_u8(A2S_PLAYER);
                buf.put_i32_le(*challenge);
            }
            QueryRequest::Rules { challenge } => {
                buf.put_u8(A2S_RULES);
                buf.put_i32_le(*challenge);
            }
        }
        buf.freeze()
    }
}

/// Server information returned by an A2S_INFO exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    /// A2S_INFO protocol version
    pub protocol: u8,
    /// Server hostname
    pub name: String,
    /// Current map
    pub map: String,
    /// Location of server files
    pub folder: String,
    /// Name of game
    pub game: String,
    /// Steam application id of game
    pub app_id: u16,
    /// Current players
    pub players: u8,
    /// Max players
    pub max_players: u8,
    /// Current bots
    pub bots: u8,
    /// `d` dedicated, `l` listen, `p` SourceTV relay
    pub server_type: char,
    /// `l` Linux, `w` Windows, `m`/`o` Mac
    pub environment: char,
    /// Is the server password protected?
    pub password_protected: bool,
    /// Is the server VAC enabled?
    pub vac_enabled: bool,
    /// Game version string
    pub version: String,
    /// Extra Data Flag fields, present depending on the EDF byte
    pub port: Option<u16>,
    pub steam_id: Option<u64>,
    pub spectator_port: Option<u16>,
    pub spectator_name: Option<String>,
    pub keywords: Option<String>,
    pub game_id: Option<u64>,
}

impl ServerInfo {
    const EDF_PORT: u8 = 0x80;
    const EDF_STEAM_ID: u8 = 0x10;
    const EDF_SPECTATOR: u8 = 0x40;
    const EDF_KEYWORDS: u8 = 0x20;
    const EDF_GAME_ID: u8 = 0x01;

    /// Parse an S2A_INFO payload (everything after the discriminator byte).
    pub fn parse(reader: &mut PayloadReader) -> Result<Self> {
        let protocol = reader.read_u8()?;
        let name = reader.read_cstring()?;
        let map = reader.read_cstring()?;
        let folder = reader.read_cstring()?;
        let game = reader.read_cstring()?;
        let app_id = reader.read_u16()?;
        let players = reader.read_u8()?;
        let max_players = reader.read_u8()?;
        let bots = reader.read_u8()?;
        let server_type = char::from(reader.read_u8()?);
        let environment = char::from(reader.read_u8()?);
        let password_protected = reader.read_u8()? == 1;
        let vac_enabled = reader.read_u8()? == 1;
        let version = reader.read_cstring()?;

        let mut info = ServerInfo {
            protocol,
            name,
            map,
            folder,
            game,
            app_id,
            players,
            max_players,
            bots,
            server_type,
            environment,
            password_protected,
            vac_enabled,
            version,
            port: None,
            steam_id: None,
            spectator_port: None,
            spectator_name: None,
            keywords: None,
            game_id: None,
        };

        // Trailing EDF byte is optional; older servers omit it entirely.
        if reader.remaining() > 0 {
            let edf = reader.read_u8()?;
            if edf & Self::EDF_PORT != 0 {
                info.port = Some(reader.read_u16()?);
            }
            if edf & Self::EDF_STEAM_ID != 0 {
                info.steam_id = Some(reader.read_u64()?);
            }
            if edf & Self::EDF_SPECTATOR != 0 {
                info.spectator_port = Some(reader.read_u16()?);
                info.spectator_name = Some(reader.read_cstring()?);
            }
            if edf & Self::EDF_KEYWORDS != 0 {
                info.keywords = Some(reader.read_cstring()?);
            }
            if edf & Self::EDF_GAME_ID != 0 {
                info.game_id = Some(reader.read_u64()?);
            }
        }

        Ok(info)
    }
}

/// One player record from an A2S_PLAYER exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEntry {
    pub index: u8,
    pub name: String,
    pub score: i32,
    pub duration: f32,
}

/// One server rule (cvar name/value pair) from an A2S_RULES exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRule {
    pub name: String,
    pub value: String,
}

/// A decoded Source Query response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    Challenge(i32),
    Info(ServerInfo),
    Players(Vec<PlayerEntry>),
    Rules(Vec<ServerRule>),
}

impl QueryResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryResponse::Challenge(_) => "challenge",
            QueryResponse::Info(_) => "info",
            QueryResponse::Players(_) => "players",
            QueryResponse::Rules(_) => "rules",
        }
    }
}

/// Outcome of a single-packet decode attempt.
///
/// A stage either accepts the buffer and produces a typed response, or rejects
/// it and hands the original bytes through unchanged for the next stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Accepted(QueryResponse),
    Rejected(Bytes),
}

/// Decode a complete single-packet buffer (header included).
///
/// This is also the second decode pass for reassembled split responses, whose
/// concatenated payload begins with its own single-packet header.
pub fn decode_single(buf: Bytes) -> Result<Decoded> {
    let mut reader = PayloadReader::new(buf.clone());
    let header = QueryHeader::try_from(reader.read_i32()?)?;
    if header != QueryHeader::Single {
        return Err(ProtocolError::MalformedPacket(
            "split header in single-packet decode".into(),
        ));
    }

    let discriminator = reader.read_u8()?;
    let response = match discriminator {
        S2C_CHALLENGE => QueryResponse::Challenge(reader.read_i32()?),
        S2A_INFO => QueryResponse::Info(ServerInfo::parse(&mut reader)?),
        S2A_PLAYER => {
            let count = reader.read_u8()?;
            let mut players = Vec::with_capacity(count as usize);
            for _ in 0..count {
                players.push(PlayerEntry {
                    index: reader.read_u8()?,
                    name: reader.read_cstring()?,
                    score: reader.read_i32()?,
                    duration: reader.read_f32()?,
                });
            }
            QueryResponse::Players(players)
        }
        S2A_RULES => {
            let count = reader.read_i16()?;
            let mut rules = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count {
                rules.push(ServerRule {
                    name: reader.read_cstring()?,
                    value: reader.read_cstring()?,
                });
            }
            QueryResponse::Rules(rules)
        }
        _ => return Ok(Decoded::Rejected(buf)),
    };

    Ok(Decoded::Accepted(response))
}

/// One fragment of a split UDP response.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitFragment {
    /// Request id shared by all fragments of one logical response.
    pub id: i32,
    /// Declared total fragment count.
    pub total: u8,
    /// This fragment's 0-based sequence number.
    pub number: u8,
    /// Declared maximum fragment size.
    pub split_size: u16,
    /// Slice of the logical payload carried by this fragment.
    pub payload: Bytes,
}

/// A parsed inbound datagram, before any reassembly.
#[derive(Debug, Clone, PartialEq)]
pub enum Datagram {
    /// Self-contained packet; carries the full buffer including its header.
    Single(Bytes),
    Split(SplitFragment),
}

impl Datagram {
    /// Classify a raw datagram by its 4-byte header and, for split packets,
    /// parse the fragment bookkeeping.
    ///
    /// The compression flag (bit 31 of the request id) is recognized but
    /// compressed payloads are not supported; decoding fails fast rather than
    /// producing corrupt data.
    pub fn parse(buf: Bytes) -> Result<Datagram> {
        let mut reader = PayloadReader::new(buf.clone());
        match QueryHeader::try_from(reader.read_i32()?)? {
            QueryHeader::Single => Ok(Datagram::Single(buf)),
            QueryHeader::Split => {
                let raw_id = reader.read_i32()?;
                if (raw_id as u32) & COMPRESSION_FLAG != 0 {
                    return Err(ProtocolError::CompressionNotSupported);
                }
                let total = reader.read_u8()?;
                let number = reader.read_u8()?;
                let split_size = reader.read_u16()?;
                if number >= total {
                    return Err(ProtocolError::MalformedPacket(format!(
                        "fragment number {number} out of range for total {total}"
                    )));
                }
                Ok(Datagram::Split(SplitFragment {
                    id: raw_id,
                    total,
                    number,
                    split_size,
                    payload: reader.read_rest(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(discriminator: u8, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_i32_le(SINGLE_PACKET_HEADER);
        buf.put_u8(discriminator);
        buf.put_slice(payload);
        buf.freeze()
    }

    #[test]
    fn info_request_without_challenge() {
        let bytes = QueryRequest::info().encode();
        assert_eq!(&bytes[0..4], &(-1i32).to_le_bytes());
        assert_eq!(bytes[4], A2S_INFO);
        assert_eq!(&bytes[5..25], b"Source Engine Query\0");
        assert_eq!(bytes.len(), 25);
    }

    #[test]
    fn info_request_with_challenge() {
        let bytes = QueryRequest::info().with_challenge(42).encode();
        assert_eq!(bytes.len(), 29);
        assert_eq!(&bytes[25..29], &42i32.to_le_bytes());
    }

    #[test]
    fn players_request_carries_sentinel() {
        let bytes = QueryRequest::players().encode();
        assert_eq!(bytes[4], A2S_PLAYER);
        assert_eq!(&bytes[5..9], &(-1i32).to_le_bytes());
    }

    #[test]
    fn challenge_response_decodes() {
        let buf = single(S2C_CHALLENGE, &0x0102_0304i32.to_le_bytes());
        match decode_single(buf).unwrap() {
            Decoded::Accepted(QueryResponse::Challenge(c)) => assert_eq!(c, 0x0102_0304),
            other => panic!("unexpected decode outcome: {other:?}"),
        }
    }

    #[test]
    fn unknown_discriminator_is_rejected_not_error() {
        let buf = single(0x5A, &[1, 2, 3]);
        match decode_single(buf.clone()).unwrap() {
            Decoded::Rejected(raw) => assert_eq!(raw, buf),
            other => panic!("unexpected decode outcome: {other:?}"),
        }
    }

    #[test]
    fn unknown_header_is_an_error() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(7);
        buf.put_u8(S2C_CHALLENGE);
        assert!(matches!(
            Datagram::parse(buf.freeze()),
            Err(ProtocolError::UnknownPacketHeader(7))
        ));
    }

    #[test]
    fn player_list_decodes() {
        let mut payload = BytesMut::new();
        payload.put_u8(2);
        payload.put_u8(0);
        payload.put_slice(b"alice\0");
        payload.put_i32_le(12);
        payload.put_f32_le(30.5);
        payload.put_u8(1);
        payload.put_slice(b"bob\0");
        payload.put_i32_le(-1);
        payload.put_f32_le(0.0);

        let buf = single(S2A_PLAYER, &payload);
        match decode_single(buf).unwrap() {
            Decoded::Accepted(QueryResponse::Players(players)) => {
                assert_eq!(players.len(), 2);
                assert_eq!(players[0].name, "alice");
                assert_eq!(players[0].score, 12);
                assert_eq!(players[1].name, "bob");
                assert_eq!(players[1].score, -1);
            }
            other => panic!("unexpected decode outcome: {other:?}"),
        }
    }

    #[test]
    fn rules_decode() {
        let mut payload = BytesMut::new();
        payload.put_i16_le(1);
        payload.put_slice(b"sv_cheats\0");
        payload.put_slice(b"0\0");

        let buf = single(S2A_RULES, &payload);
        match decode_single(buf).unwrap() {
            Decoded::Accepted(QueryResponse::Rules(rules)) => {
                assert_eq!(rules.len(), 1);
                assert_eq!(rules[0].name, "sv_cheats");
                assert_eq!(rules[0].value, "0");
            }
            other => panic!("unexpected decode outcome: {other:?}"),
        }
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let buf = single(S2C_CHALLENGE, &[0x01, 0x02]); // challenge needs 4 bytes
        assert!(matches!(
            decode_single(buf),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }

    #[test]
    fn split_fragment_parses() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(SPLIT_PACKET_HEADER);
        buf.put_i32_le(9);
        buf.put_u8(3);
        buf.put_u8(1);
        buf.put_u16_le(1248);
        buf.put_slice(b"chunk");

        match Datagram::parse(buf.freeze()).unwrap() {
            Datagram::Split(frag) => {
                assert_eq!(frag.id, 9);
                assert_eq!(frag.total, 3);
                assert_eq!(frag.number, 1);
                assert_eq!(frag.split_size, 1248);
                assert_eq!(&frag.payload[..], b"chunk");
            }
            other => panic!("unexpected datagram: {other:?}"),
        }
    }

    #[test]
    fn compressed_split_fragment_fails_fast() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(SPLIT_PACKET_HEADER);
        buf.put_i32_le(9i32 | i32::MIN); // compression bit set
        buf.put_u8(2);
        buf.put_u8(0);
        buf.put_u16_le(1248);

        assert!(matches!(
            Datagram::parse(buf.freeze()),
            Err(ProtocolError::CompressionNotSupported)
        ));
    }

    #[test]
    fn fragment_number_out_of_range_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(SPLIT_PACKET_HEADER);
        buf.put_i32_le(9);
        buf.put_u8(2);
        buf.put_u8(2); // 0-based, so 2 is out of range for total=2
        buf.put_u16_le(1248);

        assert!(matches!(
            Datagram::parse(buf.freeze()),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }

    #[test]
    fn info_response_with_edf_fields() {
        let mut payload = BytesMut::new();
        payload.put_u8(17); // protocol
        payload.put_slice(b"test server\0");
        payload.put_slice(b"de_dust2\0");
        payload.put_slice(b"csgo\0");
        payload.put_slice(b"Counter-Strike\0");
        payload.put_u16_le(730);
        payload.put_u8(12); // players
        payload.put_u8(24); // max
        payload.put_u8(0); // bots
        payload.put_u8(b'd');
        payload.put_u8(b'l');
        payload.put_u8(0); // not password protected
        payload.put_u8(1); // vac
        payload.put_slice(b"1.38.7.9\0");
        payload.put_u8(0x80 | 0x20); // EDF: port + keywords
        payload.put_u16_le(27015);
        payload.put_slice(b"secure,competitive\0");

        let buf = single(S2A_INFO, &payload);
        match decode_single(buf).unwrap() {
            Decoded::Accepted(QueryResponse::Info(info)) => {
                assert_eq!(info.name, "test server");
                assert_eq!(info.map, "de_dust2");
                assert_eq!(info.app_id, 730);
                assert_eq!(info.players, 12);
                assert_eq!(info.server_type, 'd');
                assert!(info.vac_enabled);
                assert_eq!(info.port, Some(27015));
                assert_eq!(info.keywords.as_deref(), Some("secure,competitive"));
                assert_eq!(info.steam_id, None);
            }
            other => panic!("unexpected decode outcome: {other:?}"),
        }
    }
}
