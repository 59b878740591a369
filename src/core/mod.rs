//! # Core Protocol Components
//!
//! Low-level packet handling and wire codecs for both Source Engine binary
//! protocols.
//!
//! ## Components
//! - **Packet**: Source Query packet model (UDP) with header and
//!   discriminator validation
//! - **Codec**: Tokio codec for RCON framing over TCP streams
//!
//! ## Wire Formats
//! ```text
//! Query:  [Header(4, LE, -1 single / -2 split)] [Type(1)] [Payload(N)]
//! RCON:   [Size(4, LE)] [Id(4, LE)] [Type(4, LE)] [Body(N) 0x00] [0x00]
//! ```
//!
//! ## Robustness
//! - Unknown discriminators are rejected-and-passed-through, never a crash
//! - Partial RCON frames consume no input and retry on the next read
//! - Compressed split payloads fail fast instead of decoding garbage

pub mod codec;
pub mod packet;
