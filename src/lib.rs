//! # Source Protocol
//!
//! Async client implementation of the two Source Engine remote protocols:
//! Source Query over UDP and Source RCON over TCP.
//!
//! ## Features
//! - **Source Query**: A2S_INFO / A2S_PLAYER / A2S_RULES with transparent
//!   challenge handshakes and split-packet reassembly
//! - **RCON**: authenticate-then-execute sessions with multi-packet response
//!   reassembly via terminator probes
//! - **Correlation**: at-most-once completion for every request, including
//!   under response/timeout races
//! - **Configuration**: TOML files, environment overrides, validation
//!
//! ## Quick Start
//! ```no_run
//! use source_protocol::config::{QueryConfig, RconConfig};
//! use source_protocol::transport::{QueryClient, RconClient};
//!
//! # async fn run() -> source_protocol::Result<()> {
//! let addr = "203.0.113.7:27015".parse().unwrap();
//!
//! let query = QueryClient::bind(QueryConfig::default()).await?;
//! let info = query.info(addr).await?;
//! println!("{} ({}/{})", info.name, info.players, info.max_players);
//!
//! let rcon = RconClient::connect(addr, RconConfig::default()).await?;
//! if rcon.authenticate("password").await? {
//!     let status = rcon.execute("status").await?;
//!     println!("{status}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//! ```text
//! transport   QueryClient (UDP)          RconClient (TCP)
//!                 │                           │
//! protocol    SplitPacketAssembler        RconFrameAssembler
//!             ChallengeExchange           AuthRegistry
//!                 └────── Correlator ─────────┘
//!                 │                           │
//! core        packet (Query model)        codec (RCON framing)
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use config::ProtocolConfig;
pub use core::codec::{RconCodec, RconPacket, RconPacketType};
pub use core::packet::{
    PlayerEntry, QueryRequest, QueryResponse, ServerInfo, ServerRule,
};
pub use error::{AuthFailure, ProtocolError, Result};
pub use transport::{QueryClient, RconClient};

/// Library version, as published.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
