//! # Transport Clients
//!
//! High-level client front-ends over the protocol core.
//!
//! ## Components
//! - **Query**: UDP Source Query client (info, players, rules)
//! - **Rcon**: TCP RCON client (authenticate, execute)

pub mod query;
pub mod rcon;

pub use query::QueryClient;
pub use rcon::RconClient;
