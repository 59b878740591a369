//! # Protocol State Machines
//!
//! Everything between the wire codecs and the caller's completion handle.
//!
//! ## Components
//! - **Split**: UDP split-packet reassembly (shared pending map)
//! - **Assembler**: TCP RCON multi-packet response reassembly
//! - **Challenge**: Source Query challenge handshake
//! - **Auth**: RCON authentication latch, keyed by remote address
//! - **Correlator**: request/response matching with at-most-once completion
//!
//! ## Concurrency
//! Each connection processes its packets sequentially, but many connections
//! share the split-packet map and the auth registry; both are lock-guarded
//! and use atomic check-and-take updates. Completion handles are backed by
//! oneshot channels, making double completion structurally impossible.

pub mod assembler;
pub mod auth;
pub mod challenge;
pub mod correlator;
pub mod split;
