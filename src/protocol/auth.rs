//! RCON authentication state, keyed by remote address.
//!
//! The authenticate-then-execute handshake compares the server's auth reply
//! id against the request's id: equal and not -1 latches the connection as
//! authenticated; anything else is a bad password. The latch is process-wide
//! and shared across connection tasks, so all mutation goes through one
//! lock-guarded map with check-and-take semantics: a disconnect flips the
//! flag from true to false exactly once, logging the identity of the last
//! successful authentication for diagnostics.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::{constants, AuthFailure, ProtocolError, Result};

#[derive(Debug, Clone, Copy)]
enum AuthEntry {
    /// Auth request sent, reply outstanding.
    Pending { request_id: i32 },
    /// Reply matched; commands are allowed until disconnect.
    Authenticated { request_id: i32, since: Instant },
}

/// Per-address authentication latch.
#[derive(Debug, Clone, Default)]
pub struct AuthRegistry {
    entries: Arc<RwLock<HashMap<SocketAddr, AuthEntry>>>,
}

impl AuthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outbound auth request. Any previous state for the address is
    /// replaced; re-authentication starts the handshake over.
    pub fn begin(&self, addr: SocketAddr, request_id: i32) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_AUTH_WRITE_LOCK.to_string()))?;
        entries.insert(addr, AuthEntry::Pending { request_id });
        debug!(%addr, request_id, "auth handshake started");
        Ok(())
    }

    /// Apply the server's auth reply.
    ///
    /// Returns `Ok(true)` and latches the flag when the reply id matches the
    /// pending request id (and is not -1); otherwise the pending state is
    /// cleared and the handshake fails with `BAD_PASSWORD`.
    pub fn handle_reply(&self, addr: SocketAddr, reply_id: i32) -> Result<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_AUTH_WRITE_LOCK.to_string()))?;

        let Some(AuthEntry::Pending { request_id }) = entries.get(&addr).copied() else {
            warn!(%addr, reply_id, "auth reply without a pending handshake");
            return Err(ProtocolError::NoPendingRequest);
        };

        if reply_id == request_id && reply_id != -1 {
            entries.insert(
                addr,
                AuthEntry::Authenticated {
                    request_id,
                    since: Instant::now(),
                },
            );
            info!(%addr, request_id, "rcon authentication succeeded");
            Ok(true)
        } else {
            entries.remove(&addr);
            warn!(%addr, request_id, reply_id, "rcon authentication rejected");
            Err(ProtocolError::NotAuthenticated(AuthFailure::BadPassword))
        }
    }

    /// Request id of a handshake awaiting its reply, if any. Used to route
    /// the auth response back to the caller even when the server answers
    /// with id -1.
    pub fn pending_request_id(&self, addr: SocketAddr) -> Option<i32> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| match entries.get(&addr) {
                Some(AuthEntry::Pending { request_id }) => Some(*request_id),
                _ => None,
            })
    }

    pub fn is_authenticated(&self, addr: SocketAddr) -> bool {
        self.entries
            .read()
            .map(|entries| matches!(entries.get(&addr), Some(AuthEntry::Authenticated { .. })))
            .unwrap_or(false)
    }

    /// Gate for command submission: fails without a network round trip when
    /// the address has not completed authentication.
    pub fn ensure_authenticated(&self, addr: SocketAddr) -> Result<()> {
        if self.is_authenticated(addr) {
            Ok(())
        } else {
            Err(ProtocolError::NotAuthenticated(AuthFailure::Reauthenticate))
        }
    }

    /// Drop authentication mid-session, e.g. when a command response carries
    /// the bad-password marker. The in-flight command fails; the connection
    /// stays open.
    pub fn invalidate(&self, addr: SocketAddr) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_AUTH_WRITE_LOCK.to_string()))?;
        if entries.remove(&addr).is_some() {
            warn!(%addr, "credentials invalidated, re-authentication required");
        }
        Ok(())
    }

    /// Disconnect handling: atomically take the entry so the true→false flip
    /// happens exactly once even when several paths observe the close.
    pub fn reset(&self, addr: SocketAddr) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        match entries.remove(&addr) {
            Some(AuthEntry::Authenticated { request_id, since }) => {
                info!(
                    %addr,
                    last_auth_id = request_id,
                    session_secs = since.elapsed().as_secs(),
                    "connection dropped, authentication reset"
                );
            }
            Some(AuthEntry::Pending { request_id }) => {
                debug!(%addr, request_id, "connection dropped mid-handshake");
            }
            None => {}
        }
    }
}
