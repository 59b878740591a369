//! Source Query challenge handshake.
//!
//! A subset of query requests must carry a per-session challenge token. The
//! first round trip may come back as an S2C_CHALLENGE packet instead of the
//! expected payload; in automatic mode the same logical request is re-encoded
//! with the token attached and resent, invisible to the caller, whose single
//! completion handle resolves only with the final response. With automatic
//! handling disabled the token escalates to the caller as a distinguished
//! `ChallengeReceived` failure and the caller resends explicitly.

use tracing::{debug, warn};

use crate::core::packet::{QueryRequest, QueryResponse};
use crate::error::{ProtocolError, Result};

/// What the handshake decided to do with an inbound response.
#[derive(Debug, Clone, PartialEq)]
pub enum ChallengeOutcome {
    /// Server demanded a challenge; resend this updated request.
    Resend(QueryRequest),
    /// Not a challenge packet; deliver to the caller.
    Complete(QueryResponse),
}

/// Tracks one query exchange through the challenge handshake.
#[derive(Debug, Clone)]
pub struct ChallengeExchange {
    request: QueryRequest,
    auto_resubmit: bool,
    resubmits: u32,
    max_resubmits: u32,
}

impl ChallengeExchange {
    pub fn new(request: QueryRequest, auto_resubmit: bool, max_resubmits: u32) -> Self {
        Self {
            request,
            auto_resubmit,
            resubmits: 0,
            max_resubmits,
        }
    }

    /// The request in its current form (challenge attached once obtained).
    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    pub fn resubmits(&self) -> u32 {
        self.resubmits
    }

    /// Drive the handshake with one decoded response.
    ///
    /// A challenge response either triggers a transparent resend or, when
    /// automatic handling is off or the resubmit budget is spent, escalates
    /// as `ChallengeReceived`. Anything else completes the exchange.
    pub fn on_response(&mut self, response: QueryResponse) -> Result<ChallengeOutcome> {
        match response {
            QueryResponse::Challenge(challenge) => {
                if !self.auto_resubmit {
                    debug!(challenge, "challenge escalated to caller");
                    return Err(ProtocolError::ChallengeReceived(challenge));
                }
                if self.resubmits >= self.max_resubmits {
                    // A server that keeps answering with fresh challenges is
                    // either rate limiting us or misbehaving; stop looping.
                    warn!(
                        challenge,
                        resubmits = self.resubmits,
                        "challenge resubmit budget exhausted"
                    );
                    return Err(ProtocolError::ChallengeReceived(challenge));
                }
                self.resubmits += 1;
                self.request = self.request.with_challenge(challenge);
                debug!(
                    challenge,
                    attempt = self.resubmits,
                    "resending request with challenge attached"
                );
                Ok(ChallengeOutcome::Resend(self.request.clone()))
            }
            other => Ok(ChallengeOutcome::Complete(other)),
        }
    }
}
