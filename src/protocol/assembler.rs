//! Terminator-delimited reassembly of multi-packet RCON responses.
//!
//! Long command output is split by the server across several response
//! packets. The client cannot know the count up front, so after each command
//! it sends an empty probe; the server answers the probe with a terminator
//! packet (reserved id 999) once every real fragment has been flushed. This
//! module queues fragments until that terminator arrives, then emits one
//! merged response.
//!
//! Per-connection state: each TCP connection owns its own assembler, so no
//! locking is needed here (unlike the shared split-packet map).

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::core::codec::{RconPacket, RconPacketType};

/// Queues RCON response fragments for the in-flight command and merges them
/// when the terminator arrives.
#[derive(Debug, Default)]
pub struct RconFrameAssembler {
    queue: VecDeque<RconPacket>,
}

impl RconFrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded packet through the assembler.
    ///
    /// Returns a packet to forward downstream, or `None` while the response
    /// is still accumulating:
    /// - auth responses bypass the queue untouched
    /// - empty probe echoes are discarded
    /// - a terminator flushes the queue into one merged response; with an
    ///   empty queue (duplicate terminator) it is a no-op
    pub fn push(&mut self, packet: RconPacket) -> Option<RconPacket> {
        if packet.packet_type == RconPacketType::AuthResponse {
            trace!(id = packet.id, "auth response bypasses reassembly");
            return Some(packet);
        }

        if packet.is_terminator() {
            return self.flush();
        }

        if packet.body.is_empty() {
            trace!(id = packet.id, "discarding empty probe packet");
            return None;
        }

        self.queue.push_back(packet);
        None
    }

    /// Number of fragments queued for the current command.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Drop any fragments of an abandoned command (timeout, disconnect).
    pub fn reset(&mut self) {
        if !self.queue.is_empty() {
            debug!(dropped = self.queue.len(), "clearing stale response fragments");
            self.queue.clear();
        }
    }

    fn flush(&mut self) -> Option<RconPacket> {
        match self.queue.len() {
            0 => {
                // duplicate terminator for an already-delivered response
                trace!("terminator with empty queue ignored");
                None
            }
            1 => self.queue.pop_front(),
            n => {
                let mut merged = self.queue.pop_front()?;
                for fragment in self.queue.drain(..) {
                    merged.body.push_str(&fragment.body);
                }
                debug!(
                    id = merged.id,
                    fragments = n,
                    body_len = merged.body.len(),
                    "merged multi-packet response"
                );
                Some(merged)
            }
        }
    }
}
