//! Split-packet reassembly for UDP query responses.
//!
//! Large Source Query responses arrive as N datagram fragments, each tagged
//! with a request id, a declared total, and a 0-based sequence number. This
//! module collects fragments into per-exchange containers and emits one
//! logical buffer once every fragment has arrived, in true sequence order
//! regardless of arrival order.
//!
//! Containers are keyed by (request id, sender address) because distinct
//! servers independently reuse the same small id space. The pending map is
//! shared across connection tasks and must stay bounded: containers are
//! removed on completion, purged when their exchange dies, and swept by TTL
//! so packet loss cannot grow the map forever.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::core::packet::SplitFragment;
use crate::error::{constants, ProtocolError, Result};

/// Key identifying one pending multi-datagram response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SplitKey {
    pub request_id: i32,
    pub sender: SocketAddr,
}

/// Collected fragments of one logical response.
#[derive(Debug)]
struct SplitPacketContainer {
    expected: usize,
    chunks: BTreeMap<u8, Bytes>,
    created_at: Instant,
}

impl SplitPacketContainer {
    fn new(expected: usize) -> Self {
        Self {
            expected,
            chunks: BTreeMap::new(),
            created_at: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        self.chunks.len() == self.expected
    }

    /// Concatenate chunks in ascending sequence order.
    fn reassemble(self) -> Bytes {
        let total: usize = self.chunks.values().map(Bytes::len).sum();
        let mut buf = BytesMut::with_capacity(total);
        for chunk in self.chunks.into_values() {
            buf.put_slice(&chunk);
        }
        buf.freeze()
    }
}

/// Reconstructs logical responses from split UDP fragments.
///
/// Safe for concurrent use from independent connection tasks; all state lives
/// behind one lock-guarded map.
#[derive(Debug, Clone)]
pub struct SplitPacketAssembler {
    pending: Arc<RwLock<HashMap<SplitKey, SplitPacketContainer>>>,
    ttl: Duration,
    report_incomplete: bool,
}

impl SplitPacketAssembler {
    /// Default TTL: 30 seconds, comfortably past any sane read timeout.
    pub fn new() -> Self {
        Self::with_settings(Duration::from_secs(30), false)
    }

    /// `report_incomplete` controls whether purging a partial container
    /// surfaces an error carrying the received/expected counts, or discards
    /// it silently.
    pub fn with_settings(ttl: Duration, report_incomplete: bool) -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            report_incomplete,
        }
    }

    /// Add one fragment. Returns the reassembled buffer once the container
    /// holds every expected fragment; `None` while still waiting.
    pub fn insert(&self, fragment: SplitFragment, sender: SocketAddr) -> Result<Option<Bytes>> {
        let key = SplitKey {
            request_id: fragment.id,
            sender,
        };

        let mut pending = self
            .pending
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_SPLIT_WRITE_LOCK.to_string()))?;

        let container = pending
            .entry(key)
            .or_insert_with(|| SplitPacketContainer::new(fragment.total as usize));

        if container.expected != fragment.total as usize {
            warn!(
                request_id = fragment.id,
                declared = fragment.total,
                expected = container.expected,
                "fragment declares a different total than its container"
            );
        }

        // A number past the container's total could push chunks.len() beyond
        // expected and strand the container until the TTL sweep.
        if fragment.number as usize >= container.expected {
            return Err(ProtocolError::MalformedPacket(format!(
                "fragment number {} out of range for expected total {}",
                fragment.number, container.expected
            )));
        }

        if container.chunks.contains_key(&fragment.number) {
            debug!(
                request_id = fragment.id,
                number = fragment.number,
                "duplicate fragment ignored"
            );
            return Ok(None);
        }

        container.chunks.insert(fragment.number, fragment.payload);
        debug!(
            request_id = fragment.id,
            number = fragment.number,
            received = container.chunks.len(),
            expected = container.expected,
            "fragment stored"
        );

        if container.is_complete() {
            // remove() cannot fail here, the entry was just updated
            let container = pending.remove(&key);
            return Ok(container.map(SplitPacketContainer::reassemble));
        }

        Ok(None)
    }

    /// Drop every container belonging to `sender`, called when that
    /// exchange times out or its channel closes.
    ///
    /// With `report_incomplete` set, a partially filled container surfaces as
    /// an `IncompleteSplitPacket` error; otherwise the loss is only logged.
    pub fn purge(&self, sender: SocketAddr) -> Result<()> {
        let mut pending = self
            .pending
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_SPLIT_WRITE_LOCK.to_string()))?;

        let keys: Vec<SplitKey> = pending
            .keys()
            .filter(|k| k.sender == sender)
            .copied()
            .collect();

        let mut first_incomplete = None;
        for key in keys {
            if let Some(container) = pending.remove(&key) {
                debug!(
                    request_id = key.request_id,
                    %sender,
                    received = container.chunks.len(),
                    expected = container.expected,
                    "purged pending split container"
                );
                if first_incomplete.is_none() && !container.is_complete() {
                    first_incomplete =
                        Some((container.chunks.len(), container.expected));
                }
            }
        }

        match first_incomplete {
            Some((received, expected)) if self.report_incomplete => {
                Err(ProtocolError::IncompleteSplitPacket { received, expected })
            }
            _ => Ok(()),
        }
    }

    /// Sweep containers older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let Ok(mut pending) = self.pending.write() else {
            return 0;
        };
        let now = Instant::now();
        let before = pending.len();
        pending.retain(|key, container| {
            let keep = now.duration_since(container.created_at) < self.ttl;
            if !keep {
                warn!(
                    request_id = key.request_id,
                    sender = %key.sender,
                    received = container.chunks.len(),
                    expected = container.expected,
                    "expired pending split container"
                );
            }
            keep
        });
        before - pending.len()
    }

    /// Number of containers currently awaiting fragments.
    pub fn pending_len(&self) -> usize {
        self.pending.read().map(|p| p.len()).unwrap_or(0)
    }
}

impl Default for SplitPacketAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("10.0.0.1:{port}").parse().unwrap()
    }

    fn fragment(id: i32, total: u8, number: u8, payload: &[u8]) -> SplitFragment {
        SplitFragment {
            id,
            total,
            number,
            split_size: 1248,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn out_of_order_fragments_reassemble_in_sequence_order() {
        let assembler = SplitPacketAssembler::new();
        let sender = addr(27015);

        assert!(assembler
            .insert(fragment(7, 3, 2, b"cc"), sender)
            .unwrap()
            .is_none());
        assert!(assembler
            .insert(fragment(7, 3, 0, b"aa"), sender)
            .unwrap()
            .is_none());
        let buf = assembler
            .insert(fragment(7, 3, 1, b"bb"), sender)
            .unwrap()
            .expect("final fragment completes the container");

        assert_eq!(&buf[..], b"aabbcc");
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn duplicate_fragment_is_ignored() {
        let assembler = SplitPacketAssembler::new();
        let sender = addr(27015);

        assert!(assembler
            .insert(fragment(7, 2, 0, b"aa"), sender)
            .unwrap()
            .is_none());
        assert!(assembler
            .insert(fragment(7, 2, 0, b"xx"), sender)
            .unwrap()
            .is_none());
        let buf = assembler
            .insert(fragment(7, 2, 1, b"bb"), sender)
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..], b"aabb");
    }

    #[test]
    fn same_request_id_from_different_servers_stays_separate() {
        let assembler = SplitPacketAssembler::new();
        let a = addr(27015);
        let b = addr(27016);

        assert!(assembler
            .insert(fragment(7, 2, 0, b"a0"), a)
            .unwrap()
            .is_none());
        assert!(assembler
            .insert(fragment(7, 2, 0, b"b0"), b)
            .unwrap()
            .is_none());
        assert_eq!(assembler.pending_len(), 2);

        let from_b = assembler
            .insert(fragment(7, 2, 1, b"b1"), b)
            .unwrap()
            .unwrap();
        assert_eq!(&from_b[..], b"b0b1");
        assert_eq!(assembler.pending_len(), 1);
    }

    #[test]
    fn incomplete_container_survives_until_purge() {
        let assembler = SplitPacketAssembler::new();
        let sender = addr(27015);

        assembler.insert(fragment(3, 4, 0, b"x"), sender).unwrap();
        assembler.insert(fragment(3, 4, 1, b"y"), sender).unwrap();
        assert_eq!(assembler.pending_len(), 1);

        assembler.purge(sender).unwrap();
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn purge_reports_received_counts_when_configured() {
        let assembler = SplitPacketAssembler::with_settings(Duration::from_secs(30), true);
        let sender = addr(27015);

        assembler.insert(fragment(3, 4, 0, b"x"), sender).unwrap();
        assembler.insert(fragment(3, 4, 2, b"y"), sender).unwrap();

        match assembler.purge(sender) {
            Err(ProtocolError::IncompleteSplitPacket { received, expected }) => {
                assert_eq!(received, 2);
                assert_eq!(expected, 4);
            }
            other => panic!("expected incomplete report, got {other:?}"),
        }
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn expired_containers_are_swept() {
        let assembler = SplitPacketAssembler::with_settings(Duration::from_millis(5), false);
        let sender = addr(27015);

        assembler.insert(fragment(3, 2, 0, b"x"), sender).unwrap();
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(assembler.purge_expired(), 1);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn fragment_number_past_container_total_is_rejected() {
        let assembler = SplitPacketAssembler::new();
        let sender = addr(27015);

        assembler.insert(fragment(7, 2, 0, b"aa"), sender).unwrap();
        // lies about the total and carries a number the container can't hold
        assert!(matches!(
            assembler.insert(fragment(7, 5, 4, b"zz"), sender),
            Err(ProtocolError::MalformedPacket(_))
        ));

        // the container still completes with its real second fragment
        let buf = assembler
            .insert(fragment(7, 2, 1, b"bb"), sender)
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..], b"aabb");
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn purge_of_unknown_address_is_a_noop() {
        let assembler = SplitPacketAssembler::with_settings(Duration::from_secs(30), true);
        assembler.purge(addr(1)).unwrap();
    }
}
