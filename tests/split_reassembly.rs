//! Integration tests for split-packet reassembly
//!
//! Drives the full inbound UDP pipeline from raw datagram bytes: header
//! classification, fragment collection across arrival orders, and the second
//! decode pass over the reassembled logical packet.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{BufMut, Bytes, BytesMut};
use source_protocol::core::packet::{
    decode_single, Datagram, Decoded, QueryResponse, S2A_RULES, SINGLE_PACKET_HEADER,
    SPLIT_PACKET_HEADER,
};
use source_protocol::error::ProtocolError;
use source_protocol::protocol::split::SplitPacketAssembler;
use std::net::SocketAddr;
use std::time::Duration;

fn sender() -> SocketAddr {
    "192.0.2.10:27015".parse().unwrap()
}

/// Raw split datagram carrying one slice of the logical payload.
fn split_datagram(id: i32, total: u8, number: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i32_le(SPLIT_PACKET_HEADER);
    buf.put_i32_le(id);
    buf.put_u8(total);
    buf.put_u8(number);
    buf.put_u16_le(1248);
    buf.put_slice(payload);
    buf.freeze()
}

/// Logical S2A_RULES packet split into `n` roughly equal fragments.
fn rules_response_fragments(id: i32, rules: &[(&str, &str)], n: usize) -> Vec<Bytes> {
    let mut logical = BytesMut::new();
    logical.put_i32_le(SINGLE_PACKET_HEADER);
    logical.put_u8(S2A_RULES);
    logical.put_i16_le(rules.len() as i16);
    for (name, value) in rules {
        logical.put_slice(name.as_bytes());
        logical.put_u8(0);
        logical.put_slice(value.as_bytes());
        logical.put_u8(0);
    }
    let logical = logical.freeze();

    let chunk = logical.len().div_ceil(n);
    (0..n)
        .map(|i| {
            let start = i * chunk;
            let end = ((i + 1) * chunk).min(logical.len());
            split_datagram(id, n as u8, i as u8, &logical[start..end])
        })
        .collect()
}

fn feed(assembler: &SplitPacketAssembler, datagram: Bytes) -> Option<Bytes> {
    match Datagram::parse(datagram).expect("datagram must parse") {
        Datagram::Split(fragment) => assembler.insert(fragment, sender()).expect("insert"),
        Datagram::Single(_) => panic!("expected a split datagram"),
    }
}

#[test]
fn test_fragments_in_order_decode_to_rules() {
    let assembler = SplitPacketAssembler::new();
    let rules = [("sv_cheats", "0"), ("mp_friendlyfire", "1")];
    let fragments = rules_response_fragments(21, &rules, 3);

    let mut reassembled = None;
    for datagram in fragments {
        reassembled = feed(&assembler, datagram);
    }

    let logical = reassembled.expect("last fragment completes the response");
    match decode_single(logical).unwrap() {
        Decoded::Accepted(QueryResponse::Rules(decoded)) => {
            assert_eq!(decoded.len(), 2);
            assert_eq!(decoded[0].name, "sv_cheats");
            assert_eq!(decoded[1].value, "1");
        }
        other => panic!("unexpected decode outcome: {other:?}"),
    }
}

#[test]
fn test_every_arrival_order_reassembles_identically() {
    let rules = [("sv_gravity", "800"), ("sv_tags", "competitive,128tick")];
    let fragments = rules_response_fragments(33, &rules, 3);

    // 3! permutations of the same three fragments
    let orders: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];

    let mut buffers = Vec::new();
    for order in orders {
        let assembler = SplitPacketAssembler::new();
        let mut reassembled = None;
        for &i in &order {
            reassembled = feed(&assembler, fragments[i].clone());
        }
        buffers.push(reassembled.expect("all three fragments were delivered"));
        assert_eq!(assembler.pending_len(), 0);
    }

    for buf in &buffers[1..] {
        assert_eq!(buf, &buffers[0]);
    }
}

#[test]
fn test_interleaved_responses_from_one_server() {
    let assembler = SplitPacketAssembler::new();
    let first = rules_response_fragments(1, &[("a", "1")], 2);
    let second = rules_response_fragments(2, &[("b", "2")], 2);

    assert!(feed(&assembler, first[0].clone()).is_none());
    assert!(feed(&assembler, second[0].clone()).is_none());
    assert_eq!(assembler.pending_len(), 2);

    let done_second = feed(&assembler, second[1].clone()).expect("second completes");
    let done_first = feed(&assembler, first[1].clone()).expect("first completes");
    assert_ne!(done_first, done_second);
    assert_eq!(assembler.pending_len(), 0);
}

#[test]
fn test_lost_fragment_leaves_container_until_purged() {
    let assembler = SplitPacketAssembler::with_settings(Duration::from_secs(30), true);
    let fragments = rules_response_fragments(9, &[("sv_cheats", "0")], 4);

    // fragment 2 never arrives
    for datagram in [&fragments[0], &fragments[1], &fragments[3]] {
        assert!(feed(&assembler, datagram.clone()).is_none());
    }
    assert_eq!(assembler.pending_len(), 1);

    match assembler.purge(sender()) {
        Err(ProtocolError::IncompleteSplitPacket { received, expected }) => {
            assert_eq!(received, 3);
            assert_eq!(expected, 4);
        }
        other => panic!("expected incomplete report, got {other:?}"),
    }
    assert_eq!(assembler.pending_len(), 0);
}

#[test]
fn test_compressed_fragment_is_rejected_before_reassembly() {
    let datagram = split_datagram(5 | i32::MIN, 2, 0, b"zz");
    assert!(matches!(
        Datagram::parse(datagram),
        Err(ProtocolError::CompressionNotSupported)
    ));
}

#[test]
fn test_ttl_sweep_reclaims_abandoned_containers() {
    let assembler = SplitPacketAssembler::with_settings(Duration::from_millis(5), false);
    let fragments = rules_response_fragments(11, &[("a", "1")], 2);

    assert!(feed(&assembler, fragments[0].clone()).is_none());
    std::thread::sleep(Duration::from_millis(10));

    assert_eq!(assembler.purge_expired(), 1);
    assert_eq!(assembler.pending_len(), 0);

    // a late fragment after the sweep opens a fresh container
    assert!(feed(&assembler, fragments[1].clone()).is_none());
    assert_eq!(assembler.pending_len(), 1);
}
