use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::jitter::{JitterBuffer, JitterConfig, JitterGet};
use super::{RtpConfig, RtpRead, RtpReceiver};

const SSRC: u32 = 0xDEAD_BEEF;

fn rtp_packet(seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut pkt = vec![0x80, 0x60];
    pkt.extend_from_slice(&seq.to_be_bytes());
    pkt.extend_from_slice(&(u32::from(seq) * 352).to_be_bytes());
    pkt.extend_from_slice(&SSRC.to_be_bytes());
    pkt.extend_from_slice(payload);
    pkt
}

fn jitter(delay: u16, ratio: u8) -> JitterBuffer {
    JitterBuffer::new(JitterConfig {
        max_packet_count: 32,
        delay_packet_count: delay,
        resent_ratio: ratio,
        ..JitterConfig::default()
    })
}

#[test]
fn prerolls_before_delivering() {
    let mut jb = jitter(3, 10);
    let mut out = [0u8; 64];

    for seq in 100..103 {
        jb.put(&rtp_packet(seq, &[seq as u8]));
        assert_eq!(jb.get(&mut out), JitterGet::NoPacket);
    }
    // Fourth packet exceeds the pre-roll depth
    jb.put(&rtp_packet(103, &[103]));
    assert_eq!(jb.get(&mut out), JitterGet::Packet(1));
    assert_eq!(out[0], 100);
}

#[test]
fn delivers_in_sequence_order_despite_arrival_order() {
    // Anchored at 100 so early reordering cannot shift the window
    let mut jb = JitterBuffer::new(JitterConfig {
        max_packet_count: 32,
        delay_packet_count: 3,
        resent_ratio: 10,
        seq: 100,
        ..JitterConfig::default()
    });
    let mut out = [0u8; 64];

    for seq in [102u16, 100, 104, 101, 103] {
        jb.put(&rtp_packet(seq, &seq.to_be_bytes()));
    }

    for expect in 100u16..105 {
        match jb.get(&mut out) {
            JitterGet::Packet(2) => {
                assert_eq!(u16::from_be_bytes([out[0], out[1]]), expect);
            }
            other => panic!("expected packet {expect}, got {other:?}"),
        }
    }
    assert_eq!(jb.get(&mut out), JitterGet::NoPacket);
}

#[test]
fn duplicate_sequence_is_dropped() {
    let mut jb = jitter(1, 10);
    let mut out = [0u8; 64];

    jb.put(&rtp_packet(10, &[1]));
    jb.put(&rtp_packet(10, &[2]));
    jb.put(&rtp_packet(11, &[3]));

    assert_eq!(jb.get(&mut out), JitterGet::Packet(1));
    assert_eq!(out[0], 1);
    assert_eq!(jb.get(&mut out), JitterGet::Packet(1));
    assert_eq!(out[0], 3);
}

#[test]
fn foreign_ssrc_is_dropped() {
    let mut jb = jitter(0, 10);
    let mut out = [0u8; 64];

    jb.put(&rtp_packet(10, &[1]));
    let mut foreign = rtp_packet(11, &[2]);
    foreign[8..12].copy_from_slice(&0x1234u32.to_be_bytes());
    jb.put(&foreign);

    assert_eq!(jb.get(&mut out), JitterGet::Packet(1));
    assert_eq!(jb.get(&mut out), JitterGet::NoPacket);
}

#[test]
fn large_dropout_resynchronises() {
    let mut jb = jitter(0, 10);
    let mut out = [0u8; 64];

    jb.put(&rtp_packet(100, &[1]));
    // Way beyond max_dropout: the buffer re-anchors on this packet
    jb.put(&rtp_packet(100 + 3500, &[2]));
    assert_eq!(jb.get(&mut out), JitterGet::Packet(1));
    assert_eq!(out[0], 2);
}

#[test]
fn small_negative_delta_is_late_drop() {
    let mut jb = jitter(0, 10);
    let mut out = [0u8; 64];

    jb.put(&rtp_packet(100, &[1]));
    assert_eq!(jb.get(&mut out), JitterGet::Packet(1));
    // Seq 99 is now in the past but within the misorder window
    jb.put(&rtp_packet(99, &[9]));
    assert_eq!(jb.get(&mut out), JitterGet::NoPacket);
}

#[test]
fn overflow_ejects_oldest_as_discarded() {
    let mut jb = jitter(1, 10);
    let mut out = [0u8; 64];

    jb.put(&rtp_packet(0, &[0]));
    // Slot pool is 32: seq 40 ejects the head
    jb.put(&rtp_packet(40, &[40]));

    assert_eq!(jb.get(&mut out), JitterGet::Discarded);
}

#[test]
fn retransmit_requested_for_aged_gap() {
    // delay 5, ratio 60% -> retransmit window of 3 packets
    let mut jb = jitter(5, 60);
    let mut out = [0u8; 64];

    assert!(jb.put(&rtp_packet(100, &[0])).is_empty());
    assert!(jb.put(&rtp_packet(101, &[1])).is_empty());
    // 102 never arrives
    assert!(jb.put(&rtp_packet(103, &[3])).is_empty());
    assert!(jb.put(&rtp_packet(104, &[4])).is_empty());
    assert!(jb.put(&rtp_packet(105, &[5])).is_empty());

    // Only once the gap ages past the window is it re-requested
    let requests = jb.put(&rtp_packet(106, &[6]));
    assert_eq!(requests, vec![(102, 1)]);

    // The retransmit arrives; delivery is in order and complete
    assert!(jb.put(&rtp_packet(102, &[2])).is_empty());
    for expect in 0u8..=6 {
        match jb.get(&mut out) {
            JitterGet::Packet(1) => assert_eq!(out[0], expect),
            other => panic!("expected {expect}, got {other:?}"),
        }
    }
}

#[test]
fn contiguous_gaps_coalesce_into_one_request() {
    let mut jb = jitter(5, 60);

    jb.put(&rtp_packet(10, &[0]));
    // A jump to 17 ages the 11..13 run past the window in one step
    let requests = jb.put(&rtp_packet(17, &[7]));
    assert_eq!(requests, vec![(11, 3)]);
}

#[test]
fn unresolved_gap_is_reported_lost() {
    let mut jb = jitter(2, 10);
    let mut out = [0u8; 64];

    jb.put(&rtp_packet(10, &[0]));
    jb.put(&rtp_packet(12, &[2]));
    jb.put(&rtp_packet(13, &[3]));

    assert_eq!(jb.get(&mut out), JitterGet::Packet(1));
    assert_eq!(jb.get(&mut out), JitterGet::Lost);
    assert_eq!(jb.get(&mut out), JitterGet::Packet(1));
    assert_eq!(out[0], 2);
}

#[test]
fn flush_with_seq_arms_drop_credit_and_reanchors() {
    let mut jb = jitter(1, 10);
    let mut out = [0u8; 64];

    for seq in 50u16..55 {
        jb.put(&rtp_packet(seq, &[seq as u8]));
    }
    jb.flush(200, 0);

    // The five in-flight packets are thrown away on arrival
    for _ in 0..5 {
        assert!(jb.take_drop_credit());
    }
    assert!(!jb.take_drop_credit());

    // Nothing older than the flush sequence is ever delivered
    jb.put(&rtp_packet(190, &[1]));
    assert_eq!(jb.get(&mut out), JitterGet::NoPacket);

    jb.put(&rtp_packet(200, &[200]));
    jb.put(&rtp_packet(201, &[201]));
    assert_eq!(jb.get(&mut out), JitterGet::Packet(1));
    assert_eq!(out[0], 200);
}

#[test]
fn full_flush_unpins_ssrc() {
    let mut jb = jitter(0, 10);
    let mut out = [0u8; 64];

    jb.put(&rtp_packet(10, &[1]));
    jb.flush(0, 0);

    let mut other = rtp_packet(700, &[7]);
    other[8..12].copy_from_slice(&0x7777u32.to_be_bytes());
    jb.put(&other);
    assert_eq!(jb.get(&mut out), JitterGet::Packet(1));
    assert_eq!(out[0], 7);
}

#[test]
fn receiver_binds_with_port_retry() {
    let first = RtpReceiver::open(RtpConfig {
        port: 6670,
        rtcp_port: 0,
        peer: None,
        payload: 0x60,
        jitter: JitterConfig::default(),
        rtcp_cb: None,
        cust_cb: None,
        resend_cb: None,
    })
    .unwrap();

    let second = RtpReceiver::open(RtpConfig {
        port: first.port(),
        rtcp_port: 0,
        peer: None,
        payload: 0x60,
        jitter: JitterConfig::default(),
        rtcp_cb: None,
        cust_cb: None,
        resend_cb: None,
    })
    .unwrap();

    assert_eq!(second.port(), first.port() + 2);
}

#[test]
fn receiver_reads_datagrams_end_to_end() {
    let receiver = RtpReceiver::open(RtpConfig {
        port: 6700,
        rtcp_port: 0,
        peer: None,
        payload: 0x60,
        jitter: JitterConfig {
            delay_packet_count: 2,
            ..JitterConfig::default()
        },
        rtcp_cb: None,
        cust_cb: None,
        resend_cb: None,
    })
    .unwrap();

    let mut out = [0u8; 64];
    assert_eq!(receiver.read(&mut out), RtpRead::NoPacket);

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let dest = format!("127.0.0.1:{}", receiver.port());
    for seq in 0u16..4 {
        sender.send_to(&rtp_packet(seq, &[seq as u8]), &dest).unwrap();
    }

    // Datagram delivery is asynchronous; poll briefly
    let mut got = None;
    for _ in 0..100 {
        match receiver.read(&mut out) {
            RtpRead::NoPacket => std::thread::sleep(std::time::Duration::from_millis(5)),
            other => {
                got = Some(other);
                break;
            }
        }
    }
    assert_eq!(got, Some(RtpRead::Packet(1)));
    assert_eq!(out[0], 0);
}

#[test]
fn custom_payload_rewrite_requeues() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_cb = Arc::clone(&hits);

    let receiver = RtpReceiver::open(RtpConfig {
        port: 6720,
        rtcp_port: 0,
        peer: None,
        payload: 0x60,
        jitter: JitterConfig {
            delay_packet_count: 0,
            ..JitterConfig::default()
        },
        rtcp_cb: None,
        // Strip a 4-byte wrapper, as AirPlay retransmit replies need
        cust_cb: Some(Box::new(move |pkt: &[u8]| {
            hits_cb.fetch_add(1, Ordering::SeqCst);
            Some(pkt[4..].to_vec())
        })),
        resend_cb: None,
    })
    .unwrap();

    let mut wrapped = vec![0x80, 0x56, 0x00, 0x01];
    wrapped.extend_from_slice(&rtp_packet(5, &[55]));
    receiver.put(&wrapped);

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    let mut out = [0u8; 64];
    assert_eq!(receiver.read(&mut out), RtpRead::Packet(1));
    assert_eq!(out[0], 55);
}
