//! Property-based tests for the ring buffer and the framing layer.

use std::collections::VecDeque;

use proptest::prelude::*;

use gnsslink::protocol::{nmea, rtcm, ubx};
use gnsslink::ring::RingStore;

#[derive(Debug, Clone)]
enum RingOp {
    Add(Vec<u8>),
    ForceAdd(Vec<u8>),
    Read(usize),
}

fn ring_op() -> impl Strategy<Value = RingOp> {
    prop_oneof![
        proptest::collection::vec(any::<u8>(), 0..40).prop_map(RingOp::Add),
        proptest::collection::vec(any::<u8>(), 0..40).prop_map(RingOp::ForceAdd),
        (0usize..40).prop_map(RingOp::Read),
    ]
}

proptest! {
    /// The ring behaves exactly like a bounded FIFO model: same
    /// accept/reject decisions, same bytes out in the same order, and
    /// `available + data_size` always accounts for the full usable
    /// capacity.
    #[test]
    fn ring_matches_fifo_model(
        capacity in 2usize..70,
        ops in proptest::collection::vec(ring_op(), 1..60),
    ) {
        let mut ring = RingStore::new_unhandled(capacity).unwrap();
        let usable = capacity - 1;
        let mut model: VecDeque<u8> = VecDeque::new();

        for op in ops {
            match op {
                RingOp::Add(data) => {
                    let accepted = ring.add_if_fits(&data);
                    let fits = data.len() <= usable - model.len();
                    prop_assert_eq!(accepted, fits);
                    if fits {
                        model.extend(data.iter().copied());
                    }
                }
                RingOp::ForceAdd(data) => {
                    let accepted = ring.force_add(&data);
                    prop_assert_eq!(accepted, data.len() <= usable);
                    if accepted {
                        // Eviction drops exactly the overflow, oldest first.
                        let overflow =
                            (model.len() + data.len()).saturating_sub(usable);
                        model.drain(..overflow);
                        model.extend(data.iter().copied());
                    }
                }
                RingOp::Read(n) => {
                    let mut buf = vec![0u8; n];
                    let got = ring.read(&mut buf);
                    prop_assert_eq!(got, n.min(model.len()));
                    let expected: Vec<u8> = model.drain(..got).collect();
                    prop_assert_eq!(&buf[..got], &expected[..]);
                }
            }
            prop_assert_eq!(ring.data_size(), model.len());
            prop_assert_eq!(ring.available(), usable - model.len());
        }
    }

    /// A second cursor sees exactly the bytes added after it was taken,
    /// in order, regardless of what the unhandled path does.
    #[test]
    fn late_cursor_sees_only_later_bytes(
        before in proptest::collection::vec(any::<u8>(), 0..20),
        after in proptest::collection::vec(any::<u8>(), 0..20),
    ) {
        let mut ring = RingStore::new(64, 1).unwrap();
        prop_assume!(before.len() + after.len() <= 63);
        assert!(ring.add_if_fits(&before));
        let cursor = ring.take_cursor().unwrap();
        assert!(ring.add_if_fits(&after));

        let mut sink = vec![0u8; 64];
        let drained = ring.read(&mut sink);
        prop_assert_eq!(drained, before.len() + after.len());

        let mut seen = vec![0u8; 64];
        let got = ring.read_handle(cursor, &mut seen);
        prop_assert_eq!(got, after.len());
        prop_assert_eq!(&seen[..got], &after[..]);
    }

    /// Encoding a UBX frame and examining it round-trips the identity and
    /// length; flipping any single bit is always detected.
    #[test]
    fn ubx_frame_integrity(
        class in any::<u8>(),
        id in any::<u8>(),
        body in proptest::collection::vec(any::<u8>(), 0..64),
        flip_byte in any::<prop::sample::Index>(),
        flip_bit in 0u8..8,
    ) {
        let mut frame = vec![0u8; body.len() + 8];
        let n = ubx::encode(class, id, &body, &mut frame).unwrap();
        prop_assert_eq!(n, body.len() + 8);
        prop_assert_eq!(
            ubx::examine(&frame),
            ubx::FrameStatus::Complete { class, id, total: n }
        );

        let mut bad = frame.clone();
        let at = flip_byte.index(n);
        bad[at] ^= 1 << flip_bit;
        // The corrupted bytes must never pass as the original frame.
        prop_assert_ne!(
            ubx::examine(&bad),
            ubx::FrameStatus::Complete { class, id, total: n }
        );
    }

    /// Any prefix of a valid UBX frame is Partial, never Complete or
    /// Invalid.
    #[test]
    fn ubx_prefixes_are_partial(
        body in proptest::collection::vec(any::<u8>(), 0..32),
        cut in any::<prop::sample::Index>(),
    ) {
        let mut frame = vec![0u8; body.len() + 8];
        let n = ubx::encode(0x01, 0x07, &body, &mut frame).unwrap();
        let cut = 1 + cut.index(n - 1);
        prop_assert_eq!(ubx::examine(&frame[..cut]), ubx::FrameStatus::Partial);
    }

    /// RTCM frames round-trip through encode/examine and reject any
    /// single-bit corruption.
    #[test]
    fn rtcm_frame_integrity(
        kind in 0u16..4096,
        extra in proptest::collection::vec(any::<u8>(), 0..64),
        flip_byte in any::<prop::sample::Index>(),
        flip_bit in 0u8..8,
    ) {
        let mut payload = vec![(kind >> 4) as u8, ((kind & 0x0F) as u8) << 4];
        payload.extend_from_slice(&extra);
        let mut frame = Vec::new();
        rtcm::encode(&payload, &mut frame);
        let total = frame.len();
        prop_assert_eq!(
            rtcm::examine(&frame),
            rtcm::FrameStatus::Complete { kind, total }
        );

        let mut bad = frame.clone();
        let at = flip_byte.index(total);
        bad[at] ^= 1 << flip_bit;
        prop_assert_ne!(
            rtcm::examine(&bad),
            rtcm::FrameStatus::Complete { kind, total }
        );
    }

    /// Valid NMEA sentences are recognised whole; corrupting the checksum
    /// digits or any body byte is caught.
    #[test]
    fn nmea_sentence_integrity(
        name in "[A-Z]{2,5}",
        fields in proptest::collection::vec("[A-Z0-9.]{0,6}", 0..6),
        corrupt in any::<u8>(),
        flip in any::<prop::sample::Index>(),
    ) {
        let mut body = name;
        for f in &fields {
            body.push(',');
            body.push_str(f);
        }
        prop_assume!(body.len() + 6 <= 82);
        let sum = body.bytes().fold(0u8, |a, b| a ^ b);
        let sentence = format!("${body}*{sum:02X}\r\n").into_bytes();

        match nmea::examine(&sentence) {
            nmea::SentenceStatus::Complete { total, .. } => {
                prop_assert_eq!(total, sentence.len());
            }
            other => prop_assert!(false, "expected Complete, got {:?}", other),
        }

        // Corrupt one body byte (keeping it printable and not '*').
        let at = 1 + flip.index(body.len());
        let replacement = 0x21 + (corrupt % 0x09);
        let mut bad = sentence.clone();
        prop_assume!(bad[at] != replacement && replacement != b'*' && replacement != b'$');
        bad[at] = replacement;
        // A single changed body byte flips the XOR, so the sentence can
        // no longer be Complete.
        prop_assert!(
            !matches!(
                nmea::examine(&bad),
                nmea::SentenceStatus::Complete { .. }
            ),
            "corrupted sentence must not be Complete"
        );
    }
}
