//! Frame detection over a ring-buffer read cursor.
//!
//! [`scan`] walks the cursor's pending bytes looking for the next frame of
//! any of the three protocols, consuming what it can rule out:
//!
//! - Garbage before a frame, frames that fail their checksum, and whole
//!   valid frames the caller did not ask for are consumed.
//! - A valid prefix of a frame is left in place so the next scan can pick
//!   it up once more bytes arrive.
//! - A wanted frame is left at the front of the cursor for the caller to
//!   read out; only the garbage before it is consumed.
//!
//! A corrupted byte never desynchronises the stream for good: on any
//! checksum or framing failure the scan resumes one byte after the failed
//! candidate's start.

use log::trace;

use super::{nmea, rtcm, ubx, MessageId};
use crate::ring::{CursorId, RingStore};

/// Outcome of one scan pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    /// A wanted frame sits at the front of the cursor; `len` is its total
    /// size on the wire, ready to be read or discarded.
    Found { id: MessageId, len: usize },
    /// The module rejected the message the caller polled for. The NACK
    /// frame has been consumed.
    Nacked { class: u8, id: u8 },
    /// A frame has started but not all of its bytes have arrived yet.
    Incomplete,
    /// Nothing wanted in the window; everything examined was consumed.
    NotFound,
}

enum Candidate {
    /// A complete valid frame of `total` bytes.
    Complete { id: MessageId, total: usize },
    /// May complete once more bytes arrive.
    Partial,
    /// Can never become a valid frame here.
    No,
}

fn classify(window: &[u8], usable: usize) -> Candidate {
    match window[0] {
        ubx::SYNC_1 => match ubx::examine(window) {
            ubx::FrameStatus::Complete { class, id, total } => Candidate::Complete {
                id: MessageId::Ubx { class, id },
                total,
            },
            ubx::FrameStatus::Partial => {
                // If the advertised frame can never fit the ring it will
                // never complete; skip the sync byte instead of stalling.
                if window.len() >= ubx::PAYLOAD_OFFSET {
                    let len = u16::from_le_bytes([window[4], window[5]]) as usize;
                    if len + ubx::FRAME_OVERHEAD > usable {
                        return Candidate::No;
                    }
                }
                Candidate::Partial
            }
            ubx::FrameStatus::Invalid => Candidate::No,
        },
        nmea::START => match nmea::examine(window) {
            nmea::SentenceStatus::Complete { id, total } => Candidate::Complete { id, total },
            nmea::SentenceStatus::Partial => Candidate::Partial,
            nmea::SentenceStatus::Invalid => Candidate::No,
        },
        rtcm::PREAMBLE => match rtcm::examine(window) {
            rtcm::FrameStatus::Complete { kind, total } => Candidate::Complete {
                id: MessageId::Rtcm { kind },
                total,
            },
            rtcm::FrameStatus::Partial => {
                if window.len() >= 3 {
                    let len = (usize::from(window[1] & 0x03) << 8) | usize::from(window[2]);
                    if len + rtcm::FRAME_OVERHEAD > usable {
                        return Candidate::No;
                    }
                }
                Candidate::Partial
            }
            rtcm::FrameStatus::Invalid => Candidate::No,
        },
        _ => Candidate::No,
    }
}

/// Scan the cursor's pending bytes for the next frame matching `wanted`.
///
/// On [`Scan::Found`] the frame's first byte is the cursor's next byte;
/// read `len` bytes to consume it, or discard them to drop it.
pub fn scan(ring: &mut RingStore, cursor: CursorId, wanted: &MessageId) -> Scan {
    let pending = ring.data_size_handle(cursor);
    if pending == 0 {
        return Scan::NotFound;
    }
    let mut window = vec![0u8; pending];
    let got = ring.peek_handle(cursor, &mut window, 0);
    window.truncate(got);
    let usable = ring.usable_capacity();

    let mut pos = 0;
    while pos < window.len() {
        match classify(&window[pos..], usable) {
            Candidate::Complete { id, total } => {
                // A NACK answers a concrete poll for the rejected message.
                if let Some((w_class, w_id)) = wanted.is_concrete_ubx() {
                    if let Some((n_class, n_id)) = ubx::nack_target(&window[pos..pos + total]) {
                        if (n_class, n_id) == (w_class, w_id) {
                            ring.discard_handle(cursor, pos + total);
                            return Scan::Nacked {
                                class: n_class,
                                id: n_id,
                            };
                        }
                    }
                }
                if wanted.wants(&id) {
                    ring.discard_handle(cursor, pos);
                    return Scan::Found { id, len: total };
                }
                trace!("skipping unwanted frame {id} ({total} bytes)");
                pos += total;
            }
            Candidate::Partial => {
                // A candidate already spanning the whole ring with no end
                // in sight will never complete; skip its first byte.
                if window.len() - pos >= usable {
                    pos += 1;
                    continue;
                }
                ring.discard_handle(cursor, pos);
                return Scan::Incomplete;
            }
            Candidate::No => pos += 1,
        }
    }
    ring.discard_handle(cursor, window.len());
    Scan::NotFound
}
