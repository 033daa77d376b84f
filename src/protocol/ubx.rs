//! UBX binary framing.
//!
//! Frame layout:
//!
//! ```text
//! 0xB5 0x62 | class | id | len (LE u16) | payload (len bytes) | ck_a ck_b
//! ```
//!
//! The two checksum bytes are an 8-bit Fletcher over class, id, length and
//! payload. A frame therefore occupies `len + 8` bytes on the wire.

use crate::error::{Error, Result};

pub const SYNC_1: u8 = 0xB5;
pub const SYNC_2: u8 = 0x62;
/// Bytes in a frame beyond the payload.
pub const FRAME_OVERHEAD: usize = 8;
/// Offset of the payload within a frame.
pub const PAYLOAD_OFFSET: usize = 6;

/// Class of acknowledgement messages.
pub const CLASS_ACK: u8 = 0x05;
/// ACK-ACK message id.
pub const ID_ACK: u8 = 0x01;
/// ACK-NAK message id; the 2-byte payload echoes the rejected class and id.
pub const ID_NACK: u8 = 0x00;

/// 8-bit Fletcher checksum over `data`.
pub fn checksum(data: &[u8]) -> (u8, u8) {
    let mut ck_a = 0u8;
    let mut ck_b = 0u8;
    for &byte in data {
        ck_a = ck_a.wrapping_add(byte);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    (ck_a, ck_b)
}

/// Encode a complete frame into `out`, returning the frame length.
///
/// Fails with [`Error::BufferTooSmall`] if `out` cannot hold the frame and
/// [`Error::CapacityExceeded`] if the payload exceeds the u16 length field.
pub fn encode(class: u8, id: u8, body: &[u8], out: &mut [u8]) -> Result<usize> {
    if body.len() > u16::MAX as usize {
        return Err(Error::CapacityExceeded);
    }
    let total = body.len() + FRAME_OVERHEAD;
    if out.len() < total {
        return Err(Error::BufferTooSmall);
    }
    out[0] = SYNC_1;
    out[1] = SYNC_2;
    out[2] = class;
    out[3] = id;
    out[4..6].copy_from_slice(&(body.len() as u16).to_le_bytes());
    out[PAYLOAD_OFFSET..PAYLOAD_OFFSET + body.len()].copy_from_slice(body);
    let (ck_a, ck_b) = checksum(&out[2..PAYLOAD_OFFSET + body.len()]);
    out[PAYLOAD_OFFSET + body.len()] = ck_a;
    out[PAYLOAD_OFFSET + body.len() + 1] = ck_b;
    Ok(total)
}

/// Result of examining a window that starts with [`SYNC_1`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A whole, checksum-valid frame of `total` bytes with this class/id.
    Complete { class: u8, id: u8, total: usize },
    /// The window is a valid prefix; more bytes may complete it.
    Partial,
    /// The window cannot become a valid frame (bad sync, bad checksum).
    Invalid,
}

/// Examine `window` (which must begin at a suspected frame start) and
/// classify it. `window[0]` is assumed to be [`SYNC_1`].
pub fn examine(window: &[u8]) -> FrameStatus {
    if window.len() < 2 {
        return FrameStatus::Partial;
    }
    if window[1] != SYNC_2 {
        return FrameStatus::Invalid;
    }
    if window.len() < PAYLOAD_OFFSET {
        return FrameStatus::Partial;
    }
    let len = u16::from_le_bytes([window[4], window[5]]) as usize;
    let total = len + FRAME_OVERHEAD;
    if window.len() < total {
        return FrameStatus::Partial;
    }
    let (ck_a, ck_b) = checksum(&window[2..PAYLOAD_OFFSET + len]);
    if window[total - 2] != ck_a || window[total - 1] != ck_b {
        return FrameStatus::Invalid;
    }
    FrameStatus::Complete {
        class: window[2],
        id: window[3],
        total,
    }
}

/// If `window` holds a complete ACK-NAK frame, return the rejected
/// (class, id) from its payload.
pub fn nack_target(window: &[u8]) -> Option<(u8, u8)> {
    match examine(window) {
        FrameStatus::Complete { class, id, total }
            if class == CLASS_ACK && id == ID_NACK && total == 2 + FRAME_OVERHEAD =>
        {
            Some((window[PAYLOAD_OFFSET], window[PAYLOAD_OFFSET + 1]))
        }
        _ => None,
    }
}
