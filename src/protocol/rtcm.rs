//! RTCM v3 framing.
//!
//! ```text
//! 0xD3 | 6 zero bits + 10-bit length | payload | 3-byte CRC-24Q
//! ```
//!
//! The 12-bit message type sits in the first one and a half payload bytes.
//! The CRC covers everything from the preamble through the payload.

pub const PREAMBLE: u8 = 0xD3;
/// Header plus trailing CRC.
pub const FRAME_OVERHEAD: usize = 6;
const HEADER_LEN: usize = 3;
const CRC24Q_POLY: u32 = 0x186_4CFB;

/// CRC-24Q as used by RTCM v3 (and SBAS), seed 0.
pub fn crc24q(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        crc ^= u32::from(byte) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24Q_POLY;
            }
        }
    }
    crc & 0x00FF_FFFF
}

/// Result of examining a window that starts with [`PREAMBLE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A whole, CRC-valid frame of `total` bytes carrying message `kind`.
    Complete { kind: u16, total: usize },
    /// A valid prefix; more bytes may complete it.
    Partial,
    /// Cannot become a valid frame (reserved bits set, bad CRC).
    Invalid,
}

/// Examine `window` (which must begin with the preamble) and classify it.
pub fn examine(window: &[u8]) -> FrameStatus {
    if window.len() < 2 {
        return FrameStatus::Partial;
    }
    // The six bits after the preamble are reserved and must be zero.
    if window[1] & 0xFC != 0 {
        return FrameStatus::Invalid;
    }
    if window.len() < HEADER_LEN {
        return FrameStatus::Partial;
    }
    let len = (usize::from(window[1] & 0x03) << 8) | usize::from(window[2]);
    // The message type takes 12 bits, so a real frame carries at least two
    // payload bytes.
    if len < 2 {
        return FrameStatus::Invalid;
    }
    let total = len + FRAME_OVERHEAD;
    if window.len() < total {
        return FrameStatus::Partial;
    }
    let crc = (u32::from(window[total - 3]) << 16)
        | (u32::from(window[total - 2]) << 8)
        | u32::from(window[total - 1]);
    if crc24q(&window[..total - 3]) != crc {
        return FrameStatus::Invalid;
    }
    let kind = (u16::from(window[3]) << 4) | (u16::from(window[4]) >> 4);
    FrameStatus::Complete { kind, total }
}

/// Build a frame around `payload` (used by tests and by applications that
/// forward correction data). The first 12 bits of `payload` must already
/// hold the message type.
pub fn encode(payload: &[u8], out: &mut Vec<u8>) {
    debug_assert!(payload.len() >= 2 && payload.len() <= 0x3FF);
    out.push(PREAMBLE);
    out.push((payload.len() >> 8) as u8 & 0x03);
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    let crc = crc24q(out);
    out.extend_from_slice(&[(crc >> 16) as u8, (crc >> 8) as u8, crc as u8]);
}
