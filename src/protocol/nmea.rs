//! NMEA 0183 sentence framing.
//!
//! ```text
//! $TTSSS,field,field,...*HH\r\n
//! ```
//!
//! `TTSSS` is the talker plus sentence identifier (what [`MessageId::Nmea`]
//! patterns match against), `HH` is two uppercase hex digits of the XOR of
//! every byte between `$` and `*`. A sentence never exceeds
//! [`SENTENCE_MAX`] bytes including `$` and CRLF.

use heapless::String as FixedString;

use super::{MessageId, NMEA_MATCH_MAX};

pub const START: u8 = b'$';
/// Maximum length of a sentence on the wire.
pub const SENTENCE_MAX: usize = 82;
/// Smallest syntactically possible sentence: `$*HH\r\n`.
const SENTENCE_MIN: usize = 6;

/// Result of examining a window that starts with `$`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentenceStatus {
    /// A whole, checksum-valid sentence of `total` bytes.
    Complete { id: MessageId, total: usize },
    /// A valid prefix; more bytes may complete it.
    Partial,
    /// Cannot become a valid sentence (bad character, bad checksum,
    /// over-long).
    Invalid,
}

fn is_sentence_char(b: u8) -> bool {
    (0x20..0x7F).contains(&b)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

/// Examine `window` (which must begin with `$`) and classify it.
pub fn examine(window: &[u8]) -> SentenceStatus {
    debug_assert!(window.is_empty() || window[0] == START);

    // Find the '*' that ends the body; everything before it must be a
    // printable sentence character.
    let mut star = None;
    for (i, &b) in window.iter().enumerate().skip(1) {
        if i >= SENTENCE_MAX {
            return SentenceStatus::Invalid;
        }
        if b == b'*' {
            star = Some(i);
            break;
        }
        if !is_sentence_char(b) {
            return SentenceStatus::Invalid;
        }
    }
    let Some(star) = star else {
        return if window.len() >= SENTENCE_MAX {
            SentenceStatus::Invalid
        } else {
            SentenceStatus::Partial
        };
    };

    let total = star + 5; // "*HH\r\n"
    if total > SENTENCE_MAX || total < SENTENCE_MIN {
        return SentenceStatus::Invalid;
    }
    if window.len() < total {
        return SentenceStatus::Partial;
    }
    let (Some(hi), Some(lo)) = (hex_value(window[star + 1]), hex_value(window[star + 2]))
    else {
        return SentenceStatus::Invalid;
    };
    if window[star + 3] != b'\r' || window[star + 4] != b'\n' {
        return SentenceStatus::Invalid;
    }
    let mut sum = 0u8;
    for &b in &window[1..star] {
        sum ^= b;
    }
    if sum != (hi << 4) | lo {
        return SentenceStatus::Invalid;
    }

    SentenceStatus::Complete {
        id: sentence_id(&window[1..star]),
        total,
    }
}

/// Extract the talker/sentence identifier from a sentence body (the bytes
/// between `$` and `*`): everything up to the first `,`, capped at
/// [`NMEA_MATCH_MAX`] characters.
fn sentence_id(body: &[u8]) -> MessageId {
    let mut s = FixedString::<NMEA_MATCH_MAX>::new();
    for &b in body.iter().take_while(|&&b| b != b',').take(NMEA_MATCH_MAX) {
        let _ = s.push(b as char);
    }
    MessageId::Nmea(s)
}
