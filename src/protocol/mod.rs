//! Message framing for the three wire protocols the modules speak.
//!
//! Each protocol submodule knows how to recognise its own frames in a raw
//! byte window; [`scan`](crate::protocol::scan) stitches them together into
//! a single detector that walks a ring-buffer cursor.

pub mod nmea;
pub mod rtcm;
pub mod scan;
pub mod ubx;

use core::fmt;

use heapless::String as FixedString;

/// Matches any UBX message class.
pub const UBX_CLASS_ANY: u8 = 0xFF;
/// Matches any UBX message id within a class.
pub const UBX_ID_ANY: u8 = 0xFF;
/// Matches any RTCM message type.
pub const RTCM_TYPE_ANY: u16 = 0xFFFF;
/// Longest NMEA talker/sentence identifier that can be matched against,
/// e.g. "GPGGA" or "PUBX".
pub const NMEA_MATCH_MAX: usize = 6;

/// Identity of a message on the wire, either concrete (as found in the
/// stream) or a pattern (as registered by a reader).
///
/// Pattern semantics:
/// - `Any` matches every frame of every protocol.
/// - UBX class/id of [`UBX_CLASS_ANY`]/[`UBX_ID_ANY`] are wildcards.
/// - RTCM type [`RTCM_TYPE_ANY`] is a wildcard.
/// - An NMEA pattern matches by prefix; `?` matches any single character
///   and an empty pattern matches every NMEA sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageId {
    /// Any message of any protocol.
    Any,
    /// A UBX frame, identified by class and message id.
    Ubx { class: u8, id: u8 },
    /// An NMEA sentence, identified by its talker/sentence string
    /// (the characters between `$` and the first `,` or `*`).
    Nmea(FixedString<NMEA_MATCH_MAX>),
    /// An RTCM v3 frame, identified by its 12-bit message type.
    Rtcm { kind: u16 },
}

impl MessageId {
    /// A UBX pattern matching every class and id.
    pub fn ubx_any() -> Self {
        Self::Ubx {
            class: UBX_CLASS_ANY,
            id: UBX_ID_ANY,
        }
    }

    /// An NMEA pattern from a string slice; truncates to
    /// [`NMEA_MATCH_MAX`] characters.
    pub fn nmea(pattern: &str) -> Self {
        let mut s = FixedString::new();
        for c in pattern.chars().take(NMEA_MATCH_MAX) {
            let _ = s.push(c);
        }
        Self::Nmea(s)
    }

    /// An RTCM pattern matching every message type.
    pub fn rtcm_any() -> Self {
        Self::Rtcm {
            kind: RTCM_TYPE_ANY,
        }
    }

    /// Whether this pattern wants `found`, a concrete identity pulled out
    /// of the stream.
    pub fn wants(&self, found: &MessageId) -> bool {
        match (self, found) {
            (Self::Any, _) => true,
            (
                Self::Ubx { class, id },
                Self::Ubx {
                    class: f_class,
                    id: f_id,
                },
            ) => {
                (*class == UBX_CLASS_ANY || class == f_class)
                    && (*id == UBX_ID_ANY || id == f_id)
            }
            (Self::Nmea(pattern), Self::Nmea(name)) => nmea_prefix_match(pattern, name),
            (Self::Rtcm { kind }, Self::Rtcm { kind: f_kind }) => {
                *kind == RTCM_TYPE_ANY || kind == f_kind
            }
            _ => false,
        }
    }

    /// Whether this is a fully concrete UBX identity (no wildcards). Only
    /// such polls can be answered by a NACK addressed to them.
    pub fn is_concrete_ubx(&self) -> Option<(u8, u8)> {
        match self {
            Self::Ubx { class, id } if *class != UBX_CLASS_ANY && *id != UBX_ID_ANY => {
                Some((*class, *id))
            }
            _ => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Ubx { class, id } => write!(f, "UBX {class:#04x}/{id:#04x}"),
            Self::Nmea(name) => write!(f, "NMEA {name}"),
            Self::Rtcm { kind } => write!(f, "RTCM {kind}"),
        }
    }
}

/// Prefix match with `?` as a single-character wildcard. An empty pattern
/// matches everything; a pattern longer than the name matches nothing.
fn nmea_prefix_match(pattern: &str, name: &str) -> bool {
    if pattern.len() > name.len() {
        return false;
    }
    pattern
        .bytes()
        .zip(name.bytes())
        .all(|(p, n)| p == b'?' || p == n)
}
