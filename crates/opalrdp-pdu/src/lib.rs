//! RDP wire types: framing (TPKT/X.224), PER and BER primitives, the MCS PDU
//! family, GCC conference blocks, RDP headers and data PDUs, capability sets,
//! FastPath input and output, display updates, and the legacy security layer
//! (RC4 + session key derivation).
//!
//! Every type implements [`opalrdp_core::Encode`] and/or [`opalrdp_core::Decode`]
//! over borrowed cursors. Decoders never read past the outer length prefix:
//! the caller hands them a cursor bounded to a single PDU.

use opalrdp_core::{DecodeResult, ReadCursor, UnexpectedMessageTypeErr as _};

pub mod ber;
pub mod bitmap;
pub mod cached;
pub mod crypto;
pub mod fast_path;
pub mod gcc;
pub mod geometry;
pub mod input;
pub mod mcs;
pub mod nego;
pub mod per;
pub mod rdp;
pub mod surface_commands;
pub mod utf16;
pub mod x224;

/// First-byte discriminator between the two wire paths.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
    FastPath = 0x00,
    X224 = 0x03,
}

impl Action {
    pub fn from_fp_output_header(fp_output_header: u8) -> Result<Self, u8> {
        match fp_output_header & 0b11 {
            0x00 => Ok(Self::FastPath),
            0x03 => Ok(Self::X224),
            unknown_action_bits => Err(unknown_action_bits),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PduInfo {
    pub action: Action,
    pub length: usize,
}

/// Finds the next PDU size by reading the next few bytes.
///
/// Returns `Ok(None)` when `bytes` is too short to tell.
pub fn find_size(bytes: &[u8]) -> DecodeResult<Option<PduInfo>> {
    macro_rules! ensure_enough {
        ($bytes:expr, $len:expr) => {
            if $bytes.len() < $len {
                return Ok(None);
            }
        };
    }

    ensure_enough!(bytes, 1);
    let fp_output_header = bytes[0];

    let action = Action::from_fp_output_header(fp_output_header).map_err(|unknown_action| {
        opalrdp_core::DecodeError::unexpected_message_type("fpOutputHeader", unknown_action)
    })?;

    match action {
        Action::X224 => {
            ensure_enough!(bytes, x224::TpktHeader::SIZE);
            let tpkt = x224::TpktHeader::read(&mut ReadCursor::new(bytes))?;

            Ok(Some(PduInfo {
                action,
                length: tpkt.packet_length(),
            }))
        }
        Action::FastPath => {
            ensure_enough!(bytes, 2);
            let a = bytes[1];

            let fast_path_length = if a & 0x80 != 0 {
                ensure_enough!(bytes, 3);
                let b = bytes[2];

                ((u16::from(a) & !0x80) << 8) + u16::from(b)
            } else {
                u16::from(a)
            };

            Ok(Some(PduInfo {
                action,
                length: usize::from(fast_path_length),
            }))
        }
    }
}

/// Reports how many bytes the next PDU takes without decoding it.
pub trait PduHint: Send + Sync + core::fmt::Debug + 'static {
    fn find_size(&self, bytes: &[u8]) -> DecodeResult<Option<usize>>;
}

// Matches both X.224 and FastPath PDUs.
#[derive(Clone, Copy, Debug)]
pub struct RdpHint;

pub const RDP_HINT: RdpHint = RdpHint;

impl PduHint for RdpHint {
    fn find_size(&self, bytes: &[u8]) -> DecodeResult<Option<usize>> {
        find_size(bytes).map(|opt| opt.map(|info| info.length))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct X224Hint;

pub const X224_HINT: X224Hint = X224Hint;

impl PduHint for X224Hint {
    fn find_size(&self, bytes: &[u8]) -> DecodeResult<Option<usize>> {
        match find_size(bytes)? {
            Some(pdu_info) => {
                debug_assert_eq!(pdu_info.action, Action::X224);
                Ok(Some(pdu_info.length))
            }
            None => Ok(None),
        }
    }
}
