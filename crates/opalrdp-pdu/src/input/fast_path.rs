//! FastPath input: client-to-server keyboard/mouse events with the packed
//! one-byte header and PER-encoded total length.

use bit_field::BitField as _;
use bitflags::bitflags;
use opalrdp_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, other_err, Decode, DecodeResult, Encode,
    EncodeResult, ReadCursor, WriteCursor,
};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive as _, ToPrimitive as _};

use crate::fast_path::EncryptionFlags;
use crate::input::{MousePdu, MouseXPdu};
use crate::per;

/// TS_FP_INPUT_PDU header.
///
/// The PER length covers the whole PDU including its own encoded bytes. The
/// separate event-count byte exists on the wire only when the 4-bit header
/// field is zero, which the encoder produces only for counts of 16 or more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastPathInputHeader {
    pub flags: EncryptionFlags,
    pub data_length: usize,
    pub num_events: u8,
}

impl FastPathInputHeader {
    const NAME: &'static str = "FastPathInputHeader";

    const FIXED_PART_SIZE: usize = 1 /* header */;
}

impl Encode for FastPathInputHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let mut header = 0u8;
        header.set_bits(0..2, 0); // fast-path action
        if self.num_events < 16 {
            header.set_bits(2..6, self.num_events);
        }
        header.set_bits(6..8, self.flags.bits());
        dst.write_u8(header);

        per::write_length(dst, cast_length!("length", self.data_length + self.size())?);
        if self.num_events > 15 {
            dst.write_u8(self.num_events);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let num_events_length: usize = if self.num_events < 16 { 0 } else { 1 };
        let total = self.data_length + Self::FIXED_PART_SIZE + num_events_length + 1;

        Self::FIXED_PART_SIZE + per::sizeof_length(total as u16) + num_events_length
    }
}

impl<'de> Decode<'de> for FastPathInputHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let header = src.read_u8();
        let flags = EncryptionFlags::from_bits_truncate(header.get_bits(6..8));
        let mut num_events = header.get_bits(2..6);
        let (length, sizeof_length) =
            per::read_length(src).map_err(|e| other_err!("perLength", source: e))?;

        let num_events_length = if num_events == 0 {
            ensure_size!(in: src, size: 1);
            num_events = src.read_u8();
            1
        } else {
            0
        };

        let consumed = Self::FIXED_PART_SIZE + sizeof_length + num_events_length;
        let length = usize::from(length);
        if length < consumed {
            return Err(invalid_field_err!("length", "FastPath input PDU length smaller than header"));
        }

        let data_length = length - consumed;

        Ok(FastPathInputHeader {
            flags,
            data_length,
            num_events,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FastPathInputEventType {
    ScanCode = 0x0,
    Mouse = 0x1,
    MouseX = 0x2,
    Sync = 0x3,
    Unicode = 0x4,
}

/// TS_FP_INPUT_EVENT: event code in the top three bits of the event header,
/// event-specific flags in the low five.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastPathInputEvent {
    KeyboardEvent(KeyboardFlags, u8),
    UnicodeKeyboardEvent(KeyboardFlags, u16),
    MouseEvent(MousePdu),
    MouseEventEx(MouseXPdu),
    SyncEvent(SynchronizeFlags),
}

impl FastPathInputEvent {
    const NAME: &'static str = "FastPathInputEvent";

    const FIXED_PART_SIZE: usize = 1 /* eventHeader */;
}

impl Encode for FastPathInputEvent {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let mut header = 0u8;
        let (flags, code) = match self {
            FastPathInputEvent::KeyboardEvent(flags, _) => (flags.bits(), FastPathInputEventType::ScanCode),
            FastPathInputEvent::UnicodeKeyboardEvent(flags, _) => (flags.bits(), FastPathInputEventType::Unicode),
            FastPathInputEvent::MouseEvent(_) => (0, FastPathInputEventType::Mouse),
            FastPathInputEvent::MouseEventEx(_) => (0, FastPathInputEventType::MouseX),
            FastPathInputEvent::SyncEvent(flags) => (flags.bits(), FastPathInputEventType::Sync),
        };
        header.set_bits(0..5, flags);
        header.set_bits(5..8, code.to_u8().unwrap_or(0));
        dst.write_u8(header);

        match self {
            FastPathInputEvent::KeyboardEvent(_, code) => {
                dst.write_u8(*code);
            }
            FastPathInputEvent::UnicodeKeyboardEvent(_, code) => {
                dst.write_u16(*code);
            }
            FastPathInputEvent::MouseEvent(pdu) => {
                pdu.encode(dst)?;
            }
            FastPathInputEvent::MouseEventEx(pdu) => {
                pdu.encode(dst)?;
            }
            FastPathInputEvent::SyncEvent(_) => {}
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
            + match self {
                FastPathInputEvent::KeyboardEvent(..) => 1,
                FastPathInputEvent::UnicodeKeyboardEvent(..) => 2,
                FastPathInputEvent::MouseEvent(pdu) => pdu.size(),
                FastPathInputEvent::MouseEventEx(pdu) => pdu.size(),
                FastPathInputEvent::SyncEvent(_) => 0,
            }
    }
}

impl<'de> Decode<'de> for FastPathInputEvent {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let header = src.read_u8();
        let flags = header.get_bits(0..5);
        let code = header.get_bits(5..8);
        let code = FastPathInputEventType::from_u8(code)
            .ok_or_else(|| invalid_field_err!("eventCode", "unsupported input event code"))?;

        let event = match code {
            FastPathInputEventType::ScanCode => {
                ensure_size!(in: src, size: 1);
                let code = src.read_u8();
                let flags = KeyboardFlags::from_bits(flags)
                    .ok_or_else(|| invalid_field_err!("eventFlags", "unsupported keyboard flags"))?;
                FastPathInputEvent::KeyboardEvent(flags, code)
            }
            FastPathInputEventType::Mouse => FastPathInputEvent::MouseEvent(MousePdu::decode(src)?),
            FastPathInputEventType::MouseX => FastPathInputEvent::MouseEventEx(MouseXPdu::decode(src)?),
            FastPathInputEventType::Sync => {
                let flags = SynchronizeFlags::from_bits(flags)
                    .ok_or_else(|| invalid_field_err!("eventFlags", "unsupported synchronize flags"))?;
                FastPathInputEvent::SyncEvent(flags)
            }
            FastPathInputEventType::Unicode => {
                ensure_size!(in: src, size: 2);
                let code = src.read_u16();
                let flags = KeyboardFlags::from_bits(flags)
                    .ok_or_else(|| invalid_field_err!("eventFlags", "unsupported keyboard flags"))?;
                FastPathInputEvent::UnicodeKeyboardEvent(flags, code)
            }
        };

        Ok(event)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct KeyboardFlags: u8 {
        const RELEASE = 0x01;
        const EXTENDED = 0x02;
        const EXTENDED1 = 0x04;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct SynchronizeFlags: u8 {
        const SCROLL_LOCK = 0x01;
        const NUM_LOCK = 0x02;
        const CAPS_LOCK = 0x04;
        const KANA_LOCK = 0x08;
    }
}

/// A whole unencrypted FastPath input PDU: header plus event list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastPathInput(pub Vec<FastPathInputEvent>);

impl FastPathInput {
    const NAME: &'static str = "FastPathInput";
}

impl Encode for FastPathInput {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        if self.0.is_empty() {
            return Err(other_err!("empty FastPath input"));
        }

        let data_length = self.0.iter().map(Encode::size).sum::<usize>();
        let header = FastPathInputHeader {
            num_events: cast_length!("numEvents", self.0.len())?,
            flags: EncryptionFlags::empty(),
            data_length,
        };
        header.encode(dst)?;

        for event in self.0.iter() {
            event.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let data_length = self.0.iter().map(Encode::size).sum::<usize>();
        let header = FastPathInputHeader {
            num_events: self.0.len() as u8,
            flags: EncryptionFlags::empty(),
            data_length,
        };
        header.size() + data_length
    }
}

impl<'de> Decode<'de> for FastPathInput {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let header = FastPathInputHeader::decode(src)?;

        if !header.flags.is_empty() {
            return Err(invalid_field_err!("flags", "encrypted input cannot be decoded in place"));
        }

        let events = (0..header.num_events)
            .map(|_| FastPathInputEvent::decode(src))
            .collect::<DecodeResult<Vec<_>>>()?;

        Ok(Self(events))
    }
}

#[cfg(test)]
mod tests {
    use opalrdp_core::{decode, encode_vec};

    use super::*;
    use crate::input::PointerFlags;

    #[test]
    fn single_event_round_trip() {
        let pdu = FastPathInput(vec![FastPathInputEvent::MouseEvent(MousePdu {
            flags: PointerFlags::MOVE,
            number_of_wheel_rotation_units: 0,
            x_position: 100,
            y_position: 200,
        })]);

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(encoded.len(), pdu.size());
        // header byte: action 0, numEvents 1, no encryption
        assert_eq!(encoded[0], 0b0000_0100);
        // total length below 0x80 encodes in a single byte
        assert_eq!(usize::from(encoded[1]), encoded.len());

        let decoded = decode::<FastPathInput>(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn event_count_overflow_byte() {
        let events = (0..17)
            .map(|i| {
                FastPathInputEvent::KeyboardEvent(KeyboardFlags::empty(), i as u8)
            })
            .collect::<Vec<_>>();
        let pdu = FastPathInput(events);

        let encoded = encode_vec(&pdu).unwrap();
        // 4-bit count field is zero, the separate count byte follows the length
        assert_eq!((encoded[0] >> 2) & 0x0F, 0);
        assert_eq!(encoded[2], 17);

        let decoded = decode::<FastPathInput>(&encoded).unwrap();
        assert_eq!(decoded.0.len(), 17);
    }

    #[test]
    fn length_field_includes_its_own_bytes() {
        // Grow the PDU past 0x7F so the PER length takes two bytes.
        let events = (0..40)
            .map(|i| FastPathInputEvent::UnicodeKeyboardEvent(KeyboardFlags::empty(), i as u16))
            .collect::<Vec<_>>();
        let pdu = FastPathInput(events);

        let encoded = encode_vec(&pdu).unwrap();
        assert!(encoded.len() >= 0x80);

        let advertised = ((u16::from(encoded[1]) & !0x80) << 8) + u16::from(encoded[2]);
        assert_eq!(usize::from(advertised), encoded.len());

        let decoded = decode::<FastPathInput>(&encoded).unwrap();
        assert_eq!(decoded.0.len(), 40);
    }
}
