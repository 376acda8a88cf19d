use bitflags::bitflags;
use opalrdp_core::{ensure_fixed_part_size, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor};

/// The wheel rotation shares the low nine bits of the pointer flags field.
pub const WHEEL_ROTATION_MASK: u16 = 0x01FF;

/// TS_POINTER_EVENT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MousePdu {
    pub flags: PointerFlags,
    pub number_of_wheel_rotation_units: i16,
    pub x_position: u16,
    pub y_position: u16,
}

impl MousePdu {
    const NAME: &'static str = "MousePdu";

    const FIXED_PART_SIZE: usize = 2 /* flags */ + 2 /* x */ + 2 /* y */;
}

impl Encode for MousePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        // Clamp the rotation into the nine bits it occupies on the wire
        // before composing it with the flag bits.
        let units = self.number_of_wheel_rotation_units.clamp(-256, 255);

        let wheel_negative_bit = if units < 0 {
            PointerFlags::WHEEL_NEGATIVE.bits()
        } else {
            PointerFlags::empty().bits()
        };

        let wheel_rotations_bits = u16::from(units as u8); // truncate to magnitude byte

        let flags = self.flags.bits() | wheel_negative_bit | wheel_rotations_bits;

        dst.write_u16(flags);
        dst.write_u16(self.x_position);
        dst.write_u16(self.y_position);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for MousePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let flags_raw = src.read_u16();

        let flags = PointerFlags::from_bits_truncate(flags_raw);

        let wheel_rotations_bits = flags_raw as u8; // truncate

        let number_of_wheel_rotation_units = if flags.contains(PointerFlags::WHEEL_NEGATIVE) {
            -i16::from(wheel_rotations_bits)
        } else {
            i16::from(wheel_rotations_bits)
        };

        let x_position = src.read_u16();
        let y_position = src.read_u16();

        Ok(Self {
            flags,
            number_of_wheel_rotation_units,
            x_position,
            y_position,
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct PointerFlags: u16 {
        const WHEEL_NEGATIVE = 0x0100;
        const VERTICAL_WHEEL = 0x0200;
        const HORIZONTAL_WHEEL = 0x0400;
        const MOVE = 0x0800;
        const LEFT_BUTTON = 0x1000;
        const RIGHT_BUTTON = 0x2000;
        const MIDDLE_BUTTON_OR_WHEEL = 0x4000;
        const DOWN = 0x8000;
    }
}

/// TS_POINTERX_EVENT: the extended (4th/5th button) mouse event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseXPdu {
    pub flags: PointerXFlags,
    pub x_position: u16,
    pub y_position: u16,
}

impl MouseXPdu {
    const NAME: &'static str = "MouseXPdu";

    const FIXED_PART_SIZE: usize = 2 /* flags */ + 2 /* x */ + 2 /* y */;
}

impl Encode for MouseXPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.flags.bits());
        dst.write_u16(self.x_position);
        dst.write_u16(self.y_position);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for MouseXPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let flags = PointerXFlags::from_bits_truncate(src.read_u16());
        let x_position = src.read_u16();
        let y_position = src.read_u16();

        Ok(Self {
            flags,
            x_position,
            y_position,
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct PointerXFlags: u16 {
        const BUTTON_4 = 0x0001;
        const BUTTON_5 = 0x0002;
        const DOWN = 0x8000;
    }
}

#[cfg(test)]
mod tests {
    use opalrdp_core::{decode, encode_vec};

    use super::*;

    #[test]
    fn move_event_round_trip() {
        let pdu = MousePdu {
            flags: PointerFlags::MOVE,
            number_of_wheel_rotation_units: 0,
            x_position: 100,
            y_position: 200,
        };

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(encoded, [0x00, 0x08, 0x64, 0x00, 0xC8, 0x00]);

        assert_eq!(decode::<MousePdu>(&encoded).unwrap(), pdu);
    }

    #[test]
    fn negative_wheel_sets_sign_bit() {
        let pdu = MousePdu {
            flags: PointerFlags::VERTICAL_WHEEL,
            number_of_wheel_rotation_units: -120,
            x_position: 0,
            y_position: 0,
        };

        let encoded = encode_vec(&pdu).unwrap();
        let flags = u16::from_le_bytes([encoded[0], encoded[1]]);

        assert_ne!(flags & PointerFlags::WHEEL_NEGATIVE.bits(), 0);
        assert_eq!(flags & 0x00FF, 0x88); // two's complement magnitude byte

        let decoded = decode::<MousePdu>(&encoded).unwrap();
        assert!(decoded.flags.contains(PointerFlags::WHEEL_NEGATIVE));
    }

    // The rotation occupies nine bits: out-of-range values are clamped and
    // the magnitude byte never leaks into the flag bits.
    #[rstest::rstest]
    #[case(120, 0x78, false)]
    #[case(-120, 0x88, true)]
    #[case(255, 0xFF, false)]
    #[case(1000, 0xFF, false)]
    #[case(-1000, 0x00, true)]
    fn wheel_rotation_is_masked_into_nine_bits(#[case] units: i16, #[case] magnitude: u8, #[case] negative: bool) {
        let pdu = MousePdu {
            flags: PointerFlags::VERTICAL_WHEEL,
            number_of_wheel_rotation_units: units,
            x_position: 0,
            y_position: 0,
        };

        let encoded = encode_vec(&pdu).unwrap();
        let flags = u16::from_le_bytes([encoded[0], encoded[1]]);

        assert_eq!(flags & 0x00FF, u16::from(magnitude));
        assert_eq!(flags & PointerFlags::WHEEL_NEGATIVE.bits() != 0, negative);
        assert_eq!(flags & !WHEEL_ROTATION_MASK, PointerFlags::VERTICAL_WHEEL.bits());
    }
}
