//! FastPath output: the compact server-to-client framing that carries display
//! updates once the session is active.

use bit_field::BitField as _;
use bitflags::bitflags;
use opalrdp_core::{
    cast_length, decode_cursor, ensure_fixed_part_size, ensure_size, invalid_field_err, other_err, Decode,
    DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use crate::bitmap::BitmapUpdateData;
use crate::cached::CachedBitmapUpdateData;
use crate::per;
use crate::rdp::client_info::CompressionType;
use crate::rdp::headers::{CompressionFlags, SHARE_DATA_HEADER_COMPRESSION_MASK};
use crate::surface_commands::{SurfaceCommand, SURFACE_COMMAND_HEADER_SIZE};

/// TS_FP_UPDATE_PDU header.
///
/// The PER length covers the whole PDU including its own encoded bytes, so
/// the +2/+3 adjustment applies symmetrically on encode and decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastPathHeader {
    pub flags: EncryptionFlags,
    pub data_length: usize,
    forced_long_length: bool,
}

impl FastPathHeader {
    const NAME: &'static str = "FastPathHeader";

    const FIXED_PART_SIZE: usize = 1 /* header byte */;

    pub fn new(flags: EncryptionFlags, data_length: usize) -> Self {
        Self {
            flags,
            data_length,
            forced_long_length: false,
        }
    }

    fn minimal_size(&self) -> usize {
        // it may then be +2 if > 0x7f
        let len = self.data_length + Self::FIXED_PART_SIZE + 1;

        Self::FIXED_PART_SIZE + per::sizeof_length(len as u16)
    }
}

impl Encode for FastPathHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let mut header = 0u8;
        header.set_bits(0..2, 0); // fast-path action
        header.set_bits(6..8, self.flags.bits());
        dst.write_u8(header);

        let length = self.data_length + self.size();
        let length = cast_length!("length", length)?;

        if self.forced_long_length {
            // Preserve the same layout for the header as received.
            per::write_long_length(dst, length);
        } else {
            per::write_length(dst, length);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        if self.forced_long_length {
            Self::FIXED_PART_SIZE + per::SIZEOF_U16
        } else {
            self.minimal_size()
        }
    }
}

impl<'de> Decode<'de> for FastPathHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let header = src.read_u8();
        let flags = EncryptionFlags::from_bits_truncate(header.get_bits(6..8));

        let (length, sizeof_length) = per::read_length(src).map_err(|e| other_err!("perLength", source: e))?;
        let length = usize::from(length);
        if length < sizeof_length + Self::FIXED_PART_SIZE {
            return Err(invalid_field_err!(
                "length",
                "received FastPath PDU length is smaller than the header size"
            ));
        }
        let data_length = length - sizeof_length - Self::FIXED_PART_SIZE;
        // Detect non-minimal length packing so a re-encode is byte-identical.
        let forced_long_length = per::sizeof_length(length as u16) != sizeof_length;

        Ok(FastPathHeader {
            flags,
            data_length,
            forced_long_length,
        })
    }
}

/// TS_FP_UPDATE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastPathUpdatePdu<'a> {
    pub fragmentation: Fragmentation,
    pub update_code: UpdateCode,
    pub compression_flags: Option<CompressionFlags>,
    // NOTE: always `Some` when compression_flags is `Some`
    pub compression_type: Option<CompressionType>,
    pub data: &'a [u8],
}

impl FastPathUpdatePdu<'_> {
    const NAME: &'static str = "FastPathUpdatePdu";

    const FIXED_PART_SIZE: usize = 1 /* updateHeader */;
}

impl Encode for FastPathUpdatePdu<'_> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let data_len: u16 = cast_length!("dataLength", self.data.len())?;

        let mut header = 0u8;
        header.set_bits(0..4, self.update_code.as_u8());
        header.set_bits(4..6, self.fragmentation.as_u8());
        if self.compression_flags.is_some() {
            header.set_bits(6..8, Compression::COMPRESSION_USED.bits());
        }

        dst.write_u8(header);

        if self.compression_flags.is_some() {
            let compression_flags_with_type = self.compression_flags.map(|f| f.bits()).unwrap_or(0)
                | self.compression_type.map_or(0, |t| t.as_u8());
            dst.write_u8(compression_flags_with_type);
        }

        dst.write_u16(data_len);
        dst.write_slice(self.data);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let compression_flags_size = if self.compression_flags.is_some() { 1 } else { 0 };

        Self::FIXED_PART_SIZE + compression_flags_size + 2 /* dataLength */ + self.data.len()
    }
}

impl<'de> Decode<'de> for FastPathUpdatePdu<'de> {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let header = src.read_u8();

        let update_code = header.get_bits(0..4);
        let update_code =
            UpdateCode::from_u8(update_code).ok_or_else(|| invalid_field_err!("updateHeader", "invalid update code"))?;

        let fragmentation = header.get_bits(4..6);
        let fragmentation = Fragmentation::from_u8(fragmentation)
            .ok_or_else(|| invalid_field_err!("updateHeader", "invalid fragmentation"))?;

        let compression = Compression::from_bits_truncate(header.get_bits(6..8));

        let (compression_flags, compression_type) = if compression.contains(Compression::COMPRESSION_USED) {
            ensure_size!(in: src, size: 1 /* flagsWithType */ + 2 /* dataLength */);

            let compression_flags_with_type = src.read_u8();
            let compression_flags =
                CompressionFlags::from_bits_truncate(compression_flags_with_type & !SHARE_DATA_HEADER_COMPRESSION_MASK);
            let compression_type =
                CompressionType::from_u8(compression_flags_with_type & SHARE_DATA_HEADER_COMPRESSION_MASK)
                    .ok_or_else(|| invalid_field_err!("compressionFlags", "invalid compression type"))?;

            (Some(compression_flags), Some(compression_type))
        } else {
            ensure_size!(in: src, size: 2 /* dataLength */);

            (None, None)
        };

        let data_length = usize::from(src.read_u16());
        ensure_size!(in: src, size: data_length);
        let data = src.read_slice(data_length);

        Ok(Self {
            fragmentation,
            update_code,
            compression_flags,
            compression_type,
            data,
        })
    }
}

/// A decoded TS_FP_UPDATE body, dispatched on the update code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastPathUpdate<'a> {
    Bitmap(BitmapUpdateData<'a>),
    CachedBitmap(CachedBitmapUpdateData),
    SurfaceCommands(Vec<SurfaceCommand<'a>>),
    Pointer(PointerUpdateData<'a>),
    /// Update codes with no decoder; carried raw so callers can skip them.
    Unsupported { code: UpdateCode, data: &'a [u8] },
}

impl<'a> FastPathUpdate<'a> {
    pub fn decode_with_code(src: &'a [u8], code: UpdateCode) -> DecodeResult<Self> {
        let mut cursor = ReadCursor::<'a>::new(src);
        Self::decode_cursor_with_code(&mut cursor, code)
    }

    pub fn decode_cursor_with_code(src: &mut ReadCursor<'a>, code: UpdateCode) -> DecodeResult<Self> {
        match code {
            UpdateCode::Bitmap => Ok(Self::Bitmap(decode_cursor(src)?)),
            UpdateCode::CachedBitmap => Ok(Self::CachedBitmap(decode_cursor(src)?)),
            UpdateCode::SurfaceCommands => {
                let mut commands = Vec::with_capacity(1);
                while src.len() >= SURFACE_COMMAND_HEADER_SIZE {
                    commands.push(decode_cursor::<SurfaceCommand<'_>>(src)?);
                }

                Ok(Self::SurfaceCommands(commands))
            }
            UpdateCode::HiddenPointer => Ok(Self::Pointer(PointerUpdateData::SetHidden)),
            UpdateCode::DefaultPointer => Ok(Self::Pointer(PointerUpdateData::SetDefault)),
            UpdateCode::PositionPointer => Ok(Self::Pointer(PointerUpdateData::SetPosition(decode_cursor(src)?))),
            UpdateCode::ColorPointer => Ok(Self::Pointer(PointerUpdateData::Color(src.read_remaining()))),
            UpdateCode::NewPointer => Ok(Self::Pointer(PointerUpdateData::New(src.read_remaining()))),
            UpdateCode::LargePointer => Ok(Self::Pointer(PointerUpdateData::Large(src.read_remaining()))),
            code => Ok(Self::Unsupported {
                code,
                data: src.read_remaining(),
            }),
        }
    }

}

/// Pointer-shape updates. The display core consumes position and visibility
/// changes; the color/new/cached/large shapes are carried raw for a pointer
/// renderer upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerUpdateData<'a> {
    SetHidden,
    SetDefault,
    SetPosition(PointerPositionAttribute),
    Color(&'a [u8]),
    New(&'a [u8]),
    Large(&'a [u8]),
}

/// TS_POINT16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerPositionAttribute {
    pub x: u16,
    pub y: u16,
}

impl PointerPositionAttribute {
    const NAME: &'static str = "PointerPositionAttribute";

    const FIXED_PART_SIZE: usize = 2 /* x */ + 2 /* y */;
}

impl Encode for PointerPositionAttribute {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.x);
        dst.write_u16(self.y);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for PointerPositionAttribute {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let x = src.read_u16();
        let y = src.read_u16();

        Ok(Self { x, y })
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive)]
pub enum UpdateCode {
    Orders = 0x0,
    Bitmap = 0x1,
    Palette = 0x2,
    Synchronize = 0x3,
    SurfaceCommands = 0x4,
    HiddenPointer = 0x5,
    DefaultPointer = 0x6,
    PositionPointer = 0x8,
    ColorPointer = 0x9,
    CachedBitmap = 0xA,
    NewPointer = 0xB,
    LargePointer = 0xC,
}

impl UpdateCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
pub enum Fragmentation {
    Single = 0x0,
    Last = 0x1,
    First = 0x2,
    Next = 0x3,
}

impl Fragmentation {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct EncryptionFlags: u8 {
        const SECURE_CHECKSUM = 0x1;
        const ENCRYPTED = 0x2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Compression: u8 {
        const COMPRESSION_USED = 0x2;
    }
}

#[cfg(test)]
mod tests {
    use opalrdp_core::{decode, encode_vec};

    use super::*;

    // The PER length covers the whole PDU including its own bytes, so the
    // adjustment is +2 below 0x80 and +3 from there on.
    #[rstest::rstest]
    #[case(EncryptionFlags::empty(), 0x40, 2)]
    #[case(EncryptionFlags::ENCRYPTED, 0x200, 3)]
    fn header_length_covers_its_own_bytes(
        #[case] flags: EncryptionFlags,
        #[case] data_length: usize,
        #[case] header_size: usize,
    ) {
        let header = FastPathHeader::new(flags, data_length);

        let encoded = encode_vec(&header).unwrap();
        assert_eq!(encoded.len(), header_size);

        let advertised = if header_size == 2 {
            usize::from(encoded[1])
        } else {
            ((usize::from(encoded[1]) & !0x80) << 8) + usize::from(encoded[2])
        };
        assert_eq!(advertised, data_length + header_size);

        let decoded = decode::<FastPathHeader>(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_preserves_forced_long_length() {
        // A length below 0x80 packed on two bytes anyway.
        let bytes = [0x00, 0x80, 0x10];

        let decoded = decode::<FastPathHeader>(&bytes).unwrap();
        assert_eq!(decoded.data_length, 0x10 - 3);

        let reencoded = encode_vec(&decoded).unwrap();
        assert_eq!(reencoded, bytes);
    }

    #[test]
    fn update_pdu_round_trip() {
        let pdu = FastPathUpdatePdu {
            fragmentation: Fragmentation::Single,
            update_code: UpdateCode::Bitmap,
            compression_flags: None,
            compression_type: None,
            data: &[1, 2, 3, 4],
        };

        let encoded = encode_vec(&pdu).unwrap();
        let decoded = decode::<FastPathUpdatePdu<'_>>(&encoded).unwrap();

        assert_eq!(decoded, pdu);
    }

    #[test]
    fn update_pdu_with_compression_round_trip() {
        let pdu = FastPathUpdatePdu {
            fragmentation: Fragmentation::First,
            update_code: UpdateCode::SurfaceCommands,
            compression_flags: Some(CompressionFlags::COMPRESSED),
            compression_type: Some(CompressionType::Rdp61),
            data: &[9, 9, 9],
        };

        let encoded = encode_vec(&pdu).unwrap();
        let decoded = decode::<FastPathUpdatePdu<'_>>(&encoded).unwrap();

        assert_eq!(decoded, pdu);
    }
}
