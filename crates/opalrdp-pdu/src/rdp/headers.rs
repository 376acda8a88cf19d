//! ShareControl and ShareData, RDP's inner headers.
//!
//! A compressed ShareData payload is surfaced as raw bytes together with its
//! pduType2: decompression needs the per-direction history owned by the
//! session layer, so the inner PDU is decoded in a second step via
//! [`ShareDataPdu::from_type`].

use bitflags::bitflags;
use opalrdp_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, not_enough_bytes_err, other_err,
    read_padding, write_padding, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive as _, ToPrimitive as _};

use crate::rdp::bitmap_cache::BitmapCacheErrorPdu;
use crate::rdp::capability_sets::{ClientConfirmActive, ServerDemandActive};
use crate::rdp::client_info::CompressionType;
use crate::rdp::finalization_messages::{ControlPdu, FontPdu, FrameAcknowledgePdu, SynchronizePdu};
use crate::rdp::display::{RefreshRectanglePdu, SuppressOutputPdu};
use crate::rdp::server_error_info::ServerSetErrorInfoPdu;

pub const BASIC_SECURITY_HEADER_SIZE: usize = 4;
pub const SHARE_DATA_HEADER_COMPRESSION_MASK: u8 = 0xF;
const SHARE_CONTROL_HEADER_MASK: u16 = 0xF;
const SHARE_CONTROL_HEADER_SIZE: usize = 2 /* totalLength */ + 2 /* pduType */ + 2 /* pduSource */ + 4 /* shareId */;

const PROTOCOL_VERSION: u16 = 0x10;

// ShareDataHeader
const PADDING_FIELD_SIZE: usize = 1;
const STREAM_ID_FIELD_SIZE: usize = 1;
const UNCOMPRESSED_LENGTH_FIELD_SIZE: usize = 2;
const PDU_TYPE_FIELD_SIZE: usize = 1;
const COMPRESSION_TYPE_FIELD_SIZE: usize = 1;
const COMPRESSED_LENGTH_FIELD_SIZE: usize = 2;

/// TS_SECURITY_HEADER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicSecurityHeader {
    pub flags: BasicSecurityHeaderFlags,
}

impl BasicSecurityHeader {
    const NAME: &'static str = "BasicSecurityHeader";

    pub const FIXED_PART_SIZE: usize = BASIC_SECURITY_HEADER_SIZE;
}

impl Encode for BasicSecurityHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.flags.bits());
        dst.write_u16(0); // flagsHi
        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for BasicSecurityHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let flags = BasicSecurityHeaderFlags::from_bits(src.read_u16())
            .ok_or_else(|| invalid_field_err!("flags", "invalid basic security header flags"))?;
        let _flags_hi = src.read_u16(); // unused

        Ok(Self { flags })
    }
}

/// TS_SHARECONTROLHEADER plus the shareId all control PDU bodies open with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareControlHeader {
    pub share_control_pdu: ShareControlPdu,
    pub pdu_source: u16,
    pub share_id: u32,
}

impl ShareControlHeader {
    const NAME: &'static str = "ShareControlHeader";

    const FIXED_PART_SIZE: usize = SHARE_CONTROL_HEADER_SIZE;
}

impl Encode for ShareControlHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let pdu_type_with_version =
            PROTOCOL_VERSION | self.share_control_pdu.share_header_type().to_u16().unwrap_or(0);

        dst.write_u16(cast_length!(
            "totalLength",
            self.share_control_pdu.size() + SHARE_CONTROL_HEADER_SIZE
        )?);
        dst.write_u16(pdu_type_with_version);
        dst.write_u16(self.pdu_source);
        dst.write_u32(self.share_id);

        self.share_control_pdu.encode(dst)
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.share_control_pdu.size()
    }
}

impl<'de> Decode<'de> for ShareControlHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let total_length = usize::from(src.read_u16());
        let pdu_type_with_version = src.read_u16();
        let pdu_source = src.read_u16();
        let share_id = src.read_u32();

        let pdu_type = ShareControlPduType::from_u16(pdu_type_with_version & SHARE_CONTROL_HEADER_MASK)
            .ok_or_else(|| invalid_field_err!("pduType", "invalid share control PDU type"))?;
        let pdu_version = pdu_type_with_version & !SHARE_CONTROL_HEADER_MASK;
        if pdu_version != PROTOCOL_VERSION {
            return Err(invalid_field_err!("pduVersion", "invalid share control PDU version"));
        }

        let share_pdu = ShareControlPdu::from_type(src, pdu_type)?;
        let header = Self {
            share_control_pdu: share_pdu,
            pdu_source,
            share_id,
        };

        if pdu_type == ShareControlPduType::DataPdu {
            // Some Windows versions append padding that is not part of the
            // inner unit; consume it so the outer frame stays aligned.
            let header_length = header.size();

            if header_length != total_length {
                if total_length < header_length {
                    return Err(not_enough_bytes_err(Self::NAME, total_length, header_length));
                }

                let padding = total_length - header_length;
                ensure_size!(in: src, size: padding);
                read_padding!(src, padding);
            }
        }

        Ok(header)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareControlPdu {
    ServerDemandActive(ServerDemandActive),
    ClientConfirmActive(ClientConfirmActive),
    Data(ShareDataHeader),
    ServerDeactivateAll(ServerDeactivateAll),
}

impl ShareControlPdu {
    const NAME: &'static str = "ShareControlPdu";

    pub fn share_header_type(&self) -> ShareControlPduType {
        match self {
            ShareControlPdu::ServerDemandActive(_) => ShareControlPduType::DemandActivePdu,
            ShareControlPdu::ClientConfirmActive(_) => ShareControlPduType::ConfirmActivePdu,
            ShareControlPdu::Data(_) => ShareControlPduType::DataPdu,
            ShareControlPdu::ServerDeactivateAll(_) => ShareControlPduType::DeactivateAllPdu,
        }
    }

    pub fn from_type(src: &mut ReadCursor<'_>, share_type: ShareControlPduType) -> DecodeResult<Self> {
        match share_type {
            ShareControlPduType::DemandActivePdu => {
                Ok(ShareControlPdu::ServerDemandActive(ServerDemandActive::decode(src)?))
            }
            ShareControlPduType::ConfirmActivePdu => {
                Ok(ShareControlPdu::ClientConfirmActive(ClientConfirmActive::decode(src)?))
            }
            ShareControlPduType::DataPdu => Ok(ShareControlPdu::Data(ShareDataHeader::decode(src)?)),
            ShareControlPduType::DeactivateAllPdu => {
                Ok(ShareControlPdu::ServerDeactivateAll(ServerDeactivateAll::decode(src)?))
            }
            ShareControlPduType::ServerRedirect => {
                Err(other_err!(ctx: Self::NAME, "server redirection is not supported"))
            }
        }
    }
}

impl Encode for ShareControlPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        match self {
            ShareControlPdu::ServerDemandActive(pdu) => pdu.encode(dst),
            ShareControlPdu::ClientConfirmActive(pdu) => pdu.encode(dst),
            ShareControlPdu::Data(share_data_header) => share_data_header.encode(dst),
            ShareControlPdu::ServerDeactivateAll(deactivate_all) => deactivate_all.encode(dst),
        }
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        match self {
            ShareControlPdu::ServerDemandActive(pdu) => pdu.size(),
            ShareControlPdu::ClientConfirmActive(pdu) => pdu.size(),
            ShareControlPdu::Data(share_data_header) => share_data_header.size(),
            ShareControlPdu::ServerDeactivateAll(deactivate_all) => deactivate_all.size(),
        }
    }
}

/// TS_SHAREDATAHEADER (the part following shareId).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareDataHeader {
    pub share_data_pdu: ShareDataPdu,
    pub stream_priority: StreamPriority,
    pub compression_flags: CompressionFlags,
    pub compression_type: CompressionType,
}

impl ShareDataHeader {
    const NAME: &'static str = "ShareDataHeader";

    const FIXED_PART_SIZE: usize = PADDING_FIELD_SIZE
        + STREAM_ID_FIELD_SIZE
        + UNCOMPRESSED_LENGTH_FIELD_SIZE
        + PDU_TYPE_FIELD_SIZE
        + COMPRESSION_TYPE_FIELD_SIZE
        + COMPRESSED_LENGTH_FIELD_SIZE;
}

impl Encode for ShareDataHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        if !self.compression_flags.is_empty() {
            // Outbound compression would need the session history here; this
            // client sends its PDUs uncompressed.
            return Err(other_err!("compressed ShareData encoding is not supported"));
        }

        let compression_flags_with_type = self.compression_flags.bits() | self.compression_type.as_u8();

        write_padding!(dst, 1);
        dst.write_u8(self.stream_priority.to_u8().unwrap_or(0));
        dst.write_u16(cast_length!(
            "uncompressedLength",
            self.share_data_pdu.size() + PDU_TYPE_FIELD_SIZE + COMPRESSION_TYPE_FIELD_SIZE + COMPRESSED_LENGTH_FIELD_SIZE
        )?);
        dst.write_u8(self.share_data_pdu.share_header_type().to_u8().unwrap_or(0));
        dst.write_u8(compression_flags_with_type);
        dst.write_u16(0); // compressedLength

        self.share_data_pdu.encode(dst)
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.share_data_pdu.size()
    }
}

impl<'de> Decode<'de> for ShareDataHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        read_padding!(src, 1);
        let stream_priority = StreamPriority::from_u8(src.read_u8())
            .ok_or_else(|| invalid_field_err!("streamId", "invalid stream priority"))?;
        let _uncompressed_length = src.read_u16();
        let pdu_type = ShareDataPduType::from_u8(src.read_u8())
            .ok_or_else(|| invalid_field_err!("pduType2", "invalid share data PDU type"))?;
        let compression_flags_with_type = src.read_u8();

        let compression_flags =
            CompressionFlags::from_bits_truncate(compression_flags_with_type & !SHARE_DATA_HEADER_COMPRESSION_MASK);
        let compression_type =
            CompressionType::from_u8(compression_flags_with_type & SHARE_DATA_HEADER_COMPRESSION_MASK)
                .ok_or_else(|| invalid_field_err!("compressedType", "invalid compression type"))?;
        let _compressed_length = src.read_u16();

        let share_data_pdu = if compression_flags.contains(CompressionFlags::COMPRESSED) {
            // handed back raw; the caller decompresses and re-dispatches
            ShareDataPdu::Compressed {
                pdu_type,
                data: src.read_remaining().to_vec(),
            }
        } else {
            ShareDataPdu::from_type(src, pdu_type)?
        };

        Ok(Self {
            share_data_pdu,
            stream_priority,
            compression_flags,
            compression_type,
        })
    }
}

/// Declares the pduType2 dispatch once, split by payload shape: `typed`
/// variants decode into a PDU struct, `raw` variants are recognized but
/// carried as bytes, `unit` variants have no body. Types with no row land in
/// `Unknown`, preserved raw and skipped by their declared length.
macro_rules! share_data_pdus {
    (
        typed: { $( $typed:ident($payload:ty) => $typed_code:ident, )* }
        raw: { $( $raw:ident => $raw_code:ident, )* }
        unit: { $( $unit:ident => $unit_code:ident, )* }
    ) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum ShareDataPdu {
            $( $typed($payload), )*
            $( $raw(Vec<u8>), )*
            $( $unit, )*
            /// A compressed payload awaiting the session decompressor.
            Compressed { pdu_type: ShareDataPduType, data: Vec<u8> },
            /// A type with no decoder, skipped by its declared length.
            Unknown { pdu_type: ShareDataPduType, data: Vec<u8> },
        }

        impl ShareDataPdu {
            const NAME: &'static str = "ShareDataPdu";

            pub fn share_header_type(&self) -> ShareDataPduType {
                match self {
                    $( Self::$typed(_) => ShareDataPduType::$typed_code, )*
                    $( Self::$raw(_) => ShareDataPduType::$raw_code, )*
                    $( Self::$unit => ShareDataPduType::$unit_code, )*
                    Self::Compressed { pdu_type, .. } | Self::Unknown { pdu_type, .. } => *pdu_type,
                }
            }

            /// Dispatches a pduType2 to its decoder.
            pub fn from_type(src: &mut ReadCursor<'_>, share_type: ShareDataPduType) -> DecodeResult<Self> {
                match share_type {
                    $( ShareDataPduType::$typed_code => Ok(Self::$typed(<$payload>::decode(src)?)), )*
                    $( ShareDataPduType::$raw_code => Ok(Self::$raw(src.read_remaining().to_vec())), )*
                    $( ShareDataPduType::$unit_code => Ok(Self::$unit), )*
                    pdu_type => Ok(Self::Unknown {
                        pdu_type,
                        data: src.read_remaining().to_vec(),
                    }),
                }
            }
        }

        impl Encode for ShareDataPdu {
            fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
                match self {
                    $( Self::$typed(pdu) => pdu.encode(dst), )*
                    $( Self::$raw(data) )|* | Self::Compressed { data, .. } | Self::Unknown { data, .. } => {
                        ensure_size!(in: dst, size: data.len());
                        dst.write_slice(data);
                        Ok(())
                    }
                    $( Self::$unit )|* => Ok(()),
                }
            }

            fn name(&self) -> &'static str {
                Self::NAME
            }

            fn size(&self) -> usize {
                match self {
                    $( Self::$typed(pdu) => pdu.size(), )*
                    $( Self::$raw(data) )|* | Self::Compressed { data, .. } | Self::Unknown { data, .. } => data.len(),
                    $( Self::$unit )|* => 0,
                }
            }
        }
    };
}

share_data_pdus! {
    typed: {
        Synchronize(SynchronizePdu) => Synchronize,
        Control(ControlPdu) => Control,
        FontList(FontPdu) => FontList,
        FontMap(FontPdu) => FontMap,
        FrameAcknowledge(FrameAcknowledgePdu) => FrameAcknowledgePdu,
        ServerSetErrorInfo(ServerSetErrorInfoPdu) => SetErrorInfoPdu,
        SuppressOutput(SuppressOutputPdu) => SuppressOutput,
        RefreshRectangle(RefreshRectanglePdu) => RefreshRectangle,
        BitmapCacheError(BitmapCacheErrorPdu) => BitmapCacheErrorPdu,
    }
    raw: {
        SaveSessionInfo => SaveSessionInfo,
        BitmapCachePersistentList => BitmapCachePersistentList,
        MonitorLayout => MonitorLayoutPdu,
        Input => Input,
    }
    unit: {
        ShutdownRequest => ShutdownRequest,
        ShutdownDenied => ShutdownDenied,
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct BasicSecurityHeaderFlags: u16 {
        const EXCHANGE_PKT = 0x0001;
        const TRANSPORT_REQ = 0x0002;
        const TRANSPORT_RSP = 0x0004;
        const ENCRYPT = 0x0008;
        const RESET_SEQNO = 0x0010;
        const IGNORE_SEQNO = 0x0020;
        const INFO_PKT = 0x0040;
        const LICENSE_PKT = 0x0080;
        const LICENSE_ENCRYPT_CS = 0x0100;
        const LICENSE_ENCRYPT_SC = 0x0200;
        const REDIRECTION_PKT = 0x0400;
        const SECURE_CHECKSUM = 0x0800;
        const AUTODETECT_REQ = 0x1000;
        const AUTODETECT_RSP = 0x2000;
        const HEARTBEAT = 0x4000;
        const FLAGSHI_VALID = 0x8000;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum StreamPriority {
    Undefined = 0,
    Low = 1,
    Medium = 2,
    High = 4,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum ShareControlPduType {
    DemandActivePdu = 0x1,
    ConfirmActivePdu = 0x3,
    DeactivateAllPdu = 0x6,
    DataPdu = 0x7,
    ServerRedirect = 0xa,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum ShareDataPduType {
    Update = 0x02,
    Control = 0x14,
    Pointer = 0x1b,
    Input = 0x1c,
    Synchronize = 0x1f,
    RefreshRectangle = 0x21,
    PlaySound = 0x22,
    SuppressOutput = 0x23,
    ShutdownRequest = 0x24,
    ShutdownDenied = 0x25,
    SaveSessionInfo = 0x26,
    FontList = 0x27,
    FontMap = 0x28,
    SetKeyboardIndicators = 0x29,
    BitmapCachePersistentList = 0x2b,
    BitmapCacheErrorPdu = 0x2c,
    SetKeyboardImeStatus = 0x2d,
    OffscreenCacheErrorPdu = 0x2e,
    SetErrorInfoPdu = 0x2f,
    DrawNineGridErrorPdu = 0x30,
    DrawGdiPlusErrorPdu = 0x31,
    ArcStatusPdu = 0x32,
    StatusInfoPdu = 0x36,
    MonitorLayoutPdu = 0x37,
    FrameAcknowledgePdu = 0x38,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct CompressionFlags: u8 {
        const COMPRESSED = 0x20;
        const AT_FRONT = 0x40;
        const FLUSHED = 0x80;
    }
}

/// 2.2.3.1 Server Deactivate All PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDeactivateAll;

impl ServerDeactivateAll {
    const NAME: &'static str = "ServerDeactivateAll";
}

impl<'de> Decode<'de> for ServerDeactivateAll {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: 2);
        let length_source_descriptor = usize::from(src.read_u16());
        ensure_size!(in: src, size: length_source_descriptor);
        read_padding!(src, length_source_descriptor);
        Ok(Self)
    }
}

impl Encode for ServerDeactivateAll {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(1); // lengthSourceDescriptor
        dst.write_u8(0); // sourceDescriptor

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        2 /* lengthSourceDescriptor */ + 1 /* sourceDescriptor */
    }
}

#[cfg(test)]
mod tests {
    use opalrdp_core::{decode, encode_vec};

    use super::*;

    fn wrap_data(pdu: ShareDataPdu) -> ShareControlHeader {
        ShareControlHeader {
            share_control_pdu: ShareControlPdu::Data(ShareDataHeader {
                share_data_pdu: pdu,
                stream_priority: StreamPriority::Medium,
                compression_flags: CompressionFlags::empty(),
                compression_type: CompressionType::K8,
            }),
            pdu_source: 1008,
            share_id: 0x103EA,
        }
    }

    #[test]
    fn synchronize_round_trip() {
        let header = wrap_data(ShareDataPdu::Synchronize(SynchronizePdu { target_user_id: 1008 }));

        let encoded = encode_vec(&header).unwrap();
        assert_eq!(encoded.len(), header.size());
        // totalLength covers the whole share control unit
        assert_eq!(u16::from_le_bytes([encoded[0], encoded[1]]), encoded.len() as u16);

        let decoded = decode::<ShareControlHeader>(&encoded).unwrap();
        assert_eq!(decoded.share_id, 0x103EA);
        assert_eq!(decoded.pdu_source, 1008);
        assert_eq!(decoded, header);
    }

    #[test]
    fn compressed_payload_is_preserved_raw() {
        let header = wrap_data(ShareDataPdu::Synchronize(SynchronizePdu { target_user_id: 7 }));
        let mut encoded = encode_vec(&header).unwrap();

        // flip the COMPRESSED bit in compressedType
        let compressed_type_offset = 10 /* share control */ + 1 + 1 + 2 + 1;
        encoded[compressed_type_offset] |= CompressionFlags::COMPRESSED.bits();

        let decoded = decode::<ShareControlHeader>(&encoded).unwrap();
        match decoded.share_control_pdu {
            ShareControlPdu::Data(data_header) => match data_header.share_data_pdu {
                ShareDataPdu::Compressed { pdu_type, data } => {
                    assert_eq!(pdu_type, ShareDataPduType::Synchronize);
                    assert_eq!(data.len(), 4);
                }
                other => panic!("expected a compressed payload, got {other:?}"),
            },
            other => panic!("expected a data PDU, got {other:?}"),
        }
    }

    #[test]
    fn unknown_pdu_type_2_is_preserved() {
        let header = wrap_data(ShareDataPdu::Unknown {
            pdu_type: ShareDataPduType::PlaySound,
            data: vec![1, 2, 3, 4],
        });

        let encoded = encode_vec(&header).unwrap();
        let decoded = decode::<ShareControlHeader>(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn deactivate_all_round_trip() {
        let header = ShareControlHeader {
            share_control_pdu: ShareControlPdu::ServerDeactivateAll(ServerDeactivateAll),
            pdu_source: 0x03EA,
            share_id: 0x103EA,
        };

        let encoded = encode_vec(&header).unwrap();
        let decoded = decode::<ShareControlHeader>(&encoded).unwrap();
        assert_eq!(decoded, header);
    }
}
