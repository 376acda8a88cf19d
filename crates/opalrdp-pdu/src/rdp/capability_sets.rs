//! Capability sets exchanged through Demand Active / Confirm Active.
//!
//! Each set is a tagged sub-structure `{ type: u16, length: u16, body }`.
//! Unknown types round-trip as [`CapabilitySet::Unknown`] and are skipped by
//! their declared length, never re-parsed.

use bitflags::bitflags;
use opalrdp_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, read_padding, write_padding, Decode,
    DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive as _, ToPrimitive as _};

/// The MCS channel id the server writes into the PduSource field.
pub const SERVER_CHANNEL_ID: u16 = 0x03ea;

const SOURCE_DESCRIPTOR_LENGTH_FIELD_SIZE: usize = 2;
const COMBINED_CAPABILITIES_LENGTH_FIELD_SIZE: usize = 2;
const NUMBER_CAPABILITIES_FIELD_SIZE: usize = 2;
const PADDING_SIZE: usize = 2;
const SESSION_ID_FIELD_SIZE: usize = 4;
const CAPABILITY_SET_HEADER_SIZE: usize = 4;
const ORIGINATOR_ID_FIELD_SIZE: usize = 2;

const NULL_TERMINATOR: &[u8] = b"\0";

/// 2.2.1.13.1 Server Demand Active PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDemandActive {
    pub pdu: DemandActive,
}

impl ServerDemandActive {
    const NAME: &'static str = "ServerDemandActive";

    const FIXED_PART_SIZE: usize = SESSION_ID_FIELD_SIZE;
}

impl Encode for ServerDemandActive {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        self.pdu.encode(dst)?;
        dst.write_u32(0); // sessionId, ignored by the client

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.pdu.size()
    }
}

impl<'de> Decode<'de> for ServerDemandActive {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let pdu = DemandActive::decode(src)?;

        ensure_size!(in: src, size: SESSION_ID_FIELD_SIZE);
        let _session_id = src.read_u32();

        Ok(Self { pdu })
    }
}

/// 2.2.1.13.2 Client Confirm Active PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfirmActive {
    /// Taken from the PduSource field of the Server Demand Active PDU.
    pub originator_id: u16,
    pub pdu: DemandActive,
}

impl ClientConfirmActive {
    const NAME: &'static str = "ClientConfirmActive";

    const FIXED_PART_SIZE: usize = ORIGINATOR_ID_FIELD_SIZE;
}

impl Encode for ClientConfirmActive {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.originator_id);

        self.pdu.encode(dst)
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.pdu.size()
    }
}

impl<'de> Decode<'de> for ClientConfirmActive {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let originator_id = src.read_u16();
        let pdu = DemandActive::decode(src)?;

        Ok(Self { originator_id, pdu })
    }
}

/// 2.2.1.13.1.1 TS_DEMAND_ACTIVE_PDU (shared by Confirm Active).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemandActive {
    pub source_descriptor: String,
    pub capability_sets: Vec<CapabilitySet>,
}

impl DemandActive {
    const NAME: &'static str = "DemandActive";

    const FIXED_PART_SIZE: usize = SOURCE_DESCRIPTOR_LENGTH_FIELD_SIZE + COMBINED_CAPABILITIES_LENGTH_FIELD_SIZE;
}

impl Encode for DemandActive {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let combined_length = self.capability_sets.iter().map(Encode::size).sum::<usize>()
            + NUMBER_CAPABILITIES_FIELD_SIZE
            + PADDING_SIZE;

        dst.write_u16(cast_length!(
            "sourceDescLen",
            self.source_descriptor.len() + NULL_TERMINATOR.len()
        )?);
        dst.write_u16(cast_length!("combinedLen", combined_length)?);
        dst.write_slice(self.source_descriptor.as_bytes());
        dst.write_slice(NULL_TERMINATOR);
        dst.write_u16(cast_length!("numberCapabilities", self.capability_sets.len())?);
        write_padding!(dst, 2);

        for capability_set in self.capability_sets.iter() {
            capability_set.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
            + self.source_descriptor.len()
            + NULL_TERMINATOR.len()
            + NUMBER_CAPABILITIES_FIELD_SIZE
            + PADDING_SIZE
            + self.capability_sets.iter().map(Encode::size).sum::<usize>()
    }
}

impl<'de> Decode<'de> for DemandActive {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let source_descriptor_length = usize::from(src.read_u16());
        // combined size of numberCapabilities, pad2Octets and capabilitySets
        let _combined_capabilities_length = src.read_u16();

        ensure_size!(in: src, size: source_descriptor_length);
        let descriptor_bytes = src.read_slice(source_descriptor_length);
        let end = descriptor_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(descriptor_bytes.len());
        let source_descriptor = String::from_utf8_lossy(&descriptor_bytes[..end]).into_owned();

        ensure_size!(in: src, size: NUMBER_CAPABILITIES_FIELD_SIZE + PADDING_SIZE);
        let capability_sets_count = usize::from(src.read_u16());
        read_padding!(src, 2);

        let mut capability_sets = Vec::with_capacity(capability_sets_count);
        for _ in 0..capability_sets_count {
            capability_sets.push(CapabilitySet::decode(src)?);
        }

        Ok(Self {
            source_descriptor,
            capability_sets,
        })
    }
}

/// Declares every modeled capability set once: enum variant, payload type
/// and wire code. Unmodeled sets round-trip through `Unknown`, skipped by
/// their declared length and never re-parsed.
macro_rules! capability_sets {
    ( $( $variant:ident($payload:ty) = $code:literal, )* ) => {
        /// A single tagged capability set.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum CapabilitySet {
            $( $variant($payload), )*
            /// Any set this client does not model; preserved verbatim.
            Unknown { code: u16, data: Vec<u8> },
        }

        impl CapabilitySet {
            fn type_code(&self) -> u16 {
                match self {
                    $( Self::$variant(_) => $code, )*
                    Self::Unknown { code, .. } => *code,
                }
            }

            fn body_size(&self) -> usize {
                match self {
                    $( Self::$variant(capset) => capset.size(), )*
                    Self::Unknown { data, .. } => data.len(),
                }
            }

            fn encode_body(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
                match self {
                    $( Self::$variant(capset) => capset.encode(dst), )*
                    Self::Unknown { data, .. } => {
                        dst.write_slice(data);
                        Ok(())
                    }
                }
            }

            fn decode_body(code: u16, body: &mut ReadCursor<'_>) -> DecodeResult<Self> {
                match code {
                    $( $code => Ok(Self::$variant(<$payload>::decode(body)?)), )*
                    _ => Ok(Self::Unknown {
                        code,
                        data: body.read_remaining().to_vec(),
                    }),
                }
            }
        }
    };
}

capability_sets! {
    General(General) = 0x01,
    Bitmap(Bitmap) = 0x02,
    Order(Order) = 0x03,
    BitmapCache(BitmapCache) = 0x04,
    Pointer(Pointer) = 0x08,
    Input(Input) = 0x0D,
    OffscreenBitmapCache(OffscreenBitmapCache) = 0x11,
    VirtualChannel(VirtualChannel) = 0x14,
    MultiFragmentUpdate(MultifragmentUpdate) = 0x1A,
    LargePointer(LargePointer) = 0x1B,
    SurfaceCommands(SurfaceCommands) = 0x1C,
    FrameAcknowledge(FrameAcknowledge) = 0x1E,
}

impl CapabilitySet {
    const NAME: &'static str = "CapabilitySet";

    const FIXED_PART_SIZE: usize = CAPABILITY_SET_HEADER_SIZE;
}

impl Encode for CapabilitySet {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(self.type_code());
        dst.write_u16(cast_length!("lengthCapability", self.size())?);
        self.encode_body(dst)
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.body_size()
    }
}

impl<'de> Decode<'de> for CapabilitySet {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let type_code = src.read_u16();
        let length = usize::from(src.read_u16());

        if length < CAPABILITY_SET_HEADER_SIZE {
            return Err(invalid_field_err!(
                "lengthCapability",
                "capability set length smaller than its header"
            ));
        }

        let body_length = length - CAPABILITY_SET_HEADER_SIZE;
        ensure_size!(in: src, size: body_length);
        let mut body = ReadCursor::new(src.read_slice(body_length));

        Self::decode_body(type_code, &mut body)
    }
}

/// TS_GENERAL_CAPABILITYSET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct General {
    pub major_platform_type: MajorPlatformType,
    pub minor_platform_type: u16,
    pub extra_flags: GeneralExtraFlags,
    pub refresh_rect_support: bool,
    pub suppress_output_support: bool,
}

pub const PROTOCOL_VER: u16 = 0x0200;

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum MajorPlatformType {
    Unspecified = 0,
    Windows = 1,
    Os2 = 2,
    Macintosh = 3,
    Unix = 4,
    Ios = 5,
    OsX = 6,
    Android = 7,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct GeneralExtraFlags: u16 {
        const FASTPATH_OUTPUT_SUPPORTED = 0x0001;
        const NO_BITMAP_COMPRESSION_HDR = 0x0400;
        const LONG_CREDENTIALS_SUPPORTED = 0x0004;
        const AUTORECONNECT_SUPPORTED = 0x0008;
        const ENC_SALTED_CHECKSUM = 0x0010;
    }
}

impl General {
    const NAME: &'static str = "General";

    const FIXED_PART_SIZE: usize = 2 * 9 + 1 + 1;
}

impl Encode for General {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.major_platform_type.to_u16().unwrap_or(0));
        dst.write_u16(self.minor_platform_type);
        dst.write_u16(PROTOCOL_VER);
        write_padding!(dst, 2);
        dst.write_u16(0); // compressionTypes, must be 0
        dst.write_u16(self.extra_flags.bits());
        dst.write_u16(0); // updateCapabilityFlag
        dst.write_u16(0); // remoteUnshareFlag
        dst.write_u16(0); // compressionLevel
        dst.write_u8(u8::from(self.refresh_rect_support));
        dst.write_u8(u8::from(self.suppress_output_support));

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for General {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let major_platform_type =
            MajorPlatformType::from_u16(src.read_u16()).unwrap_or(MajorPlatformType::Unspecified);
        let minor_platform_type = src.read_u16();

        let protocol_version = src.read_u16();
        if protocol_version != PROTOCOL_VER {
            return Err(invalid_field_err!("protocolVersion", "invalid protocol version"));
        }

        read_padding!(src, 2);
        let _compression_types = src.read_u16();
        let extra_flags = GeneralExtraFlags::from_bits_truncate(src.read_u16());
        let _update_capability_flag = src.read_u16();
        let _remote_unshare_flag = src.read_u16();
        let _compression_level = src.read_u16();
        let refresh_rect_support = src.read_u8() != 0;
        let suppress_output_support = src.read_u8() != 0;

        Ok(Self {
            major_platform_type,
            minor_platform_type,
            extra_flags,
            refresh_rect_support,
            suppress_output_support,
        })
    }
}

/// TS_BITMAP_CAPABILITYSET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitmap {
    pub preferred_bits_per_pixel: u16,
    pub desktop_width: u16,
    pub desktop_height: u16,
    pub desktop_resize_flag: bool,
    pub drawing_flags: BitmapDrawingFlags,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct BitmapDrawingFlags: u8 {
        const ALLOW_DYNAMIC_COLOR_FIDELITY = 0x02;
        const ALLOW_COLOR_SUBSAMPLING = 0x04;
        const ALLOW_SKIP_ALPHA = 0x08;
    }
}

impl Bitmap {
    const NAME: &'static str = "Bitmap";

    const FIXED_PART_SIZE: usize = 2 * 9 + 1 + 1 + 2 * 2;
}

impl Encode for Bitmap {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.preferred_bits_per_pixel);
        dst.write_u16(1); // receive1BitPerPixel
        dst.write_u16(1); // receive4BitsPerPixel
        dst.write_u16(1); // receive8BitsPerPixel
        dst.write_u16(self.desktop_width);
        dst.write_u16(self.desktop_height);
        write_padding!(dst, 2);
        dst.write_u16(u16::from(self.desktop_resize_flag));
        dst.write_u16(1); // bitmapCompressionFlag, must be 1
        dst.write_u8(0); // highColorFlags, must be 0
        dst.write_u8(self.drawing_flags.bits());
        dst.write_u16(1); // multipleRectangleSupport, must be 1
        write_padding!(dst, 2);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for Bitmap {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let preferred_bits_per_pixel = src.read_u16();
        let _receive_1_bit = src.read_u16();
        let _receive_4_bits = src.read_u16();
        let _receive_8_bits = src.read_u16();
        let desktop_width = src.read_u16();
        let desktop_height = src.read_u16();
        read_padding!(src, 2);
        let desktop_resize_flag = src.read_u16() != 0;
        let _bitmap_compression_flag = src.read_u16();
        let _high_color_flags = src.read_u8();
        let drawing_flags = BitmapDrawingFlags::from_bits_truncate(src.read_u8());
        let _multiple_rectangle_support = src.read_u16();
        read_padding!(src, 2);

        Ok(Self {
            preferred_bits_per_pixel,
            desktop_width,
            desktop_height,
            desktop_resize_flag,
            drawing_flags,
        })
    }
}

/// TS_ORDER_CAPABILITYSET.
///
/// This client draws nothing itself, so the order support array is all
/// zeroes, but the structure still round-trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub order_flags: OrderFlags,
    pub order_support: [u8; Order::ORDER_SUPPORT_ARRAY_SIZE],
    pub desktop_save_size: u32,
    pub text_ansi_code_page: u16,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct OrderFlags: u16 {
        const NEGOTIATE_ORDER_SUPPORT = 0x0002;
        const ZERO_BOUNDS_DELTAS_SUPPORT = 0x0008;
        const COLOR_INDEX_SUPPORT = 0x0020;
        const SOLID_PATTERN_BRUSH_ONLY = 0x0040;
        const ORDER_FLAGS_EXTRA_FLAGS = 0x0080;
    }
}

impl Order {
    const NAME: &'static str = "Order";

    pub const ORDER_SUPPORT_ARRAY_SIZE: usize = 32;

    const TERMINAL_DESCRIPTOR_SIZE: usize = 16;

    const FIXED_PART_SIZE: usize = Self::TERMINAL_DESCRIPTOR_SIZE
        + 4 /* pad4OctetsA */ + 2 /* xGranularity */ + 2 /* yGranularity */ + 2 /* pad */
        + 2 /* maxOrderLevel */ + 2 /* numberFonts */ + 2 /* orderFlags */
        + Self::ORDER_SUPPORT_ARRAY_SIZE
        + 2 /* textFlags */ + 2 /* orderSupportExFlags */ + 4 /* pad4OctetsB */
        + 4 /* desktopSaveSize */ + 2 + 2 /* pads */ + 2 /* textANSICodePage */ + 2 /* pad */;
}

impl Encode for Order {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        write_padding!(dst, Self::TERMINAL_DESCRIPTOR_SIZE);
        write_padding!(dst, 4);
        dst.write_u16(1); // desktopSaveXGranularity
        dst.write_u16(20); // desktopSaveYGranularity
        write_padding!(dst, 2);
        dst.write_u16(1); // maximumOrderLevel = ORD_LEVEL_1_ORDERS
        dst.write_u16(0); // numberFonts
        dst.write_u16(self.order_flags.bits());
        dst.write_slice(&self.order_support);
        dst.write_u16(0); // textFlags
        dst.write_u16(0); // orderSupportExFlags
        write_padding!(dst, 4);
        dst.write_u32(self.desktop_save_size);
        write_padding!(dst, 4);
        dst.write_u16(self.text_ansi_code_page);
        write_padding!(dst, 2);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for Order {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        read_padding!(src, Self::TERMINAL_DESCRIPTOR_SIZE);
        read_padding!(src, 4);
        let _x_granularity = src.read_u16();
        let _y_granularity = src.read_u16();
        read_padding!(src, 2);
        let _maximum_order_level = src.read_u16();
        let _number_fonts = src.read_u16();
        let order_flags = OrderFlags::from_bits_truncate(src.read_u16());
        let order_support: [u8; Self::ORDER_SUPPORT_ARRAY_SIZE] = src.read_array();
        let _text_flags = src.read_u16();
        let _order_support_ex_flags = src.read_u16();
        read_padding!(src, 4);
        let desktop_save_size = src.read_u32();
        read_padding!(src, 4);
        let text_ansi_code_page = src.read_u16();
        read_padding!(src, 2);

        Ok(Self {
            order_flags,
            order_support,
            desktop_save_size,
            text_ansi_code_page,
        })
    }
}

/// One cell cache of TS_BITMAPCACHE_CAPABILITYSET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheEntry {
    pub entries: u16,
    pub maximum_cell_size: u16,
}

/// TS_BITMAPCACHE_CAPABILITYSET (revision 1): the three size-tiered caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapCache {
    pub caches: [CacheEntry; BitmapCache::CACHE_COUNT],
}

impl BitmapCache {
    const NAME: &'static str = "BitmapCache";

    pub const CACHE_COUNT: usize = 3;

    const FIXED_PART_SIZE: usize = 4 * 6 + Self::CACHE_COUNT * 4;
}

impl Encode for BitmapCache {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        write_padding!(dst, 4 * 6);

        for cache in &self.caches {
            dst.write_u16(cache.entries);
            dst.write_u16(cache.maximum_cell_size);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for BitmapCache {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        read_padding!(src, 4 * 6);

        let mut caches = [CacheEntry::default(); Self::CACHE_COUNT];
        for cache in caches.iter_mut() {
            cache.entries = src.read_u16();
            cache.maximum_cell_size = src.read_u16();
        }

        Ok(Self { caches })
    }
}

/// TS_POINTER_CAPABILITYSET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    pub color_pointer_cache_size: u16,
    pub pointer_cache_size: u16,
}

impl Pointer {
    const NAME: &'static str = "Pointer";

    const FIXED_PART_SIZE: usize = 2 * 3;
}

impl Encode for Pointer {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(1); // colorPointerFlag, always supported
        dst.write_u16(self.color_pointer_cache_size);
        dst.write_u16(self.pointer_cache_size);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for Pointer {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: 4);

        let _color_pointer_flag = src.read_u16();
        let color_pointer_cache_size = src.read_u16();
        let pointer_cache_size = if src.len() >= 2 { src.read_u16() } else { 0 };

        Ok(Self {
            color_pointer_cache_size,
            pointer_cache_size,
        })
    }
}

/// TS_INPUT_CAPABILITYSET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Input {
    pub input_flags: InputFlags,
    pub keyboard_layout: u32,
    pub keyboard_type: u32,
    pub keyboard_subtype: u32,
    pub keyboard_function_key: u32,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct InputFlags: u16 {
        const SCANCODES = 0x0001;
        const MOUSEX = 0x0004;
        const FASTPATH_INPUT = 0x0008;
        const UNICODE = 0x0010;
        const FASTPATH_INPUT_2 = 0x0020;
        const UNUSED_1 = 0x0040;
        const MOUSE_RELATIVE = 0x0080;
        const TS_MOUSE_HWHEEL = 0x0100;
        const TS_QOE_TIMESTAMPS = 0x0200;
    }
}

impl Input {
    const NAME: &'static str = "Input";

    const IME_FILE_NAME_SIZE: usize = 64;

    const FIXED_PART_SIZE: usize = 2 + 2 + 4 * 4 + Self::IME_FILE_NAME_SIZE;
}

impl Encode for Input {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.input_flags.bits());
        write_padding!(dst, 2);
        dst.write_u32(self.keyboard_layout);
        dst.write_u32(self.keyboard_type);
        dst.write_u32(self.keyboard_subtype);
        dst.write_u32(self.keyboard_function_key);
        write_padding!(dst, Self::IME_FILE_NAME_SIZE);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for Input {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let input_flags = InputFlags::from_bits_truncate(src.read_u16());
        read_padding!(src, 2);
        let keyboard_layout = src.read_u32();
        let keyboard_type = src.read_u32();
        let keyboard_subtype = src.read_u32();
        let keyboard_function_key = src.read_u32();
        read_padding!(src, Self::IME_FILE_NAME_SIZE);

        Ok(Self {
            input_flags,
            keyboard_layout,
            keyboard_type,
            keyboard_subtype,
            keyboard_function_key,
        })
    }
}

/// TS_OFFSCREEN_CAPABILITYSET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffscreenBitmapCache {
    pub is_supported: bool,
    /// In kibibytes.
    pub cache_size: u16,
    pub cache_entries: u16,
}

impl OffscreenBitmapCache {
    const NAME: &'static str = "OffscreenBitmapCache";

    const FIXED_PART_SIZE: usize = 4 + 2 + 2;
}

impl Encode for OffscreenBitmapCache {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(u32::from(self.is_supported));
        dst.write_u16(self.cache_size);
        dst.write_u16(self.cache_entries);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for OffscreenBitmapCache {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let is_supported = src.read_u32() != 0;
        let cache_size = src.read_u16();
        let cache_entries = src.read_u16();

        Ok(Self {
            is_supported,
            cache_size,
            cache_entries,
        })
    }
}

/// TS_VIRTUALCHANNEL_CAPABILITYSET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualChannel {
    pub flags: VirtualChannelFlags,
    pub chunk_size: Option<u32>,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct VirtualChannelFlags: u32 {
        const COMPRESSION_CLIENT_TO_SERVER = 0x01;
        const COMPRESSION_SERVER_TO_CLIENT = 0x02;
    }
}

impl VirtualChannel {
    const NAME: &'static str = "VirtualChannel";

    const FIXED_PART_SIZE: usize = 4;
}

impl Encode for VirtualChannel {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.flags.bits());

        if let Some(chunk_size) = self.chunk_size {
            dst.write_u32(chunk_size);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.chunk_size.map_or(0, |_| 4)
    }
}

impl<'de> Decode<'de> for VirtualChannel {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let flags = VirtualChannelFlags::from_bits_truncate(src.read_u32());
        let chunk_size = if src.len() >= 4 { Some(src.read_u32()) } else { None };

        Ok(Self { flags, chunk_size })
    }
}

/// TS_MULTIFRAGMENTUPDATE_CAPABILITYSET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultifragmentUpdate {
    pub max_request_size: u32,
}

impl MultifragmentUpdate {
    const NAME: &'static str = "MultifragmentUpdate";

    const FIXED_PART_SIZE: usize = 4;
}

impl Encode for MultifragmentUpdate {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.max_request_size);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for MultifragmentUpdate {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let max_request_size = src.read_u32();

        Ok(Self { max_request_size })
    }
}

/// TS_LARGE_POINTER_CAPABILITYSET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LargePointer {
    pub flags: LargePointerSupportFlags,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct LargePointerSupportFlags: u16 {
        const UP_TO_96X96_PIXELS = 0x0001;
        const UP_TO_384X384_PIXELS = 0x0002;
    }
}

impl LargePointer {
    const NAME: &'static str = "LargePointer";

    const FIXED_PART_SIZE: usize = 2;
}

impl Encode for LargePointer {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.flags.bits());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for LargePointer {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let flags = LargePointerSupportFlags::from_bits_truncate(src.read_u16());

        Ok(Self { flags })
    }
}

/// TS_SURFCMDS_CAPABILITYSET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceCommands {
    pub flags: CmdFlags,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct CmdFlags: u32 {
        const SET_SURFACE_BITS = 0x02;
        const FRAME_MARKER = 0x10;
        const STREAM_SURFACE_BITS = 0x40;
    }
}

impl SurfaceCommands {
    const NAME: &'static str = "SurfaceCommands";

    const FIXED_PART_SIZE: usize = 4 + 4;
}

impl Encode for SurfaceCommands {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.flags.bits());
        write_padding!(dst, 4);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for SurfaceCommands {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let flags = CmdFlags::from_bits_truncate(src.read_u32());
        read_padding!(src, 4);

        Ok(Self { flags })
    }
}

/// TS_FRAME_ACKNOWLEDGE_CAPABILITYSET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAcknowledge {
    pub max_unacknowledged_frame_count: u32,
}

impl FrameAcknowledge {
    const NAME: &'static str = "FrameAcknowledge";

    const FIXED_PART_SIZE: usize = 4;
}

impl Encode for FrameAcknowledge {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.max_unacknowledged_frame_count);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for FrameAcknowledge {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let max_unacknowledged_frame_count = src.read_u32();

        Ok(Self {
            max_unacknowledged_frame_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use opalrdp_core::{decode, encode_vec};

    use super::*;

    fn sample_sets() -> Vec<CapabilitySet> {
        vec![
            CapabilitySet::General(General {
                major_platform_type: MajorPlatformType::Unix,
                minor_platform_type: 0,
                extra_flags: GeneralExtraFlags::FASTPATH_OUTPUT_SUPPORTED,
                refresh_rect_support: true,
                suppress_output_support: true,
            }),
            CapabilitySet::BitmapCache(BitmapCache {
                caches: [
                    CacheEntry {
                        entries: 600,
                        maximum_cell_size: 1024,
                    },
                    CacheEntry {
                        entries: 300,
                        maximum_cell_size: 16384,
                    },
                    CacheEntry {
                        entries: 100,
                        maximum_cell_size: u16::MAX,
                    },
                ],
            }),
            CapabilitySet::Input(Input {
                input_flags: InputFlags::SCANCODES | InputFlags::FASTPATH_INPUT | InputFlags::UNICODE,
                keyboard_layout: 0x409,
                keyboard_type: 4,
                keyboard_subtype: 0,
                keyboard_function_key: 12,
            }),
        ]
    }

    #[test]
    fn demand_and_confirm_active_round_trip() {
        let demand = ServerDemandActive {
            pdu: DemandActive {
                source_descriptor: "RDP".to_owned(),
                capability_sets: sample_sets(),
            },
        };
        let encoded = encode_vec(&demand).unwrap();
        assert_eq!(encoded.len(), demand.size());
        assert_eq!(decode::<ServerDemandActive>(&encoded).unwrap(), demand);

        let confirm = ClientConfirmActive {
            originator_id: SERVER_CHANNEL_ID,
            pdu: demand.pdu,
        };
        let encoded = encode_vec(&confirm).unwrap();
        assert_eq!(decode::<ClientConfirmActive>(&encoded).unwrap(), confirm);
    }

    #[test]
    fn unknown_set_is_skipped_by_length() {
        let unknown = CapabilitySet::Unknown {
            code: 0x7F,
            data: vec![0xAB; 10],
        };

        let mut encoded = encode_vec(&unknown).unwrap();
        // follow with a known set to prove the decoder stays aligned
        encoded.extend(encode_vec(&CapabilitySet::MultiFragmentUpdate(MultifragmentUpdate {
            max_request_size: 65535,
        })).unwrap());

        let mut cursor = opalrdp_core::ReadCursor::new(&encoded);
        let first = opalrdp_core::decode_cursor::<CapabilitySet>(&mut cursor).unwrap();
        let second = opalrdp_core::decode_cursor::<CapabilitySet>(&mut cursor).unwrap();

        assert_eq!(first, unknown);
        assert!(matches!(second, CapabilitySet::MultiFragmentUpdate(_)));
    }
}
