//! Surface commands carried by the SURFCMDS FastPath update.
//!
//! Every command is framed by `{ commandType: u16, commandSize: u16 }` where
//! `commandSize` counts the body only; unknown command types are preserved
//! raw and skipped by their declared size.

use opalrdp_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, Decode, DecodeResult, Encode, EncodeResult,
    ReadCursor, WriteCursor,
};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive as _, ToPrimitive as _};

use crate::geometry::ExclusiveRectangle;

pub const SURFACE_COMMAND_HEADER_SIZE: usize = 2 /* cmdType */ + 2 /* cmdSize */;

/// Declares the modeled commands once: enum variant, body type and wire
/// code. `SurfaceBitsPdu` appears twice because set/stream share a body.
macro_rules! surface_commands {
    ( $lt:lifetime, $( $variant:ident($body:ty) = $code:literal, )* ) => {
        /// TS_SURFCMD.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum SurfaceCommand<$lt> {
            $( $variant($body), )*
            /// A command with no decoder, preserved raw and skipped by size.
            Unknown { code: u16, data: &$lt [u8] },
        }

        impl SurfaceCommand<'_> {
            const NAME: &'static str = "SurfaceCommand";

            const FIXED_PART_SIZE: usize = SURFACE_COMMAND_HEADER_SIZE;

            fn type_code(&self) -> u16 {
                match self {
                    $( Self::$variant(_) => $code, )*
                    Self::Unknown { code, .. } => *code,
                }
            }

            fn body_size(&self) -> usize {
                match self {
                    $( Self::$variant(pdu) => pdu.size(), )*
                    Self::Unknown { data, .. } => data.len(),
                }
            }

            fn encode_body(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
                match self {
                    $( Self::$variant(pdu) => pdu.encode(dst), )*
                    Self::Unknown { data, .. } => {
                        dst.write_slice(data);
                        Ok(())
                    }
                }
            }
        }

        impl<$lt> SurfaceCommand<$lt> {
            fn decode_body(code: u16, body: &mut ReadCursor<$lt>) -> DecodeResult<Self> {
                match code {
                    $( $code => Ok(Self::$variant(<$body>::decode(body)?)), )*
                    _ => Ok(Self::Unknown {
                        code,
                        data: body.read_remaining(),
                    }),
                }
            }
        }
    };
}

surface_commands! { 'a,
    SetSurfaceBits(SurfaceBitsPdu<'a>) = 0x01,
    FrameMarker(FrameMarkerPdu) = 0x04,
    StreamSurfaceBits(SurfaceBitsPdu<'a>) = 0x06,
    SolidFill(SolidFillPdu) = 0x09,
    SurfaceToSurface(SurfaceToSurfacePdu) = 0x0A,
    SurfaceToCache(SurfaceToCachePdu) = 0x0B,
    CacheToSurface(CacheToSurfacePdu) = 0x0C,
    CreateSurface(CreateSurfacePdu) = 0x0E,
    DeleteSurface(DeleteSurfacePdu) = 0x0F,
}

impl Encode for SurfaceCommand<'_> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(self.type_code());
        dst.write_u16(cast_length!("cmdSize", self.body_size())?);
        self.encode_body(dst)
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.body_size()
    }
}

impl<'de> Decode<'de> for SurfaceCommand<'de> {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let cmd_type = src.read_u16();
        let cmd_size = usize::from(src.read_u16());

        ensure_size!(in: src, size: cmd_size);
        let mut body = ReadCursor::new(src.read_slice(cmd_size));

        Self::decode_body(cmd_type, &mut body)
    }
}

/// TS_SURFCMD_SET_SURF_BITS / TS_SURFCMD_STREAM_SURF_BITS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceBitsPdu<'a> {
    pub destination: ExclusiveRectangle,
    pub extended_bitmap_data: ExtendedBitmapDataPdu<'a>,
}

impl SurfaceBitsPdu<'_> {
    const NAME: &'static str = "SurfaceBitsPdu";
}

impl Encode for SurfaceBitsPdu<'_> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        self.destination.encode(dst)?;
        self.extended_bitmap_data.encode(dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.destination.size() + self.extended_bitmap_data.size()
    }
}

impl<'de> Decode<'de> for SurfaceBitsPdu<'de> {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let destination = ExclusiveRectangle::decode(src)?;
        let extended_bitmap_data = ExtendedBitmapDataPdu::decode(src)?;

        Ok(Self {
            destination,
            extended_bitmap_data,
        })
    }
}

/// TS_BITMAP_DATA_EX.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedBitmapDataPdu<'a> {
    pub bpp: u8,
    pub codec_id: u8,
    pub width: u16,
    pub height: u16,
    pub data: &'a [u8],
}

impl ExtendedBitmapDataPdu<'_> {
    const NAME: &'static str = "ExtendedBitmapDataPdu";

    const FIXED_PART_SIZE: usize = 1 /* bpp */ + 1 /* flags */ + 1 /* reserved */ + 1 /* codecId */
        + 2 /* width */ + 2 /* height */ + 4 /* bitmapDataLength */;
}

impl Encode for ExtendedBitmapDataPdu<'_> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u8(self.bpp);
        dst.write_u8(0); // flags, no compressed bitmap header
        dst.write_u8(0); // reserved
        dst.write_u8(self.codec_id);
        dst.write_u16(self.width);
        dst.write_u16(self.height);
        dst.write_u32(cast_length!("bitmapDataLength", self.data.len())?);
        dst.write_slice(self.data);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.data.len()
    }
}

impl<'de> Decode<'de> for ExtendedBitmapDataPdu<'de> {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let bpp = src.read_u8();
        let _flags = src.read_u8();
        let _reserved = src.read_u8();
        let codec_id = src.read_u8();
        let width = src.read_u16();
        let height = src.read_u16();
        let data_length = src.read_u32() as usize;

        ensure_size!(in: src, size: data_length);
        let data = src.read_slice(data_length);

        Ok(Self {
            bpp,
            codec_id,
            width,
            height,
            data,
        })
    }
}

/// TS_FRAME_MARKER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMarkerPdu {
    pub frame_action: FrameAction,
    pub frame_id: Option<u32>,
}

impl FrameMarkerPdu {
    const NAME: &'static str = "FrameMarkerPdu";

    const FIXED_PART_SIZE: usize = 2 /* frameAction */;
}

impl Encode for FrameMarkerPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(self.frame_action.to_u16().unwrap_or(0));
        dst.write_u32(self.frame_id.unwrap_or(0));

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + 4 /* frameId */
    }
}

impl<'de> Decode<'de> for FrameMarkerPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let frame_action = src.read_u16();
        let frame_action =
            FrameAction::from_u16(frame_action).ok_or_else(|| invalid_field_err!("frameAction", "invalid frame action"))?;

        // Some Windows servers omit the frame id entirely.
        let frame_id = if src.is_empty() {
            None
        } else {
            ensure_size!(in: src, size: 4);
            Some(src.read_u32())
        };

        Ok(Self { frame_action, frame_id })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum FrameAction {
    Begin = 0x00,
    End = 0x01,
}

/// Creates an off-screen surface addressable by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateSurfacePdu {
    pub surface_id: u16,
    pub width: u16,
    pub height: u16,
    pub bpp: u8,
}

impl CreateSurfacePdu {
    const NAME: &'static str = "CreateSurfacePdu";

    const FIXED_PART_SIZE: usize = 2 /* surfaceId */ + 2 /* width */ + 2 /* height */ + 1 /* bpp */;
}

impl Encode for CreateSurfacePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.surface_id);
        dst.write_u16(self.width);
        dst.write_u16(self.height);
        dst.write_u8(self.bpp);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for CreateSurfacePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let surface_id = src.read_u16();
        let width = src.read_u16();
        let height = src.read_u16();
        let bpp = src.read_u8();

        Ok(Self {
            surface_id,
            width,
            height,
            bpp,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteSurfacePdu {
    pub surface_id: u16,
}

impl DeleteSurfacePdu {
    const NAME: &'static str = "DeleteSurfacePdu";

    const FIXED_PART_SIZE: usize = 2;
}

impl Encode for DeleteSurfacePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.surface_id);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for DeleteSurfacePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let surface_id = src.read_u16();

        Ok(Self { surface_id })
    }
}

/// Fills rectangles of a surface with a single 32-bit pixel value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolidFillPdu {
    pub surface_id: u16,
    pub fill_pixel: u32,
    pub rectangles: Vec<ExclusiveRectangle>,
}

impl SolidFillPdu {
    const NAME: &'static str = "SolidFillPdu";

    const FIXED_PART_SIZE: usize = 2 /* surfaceId */ + 4 /* fillPixel */ + 2 /* rectCount */;
}

impl Encode for SolidFillPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(self.surface_id);
        dst.write_u32(self.fill_pixel);
        dst.write_u16(cast_length!("rectCount", self.rectangles.len())?);

        for rectangle in &self.rectangles {
            rectangle.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.rectangles.len() * ExclusiveRectangle::ENCODED_SIZE
    }
}

impl<'de> Decode<'de> for SolidFillPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let surface_id = src.read_u16();
        let fill_pixel = src.read_u32();
        let rect_count = usize::from(src.read_u16());

        let mut rectangles = Vec::with_capacity(rect_count);
        for _ in 0..rect_count {
            rectangles.push(ExclusiveRectangle::decode(src)?);
        }

        Ok(Self {
            surface_id,
            fill_pixel,
            rectangles,
        })
    }
}

/// A point target for blit destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationPoint {
    pub x: u16,
    pub y: u16,
}

impl DestinationPoint {
    const ENCODED_SIZE: usize = 4;
}

/// Server-to-server blit between two surfaces (or within one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceToSurfacePdu {
    pub source_surface_id: u16,
    pub destination_surface_id: u16,
    pub source_rectangle: ExclusiveRectangle,
    pub destination_points: Vec<DestinationPoint>,
}

impl SurfaceToSurfacePdu {
    const NAME: &'static str = "SurfaceToSurfacePdu";

    const FIXED_PART_SIZE: usize = 2 + 2 + ExclusiveRectangle::ENCODED_SIZE + 2 /* destPtsCount */;
}

impl Encode for SurfaceToSurfacePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(self.source_surface_id);
        dst.write_u16(self.destination_surface_id);
        self.source_rectangle.encode(dst)?;
        dst.write_u16(cast_length!("destPtsCount", self.destination_points.len())?);

        for point in &self.destination_points {
            dst.write_u16(point.x);
            dst.write_u16(point.y);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.destination_points.len() * DestinationPoint::ENCODED_SIZE
    }
}

impl<'de> Decode<'de> for SurfaceToSurfacePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let source_surface_id = src.read_u16();
        let destination_surface_id = src.read_u16();
        let source_rectangle = ExclusiveRectangle::decode(src)?;
        let dest_pts_count = usize::from(src.read_u16());

        ensure_size!(in: src, size: dest_pts_count * DestinationPoint::ENCODED_SIZE);

        let mut destination_points = Vec::with_capacity(dest_pts_count);
        for _ in 0..dest_pts_count {
            destination_points.push(DestinationPoint {
                x: src.read_u16(),
                y: src.read_u16(),
            });
        }

        Ok(Self {
            source_surface_id,
            destination_surface_id,
            source_rectangle,
            destination_points,
        })
    }
}

/// Copies a surface region into the off-screen cache under a slot + key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceToCachePdu {
    pub surface_id: u16,
    pub cache_key: u64,
    pub cache_slot: u16,
    pub source_rectangle: ExclusiveRectangle,
}

impl SurfaceToCachePdu {
    const NAME: &'static str = "SurfaceToCachePdu";

    const FIXED_PART_SIZE: usize = 2 + 8 + 2 + ExclusiveRectangle::ENCODED_SIZE;
}

impl Encode for SurfaceToCachePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.surface_id);
        dst.write_u64(self.cache_key);
        dst.write_u16(self.cache_slot);
        self.source_rectangle.encode(dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for SurfaceToCachePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let surface_id = src.read_u16();
        let cache_key = src.read_u64();
        let cache_slot = src.read_u16();
        let source_rectangle = ExclusiveRectangle::decode(src)?;

        Ok(Self {
            surface_id,
            cache_key,
            cache_slot,
            source_rectangle,
        })
    }
}

/// Blits a cached region back onto a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheToSurfacePdu {
    pub cache_slot: u16,
    pub surface_id: u16,
    pub destination_points: Vec<DestinationPoint>,
}

impl CacheToSurfacePdu {
    const NAME: &'static str = "CacheToSurfacePdu";

    const FIXED_PART_SIZE: usize = 2 /* cacheSlot */ + 2 /* surfaceId */ + 2 /* destPtsCount */;
}

impl Encode for CacheToSurfacePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(self.cache_slot);
        dst.write_u16(self.surface_id);
        dst.write_u16(cast_length!("destPtsCount", self.destination_points.len())?);

        for point in &self.destination_points {
            dst.write_u16(point.x);
            dst.write_u16(point.y);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.destination_points.len() * DestinationPoint::ENCODED_SIZE
    }
}

impl<'de> Decode<'de> for CacheToSurfacePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let cache_slot = src.read_u16();
        let surface_id = src.read_u16();
        let dest_pts_count = usize::from(src.read_u16());

        ensure_size!(in: src, size: dest_pts_count * DestinationPoint::ENCODED_SIZE);

        let mut destination_points = Vec::with_capacity(dest_pts_count);
        for _ in 0..dest_pts_count {
            destination_points.push(DestinationPoint {
                x: src.read_u16(),
                y: src.read_u16(),
            });
        }

        Ok(Self {
            cache_slot,
            surface_id,
            destination_points,
        })
    }
}

#[cfg(test)]
mod tests {
    use opalrdp_core::{decode, decode_cursor, encode_vec, ReadCursor};

    use super::*;

    #[test]
    fn create_delete_round_trip() {
        let create = SurfaceCommand::CreateSurface(CreateSurfacePdu {
            surface_id: 3,
            width: 64,
            height: 64,
            bpp: 32,
        });
        let delete = SurfaceCommand::DeleteSurface(DeleteSurfacePdu { surface_id: 3 });

        for command in [create, delete] {
            let encoded = encode_vec(&command).unwrap();
            assert_eq!(encoded.len(), command.size());
            assert_eq!(decode::<SurfaceCommand<'_>>(&encoded).unwrap(), command);
        }
    }

    #[test]
    fn solid_fill_round_trip() {
        let command = SurfaceCommand::SolidFill(SolidFillPdu {
            surface_id: 1,
            fill_pixel: 0x00FF_00FF,
            rectangles: vec![ExclusiveRectangle {
                left: 0,
                top: 0,
                right: 10,
                bottom: 10,
            }],
        });

        let encoded = encode_vec(&command).unwrap();
        assert_eq!(decode::<SurfaceCommand<'_>>(&encoded).unwrap(), command);
    }

    #[test]
    fn blit_commands_round_trip() {
        let commands = [
            SurfaceCommand::SurfaceToCache(SurfaceToCachePdu {
                surface_id: 0,
                cache_key: 0xFEED_FACE_CAFE_BEEF,
                cache_slot: 7,
                source_rectangle: ExclusiveRectangle {
                    left: 0,
                    top: 0,
                    right: 4,
                    bottom: 4,
                },
            }),
            SurfaceCommand::CacheToSurface(CacheToSurfacePdu {
                cache_slot: 7,
                surface_id: 0,
                destination_points: vec![DestinationPoint { x: 2, y: 2 }, DestinationPoint { x: 6, y: 6 }],
            }),
        ];

        let mut encoded = Vec::new();
        for command in &commands {
            encoded.extend(encode_vec(command).unwrap());
        }

        let mut cursor = ReadCursor::new(&encoded);
        for command in &commands {
            assert_eq!(&decode_cursor::<SurfaceCommand<'_>>(&mut cursor).unwrap(), command);
        }
        assert!(cursor.is_empty());
    }

    #[test]
    fn unknown_command_is_skipped_by_size() {
        let unknown = SurfaceCommand::Unknown {
            code: 0x99,
            data: &[1, 2, 3, 4, 5],
        };
        let marker = SurfaceCommand::FrameMarker(FrameMarkerPdu {
            frame_action: FrameAction::End,
            frame_id: Some(8),
        });

        let mut encoded = encode_vec(&unknown).unwrap();
        encoded.extend(encode_vec(&marker).unwrap());

        let mut cursor = ReadCursor::new(&encoded);
        assert_eq!(decode_cursor::<SurfaceCommand<'_>>(&mut cursor).unwrap(), unknown);
        assert_eq!(decode_cursor::<SurfaceCommand<'_>>(&mut cursor).unwrap(), marker);
    }
}
