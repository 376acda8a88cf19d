//! Client-driven display control requests: Refresh Rect asks the server to
//! repaint regions, Suppress Output pauses and resumes updates entirely.

use opalrdp_core::{
    cast_length, ensure_fixed_part_size, invalid_field_err, read_padding, write_padding, Decode, DecodeResult, Encode,
    EncodeResult, ReadCursor, WriteCursor,
};

use crate::geometry::InclusiveRectangle;

/// TS_REFRESH_RECT_PDU: asks the server to redraw one or more rectangles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRectanglePdu {
    pub areas: Vec<InclusiveRectangle>,
}

impl RefreshRectanglePdu {
    const NAME: &'static str = "RefreshRectanglePdu";

    const FIXED_PART_SIZE: usize = 1 /* numberOfAreas */ + 3 /* pad3Octets */;

    const MAX_AREA_COUNT: usize = 255;
}

impl Encode for RefreshRectanglePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u8(cast_length!("numberOfAreas", self.areas.len())?);
        write_padding!(dst, 3);

        for area in &self.areas {
            area.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.areas.len() * InclusiveRectangle::ENCODED_SIZE
    }
}

impl<'de> Decode<'de> for RefreshRectanglePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let number_of_areas = usize::from(src.read_u8());
        read_padding!(src, 3);

        if number_of_areas > Self::MAX_AREA_COUNT {
            return Err(invalid_field_err!("numberOfAreas", "too many areas"));
        }

        let mut areas = Vec::with_capacity(number_of_areas);
        for _ in 0..number_of_areas {
            areas.push(InclusiveRectangle::decode(src)?);
        }

        Ok(Self { areas })
    }
}

/// TS_SUPPRESS_OUTPUT_PDU: toggles display updates from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressOutputPdu {
    /// Stop sending display updates.
    Suppress,
    /// Resume updates for the given desktop rectangle.
    Allow(InclusiveRectangle),
}

impl SuppressOutputPdu {
    const NAME: &'static str = "SuppressOutputPdu";

    const FIXED_PART_SIZE: usize = 1 /* allowDisplayUpdates */ + 3 /* pad3Octets */;

    const SUPPRESS_DISPLAY_UPDATES: u8 = 0;
    const ALLOW_DISPLAY_UPDATES: u8 = 1;
}

impl Encode for SuppressOutputPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        match self {
            Self::Suppress => {
                dst.write_u8(Self::SUPPRESS_DISPLAY_UPDATES);
                write_padding!(dst, 3);
            }
            Self::Allow(area) => {
                dst.write_u8(Self::ALLOW_DISPLAY_UPDATES);
                write_padding!(dst, 3);
                area.encode(dst)?;
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        match self {
            Self::Suppress => Self::FIXED_PART_SIZE,
            Self::Allow(_) => Self::FIXED_PART_SIZE + InclusiveRectangle::ENCODED_SIZE,
        }
    }
}

impl<'de> Decode<'de> for SuppressOutputPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let allow_display_updates = src.read_u8();
        read_padding!(src, 3);

        match allow_display_updates {
            Self::SUPPRESS_DISPLAY_UPDATES => Ok(Self::Suppress),
            Self::ALLOW_DISPLAY_UPDATES => Ok(Self::Allow(InclusiveRectangle::decode(src)?)),
            _ => Err(invalid_field_err!("allowDisplayUpdates", "invalid display update mode")),
        }
    }
}
