//! The cached-bitmap update (update code 0xA): rectangles referencing an
//! entry previously inserted into one of the tiered bitmap caches.

use opalrdp_core::{
    cast_length, ensure_fixed_part_size, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};

use crate::geometry::InclusiveRectangle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBitmapUpdateData {
    pub rectangles: Vec<CachedBitmapData>,
}

impl CachedBitmapUpdateData {
    const NAME: &'static str = "CachedBitmapUpdateData";

    const FIXED_PART_SIZE: usize = 2 /* numberRectangles */;
}

impl Encode for CachedBitmapUpdateData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(cast_length!("numberRectangles", self.rectangles.len())?);

        for rectangle in &self.rectangles {
            rectangle.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.rectangles.len() * CachedBitmapData::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for CachedBitmapUpdateData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let rectangles_number = usize::from(src.read_u16());
        let mut rectangles = Vec::with_capacity(rectangles_number);

        for _ in 0..rectangles_number {
            rectangles.push(CachedBitmapData::decode(src)?);
        }

        Ok(Self { rectangles })
    }
}

/// One cached-bitmap rectangle: destination bounds plus the cache slot and
/// the 64-bit content key split into two dwords on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedBitmapData {
    pub rectangle: InclusiveRectangle,
    pub cache_id: u8,
    pub cache_index: u16,
    pub key1: u32,
    pub key2: u32,
}

impl CachedBitmapData {
    const NAME: &'static str = "CachedBitmapData";

    const FIXED_PART_SIZE: usize = InclusiveRectangle::ENCODED_SIZE
        + 1 /* cacheId */ + 1 /* pad */ + 2 /* cacheIndex */ + 4 /* key1 */ + 4 /* key2 */;

    /// Recomposes the 64-bit cache key from its wire halves.
    pub fn key(&self) -> u64 {
        (u64::from(self.key2) << 32) | u64::from(self.key1)
    }

    /// Splits a 64-bit cache key into its wire halves.
    pub fn split_key(key: u64) -> (u32, u32) {
        (key as u32, (key >> 32) as u32)
    }
}

impl Encode for CachedBitmapData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        self.rectangle.encode(dst)?;
        dst.write_u8(self.cache_id);
        dst.write_u8(0);
        dst.write_u16(self.cache_index);
        dst.write_u32(self.key1);
        dst.write_u32(self.key2);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for CachedBitmapData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let rectangle = InclusiveRectangle::decode(src)?;
        let cache_id = src.read_u8();
        let _padding = src.read_u8();
        let cache_index = src.read_u16();
        let key1 = src.read_u32();
        let key2 = src.read_u32();

        Ok(Self {
            rectangle,
            cache_id,
            cache_index,
            key1,
            key2,
        })
    }
}

#[cfg(test)]
mod tests {
    use opalrdp_core::{decode, encode_vec};

    use super::*;

    #[test]
    fn round_trip() {
        let update = CachedBitmapUpdateData {
            rectangles: vec![CachedBitmapData {
                rectangle: InclusiveRectangle {
                    left: 10,
                    top: 20,
                    right: 11,
                    bottom: 21,
                },
                cache_id: 1,
                cache_index: 42,
                key1: 0xAABBCCDD,
                key2: 0x11223344,
            }],
        };

        let encoded = encode_vec(&update).unwrap();
        assert_eq!(encoded.len(), update.size());

        let decoded = decode::<CachedBitmapUpdateData>(&encoded).unwrap();
        assert_eq!(decoded, update);
    }

    #[test]
    fn key_recomposition() {
        let (key1, key2) = CachedBitmapData::split_key(0x1122334455667788);
        assert_eq!(key1, 0x55667788);
        assert_eq!(key2, 0x11223344);

        let data = CachedBitmapData {
            rectangle: InclusiveRectangle::empty(),
            cache_id: 0,
            cache_index: 0,
            key1,
            key2,
        };
        assert_eq!(data.key(), 0x1122334455667788);
    }
}
