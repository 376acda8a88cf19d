//! Client-initiated bitmap cache control PDUs.

use opalrdp_core::{
    cast_length, ensure_fixed_part_size, read_padding, write_padding, Decode, DecodeResult, Encode, EncodeResult,
    ReadCursor, WriteCursor,
};

/// One TS_BITMAPCACHE_ERROR_INFO entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapCacheError {
    pub cache_id: u8,
    /// When set, the server should assume the cache was cleared.
    pub flush_cache: bool,
    /// New entry count for the cache, when renegotiated.
    pub new_number_of_entries: Option<u32>,
}

impl BitmapCacheError {
    const NAME: &'static str = "BitmapCacheError";

    const FIXED_PART_SIZE: usize = 1 /* cacheId */ + 1 /* bBitField */ + 2 /* pad */ + 4 /* newNumEntries */;

    const FLAG_FLUSH_CACHE: u8 = 0x01;
    const FLAG_NEW_NUM_ENTRIES_VALID: u8 = 0x02;
}

impl Encode for BitmapCacheError {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        let mut bit_field = 0;
        if self.flush_cache {
            bit_field |= Self::FLAG_FLUSH_CACHE;
        }
        if self.new_number_of_entries.is_some() {
            bit_field |= Self::FLAG_NEW_NUM_ENTRIES_VALID;
        }

        dst.write_u8(self.cache_id);
        dst.write_u8(bit_field);
        write_padding!(dst, 2);
        dst.write_u32(self.new_number_of_entries.unwrap_or(0));

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for BitmapCacheError {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let cache_id = src.read_u8();
        let bit_field = src.read_u8();
        read_padding!(src, 2);
        let new_number_of_entries = src.read_u32();

        Ok(Self {
            cache_id,
            flush_cache: bit_field & Self::FLAG_FLUSH_CACHE != 0,
            new_number_of_entries: (bit_field & Self::FLAG_NEW_NUM_ENTRIES_VALID != 0).then_some(new_number_of_entries),
        })
    }
}

/// TS_BITMAPCACHE_ERROR_PDU: tells the server a referenced cache entry was
/// not found so it re-sends the bitmap instead of a cached reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapCacheErrorPdu {
    pub errors: Vec<BitmapCacheError>,
}

impl BitmapCacheErrorPdu {
    const NAME: &'static str = "BitmapCacheErrorPdu";

    const FIXED_PART_SIZE: usize = 1 /* numInfoBlocks */ + 3 /* pad */;

    pub fn for_cache_miss(cache_id: u8) -> Self {
        Self {
            errors: vec![BitmapCacheError {
                cache_id,
                flush_cache: false,
                new_number_of_entries: None,
            }],
        }
    }
}

impl Encode for BitmapCacheErrorPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u8(cast_length!("numInfoBlocks", self.errors.len())?);
        write_padding!(dst, 3);

        for error in &self.errors {
            error.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.errors.len() * BitmapCacheError::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for BitmapCacheErrorPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let num_info_blocks = usize::from(src.read_u8());
        read_padding!(src, 3);

        let mut errors = Vec::with_capacity(num_info_blocks);
        for _ in 0..num_info_blocks {
            errors.push(BitmapCacheError::decode(src)?);
        }

        Ok(Self { errors })
    }
}

#[cfg(test)]
mod tests {
    use opalrdp_core::{decode, encode_vec};

    use super::*;

    #[test]
    fn cache_error_pdus_round_trip() {
        let miss = BitmapCacheErrorPdu::for_cache_miss(2);
        let encoded = encode_vec(&miss).unwrap();
        assert_eq!(encoded.len(), miss.size());
        assert_eq!(decode::<BitmapCacheErrorPdu>(&encoded).unwrap(), miss);

        let renegotiated = BitmapCacheErrorPdu {
            errors: vec![BitmapCacheError {
                cache_id: 1,
                flush_cache: true,
                new_number_of_entries: Some(300),
            }],
        };
        let encoded = encode_vec(&renegotiated).unwrap();
        assert_eq!(decode::<BitmapCacheErrorPdu>(&encoded).unwrap(), renegotiated);
    }
}
