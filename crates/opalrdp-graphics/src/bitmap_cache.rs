//! The three size-tiered client bitmap caches.
//!
//! Entries are keyed by a 64-bit truncation of the MD5 over the pixel bytes
//! and the bitmap geometry, so the same content always lands on the same key
//! while a geometry change produces a different one. Tiers are selected by
//! pixel count and evict their least-recently-accessed entry when full.
//! Large payloads are kept zlib-compressed inside the cache and inflated on
//! lookup.

use std::io::Write as _;

use md5::{Digest as _, Md5};

/// Number of tiers and their capacities.
pub const TIER_COUNT: usize = 3;
pub const DEFAULT_CAPACITIES: [usize; TIER_COUNT] = [600, 300, 100];

/// Pixel-count ceilings for tiers 0 and 1; everything larger goes to tier 2.
const TIER_0_MAX_PIXELS: u32 = 1024;
const TIER_1_MAX_PIXELS: u32 = 16384;

/// Payloads below this size are not worth deflating.
const COMPRESSION_THRESHOLD: usize = 64;

/// Outcome of [`BitmapCacheManager::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedBitmap {
    /// The cache payload: the input bytes, deflated when that made them smaller.
    pub payload: Vec<u8>,
    /// Whether the entry was already cached.
    pub hit: bool,
    pub key: u64,
    pub tier: usize,
    pub output_length: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    key: u64,
    width: u16,
    height: u16,
    bits_per_pixel: u16,
    data: Vec<u8>,
    compressed: bool,
    last_access: u64,
    inserted_seq: u64,
}

#[derive(Debug, Default)]
struct Tier {
    capacity: usize,
    entries: Vec<CacheEntry>,
}

impl Tier {
    fn find(&self, key: u64) -> Option<usize> {
        self.entries.iter().position(|entry| entry.key == key)
    }

    /// Evicts the least-recently-accessed entry, oldest insertion first on a
    /// timestamp tie.
    fn evict_lru(&mut self) {
        if let Some(victim) = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| (entry.last_access, entry.inserted_seq))
            .map(|(idx, _)| idx)
        {
            self.entries.swap_remove(victim);
        }
    }
}

/// The tiered bitmap cache manager.
///
/// All mutations go through `&mut self`; wrap the manager in a `RwLock` to
/// get shared-read lookups next to exclusive-write processing.
#[derive(Debug)]
pub struct BitmapCacheManager {
    tiers: [Tier; TIER_COUNT],
    tick: u64,
}

impl Default for BitmapCacheManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BitmapCacheManager {
    pub fn new() -> Self {
        Self::with_capacities(DEFAULT_CAPACITIES)
    }

    pub fn with_capacities(capacities: [usize; TIER_COUNT]) -> Self {
        let tiers = capacities.map(|capacity| Tier {
            capacity,
            entries: Vec::new(),
        });

        Self { tiers, tick: 0 }
    }

    /// Deterministic 64-bit content key over the pixel bytes and geometry.
    pub fn cache_key(data: &[u8], width: u16, height: u16, bits_per_pixel: u16) -> u64 {
        let mut md5 = Md5::new();
        md5.update(data);
        md5.update(width.to_le_bytes());
        md5.update(height.to_le_bytes());
        md5.update(bits_per_pixel.to_le_bytes());
        let digest = md5.finalize();

        u64::from_le_bytes(digest[..8].try_into().expect("MD5 digest holds 16 bytes"))
    }

    /// Tier index for a bitmap of the given dimensions.
    pub fn tier_for(width: u16, height: u16) -> usize {
        let pixels = u32::from(width) * u32::from(height);

        if pixels <= TIER_0_MAX_PIXELS {
            0
        } else if pixels <= TIER_1_MAX_PIXELS {
            1
        } else {
            2
        }
    }

    /// Runs a decoded bitmap through its tier cache.
    ///
    /// A repeated observation is a hit and returns the stored payload; a
    /// first observation inserts the entry (evicting the LRU entry of a full
    /// tier) and returns the payload, deflated when that made it smaller.
    pub fn process(&mut self, data: &[u8], width: u16, height: u16, bits_per_pixel: u16) -> ProcessedBitmap {
        let key = Self::cache_key(data, width, height, bits_per_pixel);
        let tier_index = Self::tier_for(width, height);

        self.tick += 1;
        let now = self.tick;
        let tier = &mut self.tiers[tier_index];

        if let Some(idx) = tier.find(key) {
            let entry = &mut tier.entries[idx];
            entry.last_access = now;

            return ProcessedBitmap {
                payload: entry.data.clone(),
                hit: true,
                key,
                tier: tier_index,
                output_length: entry.data.len(),
            };
        }

        let (stored, compressed) = deflate_if_smaller(data);

        if tier.entries.len() >= tier.capacity {
            tier.evict_lru();
        }

        tier.entries.push(CacheEntry {
            key,
            width,
            height,
            bits_per_pixel,
            data: stored.clone(),
            compressed,
            last_access: now,
            inserted_seq: now,
        });

        ProcessedBitmap {
            output_length: stored.len(),
            payload: stored,
            hit: false,
            key,
            tier: tier_index,
        }
    }

    /// Fetches the pixels of a cached entry for a CACHED update.
    ///
    /// A miss is a soft error: the caller reports it through a Bitmap Cache
    /// Error PDU and the session continues.
    pub fn lookup(&self, cache_id: u8, key: u64) -> Option<CachedBitmap> {
        let tier = self.tiers.get(usize::from(cache_id))?;
        let entry = &tier.entries[tier.find(key)?];

        let pixels = if entry.compressed {
            inflate(&entry.data)?
        } else {
            entry.data.clone()
        };

        Some(CachedBitmap {
            width: entry.width,
            height: entry.height,
            bits_per_pixel: entry.bits_per_pixel,
            pixels,
        })
    }

    pub fn len(&self, tier: usize) -> usize {
        self.tiers[tier].entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(|tier| tier.entries.is_empty())
    }

    /// Drops every entry, e.g. on session teardown or reactivation.
    pub fn clear(&mut self) {
        for tier in &mut self.tiers {
            tier.entries.clear();
        }
    }
}

/// A cache hit resolved to drawable pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBitmap {
    pub width: u16,
    pub height: u16,
    pub bits_per_pixel: u16,
    pub pixels: Vec<u8>,
}

fn deflate_if_smaller(data: &[u8]) -> (Vec<u8>, bool) {
    if data.len() < COMPRESSION_THRESHOLD {
        return (data.to_vec(), false);
    }

    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    let deflated = encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .unwrap_or_default();

    if !deflated.is_empty() && deflated.len() < data.len() {
        (deflated, true)
    } else {
        (data.to_vec(), false)
    }
}

fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    use std::io::Read as _;

    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut inflated = Vec::new();
    decoder.read_to_end(&mut inflated).ok()?;
    Some(inflated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_content_and_geometry_deterministic() {
        let mut manager = BitmapCacheManager::new();
        let data = [7u8; 32];

        let first = manager.process(&data, 4, 4, 16);
        let second = manager.process(&data, 4, 4, 16);
        let reshaped = manager.process(&data, 5, 4, 16);

        // same content and geometry: a hit under the same key
        assert!(!first.hit);
        assert!(second.hit);
        assert_eq!(first.key, second.key);
        assert_eq!(first.payload, second.payload);

        // identical payload, different geometry: a different key
        assert_ne!(first.key, reshaped.key);
    }

    #[test]
    fn tier_selection_by_pixel_count() {
        assert_eq!(BitmapCacheManager::tier_for(32, 32), 0);
        assert_eq!(BitmapCacheManager::tier_for(33, 32), 1);
        assert_eq!(BitmapCacheManager::tier_for(128, 128), 1);
        assert_eq!(BitmapCacheManager::tier_for(129, 128), 2);
    }

    #[test]
    fn lookup_returns_the_original_pixels() {
        let mut manager = BitmapCacheManager::new();
        // compressible payload so the cache stores it deflated
        let data = vec![0xAB; 2048];

        let processed = manager.process(&data, 32, 32, 16);
        assert!(processed.output_length < data.len());

        let cached = manager.lookup(0, processed.key).unwrap();
        assert_eq!(cached.pixels, data);
        assert_eq!(cached.width, 32);
    }

    #[test]
    fn lookup_miss_is_none() {
        let manager = BitmapCacheManager::new();
        assert!(manager.lookup(0, 0xDEAD_BEEF).is_none());
        assert!(manager.lookup(9, 0xDEAD_BEEF).is_none());
    }

    #[test]
    fn lru_eviction_drops_the_least_recently_accessed() {
        let mut manager = BitmapCacheManager::with_capacities([2, 2, 2]);

        let first = manager.process(&[1; 8], 2, 2, 16);
        let second = manager.process(&[2; 8], 2, 2, 16);
        let third = manager.process(&[3; 8], 2, 2, 16);

        assert_eq!(manager.len(0), 2);
        assert!(manager.lookup(0, first.key).is_none());
        assert!(manager.lookup(0, second.key).is_some());
        assert!(manager.lookup(0, third.key).is_some());
    }

    #[test]
    fn a_hit_refreshes_the_lru_stamp() {
        let mut manager = BitmapCacheManager::with_capacities([2, 2, 2]);

        let first = manager.process(&[1; 8], 2, 2, 16);
        let second = manager.process(&[2; 8], 2, 2, 16);

        // touch the first entry, then overflow the tier
        manager.process(&[1; 8], 2, 2, 16);
        let third = manager.process(&[3; 8], 2, 2, 16);

        assert!(manager.lookup(0, first.key).is_some());
        assert!(manager.lookup(0, second.key).is_none());
        assert!(manager.lookup(0, third.key).is_some());
    }
}
