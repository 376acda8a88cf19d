//! The off-screen surface cache: server-created surfaces addressed by a
//! 16-bit id, deduplicated on an MD5 content digest and bounded by both an
//! entry count and an aggregate byte budget.

use md5::{Digest as _, Md5};

pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_BYTE_BUDGET: usize = 7_864_320; // 7.5 MiB

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffscreenSurface {
    pub id: u16,
    pub width: u16,
    pub height: u16,
    pub bits_per_pixel: u16,
    pub data: Vec<u8>,
    hash: [u8; 16],
    last_access: u64,
}

/// The off-screen surface cache, exclusively owned by the session read loop.
#[derive(Debug)]
pub struct OffscreenCache {
    surfaces: Vec<OffscreenSurface>,
    capacity: usize,
    byte_budget: usize,
    tick: u64,
}

impl Default for OffscreenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl OffscreenCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_BYTE_BUDGET)
    }

    /// Limits come from the negotiated offscreen capability set.
    pub fn with_limits(capacity: usize, byte_budget: usize) -> Self {
        Self {
            surfaces: Vec::new(),
            capacity,
            byte_budget,
            tick: 0,
        }
    }

    fn content_hash(data: &[u8]) -> [u8; 16] {
        let mut md5 = Md5::new();
        md5.update(data);
        md5.finalize().into()
    }

    /// Inserts a surface under a server-assigned id.
    ///
    /// Identical content (same digest) is not duplicated: the existing id is
    /// returned and its LRU stamp refreshed. Exceeding the capacity or the
    /// byte budget evicts least-recently-accessed surfaces first.
    pub fn insert(&mut self, id: u16, width: u16, height: u16, bits_per_pixel: u16, data: Vec<u8>) -> u16 {
        self.tick += 1;
        let now = self.tick;

        let hash = Self::content_hash(&data);

        if let Some(existing) = self.surfaces.iter_mut().find(|surface| surface.hash == hash) {
            existing.last_access = now;
            return existing.id;
        }

        // re-creating an id replaces the previous surface
        self.remove(id);

        self.surfaces.push(OffscreenSurface {
            id,
            width,
            height,
            bits_per_pixel,
            data,
            hash,
            last_access: now,
        });

        self.enforce_limits();

        id
    }

    pub fn get(&self, id: u16) -> Option<&OffscreenSurface> {
        self.surfaces.iter().find(|surface| surface.id == id)
    }

    /// Touches a surface, refreshing its LRU stamp, and returns it.
    pub fn touch(&mut self, id: u16) -> Option<&OffscreenSurface> {
        self.tick += 1;
        let now = self.tick;

        let surface = self.surfaces.iter_mut().find(|surface| surface.id == id)?;
        surface.last_access = now;
        Some(surface)
    }

    /// Replaces the pixel data of an existing surface.
    pub fn update_data(&mut self, id: u16, data: Vec<u8>) -> bool {
        self.tick += 1;
        let now = self.tick;

        if let Some(surface) = self.surfaces.iter_mut().find(|surface| surface.id == id) {
            surface.hash = Self::content_hash(&data);
            surface.data = data;
            surface.last_access = now;
            true
        } else {
            false
        }
    }

    /// Explicit delete, driven by DELETE_SURFACE.
    pub fn remove(&mut self, id: u16) -> Option<OffscreenSurface> {
        let idx = self.surfaces.iter().position(|surface| surface.id == id)?;
        Some(self.surfaces.swap_remove(idx))
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn clear(&mut self) {
        self.surfaces.clear();
    }

    fn total_bytes(&self) -> usize {
        self.surfaces.iter().map(|surface| surface.data.len()).sum()
    }

    fn enforce_limits(&mut self) {
        while self.surfaces.len() > self.capacity || self.total_bytes() > self.byte_budget {
            let Some(victim) = self
                .surfaces
                .iter()
                .enumerate()
                .min_by_key(|(_, surface)| surface.last_access)
                .map(|(idx, _)| idx)
            else {
                break;
            };

            self.surfaces.swap_remove(victim);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_reuses_the_existing_id() {
        let mut cache = OffscreenCache::new();

        let first = cache.insert(1, 4, 4, 16, vec![0xAA; 32]);
        let second = cache.insert(2, 4, 4, 16, vec![0xAA; 32]);

        assert_eq!(first, 1);
        assert_eq!(second, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn explicit_delete_removes_the_surface() {
        let mut cache = OffscreenCache::new();

        cache.insert(7, 4, 4, 16, vec![1; 32]);
        assert!(cache.get(7).is_some());

        cache.remove(7);
        assert!(cache.get(7).is_none());
    }

    #[test]
    fn capacity_overflow_evicts_the_least_recently_used() {
        let mut cache = OffscreenCache::with_limits(2, usize::MAX);

        cache.insert(1, 2, 2, 16, vec![1; 8]);
        cache.insert(2, 2, 2, 16, vec![2; 8]);
        cache.touch(1);
        cache.insert(3, 2, 2, 16, vec![3; 8]);

        // the touch pushed surface 2 to the back of the LRU order
        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn byte_budget_is_enforced() {
        let mut cache = OffscreenCache::with_limits(100, 100);

        cache.insert(1, 4, 4, 16, vec![1; 60]);
        cache.insert(2, 4, 4, 16, vec![2; 60]);

        assert_eq!(cache.len(), 1);
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn reused_id_replaces_the_surface() {
        let mut cache = OffscreenCache::new();

        cache.insert(5, 2, 2, 16, vec![1; 8]);
        cache.insert(5, 2, 2, 16, vec![2; 8]);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(5).unwrap().data, vec![2; 8]);
    }
}
