//! Image processing primitives for the display pipeline: interleaved RLE
//! bitmap decompression and the client-side caches (three size-tiered bitmap
//! caches and the off-screen surface cache).

pub mod bitmap_cache;
pub mod offscreen_cache;
pub mod rle;
