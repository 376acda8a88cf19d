//! Bulk (de)compression for Slow-Path ShareData and FastPath output payloads.
//!
//! Each direction owns one context whose history survives across frames;
//! `PACKET_FLUSHED` resets it. The backend is zlib behind a type-tagged
//! facade: every tier shares one code path but gets a sliding window sized
//! from its negotiated history, and an MPPC-family coder can replace the
//! backend without touching callers.

mod compressor;
mod decompressor;
mod error;

pub use compressor::Compressor;
pub use decompressor::Decompressor;
pub use error::BulkError;

pub use opalrdp_pdu::rdp::client_info::CompressionType;
pub use opalrdp_pdu::rdp::headers::CompressionFlags;

/// History window in bytes for the 8K tier.
pub const HISTORY_SIZE_8K: usize = 8 * 1024;

/// History window in bytes for the 64K and RDP6/6.1 tiers.
pub const HISTORY_SIZE_64K: usize = 64 * 1024;

/// Returns the history window size negotiated for a compression type.
pub fn history_size(compression_type: CompressionType) -> usize {
    match compression_type {
        CompressionType::K8 => HISTORY_SIZE_8K,
        CompressionType::K64 | CompressionType::Rdp6 | CompressionType::Rdp61 => HISTORY_SIZE_64K,
    }
}

/// Maps a tier's history size onto the zlib window-bits parameter its codec
/// contexts are built with.
///
/// zlib windows top out at 15 bits (32 KiB), so the 8K tier gets its exact
/// window while the larger tiers run at the zlib ceiling until an MPPC-family
/// backend carries the full 64 KiB history.
pub(crate) fn window_bits(compression_type: CompressionType) -> u8 {
    const ZLIB_MAX_WINDOW_BITS: u32 = 15;

    history_size(compression_type).ilog2().min(ZLIB_MAX_WINDOW_BITS) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> Vec<u8> {
        // compressible data with some repetition
        let mut payload = Vec::new();
        for i in 0..64u8 {
            payload.extend_from_slice(&[i; 16]);
        }
        payload
    }

    #[test]
    fn compress_decompress_round_trip() {
        let payload = sample_payload();

        let mut compressor = Compressor::new(CompressionType::Rdp61);
        let mut decompressor = Decompressor::new();

        let (compressed, flags) = compressor.compress(&payload).unwrap();
        assert!(flags.contains(CompressionFlags::COMPRESSED));
        assert!(compressed.len() < payload.len());

        let decompressed = decompressor
            .decompress(&compressed, flags, CompressionType::Rdp61)
            .unwrap();
        assert_eq!(decompressed, payload);
    }

    #[test]
    fn incompressible_input_is_returned_verbatim() {
        // one byte cannot shrink; the compressed flag must be clear
        let payload = [0x42];

        let mut compressor = Compressor::new(CompressionType::K64);
        let (data, flags) = compressor.compress(&payload).unwrap();

        assert_eq!(data, payload);
        assert!(!flags.contains(CompressionFlags::COMPRESSED));
    }

    #[test]
    fn history_carries_across_frames() {
        let payload = sample_payload();

        let mut compressor = Compressor::new(CompressionType::K64);
        let mut decompressor = Decompressor::new();

        // the second frame should reference the first through the window
        let (frame1, flags1) = compressor.compress(&payload).unwrap();
        let (frame2, flags2) = compressor.compress(&payload).unwrap();

        assert!(frame2.len() <= frame1.len());

        assert_eq!(
            decompressor.decompress(&frame1, flags1, CompressionType::K64).unwrap(),
            payload
        );
        assert_eq!(
            decompressor.decompress(&frame2, flags2, CompressionType::K64).unwrap(),
            payload
        );
    }

    #[test]
    fn flushed_resets_both_directions() {
        let payload = sample_payload();

        let mut compressor = Compressor::new(CompressionType::K64);
        let mut decompressor = Decompressor::new();

        let (frame1, flags1) = compressor.compress(&payload).unwrap();
        decompressor.decompress(&frame1, flags1, CompressionType::K64).unwrap();

        // peer announces a history reset carrying uncompressed bytes
        let plain = decompressor
            .decompress(&payload, CompressionFlags::FLUSHED, CompressionType::K64)
            .unwrap();
        assert_eq!(plain, payload);

        // a fresh compressor now matches the reset receiver
        let mut fresh = Compressor::new(CompressionType::K64);
        let (frame2, flags2) = fresh.compress(&payload).unwrap();
        assert_eq!(
            decompressor.decompress(&frame2, flags2, CompressionType::K64).unwrap(),
            payload
        );
    }

    #[test]
    fn malformed_stream_is_an_error() {
        let mut decompressor = Decompressor::new();

        let result = decompressor.decompress(
            &[0xDE, 0xAD, 0xBE, 0xEF],
            CompressionFlags::COMPRESSED,
            CompressionType::K64,
        );

        assert!(result.is_err());
    }

    #[test]
    fn tier_window_sizes() {
        assert_eq!(history_size(CompressionType::K8), 8 * 1024);
        assert_eq!(history_size(CompressionType::K64), 64 * 1024);
        assert_eq!(history_size(CompressionType::Rdp6), 64 * 1024);
        assert_eq!(history_size(CompressionType::Rdp61), 64 * 1024);

        // the 8K tier gets its exact window; larger tiers sit at the zlib cap
        assert_eq!(window_bits(CompressionType::K8), 13);
        assert_eq!(window_bits(CompressionType::K64), 15);
        assert_eq!(window_bits(CompressionType::Rdp61), 15);
    }

    #[test]
    fn k8_frames_stay_within_their_own_window() {
        let payload = sample_payload();

        // a K8 compressor pairs up with a K8 decompression context
        let mut compressor = Compressor::new(CompressionType::K8);
        let mut decompressor = Decompressor::new();

        let (frame, flags) = compressor.compress(&payload).unwrap();
        assert_eq!(
            decompressor.decompress(&frame, flags, CompressionType::K8).unwrap(),
            payload
        );
    }
}
