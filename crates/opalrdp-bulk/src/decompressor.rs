use flate2::{Decompress, FlushDecompress, Status};

use crate::error::BulkError;
use crate::{window_bits, CompressionFlags, CompressionType};

/// Upper bound for a single decompressed payload (16x the largest history
/// window); anything bigger indicates a corrupted stream.
const MAX_DECOMPRESSED_SIZE: usize = 16 * crate::HISTORY_SIZE_64K;

/// Inbound bulk decompression context for one direction.
///
/// The context is created lazily on the first compressed frame, with the
/// window sized for that frame's type tag, and reset whenever a frame
/// carries `PACKET_FLUSHED`.
pub struct Decompressor {
    context: Option<(CompressionType, Decompress)>,
}

impl Default for Decompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Decompressor {
    pub fn new() -> Self {
        Self { context: None }
    }

    /// Decompresses one frame according to the compression flags of its
    /// carrying header.
    pub fn decompress(
        &mut self,
        input: &[u8],
        flags: CompressionFlags,
        compression_type: CompressionType,
    ) -> Result<Vec<u8>, BulkError> {
        if flags.contains(CompressionFlags::FLUSHED) {
            // the peer reset its history before this frame
            self.reset();
        }

        if !flags.contains(CompressionFlags::COMPRESSED) {
            return Ok(input.to_vec());
        }

        let context = match &mut self.context {
            Some((tag, context)) if *tag == compression_type => context,
            slot => {
                *slot = Some((
                    compression_type,
                    Decompress::new_with_window_bits(true, window_bits(compression_type)),
                ));
                match slot {
                    Some((_, context)) => context,
                    None => unreachable!("context was just installed"),
                }
            }
        };

        let mut output = Vec::with_capacity(input.len() * 4 + 64);
        let mut consumed = 0;

        loop {
            if output.len() == output.capacity() {
                output.reserve(output.len() + 256);
            }
            if output.len() > MAX_DECOMPRESSED_SIZE {
                return Err(BulkError::OutputTooLarge);
            }

            let before_in = context.total_in();
            let status = context
                .decompress_vec(&input[consumed..], &mut output, FlushDecompress::Sync)
                .map_err(BulkError::InvalidStream)?;
            consumed += (context.total_in() - before_in) as usize;

            match status {
                Status::Ok | Status::BufError => {
                    if consumed == input.len() && output.len() < output.capacity() {
                        break;
                    }
                }
                Status::StreamEnd => break,
            }
        }

        Ok(output)
    }

    /// Drops the history window; the next compressed frame must start a
    /// fresh stream.
    pub fn reset(&mut self) {
        self.context = None;
    }
}
