use flate2::{Compress, Compression, FlushCompress, Status};

use crate::error::BulkError;
use crate::{window_bits, CompressionFlags, CompressionType};

/// Outbound bulk compression context for one direction.
///
/// The zlib stream is kept open across frames (sync-flushed per frame), so
/// later frames may reference earlier bytes through the sliding window sized
/// for the negotiated tier. When a frame does not shrink it is sent verbatim
/// with `PACKET_FLUSHED`, and the stream is reset to keep both histories
/// identical.
pub struct Compressor {
    compression_type: CompressionType,
    context: Compress,
}

impl Compressor {
    pub fn new(compression_type: CompressionType) -> Self {
        Self {
            compression_type,
            context: Compress::new_with_window_bits(Compression::default(), true, window_bits(compression_type)),
        }
    }

    pub fn compression_type(&self) -> CompressionType {
        self.compression_type
    }

    /// Compresses one frame.
    ///
    /// Returns the bytes to put on the wire and the compression flags for the
    /// carrying header. The output is the input itself (flags without
    /// `PACKET_COMPRESSED`) whenever compression does not strictly shrink it.
    pub fn compress(&mut self, input: &[u8]) -> Result<(Vec<u8>, CompressionFlags), BulkError> {
        let mut output = Vec::with_capacity(input.len() + 64);
        let mut consumed = 0;

        loop {
            if output.len() == output.capacity() {
                output.reserve(output.len() + 64);
            }

            let before_in = self.context.total_in();
            let status = self
                .context
                .compress_vec(&input[consumed..], &mut output, FlushCompress::Sync)
                .map_err(BulkError::CompressorFailure)?;
            consumed += (self.context.total_in() - before_in) as usize;

            match status {
                Status::Ok | Status::BufError => {
                    if consumed == input.len() && output.len() < output.capacity() {
                        break;
                    }
                }
                Status::StreamEnd => break,
            }
        }

        if output.len() < input.len() {
            Ok((output, CompressionFlags::COMPRESSED | CompressionFlags::AT_FRONT))
        } else {
            // Not worth it; flush the history so the receiver stays in sync.
            self.reset();
            Ok((input.to_vec(), CompressionFlags::FLUSHED))
        }
    }

    /// Drops the history window.
    pub fn reset(&mut self) {
        self.context.reset();
    }
}
