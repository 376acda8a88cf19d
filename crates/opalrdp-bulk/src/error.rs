use thiserror::Error;

/// Compression-layer failures. The history mirrors the peer's, so any
/// malformed frame leaves both sides desynchronized and is fatal for the
/// session.
#[derive(Debug, Error)]
pub enum BulkError {
    #[error("malformed compressed stream")]
    InvalidStream(#[source] flate2::DecompressError),
    #[error("compressor failure")]
    CompressorFailure(#[source] flate2::CompressError),
    #[error("decompressed data exceeds the maximum payload size")]
    OutputTooLarge,
}
