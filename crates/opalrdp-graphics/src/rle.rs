//! Interleaved Run-Length Encoding (RLE) bitmap codec, the legacy compression
//! of TS_BITMAP_DATA below 32 bpp.
//!
//! References:
//!
//! - [RLE_BITMAP_STREAM](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/b3b60873-16a8-4cbc-8aaa-5f0a93083280)
//! - the decompression pseudo-code of MS-RDPBCGR 3.1.9

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RlePixelFormat {
    Rgb8,
    Rgb15,
    Rgb16,
    Rgb24,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RleError {
    #[error("invalid bits per pixel: {bpp}")]
    InvalidBpp { bpp: u16 },
    #[error("bad RLE order code 0x{code:02X}")]
    BadOrderCode { code: u8 },
    #[error("compressed stream truncated: needed {needed} more bytes")]
    SourceExhausted { needed: usize },
    #[error("run overflows the destination image: {required} bytes required, {available} available")]
    DestinationOverflow { required: usize, available: usize },
    #[error("height or width is zero")]
    EmptyImage,
    #[error("unexpected zero-length mega run")]
    ZeroLengthRun,
}

/// Pixel layout for one color depth. A pixel is held in a `u32` regardless of
/// depth; only the low `bytes * 8` bits are meaningful.
#[derive(Clone, Copy)]
struct Depth {
    bytes: usize,
    white: u32,
    format: RlePixelFormat,
}

impl Depth {
    const fn for_bpp(bpp: u16) -> Option<Self> {
        match bpp {
            8 => Some(Self {
                bytes: 1,
                white: 0xFF,
                format: RlePixelFormat::Rgb8,
            }),
            15 => Some(Self {
                bytes: 2,
                white: 0x7FFF,
                format: RlePixelFormat::Rgb15,
            }),
            16 => Some(Self {
                bytes: 2,
                white: 0xFFFF,
                format: RlePixelFormat::Rgb16,
            }),
            24 => Some(Self {
                bytes: 3,
                white: 0x00FF_FFFF,
                format: RlePixelFormat::Rgb24,
            }),
            _ => None,
        }
    }

    const BLACK: u32 = 0;
}

/// Decompresses an interleaved-RLE bitmap into `dst`.
///
/// `dst` is resized to `width * height` pixels at the byte depth implied by
/// `bpp`; rows are produced bottom-up exactly as they appear in the stream.
pub fn decompress(
    src: &[u8],
    dst: &mut Vec<u8>,
    width: u16,
    height: u16,
    bpp: u16,
) -> Result<RlePixelFormat, RleError> {
    let depth = Depth::for_bpp(bpp).ok_or(RleError::InvalidBpp { bpp })?;

    if width == 0 || height == 0 {
        return Err(RleError::EmptyImage);
    }

    let row_delta = depth.bytes * usize::from(width);
    dst.clear();
    dst.resize(row_delta * usize::from(height), 0);

    Decoder {
        src,
        src_pos: 0,
        dst,
        dst_pos: 0,
        row_delta,
        depth,
    }
    .run()?;

    Ok(depth.format)
}

// Compression order codes, after normalization by `decode_code`.
const REGULAR_BG_RUN: u8 = 0x00;
const REGULAR_FG_RUN: u8 = 0x01;
const REGULAR_FGBG_IMAGE: u8 = 0x02;
const REGULAR_COLOR_RUN: u8 = 0x03;
const REGULAR_COLOR_IMAGE: u8 = 0x04;
const LITE_SET_FG_FG_RUN: u8 = 0x0C;
const LITE_SET_FG_FGBG_IMAGE: u8 = 0x0D;
const LITE_DITHERED_RUN: u8 = 0x0E;
const MEGA_MEGA_BG_RUN: u8 = 0xF0;
const MEGA_MEGA_FG_RUN: u8 = 0xF1;
const MEGA_MEGA_FGBG_IMAGE: u8 = 0xF2;
const MEGA_MEGA_COLOR_RUN: u8 = 0xF3;
const MEGA_MEGA_COLOR_IMAGE: u8 = 0xF4;
const MEGA_MEGA_SET_FG_RUN: u8 = 0xF6;
const MEGA_MEGA_SET_FGBG_IMAGE: u8 = 0xF7;
const MEGA_MEGA_DITHERED_RUN: u8 = 0xF8;
const SPECIAL_FGBG_1: u8 = 0xF9;
const SPECIAL_FGBG_2: u8 = 0xFA;
const SPECIAL_WHITE: u8 = 0xFD;
const SPECIAL_BLACK: u8 = 0xFE;

const MASK_REGULAR_RUN_LENGTH: u8 = 0x1F;
const MASK_LITE_RUN_LENGTH: u8 = 0x0F;

const MASK_SPECIAL_FGBG_1: u8 = 0x03;
const MASK_SPECIAL_FGBG_2: u8 = 0x05;

fn decode_code(header: u8) -> u8 {
    if (header & 0xC0) != 0xC0 {
        // REGULAR orders (0xxx xxxx, 10xx xxxx)
        header >> 5
    } else if (header & 0xF0) == 0xF0 {
        // MEGA and SPECIAL orders (0xF*)
        header
    } else {
        // LITE orders (110x xxxx, 1110 xxxx)
        header >> 4
    }
}

struct Decoder<'a> {
    src: &'a [u8],
    src_pos: usize,
    dst: &'a mut [u8],
    dst_pos: usize,
    row_delta: usize,
    depth: Depth,
}

impl Decoder<'_> {
    fn run(mut self) -> Result<(), RleError> {
        let mut fg_pel = self.depth.white;
        let mut insert_fg_pel = false;
        let mut is_first_line = true;

        while self.src_pos < self.src.len() {
            // Watch out for the end of the first scanline.
            if is_first_line && self.dst_pos >= self.row_delta {
                is_first_line = false;
                insert_fg_pel = false;
            }

            let header = self.take_u8()?;
            let code = decode_code(header);
            let run_length = self.extract_run_length(code, header)?;

            match code {
                REGULAR_BG_RUN | MEGA_MEGA_BG_RUN => {
                    self.reserve_output(run_length * self.depth.bytes)?;

                    let mut remaining = run_length;
                    if insert_fg_pel {
                        let pixel = if is_first_line {
                            fg_pel
                        } else {
                            self.pixel_above() ^ fg_pel
                        };
                        self.put_pixel(pixel);
                        remaining -= 1;
                    }

                    for _ in 0..remaining {
                        let pixel = if is_first_line { Depth::BLACK } else { self.pixel_above() };
                        self.put_pixel(pixel);
                    }

                    // A follow-on background run needs a foreground pel inserted.
                    insert_fg_pel = true;
                    continue;
                }

                REGULAR_FG_RUN | MEGA_MEGA_FG_RUN | LITE_SET_FG_FG_RUN | MEGA_MEGA_SET_FG_RUN => {
                    if code == LITE_SET_FG_FG_RUN || code == MEGA_MEGA_SET_FG_RUN {
                        fg_pel = self.take_pixel()?;
                    }

                    self.reserve_output(run_length * self.depth.bytes)?;

                    for _ in 0..run_length {
                        let pixel = if is_first_line {
                            fg_pel
                        } else {
                            self.pixel_above() ^ fg_pel
                        };
                        self.put_pixel(pixel);
                    }
                }

                LITE_DITHERED_RUN | MEGA_MEGA_DITHERED_RUN => {
                    let pixel_a = self.take_pixel()?;
                    let pixel_b = self.take_pixel()?;

                    self.reserve_output(run_length * 2 * self.depth.bytes)?;

                    for _ in 0..run_length {
                        self.put_pixel(pixel_a);
                        self.put_pixel(pixel_b);
                    }
                }

                REGULAR_COLOR_RUN | MEGA_MEGA_COLOR_RUN => {
                    let pixel = self.take_pixel()?;

                    self.reserve_output(run_length * self.depth.bytes)?;

                    for _ in 0..run_length {
                        self.put_pixel(pixel);
                    }
                }

                REGULAR_FGBG_IMAGE | MEGA_MEGA_FGBG_IMAGE | LITE_SET_FG_FGBG_IMAGE | MEGA_MEGA_SET_FGBG_IMAGE => {
                    if code == LITE_SET_FG_FGBG_IMAGE || code == MEGA_MEGA_SET_FGBG_IMAGE {
                        fg_pel = self.take_pixel()?;
                    }

                    let mut number_to_read = run_length;
                    while number_to_read > 0 {
                        let c_bits = number_to_read.min(8);
                        let bitmask = self.take_u8()?;
                        self.put_fgbg_bits(bitmask, fg_pel, c_bits, is_first_line)?;
                        number_to_read -= c_bits;
                    }
                }

                REGULAR_COLOR_IMAGE | MEGA_MEGA_COLOR_IMAGE => {
                    let byte_count = run_length * self.depth.bytes;

                    self.ensure_input(byte_count)?;
                    self.reserve_output(byte_count)?;

                    self.dst[self.dst_pos..self.dst_pos + byte_count]
                        .copy_from_slice(&self.src[self.src_pos..self.src_pos + byte_count]);
                    self.src_pos += byte_count;
                    self.dst_pos += byte_count;
                }

                SPECIAL_FGBG_1 => self.put_fgbg_bits(MASK_SPECIAL_FGBG_1, fg_pel, 8, is_first_line)?,

                SPECIAL_FGBG_2 => self.put_fgbg_bits(MASK_SPECIAL_FGBG_2, fg_pel, 8, is_first_line)?,

                SPECIAL_WHITE => {
                    self.reserve_output(self.depth.bytes)?;
                    self.put_pixel(self.depth.white);
                }

                SPECIAL_BLACK => {
                    self.reserve_output(self.depth.bytes)?;
                    self.put_pixel(Depth::BLACK);
                }

                code => return Err(RleError::BadOrderCode { code }),
            }

            // Any non-background order clears the pending foreground pel.
            insert_fg_pel = false;
        }

        Ok(())
    }

    fn extract_run_length(&mut self, code: u8, header: u8) -> Result<usize, RleError> {
        match code {
            REGULAR_FGBG_IMAGE => match header & MASK_REGULAR_RUN_LENGTH {
                0 => Ok(usize::from(self.take_u8()?) + 1),
                length => Ok(usize::from(length) * 8),
            },
            LITE_SET_FG_FGBG_IMAGE => match header & MASK_LITE_RUN_LENGTH {
                0 => Ok(usize::from(self.take_u8()?) + 1),
                length => Ok(usize::from(length) * 8),
            },
            REGULAR_BG_RUN | REGULAR_FG_RUN | REGULAR_COLOR_RUN | REGULAR_COLOR_IMAGE => {
                match header & MASK_REGULAR_RUN_LENGTH {
                    // an extended (MEGA) run
                    0 => Ok(usize::from(self.take_u8()?) + 32),
                    length => Ok(usize::from(length)),
                }
            }
            LITE_SET_FG_FG_RUN | LITE_DITHERED_RUN => match header & MASK_LITE_RUN_LENGTH {
                0 => Ok(usize::from(self.take_u8()?) + 16),
                length => Ok(usize::from(length)),
            },
            MEGA_MEGA_BG_RUN | MEGA_MEGA_FG_RUN | MEGA_MEGA_SET_FG_RUN | MEGA_MEGA_DITHERED_RUN
            | MEGA_MEGA_COLOR_RUN | MEGA_MEGA_FGBG_IMAGE | MEGA_MEGA_SET_FGBG_IMAGE | MEGA_MEGA_COLOR_IMAGE => {
                self.ensure_input(2)?;
                let length = usize::from(u16::from_le_bytes([self.src[self.src_pos], self.src[self.src_pos + 1]]));
                self.src_pos += 2;

                if length == 0 {
                    Err(RleError::ZeroLengthRun)
                } else {
                    Ok(length)
                }
            }
            _ => Ok(0),
        }
    }

    fn put_fgbg_bits(&mut self, bitmask: u8, fg_pel: u32, c_bits: usize, is_first_line: bool) -> Result<(), RleError> {
        self.reserve_output(c_bits * self.depth.bytes)?;

        let mut mask = 0x01u8;
        for _ in 0..c_bits {
            let pixel = if is_first_line {
                if bitmask & mask != 0 {
                    fg_pel
                } else {
                    Depth::BLACK
                }
            } else {
                let above = self.pixel_above();
                if bitmask & mask != 0 {
                    above ^ fg_pel
                } else {
                    above
                }
            };
            self.put_pixel(pixel);
            mask = mask.wrapping_shl(1);
        }

        Ok(())
    }

    fn ensure_input(&self, needed: usize) -> Result<(), RleError> {
        if self.src_pos + needed > self.src.len() {
            Err(RleError::SourceExhausted { needed })
        } else {
            Ok(())
        }
    }

    fn reserve_output(&self, required: usize) -> Result<(), RleError> {
        let available = self.dst.len() - self.dst_pos;
        if required > available {
            Err(RleError::DestinationOverflow { required, available })
        } else {
            Ok(())
        }
    }

    fn take_u8(&mut self) -> Result<u8, RleError> {
        self.ensure_input(1)?;
        let byte = self.src[self.src_pos];
        self.src_pos += 1;
        Ok(byte)
    }

    fn take_pixel(&mut self) -> Result<u32, RleError> {
        self.ensure_input(self.depth.bytes)?;
        let mut pixel = 0u32;
        for i in 0..self.depth.bytes {
            pixel |= u32::from(self.src[self.src_pos + i]) << (8 * i);
        }
        self.src_pos += self.depth.bytes;
        Ok(pixel)
    }

    fn put_pixel(&mut self, pixel: u32) {
        for i in 0..self.depth.bytes {
            self.dst[self.dst_pos + i] = (pixel >> (8 * i)) as u8;
        }
        self.dst_pos += self.depth.bytes;
    }

    /// Reads the pixel one scanline above the write position.
    fn pixel_above(&self) -> u32 {
        let pos = self.dst_pos - self.row_delta;
        let mut pixel = 0u32;
        for i in 0..self.depth.bytes {
            pixel |= u32::from(self.dst[pos + i]) << (8 * i);
        }
        pixel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decompress_16(src: &[u8], width: u16, height: u16) -> Vec<u8> {
        let mut dst = Vec::new();
        let format = decompress(src, &mut dst, width, height, 16).unwrap();
        assert_eq!(format, RlePixelFormat::Rgb16);
        dst
    }

    #[test]
    fn rejects_invalid_bpp() {
        let mut dst = Vec::new();
        assert!(matches!(
            decompress(&[], &mut dst, 2, 2, 13),
            Err(RleError::InvalidBpp { bpp: 13 })
        ));
    }

    #[test]
    fn rejects_empty_image() {
        let mut dst = Vec::new();
        assert!(matches!(decompress(&[], &mut dst, 0, 2, 16), Err(RleError::EmptyImage)));
    }

    #[test]
    fn color_run_fills_scanlines() {
        // REGULAR_COLOR_RUN (0x3 << 5) with length 4, pixel 0xBEEF
        let src = [0x60 | 4, 0xEF, 0xBE];
        let dst = decompress_16(&src, 2, 2);

        assert_eq!(dst, [0xEF, 0xBE, 0xEF, 0xBE, 0xEF, 0xBE, 0xEF, 0xBE]);
    }

    #[test]
    fn color_image_copies_verbatim() {
        // REGULAR_COLOR_IMAGE (0x4 << 5) with length 4
        let mut src = vec![0x80 | 4];
        src.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let dst = decompress_16(&src, 2, 2);

        assert_eq!(dst, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn bg_run_on_first_line_is_black() {
        // REGULAR_BG_RUN (0x0 << 5) with length 4
        let src = [0x00 | 4];
        let dst = decompress_16(&src, 4, 1);

        assert_eq!(dst, [0; 8]);
    }

    #[test]
    fn bg_run_copies_previous_scanline() {
        // first row: color image; second row: background run copies it
        let mut src = vec![0x80 | 2, 0x11, 0x22, 0x33, 0x44];
        src.push(0x00 | 2);
        let dst = decompress_16(&src, 2, 2);

        assert_eq!(dst, [0x11, 0x22, 0x33, 0x44, 0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn fg_run_xors_with_previous_scanline() {
        // first row: color image; second row: set fg + fg run
        let mut src = vec![0x80 | 2, 0xFF, 0x00, 0x0F, 0x0F];
        // LITE_SET_FG_FG_RUN (0xC << 4) with length 2, fg pel 0x00F0
        src.extend_from_slice(&[0xC0 | 2, 0xF0, 0x00]);
        let dst = decompress_16(&src, 2, 2);

        assert_eq!(&dst[..4], [0xFF, 0x00, 0x0F, 0x0F]);
        assert_eq!(&dst[4..], [0x0F, 0x00, 0xFF, 0x0F]);
    }

    #[test]
    fn white_and_black_specials() {
        let src = [SPECIAL_WHITE, SPECIAL_BLACK];
        let dst = decompress_16(&src, 2, 1);

        assert_eq!(dst, [0xFF, 0xFF, 0x00, 0x00]);
    }

    #[test]
    fn overlong_run_is_rejected() {
        // color run longer than the whole image
        let src = [0x60 | 31, 0xEF, 0xBE];
        let mut dst = Vec::new();
        assert!(matches!(
            decompress(&src, &mut dst, 2, 2, 16),
            Err(RleError::DestinationOverflow { .. })
        ));
    }

    #[test]
    fn truncated_source_is_rejected() {
        let src = [0x60 | 4, 0xEF];
        let mut dst = Vec::new();
        assert!(matches!(
            decompress(&src, &mut dst, 2, 2, 16),
            Err(RleError::SourceExhausted { .. })
        ));
    }
}
