//! The decoded image: the in-memory framebuffer the display pipeline draws
//! into. It doubles as the bitmap sink of the session — rectangles arrive
//! with their raw pixels and are stored at the framebuffer depth.

use opalrdp_pdu::geometry::InclusiveRectangle;

/// Receives decoded bitmap rectangles.
pub trait BitmapSink {
    /// Draws `pixels` (top-down rows, `bits_per_pixel` deep) at the given
    /// destination.
    fn draw_rectangle(&mut self, x: u16, y: u16, width: u16, height: u16, bits_per_pixel: u16, pixels: &[u8]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    width: u16,
    height: u16,
    bits_per_pixel: u16,
    data: Vec<u8>,
}

impl DecodedImage {
    pub fn new(width: u16, height: u16, bits_per_pixel: u16) -> Self {
        let bytes_per_pixel = usize::from(bits_per_pixel).div_ceil(8);

        Self {
            width,
            height,
            bits_per_pixel,
            data: vec![0; usize::from(width) * usize::from(height) * bytes_per_pixel],
        }
    }

    pub fn bits_per_pixel(&self) -> u16 {
        self.bits_per_pixel
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn bytes_per_pixel(&self) -> usize {
        usize::from(self.bits_per_pixel).div_ceil(8)
    }

    /// Applies a bitmap-update rectangle, whose rows arrive bottom-up.
    pub fn apply_bottom_up_bitmap(&mut self, rectangle: &InclusiveRectangle, bits_per_pixel: u16, pixels: &[u8]) {
        let width = usize::from(rectangle.width());
        let height = usize::from(rectangle.height());
        let bpp = usize::from(bits_per_pixel).div_ceil(8);

        if bits_per_pixel != self.bits_per_pixel {
            warn!(
                bits_per_pixel,
                framebuffer = self.bits_per_pixel,
                "Dropping bitmap with mismatched color depth"
            );
            return;
        }

        if pixels.len() < width * height * bpp {
            warn!("Dropping truncated bitmap rectangle");
            return;
        }

        let row_len = width * bpp;
        for row in 0..height {
            // bottom-up source: the first source row is the bottom of the rectangle
            let src_offset = row * row_len;
            let dst_y = usize::from(rectangle.top) + (height - row - 1);
            self.put_row(usize::from(rectangle.left), dst_y, &pixels[src_offset..src_offset + row_len]);
        }
    }

    fn put_row(&mut self, x: usize, y: usize, row: &[u8]) {
        let bpp = self.bytes_per_pixel();
        let fb_row_len = usize::from(self.width) * bpp;

        if y >= usize::from(self.height) {
            return;
        }

        let offset = y * fb_row_len + x * bpp;
        let available = self.data.len().saturating_sub(offset);
        let to_copy = row.len().min(available).min(fb_row_len.saturating_sub(x * bpp));

        self.data[offset..offset + to_copy].copy_from_slice(&row[..to_copy]);
    }

    /// Returns the stored bytes of a rectangle, top-down.
    pub fn rectangle_bytes(&self, rectangle: &InclusiveRectangle) -> Vec<u8> {
        let bpp = self.bytes_per_pixel();
        let fb_row_len = usize::from(self.width) * bpp;
        let row_len = usize::from(rectangle.width()) * bpp;

        let mut bytes = Vec::with_capacity(row_len * usize::from(rectangle.height()));
        for y in rectangle.top..=rectangle.bottom {
            let offset = usize::from(y) * fb_row_len + usize::from(rectangle.left) * bpp;
            bytes.extend_from_slice(&self.data[offset..offset + row_len]);
        }

        bytes
    }
}

impl BitmapSink for DecodedImage {
    fn draw_rectangle(&mut self, x: u16, y: u16, width: u16, height: u16, bits_per_pixel: u16, pixels: &[u8]) {
        if bits_per_pixel != self.bits_per_pixel {
            warn!(
                bits_per_pixel,
                framebuffer = self.bits_per_pixel,
                "Dropping rectangle with mismatched color depth"
            );
            return;
        }

        let bpp = self.bytes_per_pixel();
        let row_len = usize::from(width) * bpp;

        for row in 0..usize::from(height) {
            let src_offset = row * row_len;
            if src_offset + row_len > pixels.len() {
                break;
            }
            self.put_row(usize::from(x), usize::from(y) + row, &pixels[src_offset..src_offset + row_len]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bottom_up_rows_are_flipped() {
        let mut image = DecodedImage::new(4, 4, 16);

        let rect = InclusiveRectangle {
            left: 0,
            top: 0,
            right: 1,
            bottom: 1,
        };
        image.apply_bottom_up_bitmap(&rect, 16, &[1, 2, 3, 4, 5, 6, 7, 8]);

        // the first source row lands at the bottom of the rectangle
        assert_eq!(image.rectangle_bytes(&rect), [5, 6, 7, 8, 1, 2, 3, 4]);
    }

    #[test]
    fn top_down_draw_is_stored_verbatim() {
        let mut image = DecodedImage::new(4, 4, 16);

        image.draw_rectangle(1, 1, 2, 2, 16, &[1, 2, 3, 4, 5, 6, 7, 8]);

        let rect = InclusiveRectangle {
            left: 1,
            top: 1,
            right: 2,
            bottom: 2,
        };
        assert_eq!(image.rectangle_bytes(&rect), [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn mismatched_depth_is_dropped() {
        let mut image = DecodedImage::new(2, 2, 16);
        let before = image.data().to_vec();

        image.draw_rectangle(0, 0, 2, 2, 24, &[0xFF; 12]);

        assert_eq!(image.data(), before);
    }
}
