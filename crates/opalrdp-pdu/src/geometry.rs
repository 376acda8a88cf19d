//! Rectangles as RDP encodes them: four little-endian u16 edges, with either
//! inclusive (bitmap updates) or exclusive (surface commands) right/bottom
//! bounds.

use opalrdp_core::{ensure_fixed_part_size, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor};

/// Generates a rectangle type; `$slack` is what right/bottom carry beyond
/// the last covered pixel (1 for inclusive bounds, 0 for exclusive).
macro_rules! rectangle {
    ($ty:ident, $slack:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        pub struct $ty {
            pub left: u16,
            pub top: u16,
            pub right: u16,
            pub bottom: u16,
        }

        impl $ty {
            const NAME: &'static str = stringify!($ty);

            const FIXED_PART_SIZE: usize = 2 * 4;

            pub const ENCODED_SIZE: usize = Self::FIXED_PART_SIZE;

            pub fn width(&self) -> u16 {
                self.right - self.left + $slack
            }

            pub fn height(&self) -> u16 {
                self.bottom - self.top + $slack
            }
        }

        impl Encode for $ty {
            fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
                ensure_fixed_part_size!(in: dst);

                for edge in [self.left, self.top, self.right, self.bottom] {
                    dst.write_u16(edge);
                }

                Ok(())
            }

            fn name(&self) -> &'static str {
                Self::NAME
            }

            fn size(&self) -> usize {
                Self::FIXED_PART_SIZE
            }
        }

        impl<'de> Decode<'de> for $ty {
            fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
                ensure_fixed_part_size!(in: src);

                Ok(Self {
                    left: src.read_u16(),
                    top: src.read_u16(),
                    right: src.read_u16(),
                    bottom: src.read_u16(),
                })
            }
        }
    };
}

rectangle!(InclusiveRectangle, 1, "Rectangle whose right/bottom edges are covered pixels.");
rectangle!(ExclusiveRectangle, 0, "Rectangle whose right/bottom edges sit one past the covered pixels.");

impl InclusiveRectangle {
    pub fn union(&self, other: &Self) -> Self {
        Self {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}
