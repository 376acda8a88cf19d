//! UTF-16LE string helpers for the fields that carry Windows wide strings.

use opalrdp_core::{ReadCursor, WriteCursor};

/// Writes `value` as UTF-16LE followed by a two-byte null terminator.
pub fn write_nul_terminated_utf16(dst: &mut WriteCursor<'_>, value: &str) {
    for unit in value.encode_utf16() {
        dst.write_u16(unit);
    }
    dst.write_u16(0);
}

/// Encoded size of `value` as null-terminated UTF-16LE.
pub fn sizeof_nul_terminated_utf16(value: &str) -> usize {
    (value.encode_utf16().count() + 1) * 2
}

/// Reads `byte_len` bytes of UTF-16LE, stopping the string at the first null.
pub fn read_utf16(src: &mut ReadCursor<'_>, byte_len: usize) -> String {
    let units = byte_len / 2;
    let mut buf = Vec::with_capacity(units);

    for _ in 0..units {
        let unit = src.read_u16();
        if unit == 0 {
            // consume the remainder of the field
            src.advance((units - buf.len() - 1) * 2);
            break;
        }
        buf.push(unit);
    }

    String::from_utf16_lossy(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_terminator() {
        let mut buf = [0u8; 32];
        let mut dst = WriteCursor::new(&mut buf);
        write_nul_terminated_utf16(&mut dst, "opal");
        let written = dst.pos();
        assert_eq!(written, sizeof_nul_terminated_utf16("opal"));

        let mut src = ReadCursor::new(&buf[..written]);
        assert_eq!(read_utf16(&mut src, written), "opal");
        assert!(src.is_empty());
    }
}
