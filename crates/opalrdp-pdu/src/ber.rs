//! Minimal BER (X.690) subset used by the MCS Connect-Initial/Response pair.

use opalrdp_core::{
    cast_length, ensure_size, invalid_field_err, DecodeResult, EncodeResult, ReadCursor, WriteCursor,
};

const NAME: &str = "ber";

#[repr(u8)]
enum Pc {
    Primitive = 0x00,
    Construct = 0x20,
}

#[repr(u8)]
enum Class {
    Universal = 0x00,
    Application = 0x40,
}

#[repr(u8)]
enum Tag {
    Boolean = 0x01,
    Integer = 0x02,
    OctetString = 0x04,
    Enumerated = 0x0A,
    Sequence = 0x10,
}

const TAG_MASK: u8 = 0x1F;

pub(crate) const SIZEOF_ENUMERATED: usize = 3;
pub(crate) const SIZEOF_BOOL: usize = 3;

pub(crate) fn sizeof_length(length: u16) -> usize {
    if length > 0xFF {
        3
    } else if length > 0x7F {
        2
    } else {
        1
    }
}

pub(crate) fn sizeof_application_tag(tagnum: u8, length: u16) -> usize {
    let tag_len = if tagnum > 0x1E { 2 } else { 1 };

    sizeof_length(length) + tag_len
}

pub(crate) fn sizeof_sequence_tag(length: u16) -> usize {
    1 + sizeof_length(length)
}

pub(crate) fn sizeof_octet_string(length: u16) -> usize {
    1 + sizeof_length(length) + usize::from(length)
}

pub(crate) fn sizeof_integer(value: u32) -> usize {
    if value < 0x0000_0080 {
        3
    } else if value < 0x0000_8000 {
        4
    } else if value < 0x0080_0000 {
        5
    } else {
        6
    }
}

fn write_length(dst: &mut WriteCursor<'_>, length: u16) -> EncodeResult<usize> {
    ensure_size!(ctx: NAME, in: dst, size: sizeof_length(length));

    if length > 0xFF {
        dst.write_u8(0x82);
        dst.write_u16_be(length);
        Ok(3)
    } else if length > 0x7F {
        dst.write_u8(0x81);
        dst.write_u8(length as u8);
        Ok(2)
    } else {
        dst.write_u8(length as u8);
        Ok(1)
    }
}

fn read_length(src: &mut ReadCursor<'_>) -> DecodeResult<u16> {
    ensure_size!(ctx: NAME, in: src, size: 1);
    let byte = src.read_u8();

    if byte & 0x80 != 0 {
        match byte & !0x80 {
            1 => {
                ensure_size!(ctx: NAME, in: src, size: 1);
                Ok(u16::from(src.read_u8()))
            }
            2 => {
                ensure_size!(ctx: NAME, in: src, size: 2);
                Ok(src.read_u16_be())
            }
            _ => Err(invalid_field_err(NAME, "length", "long-form length over 2 bytes")),
        }
    } else {
        Ok(u16::from(byte))
    }
}

fn write_universal_tag(dst: &mut WriteCursor<'_>, tag: Tag, pc: Pc) -> EncodeResult<usize> {
    ensure_size!(ctx: NAME, in: dst, size: 1);

    let identifier = Class::Universal as u8 | pc as u8 | (TAG_MASK & tag as u8);
    dst.write_u8(identifier);

    Ok(1)
}

fn read_universal_tag(src: &mut ReadCursor<'_>, tag: Tag, pc: Pc) -> DecodeResult<()> {
    ensure_size!(ctx: NAME, in: src, size: 1);

    let identifier = src.read_u8();

    if identifier != Class::Universal as u8 | pc as u8 | (TAG_MASK & tag as u8) {
        return Err(invalid_field_err(NAME, "identifier", "invalid universal tag identifier"));
    }

    Ok(())
}

pub(crate) fn write_sequence_tag(dst: &mut WriteCursor<'_>, length: u16) -> EncodeResult<usize> {
    write_universal_tag(dst, Tag::Sequence, Pc::Construct)?;

    write_length(dst, length).map(|length| length + 1)
}

pub(crate) fn read_sequence_tag(src: &mut ReadCursor<'_>) -> DecodeResult<u16> {
    ensure_size!(ctx: NAME, in: src, size: 1);
    let identifier = src.read_u8();

    if identifier != Class::Universal as u8 | Pc::Construct as u8 | (TAG_MASK & Tag::Sequence as u8) {
        Err(invalid_field_err(NAME, "identifier", "invalid sequence tag identifier"))
    } else {
        read_length(src)
    }
}

pub(crate) fn write_application_tag(dst: &mut WriteCursor<'_>, tagnum: u8, length: u16) -> EncodeResult<usize> {
    ensure_size!(ctx: NAME, in: dst, size: sizeof_application_tag(tagnum, length));

    let taglen = if tagnum > 0x1E {
        dst.write_u8(Class::Application as u8 | Pc::Construct as u8 | TAG_MASK);
        dst.write_u8(tagnum);
        2
    } else {
        dst.write_u8(Class::Application as u8 | Pc::Construct as u8 | (TAG_MASK & tagnum));
        1
    };

    write_length(dst, length).map(|length| length + taglen)
}

pub(crate) fn read_application_tag(src: &mut ReadCursor<'_>, tagnum: u8) -> DecodeResult<u16> {
    ensure_size!(ctx: NAME, in: src, size: 1);
    let identifier = src.read_u8();

    if tagnum > 0x1E {
        if identifier != Class::Application as u8 | Pc::Construct as u8 | TAG_MASK {
            return Err(invalid_field_err(NAME, "identifier", "invalid application tag identifier"));
        }
        ensure_size!(ctx: NAME, in: src, size: 1);
        if src.read_u8() != tagnum {
            return Err(invalid_field_err(NAME, "tagnum", "invalid application tag number"));
        }
    } else if identifier != Class::Application as u8 | Pc::Construct as u8 | (TAG_MASK & tagnum) {
        return Err(invalid_field_err(NAME, "identifier", "invalid application tag identifier"));
    }

    read_length(src)
}

pub(crate) fn write_enumerated(dst: &mut WriteCursor<'_>, enumerated: u8) -> EncodeResult<usize> {
    let mut size = 0;
    size += write_universal_tag(dst, Tag::Enumerated, Pc::Primitive)?;
    size += write_length(dst, 1)?;
    ensure_size!(ctx: NAME, in: dst, size: 1);
    dst.write_u8(enumerated);
    size += 1;

    Ok(size)
}

pub(crate) fn read_enumerated(src: &mut ReadCursor<'_>, count: u8) -> DecodeResult<u8> {
    read_universal_tag(src, Tag::Enumerated, Pc::Primitive)?;

    let length = read_length(src)?;
    if length != 1 {
        return Err(invalid_field_err(NAME, "len", "invalid enumerated length"));
    }

    ensure_size!(ctx: NAME, in: src, size: 1);
    let enumerated = src.read_u8();
    if enumerated >= count {
        return Err(invalid_field_err(NAME, "enumerated", "invalid enumerated value"));
    }

    Ok(enumerated)
}

pub(crate) fn write_integer(dst: &mut WriteCursor<'_>, value: u32) -> EncodeResult<usize> {
    write_universal_tag(dst, Tag::Integer, Pc::Primitive)?;

    // sizeof_integer counts the tag and length bytes too
    let width = sizeof_integer(value) - 2;
    write_length(dst, width as u16)?;
    ensure_size!(ctx: NAME, in: dst, size: width);
    for shift in (0..width).rev() {
        dst.write_u8((value >> (shift * 8)) as u8);
    }

    Ok(2 + width)
}

pub(crate) fn read_integer(src: &mut ReadCursor<'_>) -> DecodeResult<u32> {
    read_universal_tag(src, Tag::Integer, Pc::Primitive)?;
    let length = read_length(src)?;

    if !(1..=4).contains(&length) {
        return Err(invalid_field_err(NAME, "len", "invalid integer length"));
    }

    ensure_size!(ctx: NAME, in: src, size: usize::from(length));
    let mut value = 0u32;
    for _ in 0..length {
        value = (value << 8) | u32::from(src.read_u8());
    }

    Ok(value)
}

pub(crate) fn write_bool(dst: &mut WriteCursor<'_>, value: bool) -> EncodeResult<usize> {
    let mut size = 0;
    size += write_universal_tag(dst, Tag::Boolean, Pc::Primitive)?;
    size += write_length(dst, 1)?;

    ensure_size!(ctx: NAME, in: dst, size: 1);
    dst.write_u8(if value { 0xFF } else { 0x00 });
    size += 1;

    Ok(size)
}

pub(crate) fn read_bool(src: &mut ReadCursor<'_>) -> DecodeResult<bool> {
    read_universal_tag(src, Tag::Boolean, Pc::Primitive)?;
    let length = read_length(src)?;

    if length != 1 {
        return Err(invalid_field_err(NAME, "len", "invalid boolean length"));
    }

    ensure_size!(ctx: NAME, in: src, size: 1);
    Ok(src.read_u8() != 0)
}

pub(crate) fn write_octet_string(dst: &mut WriteCursor<'_>, value: &[u8]) -> EncodeResult<usize> {
    let tag_size = write_octet_string_tag(dst, cast_length!(ctx: NAME, "len", value.len())?)?;
    ensure_size!(ctx: NAME, in: dst, size: value.len());
    dst.write_slice(value);
    Ok(tag_size + value.len())
}

pub(crate) fn write_octet_string_tag(dst: &mut WriteCursor<'_>, length: u16) -> EncodeResult<usize> {
    write_universal_tag(dst, Tag::OctetString, Pc::Primitive)?;
    write_length(dst, length).map(|length| length + 1)
}

pub(crate) fn read_octet_string(src: &mut ReadCursor<'_>) -> DecodeResult<Vec<u8>> {
    let length = usize::from(read_octet_string_tag(src)?);

    ensure_size!(ctx: NAME, in: src, size: length);
    let buffer = src.read_slice(length);

    Ok(buffer.into())
}

pub(crate) fn read_octet_string_tag(src: &mut ReadCursor<'_>) -> DecodeResult<u16> {
    read_universal_tag(src, Tag::OctetString, Pc::Primitive)?;
    read_length(src)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trip() {
        for value in [0u32, 0x7f, 0x80, 0x7fff, 0x8000, 0x7f_ffff, 0x80_0000, 0x1234_5678] {
            let mut buf = [0; 6];
            let mut dst = WriteCursor::new(&mut buf);
            let written = write_integer(&mut dst, value).unwrap();
            assert_eq!(written, sizeof_integer(value));

            let mut src = ReadCursor::new(&buf[..written]);
            assert_eq!(read_integer(&mut src).unwrap(), value);
        }
    }

    #[test]
    fn primitive_round_trips() {
        let mut buf = [0; 16];

        let mut dst = WriteCursor::new(&mut buf);
        write_bool(&mut dst, true).unwrap();
        assert!(read_bool(&mut ReadCursor::new(&buf)).unwrap());

        let mut dst = WriteCursor::new(&mut buf);
        let written = write_octet_string(&mut dst, b"opal").unwrap();
        assert_eq!(read_octet_string(&mut ReadCursor::new(&buf[..written])).unwrap(), b"opal");

        let mut dst = WriteCursor::new(&mut buf);
        let written = write_application_tag(&mut dst, 101, 0x1234).unwrap();
        assert_eq!(read_application_tag(&mut ReadCursor::new(&buf[..written]), 101).unwrap(), 0x1234);
    }
}
