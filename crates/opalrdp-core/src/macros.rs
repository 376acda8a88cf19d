//! Helper macros for PDU encoding and decoding.
//!
//! All of these are exported and available to dependent crates.

/// Checks that the cursor holds at least `size` bytes, or returns a
/// "not enough bytes" error built for the surrounding `Decode`/`Encode` impl.
#[macro_export]
macro_rules! ensure_size {
    (ctx: $ctx:expr, in: $buf:ident, size: $expected:expr) => {{
        let received = $buf.len();
        let expected = $expected;
        if received < expected {
            return Err($crate::not_enough_bytes_err($ctx, received, expected));
        }
    }};
    (in: $buf:ident, size: $expected:expr) => {{
        $crate::ensure_size!(ctx: Self::NAME, in: $buf, size: $expected)
    }};
}

#[macro_export]
macro_rules! ensure_fixed_part_size {
    (in: $buf:ident) => {{
        $crate::ensure_size!(ctx: Self::NAME, in: $buf, size: Self::FIXED_PART_SIZE)
    }};
}

/// Converts a length into a narrower wire integer, failing with an
/// "invalid field" error instead of truncating.
#[macro_export]
macro_rules! cast_length {
    (ctx: $ctx:expr, $field:expr, $len:expr) => {{
        $len.try_into()
            .map_err(|_| $crate::invalid_field_err($ctx, $field, "too large"))
    }};
    ($field:expr, $len:expr) => {{
        $crate::cast_length!(ctx: Self::NAME, $field, $len)
    }};
}

#[macro_export]
macro_rules! invalid_field_err {
    (ctx: $ctx:expr, $field:expr, $reason:expr $(,)?) => {
        $crate::invalid_field_err($ctx, $field, $reason)
    };
    ($field:expr, $reason:expr $(,)?) => {
        $crate::invalid_field_err(Self::NAME, $field, $reason)
    };
}

#[macro_export]
macro_rules! unexpected_message_type_err {
    ($ctx:expr, $got:expr $(,)?) => {
        $crate::unexpected_message_type_err($ctx, $got)
    };
    ($got:expr $(,)?) => {
        $crate::unexpected_message_type_err(Self::NAME, $got)
    };
}

#[macro_export]
macro_rules! unsupported_version_err {
    ($ctx:expr, $got:expr $(,)?) => {
        $crate::unsupported_version_err($ctx, $got)
    };
}

#[macro_export]
macro_rules! other_err {
    ($ctx:expr, source: $source:expr $(,)?) => {
        $crate::other_err_with_source($ctx, "", $source)
    };
    (ctx: $ctx:expr, $description:expr $(,)?) => {
        $crate::other_err($ctx, $description)
    };
    ($description:expr $(,)?) => {
        $crate::other_err(Self::NAME, $description)
    };
}

/// Skips `n` bytes of padding when reading.
#[macro_export]
macro_rules! read_padding {
    ($src:ident, $n:expr) => {
        $src.advance($n)
    };
}

/// Emits `n` zero bytes of padding when writing.
#[macro_export]
macro_rules! write_padding {
    ($dst:ident, $n:expr) => {
        for _ in 0..$n {
            $dst.write_u8(0);
        }
    };
}

/// Asserts that the traits support dynamic dispatch.
///
/// From <https://docs.rs/static_assertions/1.1.0/src/static_assertions/assert_obj_safe.rs.html#72-76>
#[macro_export]
macro_rules! assert_obj_safe {
    ($($xs:path),+ $(,)?) => {
        $(const _: Option<&dyn $xs> = None;)+
    };
}

/// Asserts that the type implements _all_ of the given traits.
///
/// From <https://docs.rs/static_assertions/1.1.0/src/static_assertions/assert_impl.rs.html#113-121>
#[macro_export]
macro_rules! assert_impl {
    ($type:ty: $($trait:path),+ $(,)?) => {
        const _: fn() = || {
            fn assert_impl_all<T: ?Sized $(+ $trait)+>() {}
            assert_impl_all::<$type>();
        };
    };
}
