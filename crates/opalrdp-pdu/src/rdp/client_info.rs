//! Client Info PDU (TS_INFO_PACKET + TS_EXTENDED_INFO_PACKET).

use bitflags::bitflags;
use opalrdp_core::{
    cast_length, ensure_fixed_part_size, ensure_size, read_padding, write_padding, Decode, DecodeResult, Encode,
    EncodeResult, ReadCursor, WriteCursor,
};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use crate::utf16;

const TIMEZONE_FIELD_SIZE: usize = 172;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ClientInfoFlags: u32 {
        const MOUSE = 0x0000_0001;
        const DISABLE_CTRL_ALT_DEL = 0x0000_0002;
        const AUTOLOGON = 0x0000_0008;
        const UNICODE = 0x0000_0010;
        const MAXIMIZE_SHELL = 0x0000_0020;
        const LOGON_NOTIFY = 0x0000_0040;
        const COMPRESSION = 0x0000_0080;
        const ENABLE_WINDOWS_KEY = 0x0000_0100;
        const REMOTE_CONSOLE_AUDIO = 0x0000_2000;
        const FORCE_ENCRYPTED_CS_PDU = 0x0000_4000;
        const RAIL = 0x0000_8000;
        const LOGON_ERRORS = 0x0001_0000;
        const MOUSE_HAS_WHEEL = 0x0002_0000;
        const PASSWORD_IS_SC_PIN = 0x0004_0000;
        const NO_AUDIO_PLAYBACK = 0x0008_0000;
        const USING_SAVED_CREDS = 0x0010_0000;
        const AUDIO_CAPTURE = 0x0020_0000;
        const VIDEO_DISABLE = 0x0040_0000;
        const HIDEF_RAIL_SUPPORTED = 0x0200_0000;
    }
}

/// Bulk compression algorithm advertised in the Client Info flags
/// (and echoed in every compressed ShareData/FastPath header).
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum CompressionType {
    K8 = 0,
    K64 = 1,
    Rdp6 = 2,
    Rdp61 = 3,
}

impl CompressionType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

const COMPRESSION_TYPE_SHIFT: u32 = 9;
const COMPRESSION_TYPE_MASK: u32 = 0x0000_1E00;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct PerformanceFlags: u32 {
        const DISABLE_WALLPAPER = 0x0000_0001;
        const DISABLE_FULLWINDOWDRAG = 0x0000_0002;
        const DISABLE_MENUANIMATIONS = 0x0000_0004;
        const DISABLE_THEMING = 0x0000_0008;
        const DISABLE_CURSOR_SHADOW = 0x0000_0020;
        const DISABLE_CURSORSETTINGS = 0x0000_0040;
        const ENABLE_FONT_SMOOTHING = 0x0000_0080;
        const ENABLE_DESKTOP_COMPOSITION = 0x0000_0100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressFamily(pub u16);

impl AddressFamily {
    pub const INET: Self = Self(0x0002);
    pub const INET_6: Self = Self(0x0017);
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub domain: Option<String>,
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // the password is deliberately not printed
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

/// TS_EXTENDED_INFO_PACKET, trimmed to the fields this client fills in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedClientInfo {
    pub address_family: AddressFamily,
    pub address: String,
    pub dir: String,
    pub performance_flags: PerformanceFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub credentials: Credentials,
    pub code_page: u32,
    pub flags: ClientInfoFlags,
    pub compression_type: CompressionType,
    pub alternate_shell: String,
    pub work_dir: String,
    pub extra_info: ExtendedClientInfo,
}

impl ClientInfo {
    const NAME: &'static str = "ClientInfo";

    const FIXED_PART_SIZE: usize = 4 /* codePage */ + 4 /* flags */ + 2 * 5 /* cb fields */;

    /// Domain, user name, password, alternate shell and working directory,
    /// in their wire order.
    fn string_fields(&self) -> [&str; 5] {
        [
            self.credentials.domain.as_deref().unwrap_or(""),
            &self.credentials.username,
            &self.credentials.password,
            &self.alternate_shell,
            &self.work_dir,
        ]
    }
}

impl Encode for ClientInfo {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let flags = self.flags.bits() | (u32::from(self.compression_type.as_u8()) << COMPRESSION_TYPE_SHIFT);

        dst.write_u32(self.code_page);
        dst.write_u32(flags);

        // cb fields hold the string byte lengths excluding the terminator
        for field in self.string_fields() {
            dst.write_u16(cast_length!("cbField", field.encode_utf16().count() * 2)?);
        }
        for field in self.string_fields() {
            utf16::write_nul_terminated_utf16(dst, field);
        }

        dst.write_u16(self.extra_info.address_family.0);
        dst.write_u16(cast_length!(
            "cbClientAddress",
            utf16::sizeof_nul_terminated_utf16(&self.extra_info.address)
        )?);
        utf16::write_nul_terminated_utf16(dst, &self.extra_info.address);
        dst.write_u16(cast_length!(
            "cbClientDir",
            utf16::sizeof_nul_terminated_utf16(&self.extra_info.dir)
        )?);
        utf16::write_nul_terminated_utf16(dst, &self.extra_info.dir);

        write_padding!(dst, TIMEZONE_FIELD_SIZE);
        dst.write_u32(0); // clientSessionId
        dst.write_u32(self.extra_info.performance_flags.bits());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
            + self
                .string_fields()
                .iter()
                .map(|field| utf16::sizeof_nul_terminated_utf16(field))
                .sum::<usize>()
            + 2 /* addressFamily */
            + 2 /* cbClientAddress */
            + utf16::sizeof_nul_terminated_utf16(&self.extra_info.address)
            + 2 /* cbClientDir */
            + utf16::sizeof_nul_terminated_utf16(&self.extra_info.dir)
            + TIMEZONE_FIELD_SIZE
            + 4 /* clientSessionId */
            + 4 /* performanceFlags */
    }
}

impl<'de> Decode<'de> for ClientInfo {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let code_page = src.read_u32();
        let flags_raw = src.read_u32();

        let flags = ClientInfoFlags::from_bits_truncate(flags_raw);
        let compression_type = CompressionType::from_u8(((flags_raw & COMPRESSION_TYPE_MASK) >> COMPRESSION_TYPE_SHIFT) as u8)
            .unwrap_or(CompressionType::K8);

        let mut field_lengths = [0usize; 5];
        for length in &mut field_lengths {
            *length = usize::from(src.read_u16());
        }

        // each cb excludes the mandatory two-byte terminator
        ensure_size!(in: src, size: field_lengths.iter().sum::<usize>() + 5 * 2);

        let [domain, username, password, alternate_shell, work_dir] =
            field_lengths.map(|length| utf16::read_utf16(src, length + 2));

        ensure_size!(in: src, size: 2 + 2);
        let address_family = AddressFamily(src.read_u16());
        let cb_client_address = usize::from(src.read_u16());
        ensure_size!(in: src, size: cb_client_address);
        let address = utf16::read_utf16(src, cb_client_address);

        ensure_size!(in: src, size: 2);
        let cb_client_dir = usize::from(src.read_u16());
        ensure_size!(in: src, size: cb_client_dir);
        let dir = utf16::read_utf16(src, cb_client_dir);

        let performance_flags = if src.len() >= TIMEZONE_FIELD_SIZE + 8 {
            read_padding!(src, TIMEZONE_FIELD_SIZE);
            read_padding!(src, 4); // clientSessionId
            PerformanceFlags::from_bits_truncate(src.read_u32())
        } else {
            PerformanceFlags::empty()
        };

        Ok(Self {
            credentials: Credentials {
                username,
                password,
                domain: if domain.is_empty() { None } else { Some(domain) },
            },
            code_page,
            flags,
            compression_type,
            alternate_shell,
            work_dir,
            extra_info: ExtendedClientInfo {
                address_family,
                address,
                dir,
                performance_flags,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use opalrdp_core::{decode, encode_vec};

    use super::*;

    #[test]
    fn round_trip() {
        let info = ClientInfo {
            credentials: Credentials {
                username: "jdoe".to_owned(),
                password: "hunter2".to_owned(),
                domain: Some("CONTOSO".to_owned()),
            },
            code_page: 0,
            flags: ClientInfoFlags::MOUSE | ClientInfoFlags::UNICODE | ClientInfoFlags::LOGON_ERRORS,
            compression_type: CompressionType::K64,
            alternate_shell: String::new(),
            work_dir: String::new(),
            extra_info: ExtendedClientInfo {
                address_family: AddressFamily::INET,
                address: "192.0.2.7".to_owned(),
                dir: "C:\\client".to_owned(),
                performance_flags: PerformanceFlags::DISABLE_WALLPAPER,
            },
        };

        let encoded = encode_vec(&info).unwrap();
        assert_eq!(encoded.len(), info.size());

        let decoded = decode::<ClientInfo>(&encoded).unwrap();
        assert_eq!(decoded, info);
    }
}
