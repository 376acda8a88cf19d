//! GCC conference-create blocks carried inside MCS Connect-Initial and
//! Connect-Response (T.124 framing around the RDP client/server data blocks).

use bitflags::bitflags;
use opalrdp_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, invalid_field_err_with_source, read_padding,
    write_padding, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};

use crate::{per, utf16};

// T.124 ConnectData key: the {0 0 20 124 0 1} object id, pre-encoded with
// its selector byte.
const CONNECT_DATA_KEY: [u8; 7] = [0x00, 0x05, 0x00, 0x14, 0x7C, 0x00, 0x01];

// conferenceCreateRequest up to the user-data octet string: the CHOICE, the
// userData selection, the single-digit conference name every RDP peer uses,
// and one user-data set tagged h221NonStandard with the "Duca"
// client-to-server key.
const CREATE_REQUEST_PRELUDE: [u8; 12] = [
    0x00, 0x08, 0x00, 0x10, 0x00, 0x01, 0xC0, 0x00, b'D', b'u', b'c', b'a',
];

// conferenceCreateResponse: the CHOICE byte, then (after the variable node
// id) tag 1, rt-successful, and one user-data set tagged h221NonStandard
// with the "McDn" server-to-client key.
const CREATE_RESPONSE_CHOICE: u8 = 0x14;
const CREATE_RESPONSE_TAIL: [u8; 10] = [0x01, 0x01, 0x00, 0x01, 0xC0, 0x00, b'M', b'c', b'D', b'n'];

const NODE_ID_BASE: u16 = 1001;

const USER_DATA_HEADER_SIZE: usize = 4;

const CLIENT_NAME_FIELD_SIZE: usize = 32;
const IME_FILE_NAME_FIELD_SIZE: usize = 64;
const DIG_PRODUCT_ID_FIELD_SIZE: usize = 64;

const CHANNEL_NAME_SIZE: usize = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
enum UserDataType {
    CsCore = 0xC001,
    CsSecurity = 0xC002,
    CsNet = 0xC003,
    ScCore = 0x0C01,
    ScSecurity = 0x0C02,
    ScNet = 0x0C03,
}

fn write_user_data_header(dst: &mut WriteCursor<'_>, data_type: UserDataType, block_size: usize) -> EncodeResult<()> {
    dst.write_u16(data_type as u16);
    dst.write_u16(cast_length!(ctx: "UserDataHeader", "length", block_size + USER_DATA_HEADER_SIZE)?);
    Ok(())
}

/// Eight-byte ASCII virtual channel name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelName {
    inner: [u8; CHANNEL_NAME_SIZE],
}

impl ChannelName {
    /// Creates a channel name from a string, truncating to seven characters
    /// so the trailing null always fits.
    pub fn from_static(name: &str) -> Self {
        let mut inner = [0; CHANNEL_NAME_SIZE];
        for (dst, src) in inner.iter_mut().zip(name.bytes().take(CHANNEL_NAME_SIZE - 1)) {
            *dst = src;
        }
        Self { inner }
    }

    pub fn from_bytes(bytes: [u8; CHANNEL_NAME_SIZE]) -> Self {
        Self { inner: bytes }
    }

    pub fn as_bytes(&self) -> &[u8; CHANNEL_NAME_SIZE] {
        &self.inner
    }

    pub fn as_str(&self) -> &str {
        let end = self.inner.iter().position(|&b| b == 0).unwrap_or(CHANNEL_NAME_SIZE);
        core::str::from_utf8(&self.inner[..end]).unwrap_or("")
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ChannelOptions: u32 {
        const INITIALIZED = 0x8000_0000;
        const ENCRYPT_RDP = 0x4000_0000;
        const ENCRYPT_SC = 0x2000_0000;
        const ENCRYPT_CS = 0x1000_0000;
        const PRI_HIGH = 0x0800_0000;
        const PRI_MED = 0x0400_0000;
        const PRI_LOW = 0x0200_0000;
        const COMPRESS_RDP = 0x0080_0000;
        const COMPRESS = 0x0040_0000;
        const SHOW_PROTOCOL = 0x0020_0000;
        const REMOTE_CONTROL_PERSISTENT = 0x0010_0000;
    }
}

/// CHANNEL_DEF: a static virtual channel the client wishes to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDef {
    pub name: ChannelName,
    pub options: ChannelOptions,
}

impl ChannelDef {
    const NAME: &'static str = "ChannelDef";

    const FIXED_PART_SIZE: usize = CHANNEL_NAME_SIZE + 4;
}

impl Encode for ChannelDef {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_slice(self.name.as_bytes());
        dst.write_u32(self.options.bits());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ChannelDef {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let name = ChannelName::from_bytes(src.read_array());
        let options = ChannelOptions::from_bits_truncate(src.read_u32());

        Ok(Self { name, options })
    }
}

/// TS_UD_CS_CORE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCoreData {
    pub version: RdpVersion,
    pub desktop_width: u16,
    pub desktop_height: u16,
    pub keyboard_layout: u32,
    pub client_build: u32,
    pub client_name: String,
    pub keyboard_type: u32,
    pub keyboard_subtype: u32,
    pub keyboard_functional_keys_count: u32,
    pub ime_file_name: String,
    pub high_color_depth: u16,
    pub supported_color_depths: SupportedColorDepths,
    pub early_capability_flags: ClientEarlyCapabilityFlags,
    pub dig_product_id: String,
    pub connection_type: u8,
    pub server_selected_protocol: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RdpVersion(pub u32);

impl RdpVersion {
    pub const V5_PLUS: Self = Self(0x0008_0004);
    pub const V10: Self = Self(0x0008_0005);
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct SupportedColorDepths: u16 {
        const BPP24 = 0x01;
        const BPP16 = 0x02;
        const BPP15 = 0x04;
        const BPP32 = 0x08;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ClientEarlyCapabilityFlags: u16 {
        const SUPPORT_ERR_INFO_PDU = 0x0001;
        const WANT_32_BPP_SESSION = 0x0002;
        const SUPPORT_STATUS_INFO_PDU = 0x0004;
        const STRONG_ASYMMETRIC_KEYS = 0x0008;
        const VALID_CONNECTION_TYPE = 0x0020;
        const SUPPORT_MONITOR_LAYOUT_PDU = 0x0040;
        const SUPPORT_NET_CHAR_AUTODETECT = 0x0080;
        const SUPPORT_DYN_VC_GFX_PROTOCOL = 0x0100;
        const SUPPORT_DYNAMIC_TIME_ZONE = 0x0200;
        const SUPPORT_HEARTBEAT_PDU = 0x0400;
        const SUPPORT_SKIP_CHANNELJOIN = 0x0800;
    }
}

const POST_BETA2_COLOR_DEPTH_8BPP: u16 = 0xCA01;
const SECURE_ACCESS_SEQUENCE_DEL: u16 = 0xAA03;

impl ClientCoreData {
    const NAME: &'static str = "ClientCoreData";

    const FIXED_PART_SIZE: usize = 4 /* version */ + 2 /* width */ + 2 /* height */
        + 2 /* colorDepth */ + 2 /* SASSequence */ + 4 /* kbdLayout */ + 4 /* build */
        + CLIENT_NAME_FIELD_SIZE + 4 /* kbdType */ + 4 /* kbdSubType */ + 4 /* kbdFnKeys */
        + IME_FILE_NAME_FIELD_SIZE;

    const OPTIONAL_TAIL_SIZE: usize = 2 /* postBeta2ColorDepth */ + 2 /* clientProductId */
        + 4 /* serialNumber */ + 2 /* highColorDepth */ + 2 /* supportedColorDepths */
        + 2 /* earlyCapabilityFlags */ + DIG_PRODUCT_ID_FIELD_SIZE + 1 /* connectionType */
        + 1 /* pad1octet */ + 4 /* serverSelectedProtocol */;

    fn write_fixed_utf16(dst: &mut WriteCursor<'_>, value: &str, field_size: usize) {
        let max_chars = field_size / 2 - 1;
        let mut written = 0;
        for unit in value.encode_utf16().take(max_chars) {
            dst.write_u16(unit);
            written += 2;
        }
        write_padding!(dst, field_size - written);
    }
}

impl Encode for ClientCoreData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.version.0);
        dst.write_u16(self.desktop_width);
        dst.write_u16(self.desktop_height);
        dst.write_u16(POST_BETA2_COLOR_DEPTH_8BPP); // ignored, high_color_depth wins
        dst.write_u16(SECURE_ACCESS_SEQUENCE_DEL);
        dst.write_u32(self.keyboard_layout);
        dst.write_u32(self.client_build);
        Self::write_fixed_utf16(dst, &self.client_name, CLIENT_NAME_FIELD_SIZE);
        dst.write_u32(self.keyboard_type);
        dst.write_u32(self.keyboard_subtype);
        dst.write_u32(self.keyboard_functional_keys_count);
        Self::write_fixed_utf16(dst, &self.ime_file_name, IME_FILE_NAME_FIELD_SIZE);

        dst.write_u16(POST_BETA2_COLOR_DEPTH_8BPP);
        dst.write_u16(1); // clientProductId
        dst.write_u32(0); // serialNumber
        dst.write_u16(self.high_color_depth);
        dst.write_u16(self.supported_color_depths.bits());
        dst.write_u16(self.early_capability_flags.bits());
        Self::write_fixed_utf16(dst, &self.dig_product_id, DIG_PRODUCT_ID_FIELD_SIZE);
        dst.write_u8(self.connection_type);
        write_padding!(dst, 1);
        dst.write_u32(self.server_selected_protocol);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + Self::OPTIONAL_TAIL_SIZE
    }
}

impl<'de> Decode<'de> for ClientCoreData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let version = RdpVersion(src.read_u32());
        let desktop_width = src.read_u16();
        let desktop_height = src.read_u16();
        read_padding!(src, 2); // colorDepth
        read_padding!(src, 2); // SASSequence
        let keyboard_layout = src.read_u32();
        let client_build = src.read_u32();
        let client_name = utf16::read_utf16(src, CLIENT_NAME_FIELD_SIZE);
        let keyboard_type = src.read_u32();
        let keyboard_subtype = src.read_u32();
        let keyboard_functional_keys_count = src.read_u32();
        let ime_file_name = utf16::read_utf16(src, IME_FILE_NAME_FIELD_SIZE);

        let mut data = Self {
            version,
            desktop_width,
            desktop_height,
            keyboard_layout,
            client_build,
            client_name,
            keyboard_type,
            keyboard_subtype,
            keyboard_functional_keys_count,
            ime_file_name,
            high_color_depth: 0,
            supported_color_depths: SupportedColorDepths::empty(),
            early_capability_flags: ClientEarlyCapabilityFlags::empty(),
            dig_product_id: String::new(),
            connection_type: 0,
            server_selected_protocol: 0,
        };

        if src.len() >= Self::OPTIONAL_TAIL_SIZE {
            read_padding!(src, 2); // postBeta2ColorDepth
            read_padding!(src, 2); // clientProductId
            read_padding!(src, 4); // serialNumber
            data.high_color_depth = src.read_u16();
            data.supported_color_depths = SupportedColorDepths::from_bits_truncate(src.read_u16());
            data.early_capability_flags = ClientEarlyCapabilityFlags::from_bits_truncate(src.read_u16());
            data.dig_product_id = utf16::read_utf16(src, DIG_PRODUCT_ID_FIELD_SIZE);
            data.connection_type = src.read_u8();
            read_padding!(src, 1);
            data.server_selected_protocol = src.read_u32();
        }

        Ok(data)
    }
}

/// TS_UD_CS_SEC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSecurityData {
    pub encryption_methods: u32,
    pub ext_encryption_methods: u32,
}

impl ClientSecurityData {
    const NAME: &'static str = "ClientSecurityData";

    const FIXED_PART_SIZE: usize = 4 + 4;

    pub fn no_security() -> Self {
        Self {
            encryption_methods: 0,
            ext_encryption_methods: 0,
        }
    }
}

impl Encode for ClientSecurityData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.encryption_methods);
        dst.write_u32(self.ext_encryption_methods);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ClientSecurityData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let encryption_methods = src.read_u32();
        let ext_encryption_methods = src.read_u32();

        Ok(Self {
            encryption_methods,
            ext_encryption_methods,
        })
    }
}

/// TS_UD_CS_NET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientNetworkData {
    pub channels: Vec<ChannelDef>,
}

impl ClientNetworkData {
    const NAME: &'static str = "ClientNetworkData";

    const FIXED_PART_SIZE: usize = 4 /* channelCount */;
}

impl Encode for ClientNetworkData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(cast_length!("channelCount", self.channels.len())?);

        for channel in &self.channels {
            channel.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.channels.len() * ChannelDef::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ClientNetworkData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let channel_count = src.read_u32() as usize;

        if channel_count > 31 {
            return Err(invalid_field_err!("channelCount", "too many static channels"));
        }

        let mut channels = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            channels.push(ChannelDef::decode(src)?);
        }

        Ok(Self { channels })
    }
}

/// The client-to-server GCC user data blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientGccBlocks {
    pub core: ClientCoreData,
    pub security: ClientSecurityData,
    pub network: Option<ClientNetworkData>,
}

impl ClientGccBlocks {
    const NAME: &'static str = "ClientGccBlocks";

    pub fn channel_names(&self) -> Vec<ChannelDef> {
        self.network.as_ref().map(|n| n.channels.clone()).unwrap_or_default()
    }
}

impl Encode for ClientGccBlocks {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        write_user_data_header(dst, UserDataType::CsCore, self.core.size())?;
        self.core.encode(dst)?;

        write_user_data_header(dst, UserDataType::CsSecurity, self.security.size())?;
        self.security.encode(dst)?;

        if let Some(network) = &self.network {
            write_user_data_header(dst, UserDataType::CsNet, network.size())?;
            network.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let mut size = USER_DATA_HEADER_SIZE * 2 + self.core.size() + self.security.size();

        if let Some(network) = &self.network {
            size += USER_DATA_HEADER_SIZE + network.size();
        }
        size
    }
}

impl<'de> Decode<'de> for ClientGccBlocks {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let mut core = None;
        let mut security = None;
        let mut network = None;

        while src.len() >= USER_DATA_HEADER_SIZE {
            let data_type = src.read_u16();
            let block_length = usize::from(src.read_u16());

            if block_length < USER_DATA_HEADER_SIZE {
                return Err(invalid_field_err!("length", "user data block shorter than its header"));
            }

            let body_length = block_length - USER_DATA_HEADER_SIZE;
            ensure_size!(in: src, size: body_length);
            let mut body = ReadCursor::new(src.read_slice(body_length));

            match data_type {
                t if t == UserDataType::CsCore as u16 => core = Some(ClientCoreData::decode(&mut body)?),
                t if t == UserDataType::CsSecurity as u16 => security = Some(ClientSecurityData::decode(&mut body)?),
                t if t == UserDataType::CsNet as u16 => network = Some(ClientNetworkData::decode(&mut body)?),
                // everything else (cluster, monitor, future blocks) is
                // skipped by its declared length
                _ => {}
            }
        }

        Ok(Self {
            core: core.ok_or_else(|| invalid_field_err!("csCore", "missing client core data"))?,
            security: security.ok_or_else(|| invalid_field_err!("csSecurity", "missing client security data"))?,
            network,
        })
    }
}

/// TS_UD_SC_CORE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerCoreData {
    pub version: RdpVersion,
    pub requested_protocols: Option<u32>,
    pub early_capability_flags: Option<ServerEarlyCapabilityFlags>,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ServerEarlyCapabilityFlags: u32 {
        const EDGE_ACTIONS_SUPPORTED_V1 = 0x0000_0001;
        const DYNAMIC_DST_SUPPORTED = 0x0000_0002;
        const EDGE_ACTIONS_SUPPORTED_V2 = 0x0000_0004;
        const SKIP_CHANNELJOIN_SUPPORTED = 0x0000_0008;
    }
}

impl ServerCoreData {
    const NAME: &'static str = "ServerCoreData";

    const FIXED_PART_SIZE: usize = 4 /* version */;
}

impl Encode for ServerCoreData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.version.0);

        if let Some(protocols) = self.requested_protocols {
            dst.write_u32(protocols);
        }
        if let Some(flags) = self.early_capability_flags {
            dst.write_u32(flags.bits());
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
            + self.requested_protocols.map_or(0, |_| 4)
            + self.early_capability_flags.map_or(0, |_| 4)
    }
}

impl<'de> Decode<'de> for ServerCoreData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let version = RdpVersion(src.read_u32());

        let requested_protocols = if src.len() >= 4 { Some(src.read_u32()) } else { None };
        let early_capability_flags = if src.len() >= 4 {
            Some(ServerEarlyCapabilityFlags::from_bits_truncate(src.read_u32()))
        } else {
            None
        };

        Ok(Self {
            version,
            requested_protocols,
            early_capability_flags,
        })
    }
}

/// TS_UD_SC_SEC1.
///
/// The certificate blob is kept opaque: certificate parsing and validation
/// happen outside the protocol core, which only needs the server random for
/// session key derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSecurityData {
    pub encryption_method: u32,
    pub encryption_level: u32,
    pub server_random: Option<Vec<u8>>,
    pub server_certificate: Vec<u8>,
}

impl ServerSecurityData {
    const NAME: &'static str = "ServerSecurityData";

    const FIXED_PART_SIZE: usize = 4 + 4;

    pub fn no_security() -> Self {
        Self {
            encryption_method: 0,
            encryption_level: 0,
            server_random: None,
            server_certificate: Vec::new(),
        }
    }
}

impl Encode for ServerSecurityData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.encryption_method);
        dst.write_u32(self.encryption_level);

        if self.encryption_method != 0 || self.encryption_level != 0 {
            let random_len = self.server_random.as_ref().map_or(0, |r| r.len());
            dst.write_u32(cast_length!("serverRandomLen", random_len)?);
            dst.write_u32(cast_length!("serverCertLen", self.server_certificate.len())?);
            if let Some(random) = &self.server_random {
                dst.write_slice(random);
            }
            dst.write_slice(&self.server_certificate);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let mut size = Self::FIXED_PART_SIZE;

        if self.encryption_method != 0 || self.encryption_level != 0 {
            size += 4 + 4 + self.server_random.as_ref().map_or(0, |r| r.len()) + self.server_certificate.len();
        }

        size
    }
}

impl<'de> Decode<'de> for ServerSecurityData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let encryption_method = src.read_u32();
        let encryption_level = src.read_u32();

        let (server_random, server_certificate) = if src.len() >= 8 {
            let random_len = src.read_u32() as usize;
            let cert_len = src.read_u32() as usize;

            ensure_size!(in: src, size: random_len + cert_len);

            let random = if random_len > 0 {
                Some(src.read_slice(random_len).to_vec())
            } else {
                None
            };
            let certificate = src.read_slice(cert_len).to_vec();

            (random, certificate)
        } else {
            (None, Vec::new())
        };

        Ok(Self {
            encryption_method,
            encryption_level,
            server_random,
            server_certificate,
        })
    }
}

/// TS_UD_SC_NET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNetworkData {
    pub io_channel: u16,
    pub channel_ids: Vec<u16>,
}

impl ServerNetworkData {
    const NAME: &'static str = "ServerNetworkData";

    const FIXED_PART_SIZE: usize = 2 /* MCSChannelId */ + 2 /* channelCount */;

    fn padding_size(&self) -> usize {
        self.channel_ids.len() % 2 * 2
    }
}

impl Encode for ServerNetworkData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(self.io_channel);
        dst.write_u16(cast_length!("channelCount", self.channel_ids.len())?);

        for channel_id in &self.channel_ids {
            dst.write_u16(*channel_id);
        }

        // channel array is padded to a multiple of four bytes
        write_padding!(dst, self.padding_size());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.channel_ids.len() * 2 + self.padding_size()
    }
}

impl<'de> Decode<'de> for ServerNetworkData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let io_channel = src.read_u16();
        let channel_count = usize::from(src.read_u16());

        ensure_size!(in: src, size: channel_count * 2);

        let mut channel_ids = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            channel_ids.push(src.read_u16());
        }

        Ok(Self {
            io_channel,
            channel_ids,
        })
    }
}

/// The server-to-client GCC user data blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerGccBlocks {
    pub core: ServerCoreData,
    pub security: ServerSecurityData,
    pub network: ServerNetworkData,
}

impl ServerGccBlocks {
    const NAME: &'static str = "ServerGccBlocks";

    pub fn channel_ids(&self) -> Vec<u16> {
        self.network.channel_ids.clone()
    }

    pub fn global_channel_id(&self) -> u16 {
        self.network.io_channel
    }
}

impl Encode for ServerGccBlocks {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        write_user_data_header(dst, UserDataType::ScCore, self.core.size())?;
        self.core.encode(dst)?;

        write_user_data_header(dst, UserDataType::ScNet, self.network.size())?;
        self.network.encode(dst)?;

        write_user_data_header(dst, UserDataType::ScSecurity, self.security.size())?;
        self.security.encode(dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        USER_DATA_HEADER_SIZE * 3 + self.core.size() + self.network.size() + self.security.size()
    }
}

impl<'de> Decode<'de> for ServerGccBlocks {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let mut core = None;
        let mut security = None;
        let mut network = None;

        while src.len() >= USER_DATA_HEADER_SIZE {
            let data_type = src.read_u16();
            let block_length = usize::from(src.read_u16());

            if block_length < USER_DATA_HEADER_SIZE {
                return Err(invalid_field_err!("length", "user data block shorter than its header"));
            }

            let body_length = block_length - USER_DATA_HEADER_SIZE;
            ensure_size!(in: src, size: body_length);
            let mut body = ReadCursor::new(src.read_slice(body_length));

            match data_type {
                t if t == UserDataType::ScCore as u16 => core = Some(ServerCoreData::decode(&mut body)?),
                t if t == UserDataType::ScSecurity as u16 => security = Some(ServerSecurityData::decode(&mut body)?),
                t if t == UserDataType::ScNet as u16 => network = Some(ServerNetworkData::decode(&mut body)?),
                _ => {}
            }
        }

        Ok(Self {
            core: core.ok_or_else(|| invalid_field_err!("scCore", "missing server core data"))?,
            security: security.ok_or_else(|| invalid_field_err!("scSecurity", "missing server security data"))?,
            network: network.ok_or_else(|| invalid_field_err!("scNet", "missing server network data"))?,
        })
    }
}

/// T.124 ConferenceCreateRequest wrapping the client GCC blocks.
///
/// The T.124 scaffolding around the blocks never varies between RDP peers,
/// so the framing is matched and emitted as pre-encoded byte runs instead of
/// being assembled element by element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConferenceCreateRequest {
    pub gcc_blocks: ClientGccBlocks,
}

impl ConferenceCreateRequest {
    const NAME: &'static str = "ConferenceCreateRequest";
}

fn expect_bytes(src: &mut ReadCursor<'_>, expected: &[u8], ctx: &'static str, field: &'static str) -> DecodeResult<()> {
    ensure_size!(ctx: ctx, in: src, size: expected.len());

    if src.read_slice(expected.len()) == expected {
        Ok(())
    } else {
        Err(invalid_field_err(ctx, field, "unexpected T.124 framing"))
    }
}

fn read_wrapped_length(src: &mut ReadCursor<'_>, ctx: &'static str, field: &'static str) -> DecodeResult<u16> {
    let (length, _) = per::read_length(src).map_err(|e| invalid_field_err_with_source(ctx, field, "PER", e))?;
    Ok(length)
}

impl Encode for ConferenceCreateRequest {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let blocks_size = self.gcc_blocks.size();

        dst.write_array(CONNECT_DATA_KEY);
        per::write_length(
            dst,
            cast_length!("connectPduLen", CREATE_REQUEST_PRELUDE.len() + blocks_size)?,
        );
        dst.write_array(CREATE_REQUEST_PRELUDE);
        per::write_length(dst, cast_length!("gccBlocksLen", blocks_size)?);
        self.gcc_blocks.encode(dst)
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let blocks_size = self.gcc_blocks.size();

        CONNECT_DATA_KEY.len()
            + per::sizeof_length((CREATE_REQUEST_PRELUDE.len() + blocks_size) as u16)
            + CREATE_REQUEST_PRELUDE.len()
            + per::sizeof_length(blocks_size as u16)
            + blocks_size
    }
}

impl<'de> Decode<'de> for ConferenceCreateRequest {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        expect_bytes(src, &CONNECT_DATA_KEY, Self::NAME, "ConnectData")?;
        let _connect_pdu_length = read_wrapped_length(src, Self::NAME, "connectPduLen")?;
        expect_bytes(src, &CREATE_REQUEST_PRELUDE, Self::NAME, "conferenceCreateRequest")?;
        let _blocks_length = read_wrapped_length(src, Self::NAME, "gccBlocksLen")?;

        Ok(Self {
            gcc_blocks: ClientGccBlocks::decode(src)?,
        })
    }
}

/// T.124 ConferenceCreateResponse wrapping the server GCC blocks.
///
/// Only the node id varies between the CHOICE byte and the fixed tail; a
/// result other than rt-successful fails the framing match, which is the
/// right outcome for a rejected conference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConferenceCreateResponse {
    pub user_id: u16,
    pub gcc_blocks: ServerGccBlocks,
}

impl ConferenceCreateResponse {
    const NAME: &'static str = "ConferenceCreateResponse";
}

impl Encode for ConferenceCreateResponse {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let blocks_size = self.gcc_blocks.size();
        let connect_pdu_size = 1 + 2 + CREATE_RESPONSE_TAIL.len() + blocks_size;

        dst.write_array(CONNECT_DATA_KEY);
        per::write_length(dst, cast_length!("connectPduLen", connect_pdu_size)?);
        dst.write_u8(CREATE_RESPONSE_CHOICE);
        per::write_u16(dst, self.user_id, NODE_ID_BASE)
            .map_err(|e| invalid_field_err_with_source(Self::NAME, "nodeId", "PER", e))?;
        dst.write_array(CREATE_RESPONSE_TAIL);
        per::write_length(dst, cast_length!("gccBlocksLen", blocks_size)?);
        self.gcc_blocks.encode(dst)
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let blocks_size = self.gcc_blocks.size();
        let connect_pdu_size = 1 + 2 + CREATE_RESPONSE_TAIL.len() + blocks_size;

        CONNECT_DATA_KEY.len()
            + per::sizeof_length(connect_pdu_size as u16)
            + 1
            + 2
            + CREATE_RESPONSE_TAIL.len()
            + per::sizeof_length(blocks_size as u16)
            + blocks_size
    }
}

impl<'de> Decode<'de> for ConferenceCreateResponse {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        expect_bytes(src, &CONNECT_DATA_KEY, Self::NAME, "ConnectData")?;
        let _connect_pdu_length = read_wrapped_length(src, Self::NAME, "connectPduLen")?;
        expect_bytes(src, &[CREATE_RESPONSE_CHOICE], Self::NAME, "conferenceCreateResponse")?;

        ensure_size!(ctx: Self::NAME, in: src, size: 2);
        let user_id = per::read_u16(src, NODE_ID_BASE)
            .map_err(|e| invalid_field_err_with_source(Self::NAME, "nodeId", "PER", e))?;

        expect_bytes(src, &CREATE_RESPONSE_TAIL, Self::NAME, "userData")?;
        let _blocks_length = read_wrapped_length(src, Self::NAME, "gccBlocksLen")?;

        Ok(Self {
            user_id,
            gcc_blocks: ServerGccBlocks::decode(src)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use opalrdp_core::{decode, encode_vec};

    use super::*;

    fn client_blocks() -> ClientGccBlocks {
        ClientGccBlocks {
            core: ClientCoreData {
                version: RdpVersion::V5_PLUS,
                desktop_width: 1280,
                desktop_height: 720,
                keyboard_layout: 0x409,
                client_build: 18363,
                client_name: "OPAL-CLIENT".to_owned(),
                keyboard_type: 4,
                keyboard_subtype: 0,
                keyboard_functional_keys_count: 12,
                ime_file_name: String::new(),
                high_color_depth: 16,
                supported_color_depths: SupportedColorDepths::BPP16,
                early_capability_flags: ClientEarlyCapabilityFlags::SUPPORT_ERR_INFO_PDU,
                dig_product_id: String::new(),
                connection_type: 6,
                server_selected_protocol: 1,
            },
            security: ClientSecurityData::no_security(),
            network: Some(ClientNetworkData {
                channels: vec![ChannelDef {
                    name: ChannelName::from_static("cliprdr"),
                    options: ChannelOptions::INITIALIZED | ChannelOptions::COMPRESS_RDP,
                }],
            }),
        }
    }

    #[test]
    fn conference_create_request_round_trip() {
        let request = ConferenceCreateRequest {
            gcc_blocks: client_blocks(),
        };

        let encoded = encode_vec(&request).unwrap();
        assert_eq!(encoded.len(), request.size());

        let decoded = decode::<ConferenceCreateRequest>(&encoded).unwrap();
        assert_eq!(decoded.gcc_blocks.core.desktop_width, 1280);
        assert_eq!(decoded.gcc_blocks.core.client_name, "OPAL-CLIENT");
        assert_eq!(decoded.gcc_blocks.channel_names().len(), 1);
    }

    fn server_blocks() -> ServerGccBlocks {
        ServerGccBlocks {
            core: ServerCoreData {
                version: RdpVersion::V5_PLUS,
                requested_protocols: Some(1),
                early_capability_flags: Some(ServerEarlyCapabilityFlags::EDGE_ACTIONS_SUPPORTED_V1),
            },
            security: ServerSecurityData {
                encryption_method: 1,
                encryption_level: 1,
                server_random: Some((0x40u8..0x60).collect()),
                server_certificate: Vec::new(),
            },
            network: ServerNetworkData {
                io_channel: 1003,
                channel_ids: vec![1004, 1005, 1006],
            },
        }
    }

    #[test]
    fn conference_create_response_round_trip() {
        let response = ConferenceCreateResponse {
            user_id: 1002,
            gcc_blocks: server_blocks(),
        };

        let encoded = encode_vec(&response).unwrap();
        assert_eq!(encoded.len(), response.size());

        let decoded = decode::<ConferenceCreateResponse>(&encoded).unwrap();
        assert_eq!(decoded.gcc_blocks.global_channel_id(), 1003);
        assert_eq!(decoded.gcc_blocks.channel_ids(), vec![1004, 1005, 1006]);
        assert_eq!(
            decoded.gcc_blocks.security.server_random.as_deref(),
            Some((0x40u8..0x60).collect::<Vec<_>>().as_slice())
        );
    }

    #[test]
    fn channel_name_is_null_padded() {
        let name = ChannelName::from_static("cliprdr");
        assert_eq!(name.as_bytes(), b"cliprdr\0");
        assert_eq!(name.as_str(), "cliprdr");
    }
}
