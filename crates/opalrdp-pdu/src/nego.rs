//! PDUs used during the Connection Initiation stage: the X.224 Connection
//! Request/Confirm pair carrying RDP negotiation structures.

use bitflags::bitflags;
use opalrdp_core::{
    cast_length, ensure_size, invalid_field_err, unexpected_message_type_err, DecodeResult, EncodeResult, ReadCursor,
    WriteCursor,
};

use crate::x224::{TpduCode, TpduHeader, TpktHeader, X224Pdu};

bitflags! {
    /// Flags indicating the security protocols supported by a peer, agreed on
    /// during the Connection Initiation phase (RDP_NEG_REQ requestedProtocols).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct SecurityProtocol: u32 {
        const SSL = 0x0000_0001;
        const HYBRID = 0x0000_0002;
        const RDSTLS = 0x0000_0004;
        const HYBRID_EX = 0x0000_0008;
    }
}

impl SecurityProtocol {
    /// The empty set stands for standard RDP security (RC4 without TLS).
    pub fn is_standard_rdp_security(self) -> bool {
        self.is_empty()
    }
}

bitflags! {
    /// Negotiation flags of the request message (RDP_NEG_REQ).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct RequestFlags: u8 {
        const RESTRICTED_ADMIN_MODE_REQUIRED = 0x01;
        const REDIRECTED_AUTHENTICATION_MODE_REQUIRED = 0x02;
        const CORRELATION_INFO_PRESENT = 0x08;
    }
}

bitflags! {
    /// Negotiation flags of the response message (RDP_NEG_RSP).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ResponseFlags: u8 {
        const EXTENDED_CLIENT_DATA_SUPPORTED = 0x01;
        const DYNVC_GFX_PROTOCOL_SUPPORTED = 0x02;
        const RDP_NEG_RSP_RESERVED = 0x04;
        const RESTRICTED_ADMIN_MODE_SUPPORTED = 0x08;
        const REDIRECTED_AUTHENTICATION_MODE_SUPPORTED = 0x10;
    }
}

/// Negotiation failure code carried by RDP_NEG_FAILURE.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FailureCode(u32);

impl FailureCode {
    pub const SSL_REQUIRED_BY_SERVER: Self = Self(1);
    pub const SSL_NOT_ALLOWED_BY_SERVER: Self = Self(2);
    pub const SSL_CERT_NOT_ON_SERVER: Self = Self(3);
    pub const INCONSISTENT_FLAGS: Self = Self(4);
    pub const HYBRID_REQUIRED_BY_SERVER: Self = Self(5);
    pub const SSL_WITH_USER_AUTH_REQUIRED_BY_SERVER: Self = Self(6);
}

impl From<u32> for FailureCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<FailureCode> for u32 {
    fn from(value: FailureCode) -> Self {
        value.0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct NegoMsgType(u8);

impl NegoMsgType {
    const REQUEST: Self = Self(0x01);
    const RESPONSE: Self = Self(0x02);
    const FAILURE: Self = Self(0x03);
}

const NEGO_STRUCT_SIZE: usize = 8;
const COOKIE_PREFIX: &str = "Cookie: mstshash=";
const CR_LF: &[u8] = b"\r\n";

/// Client X.224 Connection Request PDU with an optional routing cookie and
/// the RDP negotiation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub cookie: Option<String>,
    pub flags: RequestFlags,
    pub protocol: SecurityProtocol,
}

impl ConnectionRequest {
    fn cookie_size(&self) -> usize {
        self.cookie
            .as_ref()
            .map(|c| COOKIE_PREFIX.len() + c.len() + CR_LF.len())
            .unwrap_or(0)
    }
}

impl<'de> X224Pdu<'de> for ConnectionRequest {
    const X224_NAME: &'static str = "Connection Request";

    const TPDU_CODE: TpduCode = TpduCode::CONNECTION_REQUEST;

    fn x224_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(ctx: Self::X224_NAME, in: dst, size: self.cookie_size() + NEGO_STRUCT_SIZE);

        if let Some(cookie) = &self.cookie {
            dst.write_slice(COOKIE_PREFIX.as_bytes());
            dst.write_slice(cookie.as_bytes());
            dst.write_slice(CR_LF);
        }

        dst.write_u8(NegoMsgType::REQUEST.0);
        dst.write_u8(self.flags.bits());
        dst.write_u16(cast_length!(ctx: Self::X224_NAME, "length", NEGO_STRUCT_SIZE)?);
        dst.write_u32(self.protocol.bits());

        Ok(())
    }

    fn x224_body_decode(src: &mut ReadCursor<'de>, _: &TpktHeader, tpdu: &TpduHeader) -> DecodeResult<Self> {
        let variable_part_size = tpdu.variable_part_size();

        ensure_size!(ctx: Self::X224_NAME, in: src, size: variable_part_size);

        let cookie = if variable_part_size > NEGO_STRUCT_SIZE {
            let cookie_field = src.read_slice(variable_part_size - NEGO_STRUCT_SIZE);
            parse_cookie(cookie_field)
        } else {
            None
        };

        if variable_part_size < NEGO_STRUCT_SIZE {
            // Old-style request without the negotiation structure.
            return Ok(Self {
                cookie,
                flags: RequestFlags::empty(),
                protocol: SecurityProtocol::empty(),
            });
        }

        let msg_type = NegoMsgType(src.read_u8());
        if msg_type != NegoMsgType::REQUEST {
            return Err(unexpected_message_type_err!(Self::X224_NAME, msg_type.0));
        }

        let flags = RequestFlags::from_bits_truncate(src.read_u8());
        let _length = src.read_u16();
        let protocol = SecurityProtocol::from_bits_truncate(src.read_u32());

        Ok(Self {
            cookie,
            flags,
            protocol,
        })
    }

    fn tpdu_header_variable_part_size(&self) -> usize {
        self.cookie_size() + NEGO_STRUCT_SIZE
    }

    fn tpdu_user_data_size(&self) -> usize {
        0
    }
}

fn parse_cookie(field: &[u8]) -> Option<String> {
    let text = core::str::from_utf8(field).ok()?;
    let value = text.strip_prefix(COOKIE_PREFIX)?;
    Some(value.trim_end_matches(['\r', '\n']).to_owned())
}

/// Server X.224 Connection Confirm PDU: RDP_NEG_RSP or RDP_NEG_FAILURE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionConfirm {
    Response {
        flags: ResponseFlags,
        protocol: SecurityProtocol,
    },
    Failure {
        code: FailureCode,
    },
}

impl<'de> X224Pdu<'de> for ConnectionConfirm {
    const X224_NAME: &'static str = "Connection Confirm";

    const TPDU_CODE: TpduCode = TpduCode::CONNECTION_CONFIRM;

    fn x224_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(ctx: Self::X224_NAME, in: dst, size: NEGO_STRUCT_SIZE);

        match self {
            Self::Response { flags, protocol } => {
                dst.write_u8(NegoMsgType::RESPONSE.0);
                dst.write_u8(flags.bits());
                dst.write_u16(NEGO_STRUCT_SIZE as u16);
                dst.write_u32(protocol.bits());
            }
            Self::Failure { code } => {
                dst.write_u8(NegoMsgType::FAILURE.0);
                dst.write_u8(0);
                dst.write_u16(NEGO_STRUCT_SIZE as u16);
                dst.write_u32(u32::from(*code));
            }
        }

        Ok(())
    }

    fn x224_body_decode(src: &mut ReadCursor<'de>, _: &TpktHeader, tpdu: &TpduHeader) -> DecodeResult<Self> {
        let variable_part_size = tpdu.variable_part_size();

        if variable_part_size < NEGO_STRUCT_SIZE {
            return Err(invalid_field_err(
                Self::X224_NAME,
                "variablePart",
                "missing RDP negotiation structure",
            ));
        }

        ensure_size!(ctx: Self::X224_NAME, in: src, size: NEGO_STRUCT_SIZE);

        let msg_type = NegoMsgType(src.read_u8());
        let flags = src.read_u8();
        let _length = src.read_u16();
        let payload = src.read_u32();

        match msg_type {
            NegoMsgType::RESPONSE => Ok(Self::Response {
                flags: ResponseFlags::from_bits_truncate(flags),
                protocol: SecurityProtocol::from_bits_truncate(payload),
            }),
            NegoMsgType::FAILURE => Ok(Self::Failure {
                code: FailureCode::from(payload),
            }),
            _ => Err(unexpected_message_type_err!(Self::X224_NAME, msg_type.0)),
        }
    }

    fn tpdu_header_variable_part_size(&self) -> usize {
        NEGO_STRUCT_SIZE
    }

    fn tpdu_user_data_size(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use opalrdp_core::{decode, encode_vec};

    use super::*;
    use crate::x224::X224;

    #[test]
    fn negotiation_round_trips() {
        let request = ConnectionRequest {
            cookie: Some("eltons".to_owned()),
            flags: RequestFlags::empty(),
            protocol: SecurityProtocol::SSL | SecurityProtocol::HYBRID,
        };
        let encoded = encode_vec(&X224(request.clone())).unwrap();
        assert_eq!(decode::<X224<ConnectionRequest>>(&encoded).unwrap().0, request);

        let response = ConnectionConfirm::Response {
            flags: ResponseFlags::EXTENDED_CLIENT_DATA_SUPPORTED,
            protocol: SecurityProtocol::HYBRID,
        };
        let encoded = encode_vec(&X224(response.clone())).unwrap();
        assert_eq!(decode::<X224<ConnectionConfirm>>(&encoded).unwrap().0, response);

        let failure = ConnectionConfirm::Failure {
            code: FailureCode::HYBRID_REQUIRED_BY_SERVER,
        };
        let encoded = encode_vec(&X224(failure.clone())).unwrap();
        assert_eq!(decode::<X224<ConnectionConfirm>>(&encoded).unwrap().0, failure);
    }
}
