//! The slice of the licensing exchange this client participates in: the
//! preamble and the Licensing Error Message whose STATUS_VALID_CLIENT
//! terminates the phase. Other license messages are surfaced with their raw
//! body so the caller can consume and skip them.

use opalrdp_core::{
    ensure_fixed_part_size, ensure_size, invalid_field_err, Decode, DecodeResult, Encode, EncodeResult, ReadCursor,
    WriteCursor,
};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

pub const PREAMBLE_SIZE: usize = 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum PreambleType {
    LicenseRequest = 0x01,
    PlatformChallenge = 0x02,
    NewLicense = 0x03,
    UpgradeLicense = 0x04,
    LicenseInfo = 0x12,
    NewLicenseRequest = 0x13,
    PlatformChallengeResponse = 0x15,
    ErrorAlert = 0xFF,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PreambleVersion(pub u8);

impl PreambleVersion {
    pub const V2: Self = Self(2); // RDP 4.0
    pub const V3: Self = Self(3); // RDP 5.0 and up
}

/// LICENSE_PREAMBLE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LicenseHeader {
    pub preamble_message_type: PreambleType,
    pub preamble_flags: u8,
    pub preamble_version: PreambleVersion,
    pub preamble_message_size: u16,
}

impl LicenseHeader {
    const NAME: &'static str = "LicenseHeader";

    const FIXED_PART_SIZE: usize = PREAMBLE_SIZE;
}

impl Encode for LicenseHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u8(self.preamble_message_type as u8);
        dst.write_u8(self.preamble_flags | (self.preamble_version.0 & 0x0F));
        dst.write_u16(self.preamble_message_size);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for LicenseHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let preamble_message_type = PreambleType::from_u8(src.read_u8())
            .ok_or_else(|| invalid_field_err!("bMsgType", "unknown license message type"))?;
        let flags_with_version = src.read_u8();
        let preamble_message_size = src.read_u16();

        Ok(Self {
            preamble_message_type,
            preamble_flags: flags_with_version & 0xF0,
            preamble_version: PreambleVersion(flags_with_version & 0x0F),
            preamble_message_size,
        })
    }
}

const STATUS_VALID_CLIENT: u32 = 0x0000_0007;
const ERROR_CODE_TOTAL_ABORT: u32 = 0x0000_0005;
const STATE_NO_TRANSITION: u32 = 0x0000_0002;

/// LICENSE_ERROR_MESSAGE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicensingErrorMessage {
    pub error_code: u32,
    pub state_transition: u32,
    pub error_info: Vec<u8>,
}

impl LicensingErrorMessage {
    const NAME: &'static str = "LicensingErrorMessage";

    const FIXED_PART_SIZE: usize = 4 /* dwErrorCode */ + 4 /* dwStateTransition */ + 4 /* blob header */;

    pub fn valid_client() -> Self {
        Self {
            error_code: STATUS_VALID_CLIENT,
            state_transition: STATE_NO_TRANSITION,
            error_info: Vec::new(),
        }
    }

    pub fn is_valid_client(&self) -> bool {
        self.error_code == STATUS_VALID_CLIENT
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_valid_client() || self.state_transition == ERROR_CODE_TOTAL_ABORT
    }
}

impl Encode for LicensingErrorMessage {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.error_code);
        dst.write_u32(self.state_transition);
        dst.write_u16(0x0004); // wBlobType = BB_ERROR_BLOB
        // the blob header counts only the data that follows it
        dst.write_u16(self.error_info.len() as u16);
        dst.write_slice(&self.error_info);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.error_info.len()
    }
}

impl<'de> Decode<'de> for LicensingErrorMessage {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let error_code = src.read_u32();
        let state_transition = src.read_u32();
        let _blob_type = src.read_u16();
        let error_info_len = usize::from(src.read_u16());

        ensure_size!(in: src, size: error_info_len);
        let error_info = src.read_slice(error_info_len).to_vec();

        Ok(Self {
            error_code,
            state_transition,
            error_info,
        })
    }
}

/// A message of the licensing phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseMessage {
    ErrorAlert(LicensingErrorMessage),
    /// Any other license message; the body is consumed so the stream stays
    /// aligned, and the caller decides whether to continue.
    Other { preamble: LicenseHeader, body: Vec<u8> },
}

impl LicenseMessage {
    const NAME: &'static str = "LicenseMessage";
}

impl<'de> Decode<'de> for LicenseMessage {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let preamble = LicenseHeader::decode(src)?;

        let body_size = usize::from(preamble.preamble_message_size).saturating_sub(PREAMBLE_SIZE);
        ensure_size!(ctx: Self::NAME, in: src, size: body_size);

        match preamble.preamble_message_type {
            PreambleType::ErrorAlert => {
                let mut body = ReadCursor::new(src.read_slice(body_size));
                Ok(Self::ErrorAlert(LicensingErrorMessage::decode(&mut body)?))
            }
            _ => Ok(Self::Other {
                preamble,
                body: src.read_slice(body_size).to_vec(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use opalrdp_core::{decode, encode_vec};

    use super::*;

    fn encode_license_message(message_type: PreambleType, body: &[u8]) -> Vec<u8> {
        let header = LicenseHeader {
            preamble_message_type: message_type,
            preamble_flags: 0,
            preamble_version: PreambleVersion::V3,
            preamble_message_size: (PREAMBLE_SIZE + body.len()) as u16,
        };

        let mut encoded = encode_vec(&header).unwrap();
        encoded.extend_from_slice(body);
        encoded
    }

    #[test]
    fn valid_client_alert_terminates() {
        let error_message = LicensingErrorMessage::valid_client();
        let body = encode_vec(&error_message).unwrap();
        let encoded = encode_license_message(PreambleType::ErrorAlert, &body);

        match decode::<LicenseMessage>(&encoded).unwrap() {
            LicenseMessage::ErrorAlert(alert) => {
                assert!(alert.is_valid_client());
                assert!(!alert.is_fatal());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn other_messages_are_consumed_whole() {
        let encoded = encode_license_message(PreambleType::LicenseRequest, &[0xAA; 24]);

        match decode::<LicenseMessage>(&encoded).unwrap() {
            LicenseMessage::Other { preamble, body } => {
                assert_eq!(preamble.preamble_message_type, PreambleType::LicenseRequest);
                assert_eq!(body.len(), 24);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
