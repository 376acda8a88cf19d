//! Server Set Error Info PDU and the error-code taxonomy it carries.

use opalrdp_core::{ensure_fixed_part_size, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor};

/// TS_SET_ERROR_INFO_PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSetErrorInfoPdu(pub ErrorInfo);

impl ServerSetErrorInfoPdu {
    const NAME: &'static str = "ServerSetErrorInfoPdu";

    const FIXED_PART_SIZE: usize = 4;
}

impl Encode for ServerSetErrorInfoPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.0.as_u32());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ServerSetErrorInfoPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        Ok(Self(ErrorInfo::from_u32(src.read_u32())))
    }
}

/// Declares the error taxonomy once: variant, wire code and description.
macro_rules! error_info_codes {
    ( $( $variant:ident = $code:literal => $description:literal, )* ) => {
        /// Server-sent reason code, surfaced to the consumer verbatim.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum ErrorInfo {
            $( $variant, )*
            Unknown(u32),
        }

        impl ErrorInfo {
            pub fn from_u32(code: u32) -> Self {
                match code {
                    $( $code => Self::$variant, )*
                    other => Self::Unknown(other),
                }
            }

            pub fn as_u32(self) -> u32 {
                match self {
                    $( Self::$variant => $code, )*
                    Self::Unknown(other) => other,
                }
            }

            pub fn description(self) -> String {
                match self {
                    $( Self::$variant => $description.to_owned(), )*
                    Self::Unknown(code) => format!("unknown server error info code 0x{code:08X}"),
                }
            }
        }
    };
}

error_info_codes! {
    None = 0x0000_0000 => "no error",
    RpcInitiatedDisconnect = 0x0000_0001 => "the disconnection was initiated by an administrative tool",
    RpcInitiatedLogoff = 0x0000_0002 => "the disconnection was due to a forced logoff",
    IdleTimeout = 0x0000_0003 => "the idle session limit timer was reached",
    LogonTimeout = 0x0000_0004 => "the active session limit timer was reached",
    DisconnectedByOtherConnection = 0x0000_0005 => "another user connected to the session",
    OutOfMemory = 0x0000_0006 => "the server ran out of available memory resources",
    ServerDeniedConnection = 0x0000_0007 => "the server denied the connection",
    ServerInsufficientPrivileges = 0x0000_0009 => "the user cannot connect to the server due to insufficient access privileges",
    ServerFreshCredentialsRequired = 0x0000_000A => "the server does not accept saved user credentials and requires fresh ones",
    RpcInitiatedDisconnectByUser = 0x0000_000B => "the disconnection was initiated by the user",
    LogoffByUser = 0x0000_000C => "the disconnection was initiated by the user logging off",
    LicenseInternal = 0x0000_0100 => "an internal error has occurred in the Terminal Services licensing component",
    LicenseNoLicenseServer = 0x0000_0101 => "a Remote Desktop License Server could not be found",
    LicenseNoLicense = 0x0000_0102 => "there are no Client Access Licenses available",
    LicenseBadClientMsg = 0x0000_0103 => "the remote computer received an invalid licensing message",
    LicenseHwidDoesntMatchLicense = 0x0000_0104 => "the Client Access License stored by the client has been modified",
    LicenseBadClientLicense = 0x0000_0105 => "the Client Access License stored by the client is in an invalid format",
    LicenseCantFinishProtocol = 0x0000_0106 => "network problems caused the licensing protocol to be terminated",
    LicenseClientEndedProtocol = 0x0000_0107 => "the client prematurely ended the licensing protocol",
    LicenseBadClientEncryption = 0x0000_0108 => "a licensing message was incorrectly encrypted",
    LicenseCantUpgradeLicense = 0x0000_0109 => "the Client Access License stored by the client could not be upgraded",
    LicenseNoRemoteConnections = 0x0000_010A => "the remote computer is not licensed to accept remote connections",
    UnknownPduType2 = 0x0000_10C9 => "unknown pduType2 field in a received Share Data Header",
    UnknownPduType = 0x0000_10CA => "unknown pduType field in a received Share Control Header",
    DataPduSequence = 0x0000_10CB => "an out-of-sequence Slow-Path Data PDU has been received",
    ControlPduSequence = 0x0000_10CD => "an out-of-sequence Slow-Path Non-Data PDU has been received",
    InvalidControlPduAction = 0x0000_10CE => "a Control PDU has been received with an invalid action field",
    InvalidInputPduType = 0x0000_10CF => "an input PDU has been received with an invalid messageType field",
    InvalidInputPduMouse = 0x0000_10D0 => "a mouse event PDU has been received with an invalid pointer flags field",
    InvalidRefreshRectPdu = 0x0000_10D1 => "an invalid Refresh Rect PDU has been received",
    CreateUserDataFailed = 0x0000_10D2 => "the server failed to construct the GCC Conference Create Response",
    ConnectFailed = 0x0000_10D3 => "a timeout occurred while the server awaited the connection establishment",
    ConfirmActiveWrongShareId = 0x0000_10D4 => "a Confirm Active PDU was received with an invalid shareId field",
    ConfirmActiveWrongOriginator = 0x0000_10D5 => "a Confirm Active PDU was received with an invalid originatorId field",
    PersistentKeyPduBadLength = 0x0000_10DA => "a Persistent Key List PDU of invalid length was received",
    PersistentKeyPduIllegalFirst = 0x0000_10DB => "a Persistent Key List PDU marked as PERSIST_PDU_FIRST was received after the first",
    PersistentKeyPduTooManyTotalKeys = 0x0000_10DC => "a Persistent Key List PDU advertised more than 262144 total keys",
    PersistentKeyPduTooManyCacheKeys = 0x0000_10DD => "a Persistent Key List PDU advertised a key count inconsistent with its totals",
    InputPduBadLength = 0x0000_10DE => "an input PDU of invalid length was received",
    BitmapCacheErrorPduBadLength = 0x0000_10DF => "a Bitmap Cache Error PDU of invalid length was received",
    SecurityDataTooShort = 0x0000_10E0 => "a received PDU security header was shorter than required",
    VcChannelError = 0x0000_10EC => "an error occurred on a static virtual channel",
}

impl ErrorInfo {
    /// True when the server is performing a graceful, user-driven teardown
    /// rather than reporting a protocol failure.
    pub fn is_graceful_disconnect(self) -> bool {
        matches!(
            self,
            Self::RpcInitiatedDisconnect
                | Self::RpcInitiatedLogoff
                | Self::DisconnectedByOtherConnection
                | Self::RpcInitiatedDisconnectByUser
                | Self::LogoffByUser
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_round_trip() {
        for code in [0x0000_0000u32, 0x0000_000C, 0x0000_0102, 0x0000_10C9, 0x0000_10EC] {
            assert_eq!(ErrorInfo::from_u32(code).as_u32(), code);
        }
    }

    #[test]
    fn unknown_code_is_preserved() {
        let info = ErrorInfo::from_u32(0xDEAD_BEEF);
        assert_eq!(info, ErrorInfo::Unknown(0xDEAD_BEEF));
        assert_eq!(info.as_u32(), 0xDEAD_BEEF);
    }

    #[test]
    fn graceful_codes() {
        assert!(ErrorInfo::LogoffByUser.is_graceful_disconnect());
        assert!(!ErrorInfo::OutOfMemory.is_graceful_disconnect());
    }
}
