//! State machines driving the RDP connection sequence, sans-IO: the caller
//! owns the socket and the TLS/CredSSP upgrade, feeds frames in, and writes
//! the produced bytes out.

#[macro_use]
extern crate tracing;

#[macro_use]
mod macros;

mod channel_connection;
mod channels;
mod connection;
pub mod connection_activation;
mod connection_finalization;
mod license_exchange;

use core::any::Any;
use core::fmt;

use opalrdp_core::{encode_buf, encode_vec, Encode, WriteBuf};
use opalrdp_pdu::rdp::capability_sets::MajorPlatformType;
use opalrdp_pdu::rdp::client_info::{Credentials, PerformanceFlags};
use opalrdp_pdu::x224::{X224, X224Data};
use opalrdp_pdu::PduHint;

pub use self::channel_connection::{ChannelConnectionSequence, ChannelConnectionState};
pub use self::channels::{
    decode_send_data_indication, decode_share_control, decode_share_data, encode_send_data_request,
    encode_share_control, encode_share_data, SendDataIndicationCtx, ShareControlCtx, ShareDataCtx,
};
pub use self::connection::{ClientConnector, ClientConnectorState, ConnectionResult};
pub use self::connection_finalization::{ConnectionFinalizationSequence, ConnectionFinalizationState};
pub use self::license_exchange::{LicenseExchangeSequence, LicenseExchangeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesktopSize {
    pub width: u16,
    pub height: u16,
}

/// Everything the connector needs to know about the client it impersonates.
///
/// The transport, TLS/CredSSP, and rendering are all owned by the embedding
/// application; this struct carries only what ends up on the wire.
#[derive(Debug, Clone)]
pub struct Config {
    /// The initial desktop size to request.
    pub desktop_size: DesktopSize,
    pub credentials: Credentials,
    /// The build number of the client.
    pub client_build: u32,
    /// Name of the client computer, truncated to 15 characters on the wire.
    pub client_name: String,
    pub keyboard_type: u32,
    pub keyboard_subtype: u32,
    pub keyboard_functional_keys_count: u32,
    pub keyboard_layout: u32,
    pub ime_file_name: String,
    pub dig_product_id: String,
    /// Working directory reported in the extended client info.
    pub client_dir: String,
    /// Client IP address reported in the extended client info.
    pub client_address: String,
    pub platform: MajorPlatformType,
    /// Color depth the client asks for (15, 16, 24 or 32).
    pub color_depth: u32,
    pub performance_flags: PerformanceFlags,
    /// If true, INFO_AUTOLOGON is set in the Client Info PDU.
    pub autologon: bool,
}

opalrdp_core::assert_impl!(Config: Send, Sync);

pub trait State: Send + fmt::Debug + 'static {
    fn name(&self) -> &'static str;
    fn is_terminal(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

opalrdp_core::assert_obj_safe!(State);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Written {
    Nothing,
    Size(core::num::NonZeroUsize),
}

impl Written {
    #[inline]
    pub fn from_size(value: usize) -> ConnectorResult<Self> {
        core::num::NonZeroUsize::new(value)
            .map(Self::Size)
            .ok_or_else(|| ConnectorError::general("invalid written length (can’t be zero)"))
    }

    #[inline]
    pub fn is_nothing(self) -> bool {
        matches!(self, Self::Nothing)
    }
}

/// A step-driven protocol sequence.
///
/// `step` consumes exactly one inbound frame (when `next_pdu_hint` returned
/// a hint) and may produce outbound bytes in `output`.
pub trait Sequence: Send {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint>;

    fn state(&self) -> &dyn State;

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> ConnectorResult<Written>;

    fn step_no_input(&mut self, output: &mut WriteBuf) -> ConnectorResult<Written> {
        self.step(&[], output)
    }
}

opalrdp_core::assert_obj_safe!(Sequence);

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[non_exhaustive]
#[derive(Debug)]
pub enum ConnectorErrorKind {
    Encode(opalrdp_core::EncodeError),
    Decode(opalrdp_core::DecodeError),
    Negotiation(opalrdp_pdu::nego::FailureCode),
    License(String),
    Reason(String),
    General,
    Custom,
}

impl fmt::Display for ConnectorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ConnectorErrorKind::Encode(_) => write!(f, "encode error"),
            ConnectorErrorKind::Decode(_) => write!(f, "decode error"),
            ConnectorErrorKind::Negotiation(code) => write!(f, "negotiation failure ({})", u32::from(*code)),
            ConnectorErrorKind::License(description) => write!(f, "license error: {description}"),
            ConnectorErrorKind::Reason(description) => write!(f, "reason: {description}"),
            ConnectorErrorKind::General => write!(f, "general error"),
            ConnectorErrorKind::Custom => write!(f, "custom error"),
        }
    }
}

impl std::error::Error for ConnectorErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            ConnectorErrorKind::Encode(e) => Some(e),
            ConnectorErrorKind::Decode(e) => Some(e),
            _ => None,
        }
    }
}

pub type ConnectorError = opalrdp_error::Error<ConnectorErrorKind>;

pub trait ConnectorErrorExt {
    fn encode(error: opalrdp_core::EncodeError) -> Self;
    fn decode(error: opalrdp_core::DecodeError) -> Self;
    fn general(context: &'static str) -> Self;
    fn reason(context: &'static str, reason: impl Into<String>) -> Self;
    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl ConnectorErrorExt for ConnectorError {
    fn encode(error: opalrdp_core::EncodeError) -> Self {
        Self::new("encode error", ConnectorErrorKind::Encode(error))
    }

    fn decode(error: opalrdp_core::DecodeError) -> Self {
        Self::new("decode error", ConnectorErrorKind::Decode(error))
    }

    fn general(context: &'static str) -> Self {
        Self::new(context, ConnectorErrorKind::General)
    }

    fn reason(context: &'static str, reason: impl Into<String>) -> Self {
        Self::new(context, ConnectorErrorKind::Reason(reason.into()))
    }

    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        Self::new(context, ConnectorErrorKind::Custom).with_source(e)
    }
}

/// Encodes an arbitrary payload inside a TPKT + X.224 data TPDU.
pub fn encode_x224_packet<T>(x224_msg: &T, buf: &mut WriteBuf) -> ConnectorResult<usize>
where
    T: Encode,
{
    let x224_msg_buf = encode_vec(x224_msg).map_err(ConnectorError::encode)?;

    let pdu = X224Data {
        data: std::borrow::Cow::Owned(x224_msg_buf),
    };

    let written = encode_buf(&X224(pdu), buf).map_err(ConnectorError::encode)?;

    Ok(written)
}
