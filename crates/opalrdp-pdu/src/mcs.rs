//! The T.125 MCS subset RDP uses.
//!
//! Connect-Initial/Response travel as BER inside plain X.224 data TPDUs;
//! every other PDU is a "domain PDU" whose kind sits in the upper six bits
//! of the first byte, with the low two bits left for per-PDU option flags.
//! User ids ride on the 1001 base, and the global channel the server hands
//! out by convention is 1003.

use std::borrow::Cow;

use opalrdp_core::{
    cast_length, ensure_size, invalid_field_err, invalid_field_err_with_source, other_err, Decode, DecodeResult,
    Encode, EncodeResult, IntoOwned, ReadCursor, WriteCursor,
};

use crate::gcc::{ConferenceCreateRequest, ConferenceCreateResponse};
use crate::x224::{user_data_size, TpduCode, TpduHeader, TpktHeader, X224Pdu};
use crate::{ber, per};

pub const RESULT_ENUM_LENGTH: u8 = 16;

/// MCS user ids are allocated starting at this base.
pub const BASE_CHANNEL_ID: u16 = 1001;

/// The I/O (global) channel id servers conventionally assign.
pub const GLOBAL_CHANNEL_ID: u16 = 1003;

// dataPriority = high, segmentation = begin | end
const SEND_DATA_PRIORITY_AND_SEGMENTATION: u8 = 0x70;

/// Maps a [`per::PerError`] onto a codec error carrying the field name.
fn per_err<E>(name: &'static str, field: &'static str) -> impl FnOnce(per::PerError) -> E
where
    E: opalrdp_core::InvalidFieldErr + opalrdp_core::WithSource,
{
    move |error| invalid_field_err_with_source(name, field, "PER", error)
}

pub trait McsPdu<'de>: Sized {
    const MCS_NAME: &'static str;

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()>;

    fn mcs_body_decode(src: &mut ReadCursor<'de>, tpdu_user_data_size: usize) -> DecodeResult<Self>;

    fn mcs_size(&self) -> usize;

    fn name(&self) -> &'static str {
        Self::MCS_NAME
    }
}

impl<'de, T> X224Pdu<'de> for T
where
    T: McsPdu<'de>,
{
    const X224_NAME: &'static str = T::MCS_NAME;

    const TPDU_CODE: TpduCode = TpduCode::DATA;

    fn x224_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        self.mcs_body_encode(dst)
    }

    fn x224_body_decode(src: &mut ReadCursor<'de>, tpkt: &TpktHeader, tpdu: &TpduHeader) -> DecodeResult<Self> {
        T::mcs_body_decode(src, user_data_size(tpkt, tpdu))
    }

    fn tpdu_header_variable_part_size(&self) -> usize {
        0
    }

    fn tpdu_user_data_size(&self) -> usize {
        self.mcs_size()
    }
}

/// Domain PDU kind, the application tag of the outer CHOICE.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
enum McsPduKind {
    ErectDomainRequest = 1,
    DisconnectProviderUltimatum = 8,
    AttachUserRequest = 10,
    AttachUserConfirm = 11,
    ChannelJoinRequest = 14,
    ChannelJoinConfirm = 15,
    SendDataRequest = 25,
    SendDataIndication = 26,
}

impl McsPduKind {
    /// Option bit meaning an optional trailing field is present (the
    /// initiator of AttachUserConfirm, the channelId of ChannelJoinConfirm).
    const OPTION_TRAILING_FIELD: u8 = 0b10;

    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::ErectDomainRequest,
            8 => Self::DisconnectProviderUltimatum,
            10 => Self::AttachUserRequest,
            11 => Self::AttachUserConfirm,
            14 => Self::ChannelJoinRequest,
            15 => Self::ChannelJoinConfirm,
            25 => Self::SendDataRequest,
            26 => Self::SendDataIndication,
            _ => return None,
        })
    }

    fn peek(src: &ReadCursor<'_>, ctx: &'static str) -> DecodeResult<Self> {
        let first = src.try_peek_u8().map_err(|e| other_err!(ctx, source: e))?;

        Self::from_tag(first >> 2)
            .ok_or_else(|| invalid_field_err(ctx, "domain-mcspdu", "unknown application tag for CHOICE"))
    }

    /// Consumes the choice byte, checking it carries this kind.
    fn expect(self, src: &mut ReadCursor<'_>, ctx: &'static str) -> DecodeResult<()> {
        let found = Self::peek(src, ctx)?;
        src.advance(1);

        if found == self {
            Ok(())
        } else {
            Err(opalrdp_core::unexpected_message_type_err(ctx, found as u8))
        }
    }

    fn write(self, dst: &mut WriteCursor<'_>, options: u8) {
        debug_assert_eq!(options & !0b11, 0);

        dst.write_u8((self as u8) << 2 | options);
    }
}

/// Any MCS domain PDU, dispatched on the choice byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McsMessage<'a> {
    ErectDomainRequest(ErectDomainPdu),
    AttachUserRequest(AttachUserRequest),
    AttachUserConfirm(AttachUserConfirm),
    ChannelJoinRequest(ChannelJoinRequest),
    ChannelJoinConfirm(ChannelJoinConfirm),
    SendDataRequest(SendDataRequest<'a>),
    SendDataIndication(SendDataIndication<'a>),
    DisconnectProviderUltimatum(DisconnectProviderUltimatum),
}

pub type OwnedMcsMessage = McsMessage<'static>;

/// Applies one expression to whichever variant is inhabited.
macro_rules! with_mcs_message {
    ($value:expr, |$inner:ident| $body:expr) => {
        match $value {
            McsMessage::ErectDomainRequest($inner) => $body,
            McsMessage::AttachUserRequest($inner) => $body,
            McsMessage::AttachUserConfirm($inner) => $body,
            McsMessage::ChannelJoinRequest($inner) => $body,
            McsMessage::ChannelJoinConfirm($inner) => $body,
            McsMessage::SendDataRequest($inner) => $body,
            McsMessage::SendDataIndication($inner) => $body,
            McsMessage::DisconnectProviderUltimatum($inner) => $body,
        }
    };
}

impl IntoOwned for McsMessage<'_> {
    type Owned = OwnedMcsMessage;

    fn into_owned(self) -> Self::Owned {
        match self {
            Self::SendDataRequest(pdu) => McsMessage::SendDataRequest(pdu.into_owned()),
            Self::SendDataIndication(pdu) => McsMessage::SendDataIndication(pdu.into_owned()),
            Self::ErectDomainRequest(pdu) => McsMessage::ErectDomainRequest(pdu),
            Self::AttachUserRequest(pdu) => McsMessage::AttachUserRequest(pdu),
            Self::AttachUserConfirm(pdu) => McsMessage::AttachUserConfirm(pdu),
            Self::ChannelJoinRequest(pdu) => McsMessage::ChannelJoinRequest(pdu),
            Self::ChannelJoinConfirm(pdu) => McsMessage::ChannelJoinConfirm(pdu),
            Self::DisconnectProviderUltimatum(pdu) => McsMessage::DisconnectProviderUltimatum(pdu),
        }
    }
}

impl<'de> McsPdu<'de> for McsMessage<'de> {
    const MCS_NAME: &'static str = "McsMessage";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        with_mcs_message!(self, |pdu| pdu.mcs_body_encode(dst))
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, tpdu_user_data_size: usize) -> DecodeResult<Self> {
        Ok(match McsPduKind::peek(src, Self::MCS_NAME)? {
            McsPduKind::ErectDomainRequest => {
                Self::ErectDomainRequest(ErectDomainPdu::mcs_body_decode(src, tpdu_user_data_size)?)
            }
            McsPduKind::AttachUserRequest => {
                Self::AttachUserRequest(AttachUserRequest::mcs_body_decode(src, tpdu_user_data_size)?)
            }
            McsPduKind::AttachUserConfirm => {
                Self::AttachUserConfirm(AttachUserConfirm::mcs_body_decode(src, tpdu_user_data_size)?)
            }
            McsPduKind::ChannelJoinRequest => {
                Self::ChannelJoinRequest(ChannelJoinRequest::mcs_body_decode(src, tpdu_user_data_size)?)
            }
            McsPduKind::ChannelJoinConfirm => {
                Self::ChannelJoinConfirm(ChannelJoinConfirm::mcs_body_decode(src, tpdu_user_data_size)?)
            }
            McsPduKind::SendDataRequest => {
                Self::SendDataRequest(SendDataRequest::mcs_body_decode(src, tpdu_user_data_size)?)
            }
            McsPduKind::SendDataIndication => {
                Self::SendDataIndication(SendDataIndication::mcs_body_decode(src, tpdu_user_data_size)?)
            }
            McsPduKind::DisconnectProviderUltimatum => Self::DisconnectProviderUltimatum(
                DisconnectProviderUltimatum::mcs_body_decode(src, tpdu_user_data_size)?,
            ),
        })
    }

    fn mcs_size(&self) -> usize {
        with_mcs_message!(self, |pdu| pdu.mcs_size())
    }

    fn name(&self) -> &'static str {
        with_mcs_message!(self, |pdu| pdu.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErectDomainPdu {
    pub sub_height: u32,
    pub sub_interval: u32,
}

impl<'de> McsPdu<'de> for ErectDomainPdu {
    const MCS_NAME: &'static str = "ErectDomainPdu";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(ctx: Self::MCS_NAME, in: dst, size: self.mcs_size());

        McsPduKind::ErectDomainRequest.write(dst, 0);
        per::write_u32(dst, self.sub_height);
        per::write_u32(dst, self.sub_interval);

        Ok(())
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, _: usize) -> DecodeResult<Self> {
        McsPduKind::ErectDomainRequest.expect(src, Self::MCS_NAME)?;

        Ok(Self {
            sub_height: per::read_u32(src).map_err(per_err(Self::MCS_NAME, "subHeight"))?,
            sub_interval: per::read_u32(src).map_err(per_err(Self::MCS_NAME, "subInterval"))?,
        })
    }

    fn mcs_size(&self) -> usize {
        per::SIZEOF_CHOICE + per::sizeof_u32(self.sub_height) + per::sizeof_u32(self.sub_interval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachUserRequest;

impl<'de> McsPdu<'de> for AttachUserRequest {
    const MCS_NAME: &'static str = "AttachUserRequest";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(ctx: Self::MCS_NAME, in: dst, size: self.mcs_size());

        McsPduKind::AttachUserRequest.write(dst, 0);

        Ok(())
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, _: usize) -> DecodeResult<Self> {
        McsPduKind::AttachUserRequest.expect(src, Self::MCS_NAME)?;

        Ok(Self)
    }

    fn mcs_size(&self) -> usize {
        per::SIZEOF_CHOICE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachUserConfirm {
    pub result: u8,
    /// The allocated user id, already rebased on [`BASE_CHANNEL_ID`].
    pub initiator_id: u16,
}

impl<'de> McsPdu<'de> for AttachUserConfirm {
    const MCS_NAME: &'static str = "AttachUserConfirm";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(ctx: Self::MCS_NAME, in: dst, size: self.mcs_size());

        McsPduKind::AttachUserConfirm.write(dst, McsPduKind::OPTION_TRAILING_FIELD);
        per::write_enum(dst, self.result);
        per::write_u16(dst, self.initiator_id, BASE_CHANNEL_ID).map_err(per_err(Self::MCS_NAME, "initiator"))?;

        Ok(())
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, _: usize) -> DecodeResult<Self> {
        McsPduKind::AttachUserConfirm.expect(src, Self::MCS_NAME)?;

        Ok(Self {
            result: per::read_enum(src, RESULT_ENUM_LENGTH).map_err(per_err(Self::MCS_NAME, "result"))?,
            initiator_id: per::read_u16(src, BASE_CHANNEL_ID).map_err(per_err(Self::MCS_NAME, "initiator"))?,
        })
    }

    fn mcs_size(&self) -> usize {
        per::SIZEOF_CHOICE + per::SIZEOF_ENUM + per::SIZEOF_U16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelJoinRequest {
    pub initiator_id: u16,
    pub channel_id: u16,
}

impl<'de> McsPdu<'de> for ChannelJoinRequest {
    const MCS_NAME: &'static str = "ChannelJoinRequest";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(ctx: Self::MCS_NAME, in: dst, size: self.mcs_size());

        McsPduKind::ChannelJoinRequest.write(dst, 0);
        per::write_u16(dst, self.initiator_id, BASE_CHANNEL_ID).map_err(per_err(Self::MCS_NAME, "initiator"))?;
        per::write_u16(dst, self.channel_id, 0).map_err(per_err(Self::MCS_NAME, "channelId"))?;

        Ok(())
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, _: usize) -> DecodeResult<Self> {
        McsPduKind::ChannelJoinRequest.expect(src, Self::MCS_NAME)?;

        Ok(Self {
            initiator_id: per::read_u16(src, BASE_CHANNEL_ID).map_err(per_err(Self::MCS_NAME, "initiator"))?,
            channel_id: per::read_u16(src, 0).map_err(per_err(Self::MCS_NAME, "channelId"))?,
        })
    }

    fn mcs_size(&self) -> usize {
        per::SIZEOF_CHOICE + 2 * per::SIZEOF_U16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelJoinConfirm {
    pub result: u8,
    pub initiator_id: u16,
    pub requested_channel_id: u16,
    pub channel_id: u16,
}

impl<'de> McsPdu<'de> for ChannelJoinConfirm {
    const MCS_NAME: &'static str = "ChannelJoinConfirm";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(ctx: Self::MCS_NAME, in: dst, size: self.mcs_size());

        McsPduKind::ChannelJoinConfirm.write(dst, McsPduKind::OPTION_TRAILING_FIELD);
        per::write_enum(dst, self.result);
        per::write_u16(dst, self.initiator_id, BASE_CHANNEL_ID).map_err(per_err(Self::MCS_NAME, "initiator"))?;
        dst.write_u16_be(self.requested_channel_id);
        dst.write_u16_be(self.channel_id);

        Ok(())
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, _: usize) -> DecodeResult<Self> {
        McsPduKind::ChannelJoinConfirm.expect(src, Self::MCS_NAME)?;

        Ok(Self {
            result: per::read_enum(src, RESULT_ENUM_LENGTH).map_err(per_err(Self::MCS_NAME, "result"))?,
            initiator_id: per::read_u16(src, BASE_CHANNEL_ID).map_err(per_err(Self::MCS_NAME, "initiator"))?,
            requested_channel_id: per::read_u16(src, 0).map_err(per_err(Self::MCS_NAME, "requested"))?,
            channel_id: per::read_u16(src, 0).map_err(per_err(Self::MCS_NAME, "channelId"))?,
        })
    }

    fn mcs_size(&self) -> usize {
        per::SIZEOF_CHOICE + per::SIZEOF_ENUM + 3 * per::SIZEOF_U16
    }
}

/// Defines one direction of the SendData pair; both carry the same body.
macro_rules! send_data_pdu {
    ($name:ident, $owned:ident, $kind:expr, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name<'a> {
            pub initiator_id: u16,
            pub channel_id: u16,
            pub user_data: Cow<'a, [u8]>,
        }

        pub type $owned = $name<'static>;

        impl IntoOwned for $name<'_> {
            type Owned = $owned;

            fn into_owned(self) -> Self::Owned {
                $name {
                    user_data: Cow::Owned(self.user_data.into_owned()),
                    ..self
                }
            }
        }

        impl<'de> McsPdu<'de> for $name<'de> {
            const MCS_NAME: &'static str = stringify!($name);

            fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
                encode_send_data(
                    dst,
                    $kind,
                    Self::MCS_NAME,
                    self.initiator_id,
                    self.channel_id,
                    &self.user_data,
                )
            }

            fn mcs_body_decode(src: &mut ReadCursor<'de>, tpdu_user_data_size: usize) -> DecodeResult<Self> {
                let (initiator_id, channel_id, user_data) =
                    decode_send_data(src, $kind, Self::MCS_NAME, tpdu_user_data_size)?;

                Ok(Self {
                    initiator_id,
                    channel_id,
                    user_data,
                })
            }

            fn mcs_size(&self) -> usize {
                sizeof_send_data(&self.user_data)
            }
        }
    };
}

send_data_pdu!(
    SendDataRequest,
    OwnedSendDataRequest,
    McsPduKind::SendDataRequest,
    "Client-to-server channel payload."
);
send_data_pdu!(
    SendDataIndication,
    OwnedSendDataIndication,
    McsPduKind::SendDataIndication,
    "Server-to-client channel payload."
);

fn sizeof_send_data(user_data: &[u8]) -> usize {
    per::SIZEOF_CHOICE
        + 2 * per::SIZEOF_U16
        + 1 // dataPriority + segmentation
        + per::sizeof_length(u16::try_from(user_data.len()).unwrap_or(u16::MAX))
        + user_data.len()
}

fn encode_send_data(
    dst: &mut WriteCursor<'_>,
    kind: McsPduKind,
    name: &'static str,
    initiator_id: u16,
    channel_id: u16,
    user_data: &[u8],
) -> EncodeResult<()> {
    ensure_size!(ctx: name, in: dst, size: sizeof_send_data(user_data));

    kind.write(dst, 0);
    per::write_u16(dst, initiator_id, BASE_CHANNEL_ID).map_err(per_err(name, "initiator"))?;
    per::write_u16(dst, channel_id, 0).map_err(per_err(name, "channelId"))?;
    dst.write_u8(SEND_DATA_PRIORITY_AND_SEGMENTATION);
    per::write_length(dst, cast_length!(ctx: name, "userDataLength", user_data.len())?);
    dst.write_slice(user_data);

    Ok(())
}

fn decode_send_data<'de>(
    src: &mut ReadCursor<'de>,
    kind: McsPduKind,
    name: &'static str,
    tpdu_user_data_size: usize,
) -> DecodeResult<(u16, u16, Cow<'de, [u8]>)> {
    let start = src.len();

    kind.expect(src, name)?;

    let initiator_id = per::read_u16(src, BASE_CHANNEL_ID).map_err(per_err(name, "initiator"))?;
    let channel_id = per::read_u16(src, 0).map_err(per_err(name, "channelId"))?;

    ensure_size!(ctx: name, in: src, size: 1);
    src.advance(1); // dataPriority + segmentation

    let (length, _) = per::read_length(src).map_err(per_err(name, "userDataLength"))?;
    let length = usize::from(length);

    // The advertised payload length must fit inside what the TPDU carries;
    // anything larger would let this PDU read into the next frame.
    let header_consumed = start - src.len();
    if length > tpdu_user_data_size.saturating_sub(header_consumed) {
        return Err(invalid_field_err(
            name,
            "userDataLength",
            "inconsistent with user data size advertised in TPDU",
        ));
    }

    ensure_size!(ctx: name, in: src, size: length);
    Ok((initiator_id, channel_id, Cow::Borrowed(src.read_slice(length))))
}

/// The reason of `DisconnectProviderUltimatum`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    DomainDisconnected = 0,
    ProviderInitiated = 1,
    TokenPurged = 2,
    UserRequested = 3,
    ChannelPurged = 4,
}

impl DisconnectReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::DomainDisconnected,
            1 => Self::ProviderInitiated,
            2 => Self::TokenPurged,
            3 => Self::UserRequested,
            4 => Self::ChannelPurged,
            _ => return None,
        })
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::DomainDisconnected => "domain disconnected",
            Self::ProviderInitiated => "server-initiated disconnect",
            Self::TokenPurged => "token purged",
            Self::UserRequested => "user-requested disconnect",
            Self::ChannelPurged => "channel purged",
        }
    }
}

impl core::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DisconnectProviderUltimatum {
    pub reason: DisconnectReason,
}

impl DisconnectProviderUltimatum {
    pub fn from_reason(reason: DisconnectReason) -> Self {
        Self { reason }
    }
}

impl<'de> McsPdu<'de> for DisconnectProviderUltimatum {
    const MCS_NAME: &'static str = "DisconnectProviderUltimatum";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(ctx: Self::MCS_NAME, in: dst, size: self.mcs_size());

        // The 3-bit reason straddles the choice byte: viewed as one
        // big-endian u16, the tag sits at bit 10 and the reason at bit 7.
        let packed = (u16::from(McsPduKind::DisconnectProviderUltimatum as u8) << 10)
            | (u16::from(self.reason as u8) << 7);
        dst.write_u16_be(packed);

        Ok(())
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, _: usize) -> DecodeResult<Self> {
        ensure_size!(ctx: Self::MCS_NAME, in: src, size: 2);
        let packed = src.read_u16_be();

        let tag = (packed >> 10) as u8;
        if McsPduKind::from_tag(tag) != Some(McsPduKind::DisconnectProviderUltimatum) {
            return Err(opalrdp_core::unexpected_message_type_err(Self::MCS_NAME, tag));
        }

        let reason = ((packed >> 7) & 0x07) as u8;

        Ok(Self {
            reason: DisconnectReason::from_u8(reason)
                .ok_or_else(|| invalid_field_err(Self::MCS_NAME, "reason", "unknown variant"))?,
        })
    }

    fn mcs_size(&self) -> usize {
        2
    }
}

const MCS_TYPE_CONNECT_INITIAL: u8 = 0x65;
const MCS_TYPE_CONNECT_RESPONSE: u8 = 0x66;

/// BER-encoded Connect-Initial carrying the GCC conference create request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectInitial {
    pub conference_create_request: ConferenceCreateRequest,
    pub calling_domain_selector: Vec<u8>,
    pub called_domain_selector: Vec<u8>,
    pub upward_flag: bool,
    pub target_parameters: DomainParameters,
    pub min_parameters: DomainParameters,
    pub max_parameters: DomainParameters,
}

impl ConnectInitial {
    const NAME: &'static str = "ConnectInitial";

    pub fn with_gcc_blocks(gcc_blocks: crate::gcc::ClientGccBlocks) -> Self {
        Self {
            conference_create_request: ConferenceCreateRequest { gcc_blocks },
            calling_domain_selector: vec![0x01],
            called_domain_selector: vec![0x01],
            upward_flag: true,
            target_parameters: DomainParameters::target(),
            min_parameters: DomainParameters::min(),
            max_parameters: DomainParameters::max(),
        }
    }

    fn payload_ber_size(&self) -> usize {
        ber::sizeof_octet_string(self.calling_domain_selector.len() as u16)
            + ber::sizeof_octet_string(self.called_domain_selector.len() as u16)
            + ber::SIZEOF_BOOL
            + self.target_parameters.size()
            + self.min_parameters.size()
            + self.max_parameters.size()
            + ber::sizeof_octet_string(self.conference_create_request.size() as u16)
    }
}

impl Encode for ConnectInitial {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        ber::write_application_tag(dst, MCS_TYPE_CONNECT_INITIAL, self.payload_ber_size() as u16)?;
        ber::write_octet_string(dst, &self.calling_domain_selector)?;
        ber::write_octet_string(dst, &self.called_domain_selector)?;
        ber::write_bool(dst, self.upward_flag)?;
        for parameters in [&self.target_parameters, &self.min_parameters, &self.max_parameters] {
            parameters.encode(dst)?;
        }
        ber::write_octet_string_tag(dst, cast_length!("requestLen", self.conference_create_request.size())?)?;
        self.conference_create_request.encode(dst)
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let payload = self.payload_ber_size();
        payload + ber::sizeof_application_tag(MCS_TYPE_CONNECT_INITIAL, payload as u16)
    }
}

impl<'de> Decode<'de> for ConnectInitial {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ber::read_application_tag(src, MCS_TYPE_CONNECT_INITIAL)?;

        Ok(Self {
            calling_domain_selector: ber::read_octet_string(src)?,
            called_domain_selector: ber::read_octet_string(src)?,
            upward_flag: ber::read_bool(src)?,
            target_parameters: DomainParameters::decode(src)?,
            min_parameters: DomainParameters::decode(src)?,
            max_parameters: DomainParameters::decode(src)?,
            conference_create_request: {
                let _octet_string_length = ber::read_octet_string_tag(src)?;
                ConferenceCreateRequest::decode(src)?
            },
        })
    }
}

/// BER-encoded Connect-Response carrying the GCC conference create response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectResponse {
    pub conference_create_response: ConferenceCreateResponse,
    pub called_connect_id: u32,
    pub domain_parameters: DomainParameters,
}

impl ConnectResponse {
    const NAME: &'static str = "ConnectResponse";

    pub fn channel_ids(&self) -> Vec<u16> {
        self.conference_create_response.gcc_blocks.channel_ids()
    }

    pub fn global_channel_id(&self) -> u16 {
        self.conference_create_response.gcc_blocks.global_channel_id()
    }

    fn payload_ber_size(&self) -> usize {
        ber::SIZEOF_ENUMERATED
            + ber::sizeof_integer(self.called_connect_id)
            + self.domain_parameters.size()
            + ber::sizeof_octet_string(self.conference_create_response.size() as u16)
    }
}

impl Encode for ConnectResponse {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        ber::write_application_tag(dst, MCS_TYPE_CONNECT_RESPONSE, self.payload_ber_size() as u16)?;
        ber::write_enumerated(dst, 0)?; // rt-successful
        ber::write_integer(dst, self.called_connect_id)?;
        self.domain_parameters.encode(dst)?;
        ber::write_octet_string_tag(dst, cast_length!("responseLen", self.conference_create_response.size())?)?;
        self.conference_create_response.encode(dst)
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let payload = self.payload_ber_size();
        payload + ber::sizeof_application_tag(MCS_TYPE_CONNECT_RESPONSE, payload as u16)
    }
}

impl<'de> Decode<'de> for ConnectResponse {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ber::read_application_tag(src, MCS_TYPE_CONNECT_RESPONSE)?;
        ber::read_enumerated(src, RESULT_ENUM_LENGTH)?;

        Ok(Self {
            called_connect_id: ber::read_integer(src)?,
            domain_parameters: DomainParameters::decode(src)?,
            conference_create_response: {
                let _octet_string_length = ber::read_octet_string_tag(src)?;
                ConferenceCreateResponse::decode(src)?
            },
        })
    }
}

/// T.125 DomainParameters: eight unconstrained integers in a BER sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainParameters {
    pub max_channel_ids: u32,
    pub max_user_ids: u32,
    pub max_token_ids: u32,
    pub num_priorities: u32,
    pub min_throughput: u32,
    pub max_height: u32,
    pub max_mcs_pdu_size: u32,
    pub protocol_version: u32,
}

impl DomainParameters {
    const NAME: &'static str = "DomainParameters";

    pub fn min() -> Self {
        Self::from_fields([1, 1, 1, 1, 0, 1, 1056, 2])
    }

    pub fn target() -> Self {
        Self::from_fields([34, 2, 0, 1, 0, 1, 65535, 2])
    }

    pub fn max() -> Self {
        Self::from_fields([65535, 64535, 65535, 1, 0, 1, 65535, 2])
    }

    fn from_fields(fields: [u32; 8]) -> Self {
        let [max_channel_ids, max_user_ids, max_token_ids, num_priorities, min_throughput, max_height, max_mcs_pdu_size, protocol_version] =
            fields;

        Self {
            max_channel_ids,
            max_user_ids,
            max_token_ids,
            num_priorities,
            min_throughput,
            max_height,
            max_mcs_pdu_size,
            protocol_version,
        }
    }

    fn as_fields(&self) -> [u32; 8] {
        [
            self.max_channel_ids,
            self.max_user_ids,
            self.max_token_ids,
            self.num_priorities,
            self.min_throughput,
            self.max_height,
            self.max_mcs_pdu_size,
            self.protocol_version,
        ]
    }

    fn payload_ber_size(&self) -> usize {
        self.as_fields().into_iter().map(ber::sizeof_integer).sum()
    }
}

impl Encode for DomainParameters {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        ber::write_sequence_tag(dst, cast_length!("seqTagLen", self.payload_ber_size())?)?;
        for field in self.as_fields() {
            ber::write_integer(dst, field)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let payload = self.payload_ber_size();
        payload + ber::sizeof_sequence_tag(payload as u16)
    }
}

impl<'de> Decode<'de> for DomainParameters {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ber::read_sequence_tag(src)?;

        let mut fields = [0u32; 8];
        for field in fields.iter_mut() {
            *field = ber::read_integer(src)?;
        }

        Ok(Self::from_fields(fields))
    }
}

#[cfg(test)]
mod tests {
    use opalrdp_core::{decode, encode_vec};

    use super::*;
    use crate::x224::X224;

    fn round_trip<T>(pdu: T)
    where
        T: PartialEq + core::fmt::Debug + Clone + for<'de> McsPdu<'de>,
    {
        let encoded = encode_vec(&X224(pdu.clone())).unwrap();
        assert_eq!(decode::<X224<T>>(&encoded).unwrap().0, pdu);
    }

    #[test]
    fn domain_pdus_round_trip() {
        round_trip(ErectDomainPdu {
            sub_height: 0,
            sub_interval: 0,
        });
        round_trip(AttachUserRequest);
        round_trip(ChannelJoinRequest {
            initiator_id: 1004,
            channel_id: GLOBAL_CHANNEL_ID,
        });
        round_trip(ChannelJoinConfirm {
            result: 0,
            initiator_id: 1004,
            requested_channel_id: GLOBAL_CHANNEL_ID,
            channel_id: GLOBAL_CHANNEL_ID,
        });

        let confirm = AttachUserConfirm {
            result: 0,
            initiator_id: 1010,
        };
        round_trip(confirm);

        // the trailing PER integer-16 holds the user id offset above 1001
        let encoded = encode_vec(&X224(confirm)).unwrap();
        assert_eq!(&encoded[encoded.len() - 2..], &[0x00, 0x09]);
    }

    #[test]
    fn send_data_round_trips_both_directions() {
        let request = SendDataRequest {
            initiator_id: 1010,
            channel_id: GLOBAL_CHANNEL_ID,
            user_data: Cow::Borrowed(&[0x10, 0x20, 0x30]),
        };
        let encoded = encode_vec(&X224(request.clone())).unwrap();
        assert_eq!(decode::<X224<SendDataRequest<'_>>>(&encoded).unwrap().0, request);

        let indication = SendDataIndication {
            initiator_id: 1002,
            channel_id: GLOBAL_CHANNEL_ID,
            user_data: Cow::Borrowed(&[0x55; 40]),
        };
        let encoded = encode_vec(&X224(indication.clone())).unwrap();
        assert_eq!(decode::<X224<SendDataIndication<'_>>>(&encoded).unwrap().0, indication);
    }

    #[test]
    fn send_data_rejects_a_length_past_the_tpdu() {
        let pdu = SendDataIndication {
            initiator_id: 1002,
            channel_id: GLOBAL_CHANNEL_ID,
            user_data: Cow::Borrowed(&[0xAB; 16]),
        };

        let mut encoded = encode_vec(&X224(pdu)).unwrap();
        // inflate the PER user data length beyond the TPDU boundary
        let length_at = encoded.len() - 17;
        encoded[length_at] = 0x7F;

        assert!(decode::<X224<SendDataIndication<'_>>>(&encoded).is_err());
    }

    #[test]
    fn disconnect_ultimatum_packs_the_reason_across_bytes() {
        let pdu = DisconnectProviderUltimatum::from_reason(DisconnectReason::UserRequested);

        let encoded = encode_vec(&X224(pdu)).unwrap();
        assert_eq!(&encoded[7..], &[0x21, 0x80]);

        let decoded = decode::<X224<DisconnectProviderUltimatum>>(&encoded).unwrap().0;
        assert_eq!(decoded.reason, DisconnectReason::UserRequested);
    }

    #[test]
    fn mcs_message_dispatches_on_the_choice_byte() {
        let pdu = ChannelJoinConfirm {
            result: 0,
            initiator_id: 1002,
            requested_channel_id: 1005,
            channel_id: 1005,
        };

        let encoded = encode_vec(&X224(McsMessage::ChannelJoinConfirm(pdu))).unwrap();
        let decoded = decode::<X224<McsMessage<'_>>>(&encoded).unwrap().0;

        assert_eq!(decoded, McsMessage::ChannelJoinConfirm(pdu));
    }
}
