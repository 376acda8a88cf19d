//! MCS channel connection: Erect Domain, Attach User, then one Channel Join
//! per round trip — the next join request is only sent once the previous
//! confirm arrived.

use core::mem;

use opalrdp_core::WriteBuf;
use opalrdp_pdu::x224::X224;
use opalrdp_pdu::{mcs, PduHint};

use crate::{ConnectorError, ConnectorErrorExt as _, ConnectorResult, Sequence, State, Written};

#[derive(Default, Debug)]
#[non_exhaustive]
pub enum ChannelConnectionState {
    #[default]
    Consumed,

    SendErectDomainRequest,
    SendAttachUserRequest,
    WaitAttachUserConfirm,
    SendChannelJoinRequest {
        user_channel_id: u16,
        remaining_channel_ids: Vec<u16>,
    },
    WaitChannelJoinConfirm {
        user_channel_id: u16,
        requested_channel_id: u16,
        remaining_channel_ids: Vec<u16>,
    },
    AllJoined {
        user_channel_id: u16,
    },
}

impl State for ChannelConnectionState {
    fn name(&self) -> &'static str {
        match self {
            Self::Consumed => "Consumed",
            Self::SendErectDomainRequest => "SendErectDomainRequest",
            Self::SendAttachUserRequest => "SendAttachUserRequest",
            Self::WaitAttachUserConfirm => "WaitAttachUserConfirm",
            Self::SendChannelJoinRequest { .. } => "SendChannelJoinRequest",
            Self::WaitChannelJoinConfirm { .. } => "WaitChannelJoinConfirm",
            Self::AllJoined { .. } => "AllJoined",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::AllJoined { .. })
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

#[derive(Debug)]
pub struct ChannelConnectionSequence {
    pub state: ChannelConnectionState,
    io_channel_id: u16,
    virtual_channel_ids: Vec<u16>,
}

impl ChannelConnectionSequence {
    pub fn new(io_channel_id: u16, virtual_channel_ids: Vec<u16>) -> Self {
        Self {
            state: ChannelConnectionState::SendErectDomainRequest,
            io_channel_id,
            virtual_channel_ids,
        }
    }
}

impl Sequence for ChannelConnectionSequence {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint> {
        match self.state {
            ChannelConnectionState::Consumed => None,
            ChannelConnectionState::SendErectDomainRequest => None,
            ChannelConnectionState::SendAttachUserRequest => None,
            ChannelConnectionState::WaitAttachUserConfirm => Some(&opalrdp_pdu::X224_HINT),
            ChannelConnectionState::SendChannelJoinRequest { .. } => None,
            ChannelConnectionState::WaitChannelJoinConfirm { .. } => Some(&opalrdp_pdu::X224_HINT),
            ChannelConnectionState::AllJoined { .. } => None,
        }
    }

    fn state(&self) -> &dyn State {
        &self.state
    }

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> ConnectorResult<Written> {
        let (written, next_state) = match mem::take(&mut self.state) {
            ChannelConnectionState::Consumed => {
                return Err(general_err!("channel connection sequence state is consumed (this is a bug)"))
            }

            ChannelConnectionState::SendErectDomainRequest => {
                let erect_domain_request = mcs::ErectDomainPdu {
                    sub_height: 0,
                    sub_interval: 0,
                };

                debug!(message = ?erect_domain_request, "Send");

                let written =
                    opalrdp_core::encode_buf(&X224(erect_domain_request), output).map_err(ConnectorError::encode)?;

                (
                    Written::from_size(written)?,
                    ChannelConnectionState::SendAttachUserRequest,
                )
            }

            ChannelConnectionState::SendAttachUserRequest => {
                let attach_user_request = mcs::AttachUserRequest;

                debug!(message = ?attach_user_request, "Send");

                let written =
                    opalrdp_core::encode_buf(&X224(attach_user_request), output).map_err(ConnectorError::encode)?;

                (
                    Written::from_size(written)?,
                    ChannelConnectionState::WaitAttachUserConfirm,
                )
            }

            ChannelConnectionState::WaitAttachUserConfirm => {
                let attach_user_confirm = opalrdp_core::decode::<X224<mcs::AttachUserConfirm>>(input)
                    .map_err(ConnectorError::decode)?
                    .0;

                let user_channel_id = attach_user_confirm.initiator_id;

                debug!(message = ?attach_user_confirm, user_channel_id, "Received");

                if attach_user_confirm.result != 0 {
                    return Err(reason_err!(
                        "AttachUserConfirm",
                        "server rejected the user attachment: result {}",
                        attach_user_confirm.result,
                    ));
                }

                // Join the user channel first, then the I/O channel, then
                // every static virtual channel, one request per confirm.
                let mut remaining_channel_ids = Vec::with_capacity(2 + self.virtual_channel_ids.len());
                remaining_channel_ids.push(user_channel_id);
                remaining_channel_ids.push(self.io_channel_id);
                remaining_channel_ids.extend(self.virtual_channel_ids.iter().copied());

                (
                    Written::Nothing,
                    ChannelConnectionState::SendChannelJoinRequest {
                        user_channel_id,
                        remaining_channel_ids,
                    },
                )
            }

            ChannelConnectionState::SendChannelJoinRequest {
                user_channel_id,
                mut remaining_channel_ids,
            } => {
                debug_assert!(!remaining_channel_ids.is_empty());

                let channel_id = remaining_channel_ids.remove(0);

                let channel_join_request = mcs::ChannelJoinRequest {
                    initiator_id: user_channel_id,
                    channel_id,
                };

                debug!(message = ?channel_join_request, "Send");

                let written =
                    opalrdp_core::encode_buf(&X224(channel_join_request), output).map_err(ConnectorError::encode)?;

                (
                    Written::from_size(written)?,
                    ChannelConnectionState::WaitChannelJoinConfirm {
                        user_channel_id,
                        requested_channel_id: channel_id,
                        remaining_channel_ids,
                    },
                )
            }

            ChannelConnectionState::WaitChannelJoinConfirm {
                user_channel_id,
                requested_channel_id,
                remaining_channel_ids,
            } => {
                let channel_join_confirm = opalrdp_core::decode::<X224<mcs::ChannelJoinConfirm>>(input)
                    .map_err(ConnectorError::decode)?
                    .0;

                debug!(message = ?channel_join_confirm, "Received");

                if channel_join_confirm.initiator_id != user_channel_id {
                    warn!(
                        channel_join_confirm.initiator_id,
                        user_channel_id, "Inconsistent initiator ID for MCS Channel Join Confirm",
                    );
                }

                if channel_join_confirm.requested_channel_id != requested_channel_id {
                    return Err(reason_err!(
                        "ChannelJoinConfirm",
                        "unexpected requested channel ID: got {}, expected {}",
                        channel_join_confirm.requested_channel_id,
                        requested_channel_id,
                    ));
                }

                if channel_join_confirm.channel_id != channel_join_confirm.requested_channel_id {
                    return Err(reason_err!(
                        "ChannelJoinConfirm",
                        "a channel was joined with a different channel ID than requested: requested {}, got {}",
                        channel_join_confirm.requested_channel_id,
                        channel_join_confirm.channel_id,
                    ));
                }

                if remaining_channel_ids.is_empty() {
                    (Written::Nothing, ChannelConnectionState::AllJoined { user_channel_id })
                } else {
                    // The next join request is sent on the following step.
                    (
                        Written::Nothing,
                        ChannelConnectionState::SendChannelJoinRequest {
                            user_channel_id,
                            remaining_channel_ids,
                        },
                    )
                }
            }

            ChannelConnectionState::AllJoined { .. } => return Err(general_err!("all channels are already joined")),
        };

        self.state = next_state;

        Ok(written)
    }
}
