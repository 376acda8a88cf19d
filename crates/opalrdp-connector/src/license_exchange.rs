//! Licensing phase: consume license messages until the server signals
//! STATUS_VALID_CLIENT through a Licensing Error Message.

use core::mem;

use opalrdp_core::{ReadCursor, WriteBuf};
use opalrdp_pdu::rdp::headers::BasicSecurityHeader;
use opalrdp_pdu::rdp::server_license::LicenseMessage;
use opalrdp_pdu::PduHint;

use crate::{ConnectorError, ConnectorErrorExt as _, ConnectorErrorKind, ConnectorResult, Sequence, State, Written};

#[derive(Default, Debug)]
#[non_exhaustive]
pub enum LicenseExchangeState {
    #[default]
    Consumed,

    WaitForMessage,

    LicenseExchanged,
}

impl State for LicenseExchangeState {
    fn name(&self) -> &'static str {
        match self {
            Self::Consumed => "Consumed",
            Self::WaitForMessage => "WaitForMessage",
            Self::LicenseExchanged => "LicenseExchanged",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::LicenseExchanged)
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

#[derive(Debug)]
pub struct LicenseExchangeSequence {
    pub state: LicenseExchangeState,
    io_channel_id: u16,
}

impl LicenseExchangeSequence {
    pub fn new(io_channel_id: u16) -> Self {
        Self {
            state: LicenseExchangeState::WaitForMessage,
            io_channel_id,
        }
    }
}

impl Sequence for LicenseExchangeSequence {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint> {
        match self.state {
            LicenseExchangeState::Consumed => None,
            LicenseExchangeState::WaitForMessage => Some(&opalrdp_pdu::X224_HINT),
            LicenseExchangeState::LicenseExchanged => None,
        }
    }

    fn state(&self) -> &dyn State {
        &self.state
    }

    fn step(&mut self, input: &[u8], _output: &mut WriteBuf) -> ConnectorResult<Written> {
        let (written, next_state) = match mem::take(&mut self.state) {
            LicenseExchangeState::Consumed => {
                return Err(general_err!("license exchange sequence state is consumed (this is a bug)"))
            }

            LicenseExchangeState::WaitForMessage => {
                let data_ctx = crate::decode_send_data_indication(input)?;

                if data_ctx.channel_id != self.io_channel_id {
                    warn!(
                        data_ctx.channel_id,
                        self.io_channel_id, "License message received outside of the I/O channel"
                    );
                }

                let mut cursor = ReadCursor::new(data_ctx.user_data);
                let _security_header =
                    opalrdp_core::decode_cursor::<BasicSecurityHeader>(&mut cursor).map_err(ConnectorError::decode)?;
                let message =
                    opalrdp_core::decode_cursor::<LicenseMessage>(&mut cursor).map_err(ConnectorError::decode)?;

                match message {
                    LicenseMessage::ErrorAlert(alert) if alert.is_valid_client() => {
                        debug!("Server granted a valid client license");
                        (Written::Nothing, LicenseExchangeState::LicenseExchanged)
                    }
                    LicenseMessage::ErrorAlert(alert) => {
                        return Err(ConnectorError::new(
                            "LicenseExchange",
                            ConnectorErrorKind::License(format!(
                                "server aborted licensing with error code 0x{:08X}",
                                alert.error_code
                            )),
                        ));
                    }
                    LicenseMessage::Other { preamble, .. } => {
                        // The full licensing ladder is tied to the excluded
                        // RSA/certificate path; consume and keep waiting for
                        // the valid-client indication.
                        debug!(message_type = ?preamble.preamble_message_type, "Skipping license message");
                        (Written::Nothing, LicenseExchangeState::WaitForMessage)
                    }
                }
            }

            LicenseExchangeState::LicenseExchanged => return Err(general_err!("license already exchanged")),
        };

        self.state = next_state;

        Ok(written)
    }
}
