//! The active stage: owns the session crypto, the per-direction
//! decompression history, and both frame processors, and exposes the
//! steady-state API consumed by the read and write loops.

use opalrdp_bulk::Decompressor;
use opalrdp_connector::ConnectionResult;
use opalrdp_core::{encode_buf, Encode as _, WriteBuf};
use opalrdp_pdu::fast_path::EncryptionFlags;
use opalrdp_pdu::geometry::InclusiveRectangle;
use opalrdp_pdu::input::fast_path::{FastPathInput, FastPathInputEvent, FastPathInputHeader};
use opalrdp_pdu::mcs::DisconnectReason;
use opalrdp_pdu::rdp::headers::ShareDataPdu;
use opalrdp_pdu::Action;

use crate::crypto::SessionCrypto;
use crate::fast_path::UpdateKind;
use crate::image::DecodedImage;
use crate::{fast_path, x224, SessionError, SessionErrorExt as _, SessionResult};

/// Output of the active stage, delivered to handlers in wire order.
#[derive(Debug)]
pub enum ActiveStageOutput {
    ResponseFrame(Vec<u8>),
    GraphicsUpdate(InclusiveRectangle),
    PointerDefault,
    PointerHidden,
    PointerPosition { x: u16, y: u16 },
    DeactivateAll(Box<opalrdp_connector::connection_activation::ConnectionActivationSequence>),
    Terminate(GracefulDisconnectReason),
}

/// Reasons the session ended without a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GracefulDisconnectReason {
    UserInitiated,
    ServerInitiated,
    Other(DisconnectReason),
}

impl core::fmt::Display for GracefulDisconnectReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            GracefulDisconnectReason::UserInitiated => write!(f, "user initiated disconnect"),
            GracefulDisconnectReason::ServerInitiated => write!(f, "server initiated disconnect"),
            GracefulDisconnectReason::Other(reason) => write!(f, "other reason: {reason}"),
        }
    }
}

pub struct ActiveStage {
    x224_processor: x224::Processor,
    fast_path_processor: fast_path::Processor,
    crypto: Option<SessionCrypto>,
    /// Server-to-client decompression history, shared by Slow-Path ShareData
    /// and FastPath output (one history per direction).
    decompressor: Decompressor,
    user_channel_id: u16,
    io_channel_id: u16,
    share_id: u32,
}

impl ActiveStage {
    pub fn new(connection_result: ConnectionResult) -> Self {
        let ConnectionResult {
            io_channel_id,
            user_channel_id,
            share_id,
            static_channels,
            connection_activation,
            ..
        } = connection_result;

        let fast_path_processor = fast_path::ProcessorBuilder {
            io_channel_id,
            user_channel_id,
            share_id,
        }
        .build();

        Self {
            x224_processor: x224::Processor::new(
                static_channels,
                user_channel_id,
                io_channel_id,
                share_id,
                connection_activation,
            ),
            fast_path_processor,
            crypto: None,
            decompressor: Decompressor::new(),
            user_channel_id,
            io_channel_id,
            share_id,
        }
    }

    /// Installs the session keys; called exactly once, with the secrets the
    /// security upgrade produced.
    pub fn set_session_keys(&mut self, master_secret: &[u8], client_random: &[u8], server_random: &[u8]) {
        self.crypto = Some(SessionCrypto::from_secrets(master_secret, client_random, server_random));
    }

    pub fn has_session_keys(&self) -> bool {
        self.crypto.is_some()
    }

    /// Processes one inbound frame, FastPath or X.224, in wire order.
    pub fn process(
        &mut self,
        image: &mut DecodedImage,
        action: Action,
        frame: &[u8],
    ) -> SessionResult<Vec<ActiveStageOutput>> {
        let mut stage_outputs = Vec::new();

        match action {
            Action::FastPath => {
                let mut output = WriteBuf::new();
                let update_kinds = self.fast_path_processor.process(
                    image,
                    frame,
                    self.crypto.as_ref(),
                    &mut self.decompressor,
                    &mut output,
                )?;

                if !output.is_empty() {
                    stage_outputs.push(ActiveStageOutput::ResponseFrame(output.into_inner()));
                }

                for update in update_kinds {
                    stage_outputs.push(match update {
                        UpdateKind::Region(region) => ActiveStageOutput::GraphicsUpdate(region),
                        UpdateKind::PointerDefault => ActiveStageOutput::PointerDefault,
                        UpdateKind::PointerHidden => ActiveStageOutput::PointerHidden,
                        UpdateKind::PointerPosition { x, y } => ActiveStageOutput::PointerPosition { x, y },
                    });
                }
            }
            Action::X224 => {
                let outputs = self.x224_processor.process(frame, &mut self.decompressor)?;

                for output in outputs {
                    stage_outputs.push(match output {
                        x224::ProcessorOutput::ResponseFrame(frame) => ActiveStageOutput::ResponseFrame(frame),
                        x224::ProcessorOutput::Disconnect(DisconnectReason::UserRequested) => {
                            ActiveStageOutput::Terminate(GracefulDisconnectReason::UserInitiated)
                        }
                        x224::ProcessorOutput::Disconnect(DisconnectReason::ProviderInitiated) => {
                            ActiveStageOutput::Terminate(GracefulDisconnectReason::ServerInitiated)
                        }
                        x224::ProcessorOutput::Disconnect(reason) => {
                            ActiveStageOutput::Terminate(GracefulDisconnectReason::Other(reason))
                        }
                        x224::ProcessorOutput::DeactivateAll(sequence) => ActiveStageOutput::DeactivateAll(sequence),
                    });
                }
            }
        }

        Ok(stage_outputs)
    }

    /// Encodes FastPath input events into a complete wire frame, encrypting
    /// the event payload when the session keys are set.
    pub fn encode_input_events(&self, events: Vec<FastPathInputEvent>) -> SessionResult<Vec<u8>> {
        if events.is_empty() {
            return Err(general_err!("no input events to encode"));
        }

        match &self.crypto {
            Some(crypto) => {
                // serialize the events, encrypt, then frame with the
                // ENCRYPTED flag set in the header
                let events_length = events.iter().map(|event| event.size()).sum::<usize>();
                let mut plaintext = vec![0u8; events_length];
                let mut cursor = opalrdp_core::WriteCursor::new(&mut plaintext);
                for event in &events {
                    event.encode(&mut cursor).map_err(SessionError::encode)?;
                }

                let encrypted = crypto.encrypt(&plaintext);

                let header = FastPathInputHeader {
                    flags: EncryptionFlags::ENCRYPTED,
                    data_length: encrypted.len(),
                    num_events: u8::try_from(events.len())
                        .map_err(|_| reason_err!("FastPathInput", "too many input events: {}", events.len()))?,
                };

                let mut buf = WriteBuf::new();
                encode_buf(&header, &mut buf).map_err(SessionError::encode)?;
                buf.write_slice(&encrypted);

                Ok(buf.into_inner())
            }
            None => {
                let pdu = FastPathInput(events);

                let mut buf = WriteBuf::new();
                encode_buf(&pdu, &mut buf).map_err(SessionError::encode)?;

                Ok(buf.into_inner())
            }
        }
    }

    /// Sends a ShareData PDU on the I/O channel (Refresh Rect, Suppress
    /// Output, …), returning the complete frame.
    pub fn encode_static(&self, pdu: ShareDataPdu) -> SessionResult<Vec<u8>> {
        let mut buf = WriteBuf::new();
        self.x224_processor.encode_static(&mut buf, pdu)?;
        Ok(buf.into_inner())
    }

    /// Initiates a clean shutdown; the server answers with Shutdown Denied,
    /// which triggers the disconnect ultimatum.
    pub fn graceful_shutdown(&self) -> SessionResult<Vec<u8>> {
        self.encode_static(ShareDataPdu::ShutdownRequest)
    }

    pub fn user_channel_id(&self) -> u16 {
        self.user_channel_id
    }

    pub fn io_channel_id(&self) -> u16 {
        self.io_channel_id
    }

    pub fn share_id(&self) -> u32 {
        self.share_id
    }
}
