//! Slow-Path (X.224) frame processing during the active stage: ShareData
//! PDUs on the I/O channel and static virtual channel traffic everywhere
//! else.

use opalrdp_bulk::Decompressor;
use opalrdp_connector::connection_activation::ConnectionActivationSequence;
use opalrdp_core::{encode_buf, ReadCursor, WriteBuf};
use opalrdp_pdu::mcs::{DisconnectProviderUltimatum, DisconnectReason, McsMessage};
use opalrdp_pdu::rdp::headers::{CompressionFlags, ShareControlPdu, ShareDataPdu};
use opalrdp_pdu::rdp::server_error_info::ServerSetErrorInfoPdu;
use opalrdp_pdu::x224::X224;
use opalrdp_svc::StaticChannelSet;
use std::borrow::Cow;

use crate::{SessionError, SessionErrorExt as _, SessionResult};

/// X.224 processor output.
#[derive(Debug)]
pub enum ProcessorOutput {
    /// A buffer with encoded data to send to the server.
    ResponseFrame(Vec<u8>),
    /// A graceful disconnect notification; the caller closes the connection.
    Disconnect(DisconnectReason),
    /// A Server Deactivate All was received: the caller drives the returned
    /// sequence through a new capability exchange before resuming.
    DeactivateAll(Box<ConnectionActivationSequence>),
}

pub struct Processor {
    static_channels: StaticChannelSet,
    user_channel_id: u16,
    io_channel_id: u16,
    share_id: u32,
    connection_activation: ConnectionActivationSequence,
}

impl Processor {
    pub fn new(
        static_channels: StaticChannelSet,
        user_channel_id: u16,
        io_channel_id: u16,
        share_id: u32,
        connection_activation: ConnectionActivationSequence,
    ) -> Self {
        Self {
            static_channels,
            user_channel_id,
            io_channel_id,
            share_id,
            connection_activation,
        }
    }

    /// Processes one Slow-Path frame, in wire order.
    pub fn process(&mut self, frame: &[u8], decompressor: &mut Decompressor) -> SessionResult<Vec<ProcessorOutput>> {
        let data_ctx = opalrdp_connector::decode_send_data_indication(frame).map_err(SessionError::connector)?;
        let channel_id = data_ctx.channel_id;

        if channel_id == self.io_channel_id {
            self.process_io_channel(data_ctx, decompressor)
        } else {
            self.process_static_channel(data_ctx)
        }
    }

    fn process_io_channel(
        &mut self,
        data_ctx: opalrdp_connector::SendDataIndicationCtx<'_>,
        decompressor: &mut Decompressor,
    ) -> SessionResult<Vec<ProcessorOutput>> {
        debug_assert_eq!(data_ctx.channel_id, self.io_channel_id);

        let ctx = opalrdp_connector::decode_share_control(data_ctx).map_err(SessionError::connector)?;

        let pdu = match ctx.pdu {
            ShareControlPdu::Data(data_header) => {
                // a compressed payload is inflated with the per-direction
                // history, then dispatched on its pduType2
                match data_header.share_data_pdu {
                    ShareDataPdu::Compressed { pdu_type, data } => {
                        let inflated = decompressor
                            .decompress(&data, data_header.compression_flags, data_header.compression_type)
                            .map_err(SessionError::compression)?;

                        let mut cursor = ReadCursor::new(&inflated);
                        ShareDataPdu::from_type(&mut cursor, pdu_type).map_err(SessionError::decode)?
                    }
                    pdu => {
                        if data_header.compression_flags.contains(CompressionFlags::FLUSHED) {
                            decompressor.reset();
                        }
                        pdu
                    }
                }
            }
            ShareControlPdu::ServerDeactivateAll(_) => {
                debug!("Received Server Deactivate All");

                return Ok(vec![ProcessorOutput::DeactivateAll(Box::new(
                    self.connection_activation.reset_clone(),
                ))]);
            }
            other => {
                return Err(reason_err!(
                    "X224",
                    "unexpected Share Control PDU: {:?}",
                    other.share_header_type()
                ));
            }
        };

        debug!(message = ?pdu.share_header_type(), "Received");

        match pdu {
            ShareDataPdu::SaveSessionInfo(info) => {
                debug!(size = info.len(), "Got Save Session Info PDU");
                Ok(Vec::new())
            }
            ShareDataPdu::ServerSetErrorInfo(ServerSetErrorInfoPdu(error_info)) => {
                if error_info == opalrdp_pdu::rdp::server_error_info::ErrorInfo::None {
                    return Ok(Vec::new());
                }

                // Part of the server-side graceful disconnect procedure.
                if error_info.is_graceful_disconnect() {
                    use opalrdp_pdu::rdp::server_error_info::ErrorInfo;

                    debug!("Received server-side graceful disconnect request: {}", error_info.description());

                    let reason = match error_info {
                        ErrorInfo::RpcInitiatedDisconnectByUser | ErrorInfo::LogoffByUser => {
                            DisconnectReason::UserRequested
                        }
                        _ => DisconnectReason::ProviderInitiated,
                    };

                    Ok(vec![ProcessorOutput::Disconnect(reason)])
                } else {
                    Err(reason_err!("ServerSetErrorInfo", "{}", error_info.description()))
                }
            }
            ShareDataPdu::ShutdownDenied => {
                debug!("ShutdownDenied received, session will be closed");

                // Proceeding with the shutdown requires sending a disconnect
                // ultimatum to the server.
                let ultimatum = McsMessage::DisconnectProviderUltimatum(DisconnectProviderUltimatum::from_reason(
                    DisconnectReason::UserRequested,
                ));

                let mut buf = WriteBuf::new();
                encode_buf(&X224(ultimatum), &mut buf).map_err(SessionError::encode)?;

                Ok(vec![
                    ProcessorOutput::ResponseFrame(buf.into_inner()),
                    ProcessorOutput::Disconnect(DisconnectReason::UserRequested),
                ])
            }
            ShareDataPdu::MonitorLayout(data) => {
                debug!(size = data.len(), "Got Monitor Layout PDU");
                Ok(Vec::new())
            }
            ShareDataPdu::Synchronize(_) | ShareDataPdu::Control(_) | ShareDataPdu::FontMap(_) => {
                // late finalization echoes are harmless
                Ok(Vec::new())
            }
            ShareDataPdu::BitmapCachePersistentList(_) => {
                // persistent caching across sessions is not implemented;
                // skipped by its declared length
                debug!("Skipping Bitmap Cache Persistent List PDU");
                Ok(Vec::new())
            }
            ShareDataPdu::Unknown { pdu_type, data } => {
                debug!(?pdu_type, size = data.len(), "Skipping unknown ShareData PDU");
                Ok(Vec::new())
            }
            pdu => Err(reason_err!(
                "IO channel",
                "unexpected ShareData PDU: {:?}",
                pdu.share_header_type()
            )),
        }
    }

    fn process_static_channel(
        &mut self,
        data_ctx: opalrdp_connector::SendDataIndicationCtx<'_>,
    ) -> SessionResult<Vec<ProcessorOutput>> {
        let channel_id = data_ctx.channel_id;

        let Some(result) = self.static_channels.process(channel_id, data_ctx.user_data) else {
            return Err(reason_err!("X224", "unexpected channel received: ID {channel_id}"));
        };

        let responses = result.map_err(|e| custom_err!("SVC", e))?;

        let mut outputs = Vec::new();
        for response in responses {
            outputs.push(ProcessorOutput::ResponseFrame(self.encode_channel_message(
                channel_id,
                &response,
            )?));
        }

        Ok(outputs)
    }

    /// Chunkifies one outbound channel message and wraps every chunk in a
    /// SendDataRequest, producing ready-to-send frames.
    fn encode_channel_message(&self, channel_id: u16, message: &opalrdp_svc::SvcMessage) -> SessionResult<Vec<u8>> {
        let chunks = opalrdp_svc::chunkify(message).map_err(|e| custom_err!("SVC", e))?;

        let mut buf = WriteBuf::new();
        for chunk in &chunks {
            let pdu = opalrdp_pdu::mcs::SendDataRequest {
                initiator_id: self.user_channel_id,
                channel_id,
                user_data: Cow::Borrowed(chunk.as_slice()),
            };

            encode_buf(&X224(pdu), &mut buf).map_err(SessionError::encode)?;
        }

        Ok(buf.into_inner())
    }

    /// Sends a complete message on a named static channel.
    pub fn encode_static_channel_message(
        &self,
        name: opalrdp_pdu::gcc::ChannelName,
        message: opalrdp_svc::SvcMessage,
    ) -> SessionResult<Vec<u8>> {
        let channel_id = self
            .static_channels
            .get_channel_id_by_name(name)
            .ok_or_else(|| reason_err!("SVC", "channel {} is not connected", name.as_str()))?;

        self.encode_channel_message(channel_id, &message)
    }

    /// Sends a ShareData PDU on the I/O channel, e.g. Refresh Rect or
    /// Suppress Output.
    pub fn encode_static(&self, output: &mut WriteBuf, pdu: ShareDataPdu) -> SessionResult<usize> {
        opalrdp_connector::encode_share_data(self.user_channel_id, self.io_channel_id, self.share_id, pdu, output)
            .map_err(SessionError::connector)
    }
}
