//! Capability Exchange and Connection Finalization.
//!
//! Abstracted from the main connector so the same sequence can serve the
//! Deactivation-Reactivation dance: a Server Deactivate All PDU during the
//! active stage re-enters this sequence at CapabilitiesExchange.

use core::mem;

use opalrdp_pdu::rdp::capability_sets::{self, CapabilitySet};
use opalrdp_pdu::rdp::headers::ShareControlPdu;
use opalrdp_pdu::PduHint;

use crate::{Config, ConnectionFinalizationSequence, ConnectorResult, DesktopSize, Sequence, State, Written};

#[derive(Debug, Clone)]
pub struct ConnectionActivationSequence {
    pub state: ConnectionActivationState,
    config: Config,
}

impl ConnectionActivationSequence {
    pub fn new(config: Config, io_channel_id: u16, user_channel_id: u16) -> Self {
        Self {
            state: ConnectionActivationState::CapabilitiesExchange {
                io_channel_id,
                user_channel_id,
            },
            config,
        }
    }

    /// A fresh clone of this sequence rewound to CapabilitiesExchange, for
    /// the reactivation triggered by Server Deactivate All.
    #[must_use]
    pub fn reset_clone(&self) -> Self {
        let mut cloned = self.clone();

        match &self.state {
            ConnectionActivationState::CapabilitiesExchange {
                io_channel_id,
                user_channel_id,
            }
            | ConnectionActivationState::ConnectionFinalization {
                io_channel_id,
                user_channel_id,
                ..
            }
            | ConnectionActivationState::Finalized {
                io_channel_id,
                user_channel_id,
                ..
            } => {
                cloned.state = ConnectionActivationState::CapabilitiesExchange {
                    io_channel_id: *io_channel_id,
                    user_channel_id: *user_channel_id,
                };
            }
            ConnectionActivationState::Consumed => {}
        }

        cloned
    }
}

impl Sequence for ConnectionActivationSequence {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint> {
        match &self.state {
            ConnectionActivationState::Consumed => None,
            ConnectionActivationState::Finalized { .. } => None,
            ConnectionActivationState::CapabilitiesExchange { .. } => Some(&opalrdp_pdu::X224_HINT),
            ConnectionActivationState::ConnectionFinalization {
                connection_finalization,
                ..
            } => connection_finalization.next_pdu_hint(),
        }
    }

    fn state(&self) -> &dyn State {
        &self.state
    }

    fn step(&mut self, input: &[u8], output: &mut opalrdp_core::WriteBuf) -> ConnectorResult<Written> {
        let (written, next_state) = match mem::take(&mut self.state) {
            ConnectionActivationState::Consumed | ConnectionActivationState::Finalized { .. } => {
                return Err(general_err!(
                    "connection activation sequence state is finalized or consumed (this is a bug)"
                ));
            }
            ConnectionActivationState::CapabilitiesExchange {
                io_channel_id,
                user_channel_id,
            } => {
                debug!("Capabilities Exchange");

                let send_data_indication_ctx = crate::decode_send_data_indication(input)?;
                let share_control_ctx = crate::decode_share_control(send_data_indication_ctx)?;

                debug!(message = ?share_control_ctx.pdu, "Received");

                if share_control_ctx.channel_id != io_channel_id {
                    warn!(
                        io_channel_id,
                        share_control_ctx.channel_id, "Unexpected channel ID for received Share Control PDU"
                    );
                }

                let ShareControlPdu::ServerDemandActive(server_demand_active) = share_control_ctx.pdu else {
                    return Err(general_err!("unexpected Share Control PDU (expected ServerDemandActive)"));
                };

                let capability_sets = server_demand_active.pdu.capability_sets;

                // The negotiated size may differ slightly from the requested
                // one due to server-side constraints; use it from here on.
                let desktop_size = capability_sets
                    .iter()
                    .find_map(|c| match c {
                        CapabilitySet::Bitmap(b) => Some(DesktopSize {
                            width: b.desktop_width,
                            height: b.desktop_height,
                        }),
                        _ => None,
                    })
                    .unwrap_or(self.config.desktop_size);

                let client_confirm_active = ShareControlPdu::ClientConfirmActive(create_client_confirm_active(
                    &self.config,
                    share_control_ctx.pdu_source,
                    capability_sets,
                    desktop_size,
                ));

                debug!(message = ?client_confirm_active, "Send");

                let written = crate::encode_share_control(
                    user_channel_id,
                    io_channel_id,
                    share_control_ctx.share_id,
                    client_confirm_active,
                    output,
                )?;

                (
                    Written::from_size(written)?,
                    ConnectionActivationState::ConnectionFinalization {
                        io_channel_id,
                        user_channel_id,
                        desktop_size,
                        share_id: share_control_ctx.share_id,
                        connection_finalization: ConnectionFinalizationSequence::new(
                            io_channel_id,
                            user_channel_id,
                            share_control_ctx.share_id,
                        ),
                    },
                )
            }
            ConnectionActivationState::ConnectionFinalization {
                io_channel_id,
                user_channel_id,
                desktop_size,
                share_id,
                mut connection_finalization,
            } => {
                debug!("Connection Finalization");

                let written = connection_finalization.step(input, output)?;

                let next_state = if !connection_finalization.state.is_terminal() {
                    ConnectionActivationState::ConnectionFinalization {
                        io_channel_id,
                        user_channel_id,
                        desktop_size,
                        share_id,
                        connection_finalization,
                    }
                } else {
                    ConnectionActivationState::Finalized {
                        io_channel_id,
                        user_channel_id,
                        desktop_size,
                        share_id,
                    }
                };

                (written, next_state)
            }
        };

        self.state = next_state;

        Ok(written)
    }
}

#[derive(Default, Debug, Clone)]
pub enum ConnectionActivationState {
    #[default]
    Consumed,
    CapabilitiesExchange {
        io_channel_id: u16,
        user_channel_id: u16,
    },
    ConnectionFinalization {
        io_channel_id: u16,
        user_channel_id: u16,
        desktop_size: DesktopSize,
        share_id: u32,
        connection_finalization: ConnectionFinalizationSequence,
    },
    Finalized {
        io_channel_id: u16,
        user_channel_id: u16,
        desktop_size: DesktopSize,
        share_id: u32,
    },
}

impl State for ConnectionActivationState {
    fn name(&self) -> &'static str {
        match self {
            ConnectionActivationState::Consumed => "Consumed",
            ConnectionActivationState::CapabilitiesExchange { .. } => "CapabilitiesExchange",
            ConnectionActivationState::ConnectionFinalization { .. } => "ConnectionFinalization",
            ConnectionActivationState::Finalized { .. } => "Finalized",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, ConnectionActivationState::Finalized { .. })
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

const DEFAULT_POINTER_CACHE_SIZE: u16 = 32;

fn create_client_confirm_active(
    config: &Config,
    originator_id: u16,
    mut server_capability_sets: Vec<CapabilitySet>,
    desktop_size: DesktopSize,
) -> capability_sets::ClientConfirmActive {
    use capability_sets::{
        Bitmap, BitmapCache, BitmapDrawingFlags, CacheEntry, ClientConfirmActive, CmdFlags, DemandActive,
        FrameAcknowledge, General, GeneralExtraFlags, Input, InputFlags, LargePointer, LargePointerSupportFlags,
        MultifragmentUpdate, OffscreenBitmapCache, Order, OrderFlags, Pointer, SurfaceCommands, VirtualChannel,
        VirtualChannelFlags,
    };

    // Echo back the negotiated multifragment limit, replace everything else
    // with what this client actually supports.
    server_capability_sets.retain(|capability_set| matches!(capability_set, CapabilitySet::MultiFragmentUpdate(_)));

    server_capability_sets.extend_from_slice(&[
        CapabilitySet::General(General {
            major_platform_type: config.platform,
            minor_platform_type: 0,
            extra_flags: GeneralExtraFlags::FASTPATH_OUTPUT_SUPPORTED | GeneralExtraFlags::NO_BITMAP_COMPRESSION_HDR,
            refresh_rect_support: true,
            suppress_output_support: true,
        }),
        CapabilitySet::Bitmap(Bitmap {
            preferred_bits_per_pixel: config.color_depth as u16,
            desktop_width: desktop_size.width,
            desktop_height: desktop_size.height,
            desktop_resize_flag: true,
            drawing_flags: BitmapDrawingFlags::ALLOW_SKIP_ALPHA,
        }),
        CapabilitySet::Order(Order {
            order_flags: OrderFlags::NEGOTIATE_ORDER_SUPPORT | OrderFlags::ZERO_BOUNDS_DELTAS_SUPPORT,
            order_support: [0; Order::ORDER_SUPPORT_ARRAY_SIZE],
            desktop_save_size: 480 * 480,
            text_ansi_code_page: 0,
        }),
        // The three size-tiered caches: cell size ceilings 1024 and 16384
        // pixels, with the rest falling into the large tier.
        CapabilitySet::BitmapCache(BitmapCache {
            caches: [
                CacheEntry {
                    entries: 600,
                    maximum_cell_size: 1024,
                },
                CacheEntry {
                    entries: 300,
                    maximum_cell_size: 16384,
                },
                CacheEntry {
                    entries: 100,
                    maximum_cell_size: u16::MAX,
                },
            ],
        }),
        CapabilitySet::Input(Input {
            input_flags: InputFlags::SCANCODES
                | InputFlags::MOUSEX
                | InputFlags::FASTPATH_INPUT
                | InputFlags::UNICODE
                | InputFlags::FASTPATH_INPUT_2
                | InputFlags::TS_MOUSE_HWHEEL,
            keyboard_layout: config.keyboard_layout,
            keyboard_type: config.keyboard_type,
            keyboard_subtype: config.keyboard_subtype,
            keyboard_function_key: config.keyboard_functional_keys_count,
        }),
        CapabilitySet::Pointer(Pointer {
            // non-zero to enable client-side pointer rendering
            color_pointer_cache_size: DEFAULT_POINTER_CACHE_SIZE,
            pointer_cache_size: DEFAULT_POINTER_CACHE_SIZE,
        }),
        CapabilitySet::OffscreenBitmapCache(OffscreenBitmapCache {
            is_supported: true,
            cache_size: 7680, // KiB, 7.5 MiB aggregate
            cache_entries: 100,
        }),
        CapabilitySet::VirtualChannel(VirtualChannel {
            flags: VirtualChannelFlags::empty(),
            chunk_size: Some(0), // ignored
        }),
        CapabilitySet::LargePointer(LargePointer {
            flags: LargePointerSupportFlags::UP_TO_96X96_PIXELS | LargePointerSupportFlags::UP_TO_384X384_PIXELS,
        }),
        CapabilitySet::SurfaceCommands(SurfaceCommands {
            flags: CmdFlags::SET_SURFACE_BITS | CmdFlags::STREAM_SURFACE_BITS | CmdFlags::FRAME_MARKER,
        }),
        CapabilitySet::FrameAcknowledge(FrameAcknowledge {
            max_unacknowledged_frame_count: 2,
        }),
    ]);

    if !server_capability_sets
        .iter()
        .any(|c| matches!(&c, CapabilitySet::MultiFragmentUpdate(_)))
    {
        server_capability_sets.push(CapabilitySet::MultiFragmentUpdate(MultifragmentUpdate {
            max_request_size: 8 * 1024 * 1024, // 8 MB
        }));
    }

    ClientConfirmActive {
        originator_id,
        pdu: DemandActive {
            source_descriptor: "OPALRDP".to_owned(),
            capability_sets: server_capability_sets,
        },
    }
}
