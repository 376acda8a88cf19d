//! The top-level client connection sequence, spanning connection initiation
//! through the finalization handshake.

use core::mem;

use opalrdp_core::{decode, WriteBuf};
use opalrdp_pdu::x224::{X224, X224Data};
use opalrdp_pdu::{gcc, mcs, nego, rdp, PduHint};
use opalrdp_svc::{StaticChannelSet, StaticVirtualChannel};

use crate::connection_activation::{ConnectionActivationSequence, ConnectionActivationState};
use crate::{
    encode_x224_packet, ChannelConnectionSequence, ChannelConnectionState, Config, ConnectorError,
    ConnectorErrorExt as _, ConnectorErrorKind, ConnectorResult, DesktopSize, LicenseExchangeSequence, Sequence, State,
    Written,
};

/// Everything the active stage needs from a finished connection sequence.
#[derive(Debug)]
pub struct ConnectionResult {
    pub io_channel_id: u16,
    pub user_channel_id: u16,
    pub share_id: u32,
    pub static_channels: StaticChannelSet,
    pub desktop_size: DesktopSize,
    /// Server random from the GCC security block, if the server sent one;
    /// key derivation combines it with the secrets the security upgrade
    /// produced.
    pub server_random: Option<Vec<u8>>,
    /// Kept around to run the Deactivation-Reactivation sequence.
    pub connection_activation: ConnectionActivationSequence,
}

#[derive(Default, Debug)]
#[non_exhaustive]
pub enum ClientConnectorState {
    #[default]
    Consumed,

    ConnectionInitiationSendRequest,
    ConnectionInitiationWaitConfirm {
        requested_protocol: nego::SecurityProtocol,
    },
    EnhancedSecurityUpgrade {
        selected_protocol: nego::SecurityProtocol,
    },
    BasicSettingsExchangeSendInitial {
        selected_protocol: nego::SecurityProtocol,
    },
    BasicSettingsExchangeWaitResponse {
        connect_initial: mcs::ConnectInitial,
    },
    ChannelConnection {
        io_channel_id: u16,
        server_random: Option<Vec<u8>>,
        channel_connection: ChannelConnectionSequence,
    },
    SecureSettingsExchange {
        io_channel_id: u16,
        user_channel_id: u16,
        server_random: Option<Vec<u8>>,
    },
    LicensingExchange {
        io_channel_id: u16,
        user_channel_id: u16,
        server_random: Option<Vec<u8>>,
        license_exchange: LicenseExchangeSequence,
    },
    CapabilitiesExchange {
        server_random: Option<Vec<u8>>,
        connection_activation: ConnectionActivationSequence,
    },
    ConnectionFinalization {
        server_random: Option<Vec<u8>>,
        connection_activation: ConnectionActivationSequence,
    },
    Connected {
        result: ConnectionResult,
    },
}

impl State for ClientConnectorState {
    fn name(&self) -> &'static str {
        match self {
            Self::Consumed => "Consumed",
            Self::ConnectionInitiationSendRequest => "ConnectionInitiationSendRequest",
            Self::ConnectionInitiationWaitConfirm { .. } => "ConnectionInitiationWaitConfirm",
            Self::EnhancedSecurityUpgrade { .. } => "EnhancedSecurityUpgrade",
            Self::BasicSettingsExchangeSendInitial { .. } => "BasicSettingsExchangeSendInitial",
            Self::BasicSettingsExchangeWaitResponse { .. } => "BasicSettingsExchangeWaitResponse",
            Self::ChannelConnection { .. } => "ChannelConnection",
            Self::SecureSettingsExchange { .. } => "SecureSettingsExchange",
            Self::LicensingExchange { .. } => "LicensingExchange",
            Self::CapabilitiesExchange {
                connection_activation, ..
            } => connection_activation.state().name(),
            Self::ConnectionFinalization {
                connection_activation, ..
            } => connection_activation.state().name(),
            Self::Connected { .. } => "Connected",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

#[derive(Debug)]
pub struct ClientConnector {
    pub config: Config,
    pub state: ClientConnectorState,
    pub static_channels: StaticChannelSet,
}

impl ClientConnector {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: ClientConnectorState::ConnectionInitiationSendRequest,
            static_channels: StaticChannelSet::new(),
        }
    }

    #[must_use]
    pub fn with_static_channel<T>(mut self, channel: T) -> Self
    where
        T: StaticVirtualChannel + 'static,
    {
        self.static_channels.insert(channel);
        self
    }

    pub fn attach_static_channel<T>(&mut self, channel: T)
    where
        T: StaticVirtualChannel + 'static,
    {
        self.static_channels.insert(channel);
    }

    /// The caller performs the TLS/CredSSP upgrade out of band when this
    /// returns true, then calls [`Self::mark_security_upgrade_as_done`].
    pub fn should_perform_security_upgrade(&self) -> bool {
        matches!(self.state, ClientConnectorState::EnhancedSecurityUpgrade { .. })
    }

    pub fn mark_security_upgrade_as_done(&mut self) -> ConnectorResult<()> {
        if !self.should_perform_security_upgrade() {
            return Err(general_err!("not waiting for a security upgrade"));
        }

        let written = self.step(&[], &mut WriteBuf::new())?;
        debug_assert!(written.is_nothing());
        debug_assert!(!self.should_perform_security_upgrade());

        Ok(())
    }
}

impl Sequence for ClientConnector {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint> {
        match &self.state {
            ClientConnectorState::Consumed => None,
            ClientConnectorState::ConnectionInitiationSendRequest => None,
            ClientConnectorState::ConnectionInitiationWaitConfirm { .. } => Some(&opalrdp_pdu::X224_HINT),
            ClientConnectorState::EnhancedSecurityUpgrade { .. } => None,
            ClientConnectorState::BasicSettingsExchangeSendInitial { .. } => None,
            ClientConnectorState::BasicSettingsExchangeWaitResponse { .. } => Some(&opalrdp_pdu::X224_HINT),
            ClientConnectorState::ChannelConnection { channel_connection, .. } => channel_connection.next_pdu_hint(),
            ClientConnectorState::SecureSettingsExchange { .. } => None,
            ClientConnectorState::LicensingExchange { license_exchange, .. } => license_exchange.next_pdu_hint(),
            ClientConnectorState::CapabilitiesExchange {
                connection_activation, ..
            } => connection_activation.next_pdu_hint(),
            ClientConnectorState::ConnectionFinalization {
                connection_activation, ..
            } => connection_activation.next_pdu_hint(),
            ClientConnectorState::Connected { .. } => None,
        }
    }

    fn state(&self) -> &dyn State {
        &self.state
    }

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> ConnectorResult<Written> {
        let (written, next_state) = match mem::take(&mut self.state) {
            // Invalid state
            ClientConnectorState::Consumed => {
                return Err(general_err!("connector sequence state is consumed (this is a bug)"))
            }

            //== Connection Initiation ==//
            // Exchange the supported security protocols.
            ClientConnectorState::ConnectionInitiationSendRequest => {
                debug!("Connection Initiation");

                let security_protocol = nego::SecurityProtocol::SSL | nego::SecurityProtocol::HYBRID;

                let connection_request = nego::ConnectionRequest {
                    cookie: Some(self.config.credentials.username.clone()),
                    flags: nego::RequestFlags::empty(),
                    protocol: security_protocol,
                };

                debug!(message = ?connection_request, "Send");

                let written =
                    opalrdp_core::encode_buf(&X224(connection_request), output).map_err(ConnectorError::encode)?;

                (
                    Written::from_size(written)?,
                    ClientConnectorState::ConnectionInitiationWaitConfirm {
                        requested_protocol: security_protocol,
                    },
                )
            }
            ClientConnectorState::ConnectionInitiationWaitConfirm { requested_protocol } => {
                let connection_confirm = decode::<X224<nego::ConnectionConfirm>>(input)
                    .map_err(ConnectorError::decode)
                    .map(|p| p.0)?;

                debug!(message = ?connection_confirm, "Received");

                let (flags, selected_protocol) = match connection_confirm {
                    nego::ConnectionConfirm::Response { flags, protocol } => (flags, protocol),
                    nego::ConnectionConfirm::Failure { code } => {
                        error!(?code, "Received connection failure code");
                        return Err(ConnectorError::new(
                            "negotiation failure",
                            ConnectorErrorKind::Negotiation(code),
                        ));
                    }
                };

                info!(?selected_protocol, ?flags, "Server confirmed connection");

                if !selected_protocol.intersects(requested_protocol) {
                    return Err(reason_err!(
                        "Initiation",
                        "client advertised {requested_protocol:?}, but server selected {selected_protocol:?}",
                    ));
                }

                (
                    Written::Nothing,
                    ClientConnectorState::EnhancedSecurityUpgrade { selected_protocol },
                )
            }

            //== Security Upgrade ==//
            // Performed out of band by the caller (TLS handshake, CredSSP).
            ClientConnectorState::EnhancedSecurityUpgrade { selected_protocol } => (
                Written::Nothing,
                ClientConnectorState::BasicSettingsExchangeSendInitial { selected_protocol },
            ),

            //== Basic Settings Exchange ==//
            // Core, security and network data through MCS Connect-Initial/Response.
            ClientConnectorState::BasicSettingsExchangeSendInitial { selected_protocol } => {
                debug!("Basic Settings Exchange");

                let client_gcc_blocks =
                    create_gcc_blocks(&self.config, selected_protocol, &self.static_channels)?;

                let connect_initial = mcs::ConnectInitial::with_gcc_blocks(client_gcc_blocks);

                debug!(message = ?connect_initial, "Send");

                let written = encode_x224_packet(&connect_initial, output)?;

                (
                    Written::from_size(written)?,
                    ClientConnectorState::BasicSettingsExchangeWaitResponse { connect_initial },
                )
            }
            ClientConnectorState::BasicSettingsExchangeWaitResponse { connect_initial } => {
                let x224_payload = decode::<X224<X224Data<'_>>>(input)
                    .map_err(ConnectorError::decode)
                    .map(|p| p.0)?;
                let connect_response =
                    decode::<mcs::ConnectResponse>(x224_payload.data.as_ref()).map_err(ConnectorError::decode)?;

                debug!(message = ?connect_response, "Received");

                let server_gcc_blocks = connect_response.conference_create_response.gcc_blocks;

                let static_channel_ids = server_gcc_blocks.network.channel_ids.clone();
                let io_channel_id = server_gcc_blocks.network.io_channel;
                let server_random = server_gcc_blocks.security.server_random.clone();

                debug!(?static_channel_ids, io_channel_id);

                // Map our channel names onto the ids the server allocated,
                // in advertisement order.
                let channel_names = connect_initial
                    .conference_create_request
                    .gcc_blocks
                    .channel_names();

                for (channel, channel_id) in channel_names.iter().zip(static_channel_ids.iter().copied()) {
                    self.static_channels.attach_channel_id(channel.name, channel_id);
                }

                (
                    Written::Nothing,
                    ClientConnectorState::ChannelConnection {
                        io_channel_id,
                        server_random,
                        channel_connection: ChannelConnectionSequence::new(io_channel_id, static_channel_ids),
                    },
                )
            }

            //== Channel Connection ==//
            // Erect Domain, Attach User, then join every channel one by one.
            ClientConnectorState::ChannelConnection {
                io_channel_id,
                server_random,
                mut channel_connection,
            } => {
                debug!("Channel Connection");
                let written = channel_connection.step(input, output)?;

                let next_state = if let ChannelConnectionState::AllJoined { user_channel_id } = channel_connection.state
                {
                    debug_assert!(channel_connection.state.is_terminal());

                    ClientConnectorState::SecureSettingsExchange {
                        io_channel_id,
                        user_channel_id,
                        server_random,
                    }
                } else {
                    ClientConnectorState::ChannelConnection {
                        io_channel_id,
                        server_random,
                        channel_connection,
                    }
                };

                (written, next_state)
            }

            //== Secure Settings Exchange ==//
            // Send the Client Info PDU (credentials, client metadata).
            ClientConnectorState::SecureSettingsExchange {
                io_channel_id,
                user_channel_id,
                server_random,
            } => {
                debug!("Secure Settings Exchange");

                let client_info = create_client_info_pdu(&self.config);

                debug!("Send Client Info PDU");

                let written = crate::encode_send_data_request(user_channel_id, io_channel_id, &client_info, output)?;

                (
                    Written::from_size(written)?,
                    ClientConnectorState::LicensingExchange {
                        io_channel_id,
                        user_channel_id,
                        server_random,
                        license_exchange: LicenseExchangeSequence::new(io_channel_id),
                    },
                )
            }

            //== Licensing ==//
            // Consume license messages until the valid-client indication.
            ClientConnectorState::LicensingExchange {
                io_channel_id,
                user_channel_id,
                server_random,
                mut license_exchange,
            } => {
                debug!("Licensing Exchange");

                let written = license_exchange.step(input, output)?;

                let next_state = if license_exchange.state.is_terminal() {
                    ClientConnectorState::CapabilitiesExchange {
                        server_random,
                        connection_activation: ConnectionActivationSequence::new(
                            self.config.clone(),
                            io_channel_id,
                            user_channel_id,
                        ),
                    }
                } else {
                    ClientConnectorState::LicensingExchange {
                        io_channel_id,
                        user_channel_id,
                        server_random,
                        license_exchange,
                    }
                };

                (written, next_state)
            }

            //== Capabilities Exchange ==//
            // Receive Demand Active, send Confirm Active.
            ClientConnectorState::CapabilitiesExchange {
                server_random,
                mut connection_activation,
            } => {
                let written = connection_activation.step(input, output)?;
                match connection_activation.state {
                    ConnectionActivationState::ConnectionFinalization { .. } => (
                        written,
                        ClientConnectorState::ConnectionFinalization {
                            server_random,
                            connection_activation,
                        },
                    ),
                    _ => return Err(general_err!("invalid state (this is a bug)")),
                }
            }

            //== Connection Finalization ==//
            // Synchronize/Control/FontList out, four server responses in.
            ClientConnectorState::ConnectionFinalization {
                server_random,
                mut connection_activation,
            } => {
                let written = connection_activation.step(input, output)?;

                let next_state = if !connection_activation.state.is_terminal() {
                    ClientConnectorState::ConnectionFinalization {
                        server_random,
                        connection_activation,
                    }
                } else {
                    match connection_activation.state {
                        ConnectionActivationState::Finalized {
                            io_channel_id,
                            user_channel_id,
                            desktop_size,
                            share_id,
                        } => ClientConnectorState::Connected {
                            result: ConnectionResult {
                                io_channel_id,
                                user_channel_id,
                                share_id,
                                static_channels: mem::take(&mut self.static_channels),
                                desktop_size,
                                server_random,
                                connection_activation,
                            },
                        },
                        _ => return Err(general_err!("invalid state (this is a bug)")),
                    }
                };

                (written, next_state)
            }

            //== Connected ==//
            ClientConnectorState::Connected { .. } => return Err(general_err!("already connected")),
        };

        self.state = next_state;

        Ok(written)
    }
}

fn create_gcc_blocks(
    config: &Config,
    selected_protocol: nego::SecurityProtocol,
    static_channels: &StaticChannelSet,
) -> ConnectorResult<gcc::ClientGccBlocks> {
    use gcc::{
        ClientCoreData, ClientEarlyCapabilityFlags, ClientGccBlocks, ClientNetworkData, ClientSecurityData,
        RdpVersion, SupportedColorDepths,
    };

    let supported_color_depths = match config.color_depth {
        15 => SupportedColorDepths::BPP15,
        16 => SupportedColorDepths::BPP16,
        24 => SupportedColorDepths::BPP24,
        32 => SupportedColorDepths::BPP32 | SupportedColorDepths::BPP16,
        _ => {
            return Err(reason_err!(
                "create gcc blocks",
                "unsupported color depth: {}",
                config.color_depth
            ))
        }
    };

    let channels = static_channels
        .values()
        .map(opalrdp_svc::make_channel_definition)
        .collect::<Vec<_>>();

    const CONNECTION_TYPE_LAN: u8 = 6;

    Ok(ClientGccBlocks {
        core: ClientCoreData {
            version: RdpVersion::V5_PLUS,
            desktop_width: config.desktop_size.width,
            desktop_height: config.desktop_size.height,
            keyboard_layout: config.keyboard_layout,
            client_build: config.client_build,
            client_name: config.client_name.clone(),
            keyboard_type: config.keyboard_type,
            keyboard_subtype: config.keyboard_subtype,
            keyboard_functional_keys_count: config.keyboard_functional_keys_count,
            ime_file_name: config.ime_file_name.clone(),
            high_color_depth: 24,
            supported_color_depths,
            early_capability_flags: ClientEarlyCapabilityFlags::VALID_CONNECTION_TYPE
                | ClientEarlyCapabilityFlags::SUPPORT_ERR_INFO_PDU,
            dig_product_id: config.dig_product_id.clone(),
            connection_type: CONNECTION_TYPE_LAN,
            server_selected_protocol: selected_protocol.bits(),
        },
        security: ClientSecurityData::no_security(),
        network: if channels.is_empty() {
            None
        } else {
            Some(ClientNetworkData { channels })
        },
    })
}

fn create_client_info_pdu(config: &Config) -> rdp::ClientInfoPdu {
    use opalrdp_pdu::rdp::client_info::{AddressFamily, ClientInfo, ClientInfoFlags, CompressionType, ExtendedClientInfo};
    use opalrdp_pdu::rdp::headers::{BasicSecurityHeader, BasicSecurityHeaderFlags};

    let security_header = BasicSecurityHeader {
        flags: BasicSecurityHeaderFlags::INFO_PKT,
    };

    let mut flags = ClientInfoFlags::MOUSE
        | ClientInfoFlags::MOUSE_HAS_WHEEL
        | ClientInfoFlags::UNICODE
        | ClientInfoFlags::DISABLE_CTRL_ALT_DEL
        | ClientInfoFlags::LOGON_NOTIFY
        | ClientInfoFlags::LOGON_ERRORS
        | ClientInfoFlags::ENABLE_WINDOWS_KEY
        | ClientInfoFlags::MAXIMIZE_SHELL;

    if config.autologon {
        flags |= ClientInfoFlags::AUTOLOGON;
    }

    let address_family = if config.client_address.contains(':') {
        AddressFamily::INET_6
    } else {
        AddressFamily::INET
    };

    let client_info = ClientInfo {
        credentials: config.credentials.clone(),
        code_page: 0, // ignored when the keyboard layout of the core data is set
        flags,
        compression_type: CompressionType::K8, // ignored without ClientInfoFlags::COMPRESSION
        alternate_shell: String::new(),
        work_dir: String::new(),
        extra_info: ExtendedClientInfo {
            address_family,
            address: config.client_address.clone(),
            dir: config.client_dir.clone(),
            performance_flags: config.performance_flags,
        },
    };

    rdp::ClientInfoPdu {
        security_header,
        client_info,
    }
}
