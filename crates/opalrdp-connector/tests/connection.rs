//! Drives the whole connection sequence against synthetic server byte
//! streams, checking the client output order and the resulting session
//! parameters.

use std::borrow::Cow;

use opalrdp_connector::{
    ClientConnector, Config, ConnectionResult, ConnectorResult, DesktopSize, Sequence as _, State as _, Written,
};
use opalrdp_core::{decode, encode_vec, WriteBuf};
use opalrdp_pdu::gcc::{
    ConferenceCreateResponse, RdpVersion, ServerCoreData, ServerGccBlocks, ServerNetworkData, ServerSecurityData,
};
use opalrdp_pdu::mcs::{
    AttachUserConfirm, ChannelJoinConfirm, ConnectResponse, DomainParameters, McsMessage, SendDataIndication,
};
use opalrdp_pdu::nego::{ConnectionConfirm, ConnectionRequest, ResponseFlags, SecurityProtocol};
use opalrdp_pdu::rdp::capability_sets::{
    Bitmap, BitmapDrawingFlags, CapabilitySet, DemandActive, General, GeneralExtraFlags, MajorPlatformType,
    ServerDemandActive, SERVER_CHANNEL_ID,
};
use opalrdp_pdu::rdp::client_info::{Credentials, PerformanceFlags};
use opalrdp_pdu::rdp::finalization_messages::{ControlAction, ControlPdu, FontPdu, SynchronizePdu};
use opalrdp_pdu::rdp::headers::{
    BasicSecurityHeader, BasicSecurityHeaderFlags, CompressionFlags, ShareControlHeader, ShareControlPdu,
    ShareDataHeader, ShareDataPdu, StreamPriority,
};
use opalrdp_pdu::rdp::server_license::{LicenseHeader, LicensingErrorMessage, PreambleType, PreambleVersion, PREAMBLE_SIZE};
use opalrdp_pdu::x224::X224;

const IO_CHANNEL_ID: u16 = 1003;
const SERVER_USER_ID: u16 = 1002;
const USER_CHANNEL_ID: u16 = 1001 + 7;
const SHARE_ID: u32 = 0x103EA;

fn test_config() -> Config {
    Config {
        desktop_size: DesktopSize {
            width: 1280,
            height: 720,
        },
        credentials: Credentials {
            username: "jdoe".to_owned(),
            password: "hunter2".to_owned(),
            domain: None,
        },
        client_build: 18363,
        client_name: "OPAL-TEST".to_owned(),
        keyboard_type: 4,
        keyboard_subtype: 0,
        keyboard_functional_keys_count: 12,
        keyboard_layout: 0x409,
        ime_file_name: String::new(),
        dig_product_id: String::new(),
        client_dir: "C:\\client".to_owned(),
        client_address: "192.0.2.7".to_owned(),
        platform: MajorPlatformType::Unix,
        color_depth: 16,
        performance_flags: PerformanceFlags::DISABLE_WALLPAPER,
        autologon: false,
    }
}

fn server_gcc_blocks() -> ServerGccBlocks {
    ServerGccBlocks {
        core: ServerCoreData {
            version: RdpVersion::V5_PLUS,
            requested_protocols: Some(SecurityProtocol::SSL.bits()),
            early_capability_flags: None,
        },
        security: ServerSecurityData {
            encryption_method: 2,
            encryption_level: 1,
            server_random: Some((0x40..0x60).collect()),
            server_certificate: vec![0xAB; 32], // synthetic server key blob
        },
        network: ServerNetworkData {
            io_channel: IO_CHANNEL_ID,
            channel_ids: Vec::new(),
        },
    }
}

fn send_data_indication(user_data: Vec<u8>) -> Vec<u8> {
    encode_vec(&X224(SendDataIndication {
        initiator_id: SERVER_USER_ID,
        channel_id: IO_CHANNEL_ID,
        user_data: Cow::Owned(user_data),
    }))
    .unwrap()
}

fn license_valid_client_frame() -> Vec<u8> {
    let alert = LicensingErrorMessage::valid_client();
    let alert_body = encode_vec(&alert).unwrap();

    let header = LicenseHeader {
        preamble_message_type: PreambleType::ErrorAlert,
        preamble_flags: 0,
        preamble_version: PreambleVersion::V3,
        preamble_message_size: (PREAMBLE_SIZE + alert_body.len()) as u16,
    };

    let mut user_data = encode_vec(&BasicSecurityHeader {
        flags: BasicSecurityHeaderFlags::LICENSE_PKT,
    })
    .unwrap();
    user_data.extend(encode_vec(&header).unwrap());
    user_data.extend(alert_body);

    send_data_indication(user_data)
}

fn demand_active_frame() -> Vec<u8> {
    let demand_active = ShareControlHeader {
        share_control_pdu: ShareControlPdu::ServerDemandActive(ServerDemandActive {
            pdu: DemandActive {
                source_descriptor: "RDP".to_owned(),
                capability_sets: vec![
                    CapabilitySet::General(General {
                        major_platform_type: MajorPlatformType::Windows,
                        minor_platform_type: 0,
                        extra_flags: GeneralExtraFlags::FASTPATH_OUTPUT_SUPPORTED,
                        refresh_rect_support: true,
                        suppress_output_support: true,
                    }),
                    CapabilitySet::Bitmap(Bitmap {
                        preferred_bits_per_pixel: 16,
                        desktop_width: 1280,
                        desktop_height: 720,
                        desktop_resize_flag: false,
                        drawing_flags: BitmapDrawingFlags::ALLOW_SKIP_ALPHA,
                    }),
                ],
            },
        }),
        pdu_source: SERVER_CHANNEL_ID,
        share_id: SHARE_ID,
    };

    send_data_indication(encode_vec(&demand_active).unwrap())
}

fn share_data_frame(pdu: ShareDataPdu) -> Vec<u8> {
    let header = ShareControlHeader {
        share_control_pdu: ShareControlPdu::Data(ShareDataHeader {
            share_data_pdu: pdu,
            stream_priority: StreamPriority::Medium,
            compression_flags: CompressionFlags::empty(),
            compression_type: opalrdp_pdu::rdp::client_info::CompressionType::K8,
        }),
        pdu_source: SERVER_CHANNEL_ID,
        share_id: SHARE_ID,
    };

    send_data_indication(encode_vec(&header).unwrap())
}

/// Steps the connector, collecting any produced frame.
fn step(connector: &mut ClientConnector, input: &[u8], sent: &mut Vec<Vec<u8>>) -> ConnectorResult<Written> {
    let mut output = WriteBuf::new();
    let written = connector.step(input, &mut output)?;
    if !output.is_empty() {
        sent.push(output.into_inner());
    }
    Ok(written)
}

fn decode_client_share_data(frame: &[u8]) -> (u16, ShareDataPdu) {
    let mcs = decode::<X224<McsMessage<'_>>>(frame).unwrap().0;
    let McsMessage::SendDataRequest(request) = mcs else {
        panic!("expected a SendDataRequest, got {mcs:?}");
    };

    let header = decode::<ShareControlHeader>(request.user_data.as_ref()).unwrap();
    assert_eq!(header.share_id, SHARE_ID);

    let ShareControlPdu::Data(data_header) = header.share_control_pdu else {
        panic!("expected a data PDU");
    };

    (request.initiator_id, data_header.share_data_pdu)
}

#[test]
fn handshake_to_active() {
    let mut connector = ClientConnector::new(test_config());
    let mut sent: Vec<Vec<u8>> = Vec::new();

    // X.224 Connection Request out
    step(&mut connector, &[], &mut sent).unwrap();
    let request = decode::<X224<ConnectionRequest>>(sent.last().unwrap()).unwrap().0;
    assert!(request.protocol.contains(SecurityProtocol::SSL));
    assert_eq!(request.cookie.as_deref(), Some("jdoe"));

    // X.224 Connection Confirm in
    let confirm = encode_vec(&X224(ConnectionConfirm::Response {
        flags: ResponseFlags::empty(),
        protocol: SecurityProtocol::SSL,
    }))
    .unwrap();
    step(&mut connector, &confirm, &mut sent).unwrap();

    // security upgrade is performed out of band
    assert!(connector.should_perform_security_upgrade());
    connector.mark_security_upgrade_as_done().unwrap();

    // MCS Connect-Initial out
    step(&mut connector, &[], &mut sent).unwrap();

    // MCS Connect-Response in, with the synthetic server key
    let connect_response = ConnectResponse {
        conference_create_response: ConferenceCreateResponse {
            user_id: SERVER_USER_ID,
            gcc_blocks: server_gcc_blocks(),
        },
        called_connect_id: 0,
        domain_parameters: DomainParameters::target(),
    };
    let mut response_frame = WriteBuf::new();
    opalrdp_connector::encode_x224_packet(&connect_response, &mut response_frame).unwrap();
    step(&mut connector, response_frame.filled(), &mut sent).unwrap();

    // Erect Domain + Attach User out
    step(&mut connector, &[], &mut sent).unwrap();
    step(&mut connector, &[], &mut sent).unwrap();

    // Attach User Confirm in: PER integer 7 on top of the 1001 base
    let attach_user_confirm = encode_vec(&X224(AttachUserConfirm {
        result: 0,
        initiator_id: USER_CHANNEL_ID,
    }))
    .unwrap();
    step(&mut connector, &attach_user_confirm, &mut sent).unwrap();

    // one join per round trip: user channel first, then the I/O channel
    for channel_id in [USER_CHANNEL_ID, IO_CHANNEL_ID] {
        step(&mut connector, &[], &mut sent).unwrap();

        let confirm = encode_vec(&X224(ChannelJoinConfirm {
            result: 0,
            initiator_id: USER_CHANNEL_ID,
            requested_channel_id: channel_id,
            channel_id,
        }))
        .unwrap();
        step(&mut connector, &confirm, &mut sent).unwrap();
    }

    // Client Info PDU out
    step(&mut connector, &[], &mut sent).unwrap();
    {
        let frame = sent.last().unwrap();
        let mcs = decode::<X224<McsMessage<'_>>>(frame).unwrap().0;
        let McsMessage::SendDataRequest(request) = mcs else {
            panic!("expected the Client Info PDU in a SendDataRequest");
        };
        assert_eq!(request.initiator_id, USER_CHANNEL_ID);

        let client_info = decode::<opalrdp_pdu::rdp::ClientInfoPdu>(request.user_data.as_ref()).unwrap();
        assert_eq!(client_info.client_info.credentials.username, "jdoe");
    }

    // License: valid client indication
    step(&mut connector, &license_valid_client_frame(), &mut sent).unwrap();

    // Demand Active in, Confirm Active out
    step(&mut connector, &demand_active_frame(), &mut sent).unwrap();
    {
        let frame = sent.last().unwrap();
        let mcs = decode::<X224<McsMessage<'_>>>(frame).unwrap().0;
        let McsMessage::SendDataRequest(request) = mcs else {
            panic!("expected the Confirm Active PDU in a SendDataRequest");
        };
        assert_eq!(request.initiator_id, USER_CHANNEL_ID);

        let header = decode::<ShareControlHeader>(request.user_data.as_ref()).unwrap();
        assert_eq!(header.share_id, SHARE_ID);
        assert!(matches!(
            header.share_control_pdu,
            ShareControlPdu::ClientConfirmActive(_)
        ));
    }

    // client finalization PDUs out, in order
    let finalization_count = sent.len();
    step(&mut connector, &[], &mut sent).unwrap(); // Synchronize
    step(&mut connector, &[], &mut sent).unwrap(); // Control (Cooperate)
    step(&mut connector, &[], &mut sent).unwrap(); // Control (Request Control)
    step(&mut connector, &[], &mut sent).unwrap(); // Font List

    let finalization = &sent[finalization_count..];
    assert_eq!(finalization.len(), 4);

    let expected: [&dyn Fn(&ShareDataPdu) -> bool; 4] = [
        &|pdu| matches!(pdu, ShareDataPdu::Synchronize(_)),
        &|pdu| matches!(pdu, ShareDataPdu::Control(ControlPdu { action: ControlAction::Cooperate, .. })),
        &|pdu| matches!(pdu, ShareDataPdu::Control(ControlPdu { action: ControlAction::RequestControl, .. })),
        &|pdu| matches!(pdu, ShareDataPdu::FontList(_)),
    ];

    for (frame, is_expected) in finalization.iter().zip(expected) {
        let (initiator, pdu) = decode_client_share_data(frame);
        assert_eq!(initiator, USER_CHANNEL_ID);
        assert!(is_expected(&pdu), "out-of-order finalization PDU: {pdu:?}");
    }

    // server finalization responses
    let responses = [
        share_data_frame(ShareDataPdu::Synchronize(SynchronizePdu {
            target_user_id: USER_CHANNEL_ID,
        })),
        share_data_frame(ShareDataPdu::Control(ControlPdu {
            action: ControlAction::Cooperate,
            grant_id: 0,
            control_id: 0,
        })),
        share_data_frame(ShareDataPdu::Control(ControlPdu {
            action: ControlAction::GrantedControl,
            grant_id: USER_CHANNEL_ID,
            control_id: u32::from(SERVER_CHANNEL_ID),
        })),
        share_data_frame(ShareDataPdu::FontMap(FontPdu::default())),
    ];

    for response in &responses {
        step(&mut connector, response, &mut sent).unwrap();
    }

    // the connector reached the active state
    assert!(connector.state.is_terminal());

    let opalrdp_connector::ClientConnectorState::Connected { result } = connector.state else {
        panic!("expected the Connected state");
    };

    let ConnectionResult {
        io_channel_id,
        user_channel_id,
        share_id,
        desktop_size,
        server_random,
        ..
    } = result;

    assert_eq!(io_channel_id, IO_CHANNEL_ID);
    assert_eq!(user_channel_id, USER_CHANNEL_ID);
    assert_eq!(share_id, SHARE_ID);
    assert_eq!(desktop_size, DesktopSize {
        width: 1280,
        height: 720,
    });
    assert_eq!(server_random.as_deref(), Some((0x40u8..0x60).collect::<Vec<_>>().as_slice()));
}

#[test]
fn negotiation_failure_is_fatal() {
    let mut connector = ClientConnector::new(test_config());
    let mut sent = Vec::new();

    step(&mut connector, &[], &mut sent).unwrap();

    let failure = encode_vec(&X224(ConnectionConfirm::Failure {
        code: opalrdp_pdu::nego::FailureCode::HYBRID_REQUIRED_BY_SERVER,
    }))
    .unwrap();

    assert!(step(&mut connector, &failure, &mut sent).is_err());
}
