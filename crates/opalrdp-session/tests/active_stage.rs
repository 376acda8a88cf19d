//! Steady-state scenarios: bitmap updates, the cached-bitmap replay path,
//! fragmented surface commands, and encrypted FastPath input.

use opalrdp_connector::connection_activation::ConnectionActivationSequence;
use opalrdp_connector::{Config, ConnectionResult, DesktopSize, State as _};
use opalrdp_core::{decode, encode_vec, ReadCursor};
use opalrdp_graphics::bitmap_cache::BitmapCacheManager;
use opalrdp_pdu::bitmap::{BitmapData, BitmapUpdateData, Compression};
use opalrdp_pdu::cached::{CachedBitmapData, CachedBitmapUpdateData};
use opalrdp_pdu::crypto::derive_session_keys;
use opalrdp_pdu::crypto::rc4::Rc4;
use opalrdp_pdu::fast_path::{
    EncryptionFlags, FastPathHeader, FastPathUpdatePdu, Fragmentation, UpdateCode,
};
use opalrdp_pdu::geometry::{ExclusiveRectangle, InclusiveRectangle};
use opalrdp_pdu::input::fast_path::{FastPathInput, FastPathInputEvent, FastPathInputHeader};
use opalrdp_pdu::input::{MousePdu, PointerFlags};
use opalrdp_pdu::mcs::McsMessage;
use opalrdp_pdu::rdp::capability_sets::MajorPlatformType;
use opalrdp_pdu::rdp::client_info::{Credentials, PerformanceFlags};
use opalrdp_pdu::rdp::headers::{ShareControlHeader, ShareControlPdu, ShareDataPdu};
use opalrdp_pdu::surface_commands::{ExtendedBitmapDataPdu, SurfaceBitsPdu, SurfaceCommand};
use opalrdp_pdu::x224::X224;
use opalrdp_pdu::Action;
use opalrdp_session::image::DecodedImage;
use opalrdp_session::{ActiveStage, ActiveStageOutput};
use opalrdp_svc::StaticChannelSet;

const IO_CHANNEL_ID: u16 = 1003;
const USER_CHANNEL_ID: u16 = 1008;
const SHARE_ID: u32 = 0x103EA;

fn test_config() -> Config {
    Config {
        desktop_size: DesktopSize {
            width: 64,
            height: 64,
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
        performance_flags: PerformanceFlags::empty(),
        autologon: false,
    }
}

fn active_stage() -> ActiveStage {
    ActiveStage::new(ConnectionResult {
        io_channel_id: IO_CHANNEL_ID,
        user_channel_id: USER_CHANNEL_ID,
        share_id: SHARE_ID,
        static_channels: StaticChannelSet::new(),
        desktop_size: DesktopSize {
            width: 64,
            height: 64,
        },
        server_random: Some((0x40..0x60).collect()),
        connection_activation: ConnectionActivationSequence::new(test_config(), IO_CHANNEL_ID, USER_CHANNEL_ID),
    })
}

/// Wraps an update body in a FastPath output frame.
fn fast_path_frame(update_code: UpdateCode, fragmentation: Fragmentation, data: &[u8]) -> Vec<u8> {
    let update_pdu = FastPathUpdatePdu {
        fragmentation,
        update_code,
        compression_flags: None,
        compression_type: None,
        data,
    };

    let update_bytes = encode_vec(&update_pdu).unwrap();
    let header = FastPathHeader::new(EncryptionFlags::empty(), update_bytes.len());

    let mut frame = encode_vec(&header).unwrap();
    frame.extend(update_bytes);
    frame
}

const PIXELS_2X2: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

fn rect_2x2(left: u16, top: u16) -> InclusiveRectangle {
    InclusiveRectangle {
        left,
        top,
        right: left + 1,
        bottom: top + 1,
    }
}

fn bitmap_update_2x2(left: u16, top: u16) -> Vec<u8> {
    encode_vec(&BitmapUpdateData {
        rectangles: vec![BitmapData {
            rectangle: rect_2x2(left, top),
            width: 2,
            height: 2,
            bits_per_pixel: 16,
            compression_flags: Compression::empty(),
            compressed_data_header: None,
            bitmap_data: &PIXELS_2X2,
        }],
    })
    .unwrap()
}

/// The rows of a bitmap update arrive bottom-up, so the stored rectangle has
/// them flipped.
const PIXELS_2X2_TOP_DOWN: [u8; 8] = [0x05, 0x06, 0x07, 0x08, 0x01, 0x02, 0x03, 0x04];

#[test]
fn single_bitmap_update_reaches_the_sink() {
    let mut stage = active_stage();
    let mut image = DecodedImage::new(64, 64, 16);

    let frame = fast_path_frame(UpdateCode::Bitmap, Fragmentation::Single, &bitmap_update_2x2(0, 0));
    let outputs = stage.process(&mut image, Action::FastPath, &frame).unwrap();

    assert!(matches!(outputs.as_slice(), [ActiveStageOutput::GraphicsUpdate(region)]
        if *region == rect_2x2(0, 0)));
    assert_eq!(image.rectangle_bytes(&rect_2x2(0, 0)), PIXELS_2X2_TOP_DOWN);
}

#[test]
fn cached_bitmap_replays_the_original_pixels() {
    let mut stage = active_stage();
    let mut image = DecodedImage::new(64, 64, 16);

    // first observation: full bitmap, cached under key K
    let frame = fast_path_frame(UpdateCode::Bitmap, Fragmentation::Single, &bitmap_update_2x2(0, 0));
    stage.process(&mut image, Action::FastPath, &frame).unwrap();

    let key = BitmapCacheManager::cache_key(&PIXELS_2X2, 2, 2, 16);
    let (key1, key2) = CachedBitmapData::split_key(key);

    // second occurrence: a CACHED update at new destination bounds
    let cached_update = encode_vec(&CachedBitmapUpdateData {
        rectangles: vec![CachedBitmapData {
            rectangle: rect_2x2(10, 10),
            cache_id: 0,
            cache_index: 0,
            key1,
            key2,
        }],
    })
    .unwrap();

    let frame = fast_path_frame(UpdateCode::CachedBitmap, Fragmentation::Single, &cached_update);
    let outputs = stage.process(&mut image, Action::FastPath, &frame).unwrap();

    assert!(matches!(outputs.as_slice(), [ActiveStageOutput::GraphicsUpdate(_)]));
    assert_eq!(image.rectangle_bytes(&rect_2x2(10, 10)), PIXELS_2X2_TOP_DOWN);
}

#[test]
fn cache_miss_issues_a_bitmap_cache_error_pdu() {
    let mut stage = active_stage();
    let mut image = DecodedImage::new(64, 64, 16);

    let cached_update = encode_vec(&CachedBitmapUpdateData {
        rectangles: vec![CachedBitmapData {
            rectangle: rect_2x2(0, 0),
            cache_id: 1,
            cache_index: 0,
            key1: 0xDEAD_BEEF,
            key2: 0x0BAD_F00D,
        }],
    })
    .unwrap();

    let frame = fast_path_frame(UpdateCode::CachedBitmap, Fragmentation::Single, &cached_update);
    let outputs = stage.process(&mut image, Action::FastPath, &frame).unwrap();

    let [ActiveStageOutput::ResponseFrame(response)] = outputs.as_slice() else {
        panic!("expected a cache error response frame, got {outputs:?}");
    };

    let mcs = decode::<X224<McsMessage<'_>>>(response).unwrap().0;
    let McsMessage::SendDataRequest(request) = mcs else {
        panic!("expected a SendDataRequest");
    };
    assert_eq!(request.initiator_id, USER_CHANNEL_ID);

    let header = decode::<ShareControlHeader>(request.user_data.as_ref()).unwrap();
    let ShareControlPdu::Data(data_header) = header.share_control_pdu else {
        panic!("expected a data PDU");
    };
    let ShareDataPdu::BitmapCacheError(error_pdu) = data_header.share_data_pdu else {
        panic!("expected a Bitmap Cache Error PDU");
    };

    assert_eq!(error_pdu.errors.len(), 1);
    assert_eq!(error_pdu.errors[0].cache_id, 1);
}

#[test]
fn fragmented_surface_commands_decode_only_once_complete() {
    let mut stage = active_stage();
    let mut image = DecodedImage::new(64, 64, 16);

    // a surface-bits command carrying raw 2x2 pixels, split in two fragments
    let command = SurfaceCommand::SetSurfaceBits(SurfaceBitsPdu {
        destination: ExclusiveRectangle {
            left: 4,
            top: 4,
            right: 6,
            bottom: 6,
        },
        extended_bitmap_data: ExtendedBitmapDataPdu {
            bpp: 16,
            codec_id: 0,
            width: 2,
            height: 2,
            data: &PIXELS_2X2,
        },
    });
    let command_bytes = encode_vec(&command).unwrap();
    let (first_half, last_half) = command_bytes.split_at(command_bytes.len() / 2);

    let first = fast_path_frame(UpdateCode::SurfaceCommands, Fragmentation::First, first_half);
    let outputs = stage.process(&mut image, Action::FastPath, &first).unwrap();

    // no partial decode happens on the first fragment
    assert!(outputs.is_empty());
    assert!(image.data().iter().all(|&byte| byte == 0));

    let last = fast_path_frame(UpdateCode::SurfaceCommands, Fragmentation::Last, last_half);
    let outputs = stage.process(&mut image, Action::FastPath, &last).unwrap();

    assert!(matches!(outputs.as_slice(), [ActiveStageOutput::GraphicsUpdate(_)]));

    // surface bits are top-down
    assert_eq!(image.rectangle_bytes(&rect_2x2(4, 4)), PIXELS_2X2);
}

#[test]
fn encrypted_input_decrypts_to_the_plain_encoding() {
    let master: Vec<u8> = (0x00..0x20).collect();
    let client_random: Vec<u8> = (0x20..0x40).collect();
    let server_random: Vec<u8> = (0x40..0x60).collect();

    let mouse_move = FastPathInputEvent::MouseEvent(MousePdu {
        flags: PointerFlags::MOVE,
        number_of_wheel_rotation_units: 0,
        x_position: 100,
        y_position: 200,
    });

    let mut stage = active_stage();
    stage.set_session_keys(&master, &client_random, &server_random);

    let encrypted_frame = stage.encode_input_events(vec![mouse_move.clone()]).unwrap();

    // the header advertises encryption and the whole frame length
    let mut cursor = ReadCursor::new(&encrypted_frame);
    let header = opalrdp_core::decode_cursor::<FastPathInputHeader>(&mut cursor).unwrap();
    assert!(header.flags.contains(EncryptionFlags::ENCRYPTED));
    assert_eq!(header.num_events, 1);
    assert_eq!(header.data_length, cursor.len());

    // an RC4 instance seeded identically recovers the plain event bytes
    let keys = derive_session_keys(&master, &client_random, &server_random);
    let decrypted = Rc4::new(&keys.encrypt_key).process(cursor.read_remaining());

    let plain_pdu = encode_vec(&FastPathInput(vec![mouse_move])).unwrap();
    let mut plain_cursor = ReadCursor::new(&plain_pdu);
    let plain_header = opalrdp_core::decode_cursor::<FastPathInputHeader>(&mut plain_cursor).unwrap();
    assert!(plain_header.flags.is_empty());

    assert_eq!(decrypted, plain_cursor.read_remaining());
}

#[test]
fn deactivate_all_reenters_capability_exchange() {
    use std::borrow::Cow;

    let mut stage = active_stage();
    let mut image = DecodedImage::new(64, 64, 16);

    let deactivate = ShareControlHeader {
        share_control_pdu: ShareControlPdu::ServerDeactivateAll(opalrdp_pdu::rdp::headers::ServerDeactivateAll),
        pdu_source: 0x03EA,
        share_id: SHARE_ID,
    };

    let frame = encode_vec(&X224(opalrdp_pdu::mcs::SendDataIndication {
        initiator_id: 1002,
        channel_id: IO_CHANNEL_ID,
        user_data: Cow::Owned(encode_vec(&deactivate).unwrap()),
    }))
    .unwrap();

    let outputs = stage.process(&mut image, Action::X224, &frame).unwrap();

    let [ActiveStageOutput::DeactivateAll(sequence)] = outputs.as_slice() else {
        panic!("expected a DeactivateAll output, got {outputs:?}");
    };

    assert_eq!(
        opalrdp_connector::Sequence::state(sequence.as_ref()).name(),
        "CapabilitiesExchange"
    );
}
