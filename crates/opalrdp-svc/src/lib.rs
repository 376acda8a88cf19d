//! Static virtual channels: the name ↔ id registry, CHANNEL_PDU_HEADER
//! chunking for outbound messages, and inbound reassembly.
//!
//! There are at most 31 optional static channels next to the non-optional
//! I/O channel. Channel ids are learned during the MCS channel join and
//! attached to the registry before the session goes active.

use core::fmt;

use bitflags::bitflags;
use opalrdp_core::{
    cast_length, ensure_fixed_part_size, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};
use opalrdp_pdu::gcc::{ChannelDef, ChannelName, ChannelOptions};

/// Maximum payload bytes carried by one CHANNEL_PDU_HEADER chunk.
pub const CHANNEL_CHUNK_LENGTH: usize = 1600;

/// Reassembly buffers are bounded; a message advertising more than this is a
/// protocol violation.
pub const MAX_CHANNEL_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

pub type SvcResult<T> = Result<T, SvcError>;

pub type SvcError = opalrdp_error::Error<SvcErrorKind>;

#[non_exhaustive]
#[derive(Debug)]
pub enum SvcErrorKind {
    Decode(opalrdp_core::DecodeError),
    Encode(opalrdp_core::EncodeError),
    ReassemblyOverflow { advertised: usize },
    UnexpectedChunk,
    General,
}

impl fmt::Display for SvcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SvcErrorKind::Decode(_) => write!(f, "decode error"),
            SvcErrorKind::Encode(_) => write!(f, "encode error"),
            SvcErrorKind::ReassemblyOverflow { advertised } => {
                write!(f, "channel message advertises {advertised} bytes, over the reassembly bound")
            }
            SvcErrorKind::UnexpectedChunk => write!(f, "chunk received outside of an open message"),
            SvcErrorKind::General => write!(f, "general error"),
        }
    }
}

impl std::error::Error for SvcErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SvcErrorKind::Decode(e) => Some(e),
            SvcErrorKind::Encode(e) => Some(e),
            _ => None,
        }
    }
}

pub trait SvcErrorExt {
    fn decode(error: opalrdp_core::DecodeError) -> Self;
    fn encode(error: opalrdp_core::EncodeError) -> Self;
    fn general(context: &'static str) -> Self;
}

impl SvcErrorExt for SvcError {
    fn decode(error: opalrdp_core::DecodeError) -> Self {
        Self::new("decode error", SvcErrorKind::Decode(error))
    }

    fn encode(error: opalrdp_core::EncodeError) -> Self {
        Self::new("encode error", SvcErrorKind::Encode(error))
    }

    fn general(context: &'static str) -> Self {
        Self::new(context, SvcErrorKind::General)
    }
}

bitflags! {
    /// CHANNEL_PDU_HEADER flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ChannelFlags: u32 {
        const FIRST = 0x0000_0001;
        const LAST = 0x0000_0002;
        const SHOW_PROTOCOL = 0x0000_0010;
        const SUSPEND = 0x0000_0020;
        const RESUME = 0x0000_0040;
        const SHADOW_PERSISTENT = 0x0000_0080;
        const PACKET_COMPRESSED = 0x0020_0000;
        const PACKET_AT_FRONT = 0x0040_0000;
        const PACKET_FLUSHED = 0x0080_0000;
    }
}

/// CHANNEL_PDU_HEADER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPduHeader {
    /// Total length of the reassembled message, repeated on every chunk.
    pub total_length: u32,
    pub flags: ChannelFlags,
}

impl ChannelPduHeader {
    const NAME: &'static str = "ChannelPduHeader";

    pub const SIZE: usize = 4 /* length */ + 4 /* flags */;

    const FIXED_PART_SIZE: usize = Self::SIZE;
}

impl Encode for ChannelPduHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.total_length);
        dst.write_u32(self.flags.bits());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ChannelPduHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let total_length = src.read_u32();
        let flags = ChannelFlags::from_bits_truncate(src.read_u32());

        Ok(Self { total_length, flags })
    }
}

/// Defines which compression flag is advertised in the Channel Definition
/// Structure (CHANNEL_DEF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionCondition {
    /// Virtual channel data will not be compressed.
    Never,
    /// Compressed when RDP data is compressed (CHANNEL_OPTION_COMPRESS_RDP).
    WhenRdpDataIsCompressed,
    /// Always compressed (CHANNEL_OPTION_COMPRESS).
    Always,
}

/// A message a channel handler wants to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvcMessage {
    pub data: Vec<u8>,
    pub flags: ChannelFlags,
}

impl SvcMessage {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            flags: ChannelFlags::empty(),
        }
    }
}

/// A static virtual channel handler.
///
/// The session demultiplexer hands a handler one *complete* message at a
/// time; chunk reassembly happens before dispatch.
pub trait StaticVirtualChannel: fmt::Debug + Send + Sync {
    fn channel_name(&self) -> ChannelName;

    fn compression_condition(&self) -> CompressionCondition {
        CompressionCondition::Never
    }

    /// Processes a reassembled message and returns any response messages.
    fn process(&mut self, payload: &[u8]) -> SvcResult<Vec<SvcMessage>>;
}

opalrdp_core::assert_obj_safe!(StaticVirtualChannel);

/// Builds the Channel Definition Structure advertised in the client GCC blocks.
pub fn make_channel_definition(channel: &dyn StaticVirtualChannel) -> ChannelDef {
    let options = ChannelOptions::INITIALIZED
        | match channel.compression_condition() {
            CompressionCondition::Never => ChannelOptions::empty(),
            CompressionCondition::WhenRdpDataIsCompressed => ChannelOptions::COMPRESS_RDP,
            CompressionCondition::Always => ChannelOptions::COMPRESS,
        };

    ChannelDef {
        name: channel.channel_name(),
        options,
    }
}

/// Splits a complete channel message into CHANNEL_PDU_HEADER-framed chunks of
/// at most [`CHANNEL_CHUNK_LENGTH`] payload bytes.
pub fn chunkify(message: &SvcMessage) -> SvcResult<Vec<Vec<u8>>> {
    let total_length: u32 =
        cast_length!(ctx: "chunkify", "totalLength", message.data.len()).map_err(SvcError::encode)?;

    let mut chunks = Vec::new();
    let chunk_count = message.data.len().div_ceil(CHANNEL_CHUNK_LENGTH).max(1);

    for (index, payload) in message
        .data
        .chunks(CHANNEL_CHUNK_LENGTH)
        .chain(core::iter::once(&[] as &[u8]).take(usize::from(message.data.is_empty())))
        .enumerate()
    {
        let mut flags = message.flags;
        if index == 0 {
            flags |= ChannelFlags::FIRST;
        }
        if index == chunk_count - 1 {
            flags |= ChannelFlags::LAST;
        }

        let header = ChannelPduHeader { total_length, flags };

        let mut chunk = vec![0; ChannelPduHeader::SIZE + payload.len()];
        let mut cursor = WriteCursor::new(&mut chunk);
        header.encode(&mut cursor).map_err(SvcError::encode)?;
        cursor.write_slice(payload);

        chunks.push(chunk);
    }

    Ok(chunks)
}

/// Per-channel reassembly of CHANNEL_FLAG_FIRST/LAST chunk sequences.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    buffer: Option<Vec<u8>>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one SendDataIndication payload (header + chunk).
    ///
    /// Returns the complete message once a LAST chunk closes it.
    pub fn process(&mut self, payload: &[u8]) -> SvcResult<Option<Vec<u8>>> {
        let mut cursor = ReadCursor::new(payload);
        let header = ChannelPduHeader::decode(&mut cursor).map_err(SvcError::decode)?;
        let chunk = cursor.read_remaining();

        let advertised = header.total_length as usize;
        if advertised > MAX_CHANNEL_MESSAGE_SIZE {
            return Err(SvcError::new(
                "ChunkReassembler",
                SvcErrorKind::ReassemblyOverflow { advertised },
            ));
        }

        if header.flags.contains(ChannelFlags::FIRST) {
            let mut buffer = Vec::with_capacity(advertised);
            buffer.extend_from_slice(chunk);
            self.buffer = Some(buffer);
        } else {
            match self.buffer.as_mut() {
                Some(buffer) => buffer.extend_from_slice(chunk),
                None => {
                    return Err(SvcError::new("ChunkReassembler", SvcErrorKind::UnexpectedChunk));
                }
            }
        }

        let assembled_len = self.buffer.as_ref().map_or(0, Vec::len);
        if assembled_len > MAX_CHANNEL_MESSAGE_SIZE {
            self.buffer = None;
            return Err(SvcError::new(
                "ChunkReassembler",
                SvcErrorKind::ReassemblyOverflow { advertised: assembled_len },
            ));
        }

        if header.flags.contains(ChannelFlags::LAST) {
            Ok(self.buffer.take())
        } else {
            Ok(None)
        }
    }
}

#[derive(Debug)]
struct ChannelSlot {
    channel: Box<dyn StaticVirtualChannel>,
    channel_id: Option<u16>,
    reassembler: ChunkReassembler,
}

/// The registry of static virtual channels, keyed by name and addressed by
/// the MCS channel id once joined.
#[derive(Debug, Default)]
pub struct StaticChannelSet {
    slots: Vec<ChannelSlot>,
}

impl StaticChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel handler; replaces a previous handler of the same name.
    pub fn insert<T: StaticVirtualChannel + 'static>(&mut self, channel: T) {
        let name = channel.channel_name();
        self.slots.retain(|slot| slot.channel.channel_name() != name);
        self.slots.push(ChannelSlot {
            channel: Box::new(channel),
            channel_id: None,
            reassembler: ChunkReassembler::new(),
        });
    }

    pub fn values(&self) -> impl Iterator<Item = &dyn StaticVirtualChannel> {
        self.slots.iter().map(|slot| slot.channel.as_ref())
    }

    /// Records the MCS channel id assigned to a channel during the join.
    pub fn attach_channel_id(&mut self, name: ChannelName, channel_id: u16) -> bool {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|slot| slot.channel.channel_name() == name)
        {
            slot.channel_id = Some(channel_id);
            true
        } else {
            false
        }
    }

    pub fn get_channel_id_by_name(&self, name: ChannelName) -> Option<u16> {
        self.slots
            .iter()
            .find(|slot| slot.channel.channel_name() == name)
            .and_then(|slot| slot.channel_id)
    }

    /// Feeds one inbound SendDataIndication payload to the channel joined
    /// under `channel_id`, reassembling chunks; the handler runs only once a
    /// LAST chunk completes the message.
    ///
    /// Returns `None` when no channel is registered under that id.
    pub fn process(&mut self, channel_id: u16, payload: &[u8]) -> Option<SvcResult<Vec<SvcMessage>>> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.channel_id == Some(channel_id))?;

        let result = match slot.reassembler.process(payload) {
            Ok(Some(message)) => slot.channel.process(&message),
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(e),
        };

        Some(result)
    }

    /// Drops every registration and pending reassembly buffer.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct EchoChannel;

    impl StaticVirtualChannel for EchoChannel {
        fn channel_name(&self) -> ChannelName {
            ChannelName::from_static("echo")
        }

        fn process(&mut self, payload: &[u8]) -> SvcResult<Vec<SvcMessage>> {
            Ok(vec![SvcMessage::new(payload.to_vec())])
        }
    }

    #[test]
    fn small_message_is_a_single_chunk() {
        let chunks = chunkify(&SvcMessage::new(vec![1, 2, 3])).unwrap();
        assert_eq!(chunks.len(), 1);

        let mut cursor = ReadCursor::new(&chunks[0]);
        let header = ChannelPduHeader::decode(&mut cursor).unwrap();
        assert!(header.flags.contains(ChannelFlags::FIRST | ChannelFlags::LAST));
        assert_eq!((header.total_length, cursor.read_remaining()), (3, &[1u8, 2, 3][..]));
    }

    #[test]
    fn large_message_chunks_and_reassembles() {
        let message = SvcMessage::new((0..4000u16).map(|i| i as u8).collect());
        let chunks = chunkify(&message).unwrap();

        assert_eq!(chunks.len(), 3);

        let mut reassembler = ChunkReassembler::new();
        assert_eq!(reassembler.process(&chunks[0]).unwrap(), None);
        assert_eq!(reassembler.process(&chunks[1]).unwrap(), None);
        let assembled = reassembler.process(&chunks[2]).unwrap().unwrap();

        assert_eq!(assembled, message.data);
    }

    #[test]
    fn chunk_without_first_is_rejected() {
        let message = SvcMessage::new(vec![0xAB; 2000]);
        let chunks = chunkify(&message).unwrap();

        let mut reassembler = ChunkReassembler::new();
        assert!(reassembler.process(&chunks[1]).is_err());
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut header_bytes = vec![0u8; ChannelPduHeader::SIZE];
        let mut cursor = WriteCursor::new(&mut header_bytes);
        ChannelPduHeader {
            total_length: (MAX_CHANNEL_MESSAGE_SIZE + 1) as u32,
            flags: ChannelFlags::FIRST,
        }
        .encode(&mut cursor)
        .unwrap();

        let mut reassembler = ChunkReassembler::new();
        assert!(reassembler.process(&header_bytes).is_err());
    }

    #[test]
    fn registry_routes_by_channel_id() {
        let mut set = StaticChannelSet::new();
        set.insert(EchoChannel);
        set.attach_channel_id(ChannelName::from_static("echo"), 1004);

        let chunks = chunkify(&SvcMessage::new(vec![9, 9])).unwrap();
        let responses = set.process(1004, &chunks[0]).unwrap().unwrap();

        assert_eq!(responses, vec![SvcMessage::new(vec![9, 9])]);
        assert!(set.process(1005, &chunks[0]).is_none());
    }
}
