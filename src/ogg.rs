//! Packed Ogg-style packet framing.
//!
//! Vorbis-family codecs produce several header packets (identification,
//! comment, setup) that must travel together as one extra-data blob and be
//! recoverable as individual packets on the consumer side. This module
//! defines that framing: a flat concatenation of length-prefixed packets
//! with their stream flags and positions.

use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

const FLAG_BOS: u8 = 1 << 0;
const FLAG_EOS: u8 = 1 << 1;

/// Fixed-size prefix per packet: payload length, flags, granule position,
/// packet number.
const PACKET_HEADER_SIZE: usize = 4 + 1 + 8 + 8;

/// One logical packet: payload plus the stream position metadata a container
/// or decoder needs to re-ingest it.
#[derive(Clone, Debug, PartialEq)]
pub struct OggPacket {
	pub payload: Bytes,
	pub begin_of_stream: bool,
	pub end_of_stream: bool,
	/// Codec-defined position (e.g. absolute sample count for vorbis).
	pub granulepos: i64,
	pub packetno: i64,
}

impl OggPacket {
	pub fn new(payload: Bytes, packetno: i64) -> Self {
		Self { payload, begin_of_stream: false, end_of_stream: false, granulepos: -1, packetno }
	}
}

/// Serialise packets into one blob, preserving order.
pub fn pack_packets(packets: &[OggPacket]) -> Bytes {
	let total: usize = packets.iter().map(|p| PACKET_HEADER_SIZE + p.payload.len()).sum();
	let mut out = BytesMut::with_capacity(total);
	for packet in packets {
		out.put_u32_le(packet.payload.len() as u32);
		let mut flags = 0;
		if packet.begin_of_stream {
			flags |= FLAG_BOS;
		}
		if packet.end_of_stream {
			flags |= FLAG_EOS;
		}
		out.put_u8(flags);
		out.put_i64_le(packet.granulepos);
		out.put_i64_le(packet.packetno);
		out.put_slice(&packet.payload);
	}
	out.freeze()
}

/// Recover the packet sequence from a blob produced by [`pack_packets`].
///
/// Payloads are zero-copy slices of the input.
pub fn unpack_packets(data: &Bytes) -> Result<Vec<OggPacket>> {
	let mut packets = Vec::new();
	let mut offset = 0;
	while offset < data.len() {
		if data.len() - offset < PACKET_HEADER_SIZE {
			return Err(Error::invalid("truncated packet header"));
		}
		let len = LittleEndian::read_u32(&data[offset..]) as usize;
		let flags = data[offset + 4];
		let granulepos = LittleEndian::read_i64(&data[offset + 5..]);
		let packetno = LittleEndian::read_i64(&data[offset + 13..]);
		offset += PACKET_HEADER_SIZE;
		if data.len() - offset < len {
			return Err(Error::invalid("truncated packet payload"));
		}
		packets.push(OggPacket {
			payload: data.slice(offset..offset + len),
			begin_of_stream: flags & FLAG_BOS != 0,
			end_of_stream: flags & FLAG_EOS != 0,
			granulepos,
			packetno,
		});
		offset += len;
	}
	Ok(packets)
}
