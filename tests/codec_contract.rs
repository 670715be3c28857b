//! Driving the codec and container contracts with mock back-ends: dynamic
//! change requests, extra-data propagation and demuxer/muxer round trips.

mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use common::{init_logging, wait_until, RecordingSink};
use mediaflow::buffer::{MediaBuffer, MemType, VideoFlags};
use mediaflow::codec::{ChangeFlags, ChangeQueue, Codec, Encoder, ParameterValue};
use mediaflow::config::{AudioConfig, MediaConfig};
use mediaflow::container::{Demuxer, Muxer};
use mediaflow::error::{Error, Result};
use mediaflow::flow::{Flow, ProcessFn, SlotConfig, SlotMap, TransactionMode};
use mediaflow::media::{MediaKind, SampleFormat, SampleInfo};
use mediaflow::ogg::{pack_packets, unpack_packets, OggPacket};
use mediaflow::registry::builtin_registry;
use mediaflow::stream::Stream;

/// Metadata a mock backend attaches to each "encoded" buffer.
struct EncodedMeta {
	bit_rate: u32,
}

/// An asynchronous-form encoder that fakes a vorbis-style backend: three
/// header packets as extra data, a bit-rate knob driven by change requests.
struct MockAudioEncoder {
	extra: Option<Bytes>,
	changes: ChangeQueue,
	bit_rate: u32,
	ready: VecDeque<Arc<MediaBuffer>>,
}

impl MockAudioEncoder {
	fn new() -> Self {
		Self { extra: None, changes: ChangeQueue::new(), bit_rate: 0, ready: VecDeque::new() }
	}

	fn apply_pending_changes(&mut self) {
		while let Some(request) = self.changes.peek() {
			if request.change.contains(ChangeFlags::BIT_RATE_CHANGE) {
				match request.value.as_int() {
					Some(rate) => self.bit_rate = rate as u32,
					None => tracing::warn!("Bit-rate change without a value ignored."),
				}
			}
		}
	}
}

impl Codec for MockAudioEncoder {
	fn codec_name(&self) -> &str {
		"mock_vorbis"
	}

	fn extra_data(&self) -> Option<Bytes> {
		self.extra.clone()
	}

	fn send_input(&mut self, input: Arc<MediaBuffer>) -> Result<()> {
		self.apply_pending_changes();
		if input.eof() {
			self.ready.push_back(Arc::new(MediaBuffer::eof_marker()));
			return Ok(());
		}
		let mut output = input.clone_to(MemType::Common)?;
		output.set_user_data(Some(Box::new(EncodedMeta { bit_rate: self.bit_rate })));
		self.ready.push_back(Arc::new(output));
		Ok(())
	}

	fn fetch_output(&mut self) -> Result<Option<Arc<MediaBuffer>>> {
		Ok(self.ready.pop_front())
	}
}

impl Encoder for MockAudioEncoder {
	fn init_config(&mut self, cfg: &MediaConfig) -> Result<()> {
		let audio = cfg.audio()?;
		if audio.sample_info.fmt != SampleFormat::S16 {
			return Err(Error::Unsupported("mock encoder only takes s16 samples"));
		}
		self.bit_rate = audio.bit_rate;
		let headers = vec![
			OggPacket {
				payload: Bytes::from_static(b"\x01identification"),
				begin_of_stream: true,
				end_of_stream: false,
				granulepos: 0,
				packetno: 0,
			},
			OggPacket::new(Bytes::from_static(b"\x03comment"), 1),
			OggPacket::new(Bytes::from_static(b"\x05setup"), 2),
		];
		self.extra = Some(pack_packets(&headers));
		Ok(())
	}

	fn change_queue(&self) -> &ChangeQueue {
		&self.changes
	}
}

/// Wrap an encoder into a stage: flow-level change requests are forwarded to
/// the encoder's queue before each frame, outputs fan out on slot 0.
fn encoder_flow(encoder: MockAudioEncoder) -> Flow {
	let encoder = Mutex::new(encoder);
	let process: ProcessFn = Box::new(move |ctx, inputs| {
		let mut encoder = encoder.lock().unwrap();
		while let Some(request) = ctx.peek_change() {
			encoder.request_change(request.change, request.value);
		}
		for input in inputs.into_iter().flatten() {
			if let Err(e) = encoder.send_input(input) {
				tracing::error!("Encoding failed: {e}.");
				return false;
			}
			while let Ok(Some(output)) = encoder.fetch_output() {
				ctx.set_output(output, 0);
			}
		}
		true
	});
	Flow::install(
		"mock_encoder",
		SlotMap::simple(
			vec![SlotConfig::default()],
			vec![String::new()],
			TransactionMode::Void,
			process,
		),
	)
	.expect("encoder stage construction")
}

fn s16_config(bit_rate: u32) -> MediaConfig {
	MediaConfig::Audio(AudioConfig {
		sample_info: SampleInfo { fmt: SampleFormat::S16, channels: 2, sample_rate: 48_000, frames: 0 },
		bit_rate,
		quality: 0.0,
		codec: "mock_vorbis".into(),
	})
}

fn meta_bit_rate(buffer: &MediaBuffer) -> Option<u32> {
	buffer.user_data()?.downcast_ref::<EncodedMeta>().map(|m| m.bit_rate)
}

#[test]
fn bit_rate_change_lands_on_the_next_frame() {
	init_logging();
	let mut encoder = MockAudioEncoder::new();
	encoder.init_config(&s16_config(128_000)).unwrap();
	let stage = encoder_flow(encoder);
	let sink = RecordingSink::new(SlotConfig::default(), None);
	stage.add_down_flow(0, &sink.flow, 0).unwrap();

	stage.send_input(common::tagged_buffer(1), 0).unwrap();
	assert!(wait_until(Duration::from_secs(2), || sink.data_count() == 1));

	stage.request_change(ChangeFlags::BIT_RATE_CHANGE, ParameterValue::Int(500_000));
	stage.send_input(common::tagged_buffer(2), 0).unwrap();
	stage.send_input(Arc::new(MediaBuffer::eof_marker()), 0).unwrap();
	assert!(wait_until(Duration::from_secs(2), || sink.saw_eof()));

	let outputs = sink.buffers();
	let rates: Vec<u32> = outputs.iter().filter(|b| !b.eof()).filter_map(|b| meta_bit_rate(b)).collect();
	assert_eq!(rates, vec![128_000, 500_000]);

	stage.stop_all_threads();
	sink.flow.stop_all_threads();
}

#[test]
fn rejected_configuration_surfaces_as_unsupported() {
	let mut encoder = MockAudioEncoder::new();
	let cfg = MediaConfig::Audio(AudioConfig {
		sample_info: SampleInfo { fmt: SampleFormat::F32, channels: 2, sample_rate: 48_000, frames: 0 },
		bit_rate: 0,
		quality: 0.0,
		codec: String::new(),
	});
	assert!(matches!(encoder.init_config(&cfg), Err(Error::Unsupported(_))));
	// Video config into an audio encoder is an argument error.
	let video = MediaConfig::video_from_params(&mediaflow::params::parse_param_map(
		"pixel_format=nv12\nwidth=16\nheight=16\n",
	))
	.unwrap();
	assert!(encoder.init_config(&video).is_err());
}

#[test]
fn extra_data_recovers_the_header_triple() {
	let mut encoder = MockAudioEncoder::new();
	encoder.init_config(&s16_config(96_000)).unwrap();
	let extra = encoder.extra_data().expect("headers after init_config");
	let packets = unpack_packets(&extra).unwrap();
	assert_eq!(packets.len(), 3);
	assert!(packets[0].begin_of_stream);
	assert_eq!(packets[0].payload[0], 0x01);
	assert_eq!(packets[1].payload[0], 0x03);
	assert_eq!(packets[2].payload[0], 0x05);
	assert_eq!(packets.iter().map(|p| p.packetno).collect::<Vec<_>>(), vec![0, 1, 2]);
}

/// A muxer that records what it is fed; the header buffer wraps the codec
/// extra data it was configured with.
#[derive(Default)]
struct CapturingMuxer {
	streams: Vec<MediaConfig>,
	writes: Vec<(usize, usize)>,
	closed: Vec<usize>,
}

impl Muxer for CapturingMuxer {
	fn new_muxer_stream(&mut self, cfg: &MediaConfig) -> Result<usize> {
		self.streams.push(cfg.clone());
		Ok(self.streams.len() - 1)
	}

	fn write_header(&mut self, id: usize) -> Result<Arc<MediaBuffer>> {
		let cfg = self.streams.get(id).ok_or_else(|| Error::invalid("unknown muxer stream"))?;
		let codec = match cfg {
			MediaConfig::Audio(a) => a.codec.clone(),
			MediaConfig::Video(v) => v.codec.clone(),
		};
		let mut header = MediaBuffer::wrap(Bytes::from(format!("header:{codec}")));
		header.set_user_flag(VideoFlags::EXTRA_INTRA.bits());
		Ok(Arc::new(header))
	}

	fn write(&mut self, id: usize, buffer: &MediaBuffer) -> Result<()> {
		if id >= self.streams.len() {
			return Err(Error::invalid("unknown muxer stream"));
		}
		self.writes.push((id, buffer.valid_size()));
		Ok(())
	}

	fn close(&mut self, id: usize) -> Result<()> {
		self.closed.push(id);
		Ok(())
	}
}

#[test]
fn muxer_stream_lifecycle() {
	let mut muxer = CapturingMuxer::default();
	let id = muxer.new_muxer_stream(&s16_config(128_000)).unwrap();
	assert_eq!(id, 0);

	let header = muxer.write_header(id).unwrap();
	assert_eq!(header.user_flag(), VideoFlags::EXTRA_INTRA.bits());
	assert_eq!(header.valid_bytes(), b"header:mock_vorbis");

	let mut frame = MediaBuffer::alloc(32, MemType::Common).unwrap();
	frame.set_valid_size(20);
	muxer.write(id, &frame).unwrap();
	muxer.close(id).unwrap();
	assert_eq!(muxer.writes, vec![(0, 20)]);
	assert_eq!(muxer.closed, vec![0]);
	assert!(muxer.write(7, &frame).is_err());
}

/// A demuxer over the packed-packet framing: the first three packets are
/// headers (kept as extra data), the rest are s16 audio frames.
struct PackedAudioDemuxer {
	extra: Option<Bytes>,
	comments: Vec<String>,
	sample_info: SampleInfo,
	data: VecDeque<OggPacket>,
	finished: bool,
}

impl PackedAudioDemuxer {
	fn new() -> Self {
		Self {
			extra: None,
			comments: Vec::new(),
			sample_info: SampleInfo { fmt: SampleFormat::S16, channels: 2, sample_rate: 44_100, frames: 0 },
			data: VecDeque::new(),
			finished: false,
		}
	}
}

impl Demuxer for PackedAudioDemuxer {
	fn init(&mut self, stream: Option<Box<dyn Stream>>, cfg: &mut MediaConfig) -> Result<()> {
		let mut stream = stream.ok_or_else(|| Error::invalid("demuxer needs an input stream"))?;
		let mut blob = Vec::new();
		let mut chunk = [0u8; 4096];
		while !stream.eof() {
			let chunk_len = chunk.len();
			let n = stream.read(&mut chunk, 1, chunk_len)?;
			blob.extend_from_slice(&chunk[..n]);
		}
		let mut packets: VecDeque<OggPacket> = unpack_packets(&Bytes::from(blob))?.into();
		if packets.len() < 3 {
			return Err(Error::invalid("missing header packets"));
		}
		let headers: Vec<OggPacket> = packets.drain(..3).collect();
		self.comments =
			vec![String::from_utf8_lossy(&headers[1].payload[1..]).trim().to_string()];
		self.extra = Some(pack_packets(&headers));
		self.data = packets;
		*cfg = MediaConfig::Audio(AudioConfig {
			sample_info: self.sample_info,
			bit_rate: 0,
			quality: 0.0,
			codec: "mock_vorbis".into(),
		});
		Ok(())
	}

	fn read(&mut self) -> Result<Arc<MediaBuffer>> {
		match self.data.pop_front() {
			Some(packet) => {
				let mut info = self.sample_info;
				info.frames = (packet.payload.len() / info.frame_size()) as u32;
				let granulepos = packet.granulepos;
				let mut buffer = MediaBuffer::wrap(packet.payload).with_sample_info(info);
				buffer.set_timestamp(granulepos);
				Ok(Arc::new(buffer))
			}
			None if self.finished => Err(Error::Eof),
			None => {
				self.finished = true;
				Ok(Arc::new(MediaBuffer::eof_marker()))
			}
		}
	}

	fn comments(&self) -> &[String] {
		&self.comments
	}

	fn extra_data(&self) -> Option<Bytes> {
		self.extra.clone()
	}

	fn include_decoder(&self) -> bool {
		true
	}
}

#[test]
fn demuxer_recovers_headers_and_frames_from_a_file() {
	init_logging();
	let mut headers = vec![
		OggPacket {
			payload: Bytes::from_static(b"\x01ident"),
			begin_of_stream: true,
			end_of_stream: false,
			granulepos: 0,
			packetno: 0,
		},
		OggPacket::new(Bytes::from_static(b"\x03ENCODER=mediaflow"), 1),
		OggPacket::new(Bytes::from_static(b"\x05setup"), 2),
	];
	let mut frame_a = OggPacket::new(Bytes::from(vec![0u8; 400]), 3);
	frame_a.granulepos = 100;
	let mut frame_b = OggPacket::new(Bytes::from(vec![1u8; 200]), 4);
	frame_b.granulepos = 150;
	frame_b.end_of_stream = true;
	headers.push(frame_a);
	headers.push(frame_b);
	let blob = pack_packets(&headers);

	let mut file = tempfile::NamedTempFile::new().unwrap();
	std::io::Write::write_all(&mut file, &blob).unwrap();
	std::io::Write::flush(&mut file).unwrap();

	let stream_param = format!("path={}\n", file.path().display());
	let stream = builtin_registry().streams().create("file_read_stream", &stream_param).unwrap();

	let mut demuxer = PackedAudioDemuxer::new();
	assert!(demuxer.include_decoder());
	let mut cfg = MediaConfig::Audio(AudioConfig::default());
	demuxer.init(Some(stream), &mut cfg).unwrap();

	let audio = cfg.audio().unwrap();
	assert_eq!(audio.sample_info.sample_rate, 44_100);
	assert_eq!(demuxer.comments(), ["ENCODER=mediaflow"]);

	// The header triple survives the trip through the container.
	let extra = demuxer.extra_data().unwrap();
	let recovered = unpack_packets(&extra).unwrap();
	assert_eq!(recovered.len(), 3);
	assert!(recovered[0].begin_of_stream);
	assert_eq!(recovered[2].payload, Bytes::from_static(b"\x05setup"));

	let first = demuxer.read().unwrap();
	assert_eq!(first.kind(), MediaKind::Audio);
	assert_eq!(first.valid_size(), 400);
	assert_eq!(first.frames(), 100);
	assert_eq!(first.timestamp(), 100);
	let second = demuxer.read().unwrap();
	assert_eq!(second.valid_size(), 200);
	assert_eq!(second.timestamp(), 150);
	let end = demuxer.read().unwrap();
	assert!(end.eof());
	assert!(matches!(demuxer.read(), Err(Error::Eof)));
}
