//! Codec contracts. The core never links a codec itself; encoders and
//! decoders are registered by back-end crates (or tests) and driven through
//! these traits.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::buffer::MediaBuffer;
use crate::config::MediaConfig;
use crate::error::{Error, Result};

bitflags::bitflags! {
	/// What a dynamic change request targets.
	pub struct ChangeFlags: u32 {
		const QP_CHANGE = 1 << 0;
		const FRAME_RATE_CHANGE = 1 << 1;
		const BIT_RATE_CHANGE = 1 << 2;
		const FORCE_IDR_FRAME = 1 << 3;
		const OSD_DATA_CHANGE = 1 << 4;
	}
}

/// Payload of a dynamic change request.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterValue {
	None,
	Int(i64),
	Data(Bytes),
}

impl ParameterValue {
	pub fn as_int(&self) -> Option<i64> {
		match self {
			ParameterValue::Int(v) => Some(*v),
			_ => None,
		}
	}
}

#[derive(Clone, Debug)]
pub struct ChangeRequest {
	pub change: ChangeFlags,
	pub value: ParameterValue,
}

/// FIFO of pending dynamic changes, guarded by its own mutex.
///
/// Producers append from any thread; the owning worker pops entries between
/// frames and applies them in order. A change the backend rejects is a
/// diagnostic, never a stream failure.
#[derive(Default)]
pub struct ChangeQueue {
	list: Mutex<VecDeque<ChangeRequest>>,
}

impl ChangeQueue {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn request(&self, change: ChangeFlags, value: ParameterValue) {
		self.list.lock().unwrap().push_back(ChangeRequest { change, value });
	}

	/// Pop the oldest pending change.
	pub fn peek(&self) -> Option<ChangeRequest> {
		self.list.lock().unwrap().pop_front()
	}

	pub fn has_pending(&self) -> bool {
		!self.list.lock().unwrap().is_empty()
	}
}

/// Operations common to encoders and decoders.
///
/// A codec exposes the synchronous form (`process`), the asynchronous form
/// (`send_input`/`fetch_output`), or both; the unimplemented form reports
/// `Unsupported`.
pub trait Codec: Send {
	fn codec_name(&self) -> &str;

	/// One-shot initialisation before any other call.
	fn init(&mut self) -> Result<()> {
		Ok(())
	}

	/// Container setup bytes (vorbis-style headers, SPS/PPS) produced during
	/// configuration, forwarded to muxers and decoders at stream start.
	fn extra_data(&self) -> Option<Bytes> {
		None
	}

	fn set_extra_data(&mut self, _data: Bytes) -> Result<()> {
		Err(Error::Unsupported("codec takes no extra data"))
	}

	/// Synchronous form: consume `input`, fill `output` (and `extra` for
	/// side products such as motion vectors).
	fn process(
		&mut self,
		_input: &MediaBuffer,
		_output: &mut MediaBuffer,
		_extra: Option<&mut MediaBuffer>,
	) -> Result<()> {
		Err(Error::Unsupported("codec has no synchronous form"))
	}

	/// Asynchronous form, input half.
	fn send_input(&mut self, _input: Arc<MediaBuffer>) -> Result<()> {
		Err(Error::Unsupported("codec has no asynchronous form"))
	}

	/// Asynchronous form, output half. `None` means no output is ready;
	/// end of stream is an EOF-marked buffer.
	fn fetch_output(&mut self) -> Result<Option<Arc<MediaBuffer>>> {
		Err(Error::Unsupported("codec has no asynchronous form"))
	}
}

pub trait Encoder: Codec {
	/// Configure the target stream. Called once, after `init`.
	fn init_config(&mut self, cfg: &MediaConfig) -> Result<()>;

	/// The queue dynamic changes are serialised through; the encoder drains
	/// it before each frame.
	fn change_queue(&self) -> &ChangeQueue;

	fn request_change(&self, change: ChangeFlags, value: ParameterValue) {
		self.change_queue().request(change, value);
	}
}

pub trait Decoder: Codec {}
