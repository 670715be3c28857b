//! Container contracts: demuxers split a stream into typed frames, muxers
//! interleave typed frames into container bytes.

use std::sync::Arc;

use bytes::Bytes;

use crate::buffer::MediaBuffer;
use crate::config::MediaConfig;
use crate::error::Result;
use crate::stream::Stream;

/// Splits container input into frames.
pub trait Demuxer: Send {
	/// Probe the input and fill `cfg` with the format the demuxed data will
	/// carry. `stream` is `None` when the demuxer opens its own input (e.g.
	/// from a `path` parameter).
	fn init(&mut self, stream: Option<Box<dyn Stream>>, cfg: &mut MediaConfig) -> Result<()>;

	/// The next frame, or an EOF-marked buffer at the end of the container.
	fn read(&mut self) -> Result<Arc<MediaBuffer>>;

	/// Container-level comment tags, if any.
	fn comments(&self) -> &[String] {
		&[]
	}

	/// Codec setup bytes recovered from the container headers.
	fn extra_data(&self) -> Option<Bytes> {
		None
	}

	/// True when this demuxer also decodes, emitting raw PCM/raw frames so
	/// no downstream decoder is needed.
	fn include_decoder(&self) -> bool {
		false
	}
}

/// Interleaves frames into container output.
pub trait Muxer: Send {
	/// Declare a stream to be muxed; returns its stream id.
	fn new_muxer_stream(&mut self, cfg: &MediaConfig) -> Result<usize>;

	/// Produce the container header bytes for a declared stream.
	fn write_header(&mut self, id: usize) -> Result<Arc<MediaBuffer>>;

	fn write(&mut self, id: usize, buffer: &MediaBuffer) -> Result<()>;

	fn close(&mut self, id: usize) -> Result<()>;
}
