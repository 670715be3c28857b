//! Byte-stream contract for everything the pipeline reads from or writes to:
//! files, capture devices, playback devices. The core only depends on this
//! trait; device back-ends live outside the crate.

pub mod file;

use std::any::Any;
use std::io::SeekFrom;

use crate::error::{Error, Result};

/// A readable and/or writable unit-oriented byte stream.
///
/// `read`/`write` move whole units of `unit_size` bytes and report the number
/// of **bytes** moved; a short read that hits the end of the stream sets the
/// EOF flag. Errors map to the underlying I/O error.
pub trait Stream: Send {
	fn readable(&self) -> bool {
		false
	}

	fn writable(&self) -> bool {
		false
	}

	/// Read up to `unit_size * n_units` bytes into `buf`.
	fn read(&mut self, _buf: &mut [u8], _unit_size: usize, _n_units: usize) -> Result<usize> {
		Err(Error::Unsupported("stream is not readable"))
	}

	/// Write `unit_size * n_units` bytes from `buf`.
	fn write(&mut self, _buf: &[u8], _unit_size: usize, _n_units: usize) -> Result<usize> {
		Err(Error::Unsupported("stream is not writable"))
	}

	fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
		Err(Error::Unsupported("stream is not seekable"))
	}

	fn eof(&self) -> bool;

	/// Backend-specific control call, the escape hatch for device streams.
	fn io_ctrl(&mut self, _request: u32, _arg: &mut dyn Any) -> Result<i32> {
		Err(Error::Unsupported("stream has no io_ctrl"))
	}

	/// Release the underlying resource. Further calls fail with `Io`.
	fn close(&mut self) -> Result<()>;
}
