//! File-backed streams, the reference implementation of the [`Stream`]
//! contract and the backing of the file flows.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result};
use crate::params::{self, ParamMap};
use crate::stream::Stream;

pub const FILE_READ_STREAM: &str = "file_read_stream";
pub const FILE_WRITE_STREAM: &str = "file_write_stream";

/// How to open a file stream, parsed from the `open_mode` parameter.
///
/// The mode grammar follows the C `fopen` family: `r`, `w`, `a`, with an
/// optional `+` for read/write. Flag characters other implementations accept
/// (`b`, `e`, `c`) are tolerated and ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct OpenMode {
	read: bool,
	write: bool,
	append: bool,
	truncate: bool,
}

impl OpenMode {
	fn parse(mode: &str) -> Result<Self> {
		let mut base = None;
		let mut plus = false;
		for c in mode.chars() {
			match c {
				'r' | 'w' | 'a' if base.is_none() => base = Some(c),
				'+' => plus = true,
				'b' | 'e' | 'c' | 'x' => (),
				_ => return Err(Error::invalid(format!("bad open mode {mode:?}"))),
			}
		}
		match base {
			Some('r') => Ok(Self { read: true, write: plus, append: false, truncate: false }),
			Some('w') => Ok(Self { read: plus, write: true, append: false, truncate: true }),
			Some('a') => Ok(Self { read: plus, write: true, append: true, truncate: false }),
			_ => Err(Error::invalid(format!("bad open mode {mode:?}"))),
		}
	}
}

pub struct FileStream {
	file: Option<File>,
	path: String,
	mode: OpenMode,
	eof: bool,
}

impl FileStream {
	pub fn open(path: &str, open_mode: &str) -> Result<Self> {
		let mode = OpenMode::parse(open_mode)?;
		let file = OpenOptions::new()
			.read(mode.read)
			.write(mode.write)
			.append(mode.append)
			.truncate(mode.truncate)
			.create(mode.write)
			.open(path)?;
		Ok(Self { file: Some(file), path: path.to_string(), mode, eof: false })
	}

	/// Factory entry: requires `path`; `open_mode` defaults to `default_mode`.
	fn from_params(map: &ParamMap, default_mode: &str) -> Result<Self> {
		let path = params::require(map, params::KEY_PATH)?;
		let mode = map.get(params::KEY_OPEN_MODE).map(String::as_str).unwrap_or(default_mode);
		Self::open(path, mode)
	}

	pub fn open_for_read(map: &ParamMap) -> Result<Self> {
		Self::from_params(map, "r")
	}

	pub fn open_for_write(map: &ParamMap) -> Result<Self> {
		Self::from_params(map, "w")
	}

	fn file(&mut self) -> Result<&mut File> {
		self.file
			.as_mut()
			.ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::NotConnected, "stream is closed")))
	}
}

impl Stream for FileStream {
	fn readable(&self) -> bool {
		self.mode.read
	}

	fn writable(&self) -> bool {
		self.mode.write
	}

	fn read(&mut self, buf: &mut [u8], unit_size: usize, n_units: usize) -> Result<usize> {
		let wanted = (unit_size * n_units).min(buf.len());
		let file = self.file()?;
		let mut total = 0;
		while total < wanted {
			match file.read(&mut buf[total..wanted]) {
				Ok(0) => {
					self.eof = true;
					break;
				}
				Ok(n) => total += n,
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e.into()),
			}
		}
		Ok(total)
	}

	fn write(&mut self, buf: &[u8], unit_size: usize, n_units: usize) -> Result<usize> {
		let wanted = (unit_size * n_units).min(buf.len());
		self.file()?.write_all(&buf[..wanted])?;
		Ok(wanted)
	}

	fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
		let offset = self.file()?.seek(pos)?;
		self.eof = false;
		Ok(offset)
	}

	fn eof(&self) -> bool {
		self.eof
	}

	fn close(&mut self) -> Result<()> {
		if self.file.take().is_none() {
			tracing::debug!("Closing already-closed file stream for {}.", self.path);
		}
		Ok(())
	}
}
