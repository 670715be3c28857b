use std::io;

/// Errors reported by the pipeline core.
///
/// Construction-time failures surface through the factory `Result`; per-frame
/// failures are either transient (callers skip the frame and continue) or
/// fatal to the stream (the flow disables itself and emits EOF).
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// Unparseable parameter or impossible configuration.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// No factory registered under the requested name.
	#[error("no '{name}' registered as {kind}")]
	NotFound { kind: &'static str, name: String },

	/// Allocation failed. Recoverable: skip the frame and continue.
	#[error("out of memory allocating {0} bytes")]
	OutOfMemory(usize),

	/// The operation is not implemented by this backend.
	#[error("operation not supported: {0}")]
	Unsupported(&'static str),

	/// Device or file I/O failed.
	#[error("i/o error: {0}")]
	Io(#[from] io::Error),

	/// The codec or driver rejected a call.
	#[error("backend error: {0}")]
	Backend(String),

	/// End of stream.
	#[error("end of stream")]
	Eof,
}

impl Error {
	pub fn invalid<S: Into<String>>(msg: S) -> Self {
		Error::InvalidArgument(msg.into())
	}

	pub fn backend<S: Into<String>>(msg: S) -> Self {
		Error::Backend(msg.into())
	}

	/// True for errors a per-frame loop should swallow and retry.
	pub fn is_transient(&self) -> bool {
		matches!(self, Error::OutOfMemory(_))
	}
}

pub type Result<T> = std::result::Result<T, Error>;
