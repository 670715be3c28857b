//! Name-indexed factories.
//!
//! Graph descriptions refer to stages, streams and codecs by string name and
//! configure them with parameter strings; the registries here resolve those
//! names to constructors. Registration happens explicitly during library
//! initialisation — after that the registries are read-only and safe to
//! share across threads without locks.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::codec::{Decoder, Encoder};
use crate::container::{Demuxer, Muxer};
use crate::error::{Error, Result};
use crate::flow::Flow;
use crate::params::{self, parse_param_map};
use crate::stream::file::{FileStream, FILE_READ_STREAM, FILE_WRITE_STREAM};
use crate::stream::Stream;

/// What a factory can consume and produce, answered without constructing.
///
/// Types are data-type tags, comma-separated when several are accepted.
/// `None` declares nothing for that direction (e.g. a source has no input
/// type) and never matches a rule asking about it.
#[derive(Clone, Debug, Default)]
pub struct Capabilities {
	pub input_data_type: Option<String>,
	pub output_data_type: Option<String>,
}

impl Capabilities {
	pub fn new(input: Option<&str>, output: Option<&str>) -> Self {
		Self {
			input_data_type: input.map(str::to_string),
			output_data_type: output.map(str::to_string),
		}
	}
}

type Constructor<P> = Box<dyn Fn(&str) -> Result<P> + Send + Sync>;

struct Entry<P> {
	constructor: Constructor<P>,
	capabilities: Capabilities,
}

/// One kind's name→constructor table.
pub struct Registry<P> {
	kind: &'static str,
	entries: HashMap<String, Entry<P>>,
}

impl<P> Registry<P> {
	pub fn new(kind: &'static str) -> Self {
		Self { kind, entries: HashMap::new() }
	}

	/// Register a constructor under `name`. A later registration under the
	/// same name replaces the earlier one.
	pub fn register<F>(&mut self, name: &str, capabilities: Capabilities, constructor: F)
	where
		F: Fn(&str) -> Result<P> + Send + Sync + 'static,
	{
		if self
			.entries
			.insert(name.to_string(), Entry { constructor: Box::new(constructor), capabilities })
			.is_some()
		{
			tracing::warn!("Replacing {} factory '{}'.", self.kind, name);
		}
	}

	/// Construct the named product from a `key=value` parameter string.
	pub fn create(&self, name: &str, param: &str) -> Result<P> {
		let entry = self
			.entries
			.get(name)
			.ok_or_else(|| Error::NotFound { kind: self.kind, name: name.to_string() })?;
		(entry.constructor)(param)
	}

	/// Evaluate a capability rule (`input_data_type=audio:pcm_s16`, same
	/// `key=value` language as parameters) against the named factory's
	/// declared capabilities. Unknown factories never match.
	pub fn is_match(&self, name: &str, rule: &str) -> bool {
		let Some(entry) = self.entries.get(name) else {
			return false;
		};
		let rule = parse_param_map(rule);
		let mut checked = false;
		for (key, declared) in [
			(params::KEY_INPUT_DATA_TYPE, &entry.capabilities.input_data_type),
			(params::KEY_OUTPUT_DATA_TYPE, &entry.capabilities.output_data_type),
		] {
			if let Some(requested) = rule.get(key) {
				checked = true;
				match declared {
					Some(declared) if params::has_intersection(declared, requested) => (),
					_ => return false,
				}
			}
		}
		checked
	}

	pub fn names(&self) -> Vec<&str> {
		let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
		names.sort_unstable();
		names
	}

	/// Log every registered name, for debugging a mis-assembled graph.
	pub fn dump(&self) {
		tracing::info!("Registered {} factories: {}.", self.kind, self.names().join(", "));
	}
}

/// The six per-kind registries a graph builder works against.
pub struct MediaRegistry {
	streams: Registry<Box<dyn Stream>>,
	encoders: Registry<Box<dyn Encoder>>,
	decoders: Registry<Box<dyn Decoder>>,
	demuxers: Registry<Box<dyn Demuxer>>,
	muxers: Registry<Box<dyn Muxer>>,
	flows: Registry<Flow>,
}

impl Default for MediaRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl MediaRegistry {
	/// An empty registry; callers register their own factories.
	pub fn new() -> Self {
		Self {
			streams: Registry::new("stream"),
			encoders: Registry::new("encoder"),
			decoders: Registry::new("decoder"),
			demuxers: Registry::new("demuxer"),
			muxers: Registry::new("muxer"),
			flows: Registry::new("flow"),
		}
	}

	/// A registry pre-loaded with the built-in file factories.
	pub fn with_builtins() -> Self {
		let mut registry = Self::new();
		registry.streams_mut().register(FILE_READ_STREAM, Capabilities::default(), |param| {
			let map = parse_param_map(param);
			Ok(Box::new(FileStream::open_for_read(&map)?) as Box<dyn Stream>)
		});
		registry.streams_mut().register(FILE_WRITE_STREAM, Capabilities::default(), |param| {
			let map = parse_param_map(param);
			Ok(Box::new(FileStream::open_for_write(&map)?) as Box<dyn Stream>)
		});
		registry.flows_mut().register(
			crate::flow::file::FILE_READ_FLOW,
			Capabilities::new(None, Some("")),
			crate::flow::file::file_read_flow,
		);
		registry.flows_mut().register(
			crate::flow::file::FILE_WRITE_FLOW,
			Capabilities::new(Some(""), None),
			crate::flow::file::file_write_flow,
		);
		registry
	}

	pub fn streams(&self) -> &Registry<Box<dyn Stream>> {
		&self.streams
	}

	pub fn streams_mut(&mut self) -> &mut Registry<Box<dyn Stream>> {
		&mut self.streams
	}

	pub fn encoders(&self) -> &Registry<Box<dyn Encoder>> {
		&self.encoders
	}

	pub fn encoders_mut(&mut self) -> &mut Registry<Box<dyn Encoder>> {
		&mut self.encoders
	}

	pub fn decoders(&self) -> &Registry<Box<dyn Decoder>> {
		&self.decoders
	}

	pub fn decoders_mut(&mut self) -> &mut Registry<Box<dyn Decoder>> {
		&mut self.decoders
	}

	pub fn demuxers(&self) -> &Registry<Box<dyn Demuxer>> {
		&self.demuxers
	}

	pub fn demuxers_mut(&mut self) -> &mut Registry<Box<dyn Demuxer>> {
		&mut self.demuxers
	}

	pub fn muxers(&self) -> &Registry<Box<dyn Muxer>> {
		&self.muxers
	}

	pub fn muxers_mut(&mut self) -> &mut Registry<Box<dyn Muxer>> {
		&mut self.muxers
	}

	pub fn flows(&self) -> &Registry<Flow> {
		&self.flows
	}

	pub fn flows_mut(&mut self) -> &mut Registry<Flow> {
		&mut self.flows
	}
}

/// The process-wide registry of built-in factories, initialised on first use
/// and immutable afterwards.
pub fn builtin_registry() -> &'static MediaRegistry {
	static BUILTIN: OnceLock<MediaRegistry> = OnceLock::new();
	BUILTIN.get_or_init(MediaRegistry::with_builtins)
}
