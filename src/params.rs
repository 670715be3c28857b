//! The `key=value` parameter language used by every factory.
//!
//! Parameters are newline-delimited `key=value` lines. Values that hold a set
//! of alternatives are comma-separated. The parser is tolerant: surrounding
//! whitespace is trimmed, lines without `=` are skipped, unknown keys are
//! left for the consumer to ignore.

use std::collections::HashMap;

use crate::error::{Error, Result};

pub const KEY_PATH: &str = "path";
pub const KEY_OPEN_MODE: &str = "open_mode";
pub const KEY_MEM_TYPE: &str = "mem_type";
pub const KEY_MEM_SIZE_PERTIME: &str = "mem_size_pertime";
pub const KEY_FPS: &str = "fps";
pub const KEY_LOOP_TIME: &str = "loop_time";
pub const KEY_DEVICE: &str = "device";
pub const KEY_SUB_DEVICE: &str = "sub_device";
pub const KEY_USE_LIBV4L2: &str = "use_libv4l2";
pub const KEY_V4L2_CAP_TYPE: &str = "v4l2_cap_type";
pub const KEY_INPUT_DATA_TYPE: &str = "input_data_type";
pub const KEY_OUTPUT_DATA_TYPE: &str = "output_data_type";
pub const KEY_WIDTH: &str = "width";
pub const KEY_HEIGHT: &str = "height";
pub const KEY_VIRTUAL_WIDTH: &str = "virtual_width";
pub const KEY_VIRTUAL_HEIGHT: &str = "virtual_height";
pub const KEY_PIXEL_FORMAT: &str = "pixel_format";
pub const KEY_CHANNELS: &str = "channels";
pub const KEY_SAMPLE_RATE: &str = "sample_rate";
pub const KEY_SAMPLE_FORMAT: &str = "sample_format";
pub const KEY_BIT_RATE: &str = "bit_rate";
pub const KEY_QUALITY: &str = "quality";
pub const KEY_CODEC: &str = "codec";
pub const KEY_FRAME_RATE: &str = "frame_rate";
pub const KEY_GOP: &str = "gop";
pub const KEY_PROFILE: &str = "profile";
pub const KEY_LEVEL: &str = "level";

pub type ParamMap = HashMap<String, String>;

/// Parse a newline-delimited `key=value` string into a map.
///
/// Splitting happens on the first `=` of each line, so values may contain
/// further `=` characters. Empty lines and lines without `=` are ignored.
pub fn parse_param_map(param: &str) -> ParamMap {
	let mut map = ParamMap::new();
	for line in param.lines() {
		let line = line.trim();
		if line.is_empty() {
			continue;
		}
		let Some((key, value)) = line.split_once('=') else {
			tracing::debug!("Ignoring parameter line without '=': {line:?}");
			continue;
		};
		map.insert(key.trim().to_string(), value.trim().to_string());
	}
	map
}

/// Split a comma-separated value list.
pub fn parse_value_list(value: &str) -> Vec<&str> {
	value.split(',').map(str::trim).filter(|v| !v.is_empty()).collect()
}

/// Fetch a key whose absence invalidates construction.
pub fn require<'a>(map: &'a ParamMap, key: &str) -> Result<&'a str> {
	match map.get(key).map(String::as_str) {
		Some(v) if !v.is_empty() => Ok(v),
		_ => {
			tracing::warn!("Missing required parameter '{key}'.");
			Err(Error::invalid(format!("missing parameter '{key}'")))
		}
	}
}

/// Fetch and parse an optional numeric key.
pub fn get_parsed<T: std::str::FromStr>(map: &ParamMap, key: &str) -> Result<Option<T>> {
	match map.get(key) {
		None => Ok(None),
		Some(v) if v.is_empty() => Ok(None),
		Some(v) => v
			.parse()
			.map(Some)
			.map_err(|_| Error::invalid(format!("parameter '{key}' has unparseable value {v:?}"))),
	}
}

/// True when the two comma-separated lists share at least one entry.
///
/// An empty `declared` list declares nothing and never matches; callers that
/// accept anything should skip the check instead.
pub fn has_intersection(declared: &str, requested: &str) -> bool {
	let declared = parse_value_list(declared);
	parse_value_list(requested).iter().any(|r| declared.contains(r))
}

/// Builder for parameter strings, the write side of [`parse_param_map`].
#[derive(Default)]
pub struct ParamBuilder {
	out: String,
}

impl ParamBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set(mut self, key: &str, value: &str) -> Self {
		self.out.push_str(key);
		self.out.push('=');
		self.out.push_str(value);
		self.out.push('\n');
		self
	}

	pub fn set_num<N: std::fmt::Display>(self, key: &str, value: N) -> Self {
		let v = value.to_string();
		self.set(key, &v)
	}

	pub fn build(self) -> String {
		self.out
	}
}
