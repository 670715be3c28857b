//! Stream configuration handed to codecs, demuxers and muxers.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::media::{ImageInfo, SampleInfo};
use crate::params::{self, ParamMap};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoConfig {
	pub image_info: ImageInfo,
	pub bit_rate: u32,
	pub frame_rate: u32,
	/// Keyframe interval in frames.
	pub gop: u32,
	pub quality: u32,
	pub profile: u32,
	pub level: u32,
	pub codec: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
	pub sample_info: SampleInfo,
	pub bit_rate: u32,
	/// Codec-defined quality knob (e.g. a VBR quality for vorbis-style
	/// encoders).
	pub quality: f32,
	pub codec: String,
}

/// Tagged configuration for one media stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaConfig {
	Video(VideoConfig),
	Audio(AudioConfig),
}

impl MediaConfig {
	pub fn video(&self) -> Result<&VideoConfig> {
		match self {
			MediaConfig::Video(cfg) => Ok(cfg),
			MediaConfig::Audio(_) => Err(Error::invalid("expected a video configuration")),
		}
	}

	pub fn audio(&self) -> Result<&AudioConfig> {
		match self {
			MediaConfig::Audio(cfg) => Ok(cfg),
			MediaConfig::Video(_) => Err(Error::invalid("expected an audio configuration")),
		}
	}

	/// Build a video configuration from factory parameters.
	pub fn video_from_params(map: &ParamMap) -> Result<Self> {
		Ok(MediaConfig::Video(VideoConfig {
			image_info: ImageInfo::from_params(map)?,
			bit_rate: params::get_parsed(map, params::KEY_BIT_RATE)?.unwrap_or(0),
			frame_rate: params::get_parsed(map, params::KEY_FRAME_RATE)?.unwrap_or(0),
			gop: params::get_parsed(map, params::KEY_GOP)?.unwrap_or(0),
			quality: params::get_parsed(map, params::KEY_QUALITY)?.unwrap_or(0),
			profile: params::get_parsed(map, params::KEY_PROFILE)?.unwrap_or(0),
			level: params::get_parsed(map, params::KEY_LEVEL)?.unwrap_or(0),
			codec: map.get(params::KEY_CODEC).cloned().unwrap_or_default(),
		}))
	}

	/// Build an audio configuration from factory parameters.
	pub fn audio_from_params(map: &ParamMap) -> Result<Self> {
		Ok(MediaConfig::Audio(AudioConfig {
			sample_info: SampleInfo::from_params(map)?,
			bit_rate: params::get_parsed(map, params::KEY_BIT_RATE)?.unwrap_or(0),
			quality: params::get_parsed(map, params::KEY_QUALITY)?.unwrap_or(0.0),
			codec: map.get(params::KEY_CODEC).cloned().unwrap_or_default(),
		}))
	}
}
