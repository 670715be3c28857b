//! Media kinds, pixel/sample formats and their size math, and the string
//! tags (`audio:pcm_s16`, `image:nv12`, ...) used for capability matching
//! when wiring a graph.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::params::{self, ParamMap};

/// Data-type tags understood by the built-in factories. Concrete backends may
/// introduce further tags; matching is plain string comparison.
pub const AUDIO_PCM_S16: &str = "audio:pcm_s16";
pub const AUDIO_PCM_S32: &str = "audio:pcm_s32";
pub const AUDIO_PCM: &str = "audio:pcm";
pub const AUDIO_VORBIS: &str = "audio:vorbis";
pub const IMAGE_NV12: &str = "image:nv12";
pub const IMAGE_YUV420P: &str = "image:yuv420p";
pub const IMAGE_H264: &str = "image:h264";

/// Broad classification of a buffer's payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
	#[default]
	None,
	Audio,
	Image,
	Text,
	Generic,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
	#[default]
	None,
	U8,
	S16,
	S32,
	F32,
}

impl SampleFormat {
	pub fn bytes_per_sample(&self) -> usize {
		match self {
			SampleFormat::None => 0,
			SampleFormat::U8 => 1,
			SampleFormat::S16 => 2,
			SampleFormat::S32 | SampleFormat::F32 => 4,
		}
	}

	pub fn from_param(s: &str) -> Option<Self> {
		match s {
			"u8" => Some(SampleFormat::U8),
			"s16" => Some(SampleFormat::S16),
			"s32" => Some(SampleFormat::S32),
			"f32" | "flt" => Some(SampleFormat::F32),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
	#[default]
	None,
	Yuv420p,
	Nv12,
	Nv21,
	Nv16,
	Yuyv422,
	Uyvy422,
	Rgb565,
	Rgb888,
	Bgr888,
	Argb8888,
	Abgr8888,
}

impl PixelFormat {
	/// Bits per pixel expressed as a rational, so the 12-bit YUV 4:2:0
	/// family stays exact.
	pub fn bytes_num_den(&self) -> (usize, usize) {
		match self {
			PixelFormat::None => (0, 1),
			PixelFormat::Yuv420p | PixelFormat::Nv12 | PixelFormat::Nv21 => (3, 2),
			PixelFormat::Nv16 | PixelFormat::Yuyv422 | PixelFormat::Uyvy422 | PixelFormat::Rgb565 => (2, 1),
			PixelFormat::Rgb888 | PixelFormat::Bgr888 => (3, 1),
			PixelFormat::Argb8888 | PixelFormat::Abgr8888 => (4, 1),
		}
	}

	pub fn from_param(s: &str) -> Option<Self> {
		match s {
			"yuv420p" => Some(PixelFormat::Yuv420p),
			"nv12" => Some(PixelFormat::Nv12),
			"nv21" => Some(PixelFormat::Nv21),
			"nv16" => Some(PixelFormat::Nv16),
			"yuyv422" => Some(PixelFormat::Yuyv422),
			"uyvy422" => Some(PixelFormat::Uyvy422),
			"rgb565" => Some(PixelFormat::Rgb565),
			"rgb888" => Some(PixelFormat::Rgb888),
			"bgr888" => Some(PixelFormat::Bgr888),
			"argb8888" => Some(PixelFormat::Argb8888),
			"abgr8888" => Some(PixelFormat::Abgr8888),
			_ => None,
		}
	}
}

/// Geometry and format of one image plane set.
///
/// `vir_width`/`vir_height` describe the allocated plane (stride-padded, at
/// least as large as the visible `width`/`height`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
	pub pix_fmt: PixelFormat,
	pub width: u32,
	pub height: u32,
	pub vir_width: u32,
	pub vir_height: u32,
}

impl ImageInfo {
	/// Byte size of one full frame over the virtual plane, 0 when the format
	/// is unknown.
	pub fn frame_size(&self) -> usize {
		let (num, den) = self.pix_fmt.bytes_num_den();
		(self.vir_width as usize * self.vir_height as usize * num) / den
	}

	/// Parse `width`/`height`/`virtual_width`/`virtual_height`/`pixel_format`
	/// from a parameter map. Virtual dimensions default to the visible ones.
	pub fn from_params(map: &ParamMap) -> Result<Self> {
		let pix_fmt = params::require(map, params::KEY_PIXEL_FORMAT)?;
		let pix_fmt = PixelFormat::from_param(pix_fmt)
			.ok_or_else(|| Error::invalid(format!("unknown pixel format {pix_fmt:?}")))?;
		let width: u32 = params::get_parsed(map, params::KEY_WIDTH)?
			.ok_or_else(|| Error::invalid("missing parameter 'width'"))?;
		let height: u32 = params::get_parsed(map, params::KEY_HEIGHT)?
			.ok_or_else(|| Error::invalid("missing parameter 'height'"))?;
		let vir_width = params::get_parsed(map, params::KEY_VIRTUAL_WIDTH)?.unwrap_or(width);
		let vir_height = params::get_parsed(map, params::KEY_VIRTUAL_HEIGHT)?.unwrap_or(height);
		if vir_width < width || vir_height < height {
			return Err(Error::invalid("virtual dimensions smaller than visible dimensions"));
		}
		Ok(ImageInfo { pix_fmt, width, height, vir_width, vir_height })
	}
}

/// Format of one audio buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleInfo {
	pub fmt: SampleFormat,
	pub channels: u32,
	pub sample_rate: u32,
	pub frames: u32,
}

impl SampleInfo {
	/// Bytes of one interleaved frame (one sample per channel).
	pub fn frame_size(&self) -> usize {
		self.fmt.bytes_per_sample() * self.channels as usize
	}

	pub fn from_params(map: &ParamMap) -> Result<Self> {
		let fmt = params::require(map, params::KEY_SAMPLE_FORMAT)?;
		let fmt = SampleFormat::from_param(fmt)
			.ok_or_else(|| Error::invalid(format!("unknown sample format {fmt:?}")))?;
		let channels: u32 = params::get_parsed(map, params::KEY_CHANNELS)?
			.ok_or_else(|| Error::invalid("missing parameter 'channels'"))?;
		let sample_rate: u32 = params::get_parsed(map, params::KEY_SAMPLE_RATE)?
			.ok_or_else(|| Error::invalid("missing parameter 'sample_rate'"))?;
		Ok(SampleInfo { fmt, channels, sample_rate, frames: 0 })
	}
}
