//! Reference-counted media buffers.
//!
//! A [`MediaBuffer`] straddles three memory domains at once: owned heap
//! regions for codec work, shared hardware buffers addressed by file
//! descriptor for zero-copy video paths, and borrowed views into memory that
//! belongs to someone else (a codec's packet, a pooled frame). The last case
//! is covered by *related holders*: instead of copying foreign bytes, the
//! buffer owns a share of whatever object backs them.
//!
//! Buffers cross threads as `Arc<MediaBuffer>`; their contents are only
//! mutated while a single reference exists (before sharing, or through
//! `Arc::get_mut`).

mod memory;

use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::media::{ImageInfo, MediaKind, PixelFormat, SampleFormat, SampleInfo};

pub use memory::{register_hw_allocator, HeapRegion, HwAllocator, HwBuffer};

bitflags::bitflags! {
	/// Frame-type bits video producers put in the buffer user flag.
	pub struct VideoFlags: u32 {
		/// Out-of-band codec setup data (SPS/PPS and friends).
		const EXTRA_INTRA = 1 << 0;
		const INTRA = 1 << 1;
		const PREDICTED = 1 << 2;
		const BI_PREDICTIVE = 1 << 3;
		const BI_DIRECTIONAL = 1 << 4;
	}
}

/// Which allocator a buffer's bytes come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemType {
	#[default]
	Common,
	HwIon,
	HwDrm,
}

impl MemType {
	pub fn from_param(s: &str) -> Option<Self> {
		match s {
			"common" => Some(MemType::Common),
			"hw_ion" => Some(MemType::HwIon),
			"hw_drm" => Some(MemType::HwDrm),
			_ => None,
		}
	}

	pub fn is_hw(&self) -> bool {
		!matches!(self, MemType::Common)
	}
}

/// Payload typing for the buffer variants that carry format records.
#[derive(Clone, Debug, Default)]
pub enum BufferDetails {
	#[default]
	Raw,
	Sample(SampleInfo),
	Image(ImageInfo),
}

enum Storage {
	Empty,
	Heap(HeapRegion),
	Hw(HwBuffer),
	/// Borrowed region; kept alive by the user payload or a related holder.
	External { ptr: *const u8, capacity: usize },
}

// Heap and hardware regions are uniquely owned by the buffer; external
// regions are pinned by the holders the buffer owns. Shared mutation is
// excluded by the single-reference rule above.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
	fn capacity(&self) -> usize {
		match self {
			Storage::Empty => 0,
			Storage::Heap(r) => r.capacity(),
			Storage::Hw(h) => h.capacity(),
			Storage::External { capacity, .. } => *capacity,
		}
	}

	fn ptr(&self) -> Option<*const u8> {
		match self {
			Storage::Empty => None,
			Storage::Heap(r) => Some(r.as_ptr()),
			Storage::Hw(h) => h.as_ptr(),
			Storage::External { ptr, .. } => Some(*ptr),
		}
	}
}

/// One unit of media data moving through a flow graph.
pub struct MediaBuffer {
	storage: Storage,
	mem_type: MemType,
	valid_size: usize,
	kind: MediaKind,
	user_flag: u32,
	timestamp: i64,
	eof: bool,
	details: BufferDetails,
	user_data: Option<Box<dyn Any + Send + Sync>>,
	related: Vec<Option<Arc<dyn Any + Send + Sync>>>,
}

impl Default for MediaBuffer {
	fn default() -> Self {
		Self {
			storage: Storage::Empty,
			mem_type: MemType::Common,
			valid_size: 0,
			kind: MediaKind::None,
			user_flag: 0,
			timestamp: 0,
			eof: false,
			details: BufferDetails::Raw,
			user_data: None,
			related: Vec::new(),
		}
	}
}

impl MediaBuffer {
	/// Allocate a fresh buffer in the given memory domain.
	///
	/// Hardware domains require a [`HwAllocator`] registered at process
	/// start; without one this fails with `Unsupported`. Allocation failure
	/// is `OutOfMemory` and recoverable: skip the frame and continue.
	pub fn alloc(size: usize, mem_type: MemType) -> Result<Self> {
		let storage = match mem_type {
			MemType::Common => Storage::Heap(HeapRegion::alloc(size)?),
			MemType::HwIon | MemType::HwDrm => {
				let allocator = memory::hw_allocator()
					.ok_or(Error::Unsupported("no hardware allocator registered"))?;
				Storage::Hw(allocator.alloc(size, mem_type)?)
			}
		};
		let mut buffer = Self::default();
		buffer.storage = storage;
		buffer.mem_type = mem_type;
		Ok(buffer)
	}

	/// Allocate a common-memory buffer, optionally page-aligned for DMA or
	/// mmap hand-off.
	pub fn alloc_aligned(size: usize, page_aligned: bool) -> Result<Self> {
		let region =
			if page_aligned { HeapRegion::alloc_page_aligned(size)? } else { HeapRegion::alloc(size)? };
		let mut buffer = Self::default();
		buffer.storage = Storage::Heap(region);
		Ok(buffer)
	}

	/// Wrap shared bytes without copying. The `Bytes` handle is attached as
	/// a related holder so the region outlives the buffer.
	pub fn wrap(bytes: Bytes) -> Self {
		let ptr = bytes.as_ptr();
		let capacity = bytes.len();
		let mut buffer = Self::default();
		buffer.storage = Storage::External { ptr, capacity };
		buffer.valid_size = capacity;
		buffer.attach_related(Arc::new(bytes), None);
		buffer
	}

	/// Wrap a foreign region directly.
	///
	/// # Safety
	///
	/// `ptr..ptr+capacity` must stay valid and un-mutated for as long as
	/// `holder` is alive; the holder is attached as a related holder.
	pub unsafe fn wrap_raw(ptr: *const u8, capacity: usize, holder: Arc<dyn Any + Send + Sync>) -> Self {
		let mut buffer = Self::default();
		buffer.storage = Storage::External { ptr, capacity };
		buffer.valid_size = capacity;
		buffer.attach_related(holder, None);
		buffer
	}

	/// An empty buffer that only marks the end of a stream.
	pub fn eof_marker() -> Self {
		let mut buffer = Self::default();
		buffer.eof = true;
		buffer
	}

	/// Copy this buffer into a fresh region in `dst_type` memory. The clone
	/// carries the same attributes and is byte-exact over the valid range;
	/// user payload and related holders stay with the original.
	pub fn clone_to(&self, dst_type: MemType) -> Result<Self> {
		let mut dst = if self.valid_size > 0 {
			let mut dst = Self::alloc(self.valid_size, dst_type)?;
			match &self.storage {
				// An unmapped hardware source is mapped just long enough to copy.
				Storage::Hw(hw) if hw.as_ptr().is_none() => {
					hw.with_bytes(self.valid_size, |src| {
						dst.bytes_mut()[..src.len()].copy_from_slice(src);
					})?;
				}
				_ => {
					let src = self.valid_bytes();
					dst.bytes_mut()[..src.len()].copy_from_slice(src);
				}
			}
			dst
		} else {
			let mut dst = Self::default();
			dst.mem_type = dst_type;
			dst
		};
		dst.valid_size = self.valid_size;
		dst.kind = self.kind;
		dst.user_flag = self.user_flag;
		dst.timestamp = self.timestamp;
		dst.eof = self.eof;
		dst.details = self.details.clone();
		Ok(dst)
	}

	pub fn capacity(&self) -> usize {
		self.storage.capacity()
	}

	pub fn valid_size(&self) -> usize {
		self.valid_size
	}

	/// Bytes currently populated. Panics when `size` exceeds the allocated
	/// capacity; that is a programmer error, not a runtime condition.
	pub fn set_valid_size(&mut self, size: usize) {
		assert!(size <= self.capacity(), "valid size {size} exceeds capacity {}", self.capacity());
		self.valid_size = size;
	}

	pub fn is_valid(&self) -> bool {
		self.valid_size > 0
	}

	/// The hardware descriptor, when this buffer lives in hardware memory.
	pub fn fd(&self) -> Option<std::os::unix::io::RawFd> {
		match &self.storage {
			Storage::Hw(h) => Some(h.fd()),
			_ => None,
		}
	}

	pub fn is_hw_buffer(&self) -> bool {
		matches!(self.storage, Storage::Hw(_))
	}

	pub fn mem_type(&self) -> MemType {
		self.mem_type
	}

	/// The whole allocated region. Empty when the buffer has no host mapping.
	pub fn bytes(&self) -> &[u8] {
		match self.storage.ptr() {
			Some(ptr) => unsafe { std::slice::from_raw_parts(ptr, self.storage.capacity()) },
			None => &[],
		}
	}

	/// The populated prefix of the region.
	pub fn valid_bytes(&self) -> &[u8] {
		&self.bytes()[..self.valid_size.min(self.storage.capacity())]
	}

	/// Mutable access to the region. Requires exclusive ownership by type
	/// system rule; external regions are read-only.
	pub fn bytes_mut(&mut self) -> &mut [u8] {
		match &mut self.storage {
			Storage::Heap(r) => r.as_mut_slice(),
			Storage::Hw(h) => h.as_mut_slice(),
			Storage::Empty | Storage::External { .. } => &mut [],
		}
	}

	pub fn kind(&self) -> MediaKind {
		self.kind
	}

	pub fn set_kind(&mut self, kind: MediaKind) {
		self.kind = kind;
	}

	pub fn user_flag(&self) -> u32 {
		self.user_flag
	}

	pub fn set_user_flag(&mut self, flag: u32) {
		self.user_flag = flag;
	}

	/// Milliseconds since an arbitrary epoch, or an opaque monotonic token
	/// such as a codec granule position.
	pub fn timestamp(&self) -> i64 {
		self.timestamp
	}

	pub fn set_timestamp(&mut self, ts: i64) {
		self.timestamp = ts;
	}

	pub fn eof(&self) -> bool {
		self.eof
	}

	pub fn set_eof(&mut self, eof: bool) {
		self.eof = eof;
	}

	/// Replace the user payload. The previous payload, if any, is released
	/// here; the new one is released exactly once when the buffer drops.
	pub fn set_user_data(&mut self, data: Option<Box<dyn Any + Send + Sync>>) {
		self.user_data = data;
	}

	pub fn user_data(&self) -> Option<&(dyn Any + Send + Sync)> {
		self.user_data.as_deref()
	}

	/// Attach a shared holder that must outlive this buffer's bytes.
	///
	/// With `index = None` the holder is appended; with an index the slot is
	/// assigned, extending the sequence with empty slots as needed. Holders
	/// are released after the user payload, in reverse attach order, before
	/// the data region is reclaimed.
	pub fn attach_related(&mut self, holder: Arc<dyn Any + Send + Sync>, index: Option<usize>) {
		match index {
			None => self.related.push(Some(holder)),
			Some(i) => {
				if i >= self.related.len() {
					self.related.resize_with(i + 1, || None);
				}
				self.related[i] = Some(holder);
			}
		}
	}

	pub fn related(&self) -> &[Option<Arc<dyn Any + Send + Sync>>] {
		&self.related
	}

	pub fn details(&self) -> &BufferDetails {
		&self.details
	}

	pub fn sample_info(&self) -> Option<&SampleInfo> {
		match &self.details {
			BufferDetails::Sample(info) => Some(info),
			_ => None,
		}
	}

	pub fn image_info(&self) -> Option<&ImageInfo> {
		match &self.details {
			BufferDetails::Image(info) => Some(info),
			_ => None,
		}
	}

	pub fn sample_format(&self) -> SampleFormat {
		self.sample_info().map(|i| i.fmt).unwrap_or_default()
	}

	pub fn pixel_format(&self) -> PixelFormat {
		self.image_info().map(|i| i.pix_fmt).unwrap_or_default()
	}

	/// Turn this buffer into an audio sample buffer.
	pub fn with_sample_info(mut self, info: SampleInfo) -> Self {
		self.kind = MediaKind::Audio;
		self.valid_size = info.frames as usize * info.frame_size();
		self.details = BufferDetails::Sample(info);
		self
	}

	/// Set the frame count, keeping the valid size in lockstep. No-op on
	/// buffers without sample info.
	pub fn set_frames(&mut self, frames: u32) {
		if let BufferDetails::Sample(info) = &mut self.details {
			info.frames = frames;
			let size = frames as usize * info.frame_size();
			assert!(size <= self.capacity(), "frame count {frames} exceeds capacity");
			self.valid_size = size;
		}
	}

	pub fn frames(&self) -> u32 {
		self.sample_info().map(|i| i.frames).unwrap_or(0)
	}

	/// Turn this buffer into an image buffer. A known pixel format
	/// initialises the valid size to one full frame over the virtual plane.
	pub fn with_image_info(mut self, info: ImageInfo) -> Self {
		self.kind = MediaKind::Image;
		let size = info.frame_size();
		if size > 0 {
			assert!(size <= self.capacity(), "image frame size {size} exceeds capacity");
			self.valid_size = size;
		}
		self.details = BufferDetails::Image(info);
		self
	}
}

impl Drop for MediaBuffer {
	fn drop(&mut self) {
		// The user payload is released first, then the related holders in
		// reverse attach order, and only then the data region itself.
		self.user_data.take();
		while let Some(holder) = self.related.pop() {
			drop(holder);
		}
	}
}

impl std::fmt::Debug for MediaBuffer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MediaBuffer")
			.field("capacity", &self.capacity())
			.field("valid_size", &self.valid_size)
			.field("fd", &self.fd())
			.field("kind", &self.kind)
			.field("user_flag", &self.user_flag)
			.field("timestamp", &self.timestamp)
			.field("eof", &self.eof)
			.finish()
	}
}
