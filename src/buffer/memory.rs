//! Backing regions for media buffers: heap allocations (optionally
//! page-aligned) and fd-addressed hardware memory mapped into the process.

use std::alloc::{self, Layout};
use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;
use std::sync::OnceLock;

use crate::buffer::MemType;
use crate::error::{Error, Result};

fn page_size() -> usize {
	static PAGE: OnceLock<usize> = OnceLock::new();
	*PAGE.get_or_init(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize)
}

/// An owned, zero-initialised heap region.
pub struct HeapRegion {
	ptr: NonNull<u8>,
	capacity: usize,
	layout: Layout,
}

unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

impl HeapRegion {
	pub fn alloc(size: usize) -> Result<Self> {
		Self::with_align(size, 16)
	}

	/// Page-aligned allocation for DMA or mmap hand-off.
	pub fn alloc_page_aligned(size: usize) -> Result<Self> {
		Self::with_align(size, page_size())
	}

	fn with_align(size: usize, align: usize) -> Result<Self> {
		let layout = Layout::from_size_align(size.max(1), align)
			.map_err(|_| Error::invalid(format!("impossible allocation layout: {size}/{align}")))?;
		let ptr = unsafe { alloc::alloc_zeroed(layout) };
		let ptr = NonNull::new(ptr).ok_or(Error::OutOfMemory(size))?;
		Ok(Self { ptr, capacity: size, layout })
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn as_ptr(&self) -> *const u8 {
		self.ptr.as_ptr()
	}

	pub fn as_mut_slice(&mut self) -> &mut [u8] {
		unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
	}
}

impl Drop for HeapRegion {
	fn drop(&mut self) {
		unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
	}
}

/// A hardware buffer: an owned descriptor plus its host mapping.
///
/// The descriptor owns the underlying allocation (ION/DRM style); the mapping
/// is torn down before the descriptor closes.
pub struct HwBuffer {
	fd: OwnedFd,
	capacity: usize,
	map: Option<NonNull<u8>>,
}

unsafe impl Send for HwBuffer {}
unsafe impl Sync for HwBuffer {}

impl HwBuffer {
	/// Take ownership of `fd` and map `capacity` bytes of it read/write.
	pub fn from_fd(fd: OwnedFd, capacity: usize) -> Result<Self> {
		let ptr = unsafe {
			libc::mmap(
				std::ptr::null_mut(),
				capacity.max(1),
				libc::PROT_READ | libc::PROT_WRITE,
				libc::MAP_SHARED,
				fd.as_raw_fd(),
				0,
			)
		};
		if ptr == libc::MAP_FAILED {
			return Err(Error::Io(io::Error::last_os_error()));
		}
		Ok(Self { fd, capacity, map: NonNull::new(ptr as *mut u8) })
	}

	/// Take ownership of `fd` without mapping it; the buffer then has no
	/// host-memory view until cloned into common memory by a consumer that
	/// maps it.
	pub fn from_fd_unmapped(fd: OwnedFd, capacity: usize) -> Self {
		Self { fd, capacity, map: None }
	}

	pub fn fd(&self) -> RawFd {
		self.fd.as_raw_fd()
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub(crate) fn as_ptr(&self) -> Option<*const u8> {
		self.map.map(|p| p.as_ptr() as *const u8)
	}

	pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
		match self.map {
			Some(ptr) => unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.capacity) },
			None => &mut [],
		}
	}

	/// Run `f` over the buffer contents, establishing a temporary read-only
	/// mapping when the buffer is not mapped into the process.
	pub(crate) fn with_bytes<R>(&self, len: usize, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
		let len = len.min(self.capacity);
		if let Some(ptr) = self.map {
			let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) };
			return Ok(f(bytes));
		}
		let ptr = unsafe {
			libc::mmap(
				std::ptr::null_mut(),
				len.max(1),
				libc::PROT_READ,
				libc::MAP_SHARED,
				self.fd.as_raw_fd(),
				0,
			)
		};
		if ptr == libc::MAP_FAILED {
			return Err(Error::Io(io::Error::last_os_error()));
		}
		let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, len) };
		let result = f(bytes);
		unsafe { libc::munmap(ptr, len.max(1)) };
		Ok(result)
	}
}

impl Drop for HwBuffer {
	fn drop(&mut self) {
		if let Some(ptr) = self.map.take() {
			unsafe { libc::munmap(ptr.as_ptr() as *mut libc::c_void, self.capacity.max(1)) };
		}
	}
}

/// The platform allocator behind [`MemType::HwIon`] / [`MemType::HwDrm`].
///
/// Registered once at process start; hardware allocation without a registered
/// allocator fails with `Unsupported`.
pub trait HwAllocator: Send + Sync {
	fn alloc(&self, size: usize, mem_type: MemType) -> Result<HwBuffer>;
}

static HW_ALLOCATOR: OnceLock<Box<dyn HwAllocator>> = OnceLock::new();

pub fn register_hw_allocator(allocator: Box<dyn HwAllocator>) -> Result<()> {
	HW_ALLOCATOR
		.set(allocator)
		.map_err(|_| Error::invalid("hardware allocator already registered"))
}

pub(crate) fn hw_allocator() -> Option<&'static dyn HwAllocator> {
	HW_ALLOCATOR.get().map(|b| b.as_ref())
}
