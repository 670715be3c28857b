//! File-backed flows: a chunk/frame reader source and a writer sink.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::buffer::{MediaBuffer, MemType};
use crate::error::{Error, Result};
use crate::flow::{Flow, ProcessFn, SlotConfig, SlotMap, TransactionMode};
use crate::media::ImageInfo;
use crate::params::{self, parse_param_map};
use crate::registry;
use crate::stream::Stream;
use crate::util::now_millis;

pub const FILE_READ_FLOW: &str = "file_read_flow";
pub const FILE_WRITE_FLOW: &str = "file_write_flow";

/// How often the source re-reads its origin after the first pass.
///
/// `0` reads the file once, a positive value adds that many further passes,
/// a negative value loops forever.
fn should_rewind(loop_time: &mut i64) -> bool {
	match *loop_time {
		0 => false,
		n if n > 0 => {
			*loop_time -= 1;
			true
		}
		_ => true,
	}
}

/// Source flow reading a file as a sequence of buffers.
///
/// Parameters: `path` (required), `open_mode` (defaults to read),
/// `mem_type`, and either `mem_size_pertime` for raw chunked reads or an
/// image description (`pixel_format`/`width`/`height`/...) for whole-frame
/// reads. `fps` paces production and is fixed at construction; `loop_time`
/// controls rewinding. One EOF buffer follows the last read.
pub fn file_read_flow(param: &str) -> Result<Flow> {
	let map = parse_param_map(param);
	let path = params::require(&map, params::KEY_PATH)?;

	let mem_type = match map.get(params::KEY_MEM_TYPE) {
		None => MemType::Common,
		Some(v) => MemType::from_param(v)
			.ok_or_else(|| Error::invalid(format!("unknown mem_type {v:?}")))?,
	};
	let read_size: usize = params::get_parsed(&map, params::KEY_MEM_SIZE_PERTIME)?.unwrap_or(0);
	let image_info = if read_size == 0 { Some(ImageInfo::from_params(&map)?) } else { None };
	let fps: u32 = params::get_parsed(&map, params::KEY_FPS)?.unwrap_or(0);
	let mut loop_time: i64 = params::get_parsed(&map, params::KEY_LOOP_TIME)?.unwrap_or(0);

	// The pacing interval is derived from fps once; fps never changes after
	// construction.
	let interval = (fps > 0).then(|| Duration::from_millis(1000 / fps as u64));
	let alloc_size = match &image_info {
		Some(info) => info.frame_size(),
		None => read_size,
	};
	if alloc_size == 0 {
		return Err(Error::invalid("nothing to read: no chunk size and no image geometry"));
	}

	let stream_param = params::ParamBuilder::new()
		.set(params::KEY_PATH, path)
		.set(params::KEY_OPEN_MODE, map.get(params::KEY_OPEN_MODE).map(String::as_str).unwrap_or("r"))
		.build();
	let mut stream = registry::builtin_registry().streams().create("file_read_stream", &stream_param)?;

	let flow = Flow::source(FILE_READ_FLOW, vec![String::new()], path)?;

	flow.start_source(move |ctx| {
		while ctx.running() {
			if !ctx.wait_consumer() {
				return;
			}
			if stream.eof() {
				if !should_rewind(&mut loop_time) {
					break;
				}
				if let Err(e) = stream.seek(std::io::SeekFrom::Start(0)) {
					tracing::error!("Rewinding input failed: {e}.");
					ctx.flow().set_disable();
					return;
				}
			}
			let mut buffer = match MediaBuffer::alloc(alloc_size, mem_type) {
				Ok(buffer) => buffer,
				Err(e) => {
					tracing::warn!("Frame allocation failed ({e}); skipping.");
					continue;
				}
			};
			let n = match stream.read(buffer.bytes_mut(), 1, alloc_size) {
				Ok(n) => n,
				Err(e) => {
					tracing::error!("Reading input failed: {e}.");
					ctx.flow().set_disable();
					return;
				}
			};
			if n != alloc_size && !stream.eof() {
				tracing::error!("Read {n} bytes, expected {alloc_size}.");
				ctx.flow().set_disable();
				return;
			}
			if n == 0 {
				continue;
			}
			if let Some(info) = &image_info {
				if n < alloc_size {
					tracing::warn!("Trailing partial frame of {n} bytes dropped.");
					continue;
				}
				buffer = buffer.with_image_info(*info);
			} else {
				buffer.set_valid_size(n);
			}
			buffer.set_timestamp(now_millis());
			if ctx.send(Arc::new(buffer)).is_err() {
				return;
			}
			if let Some(interval) = interval {
				ctx.sleep(interval);
			}
		}
		let _ = ctx.send(Arc::new(MediaBuffer::eof_marker()));
	});

	Ok(flow)
}

/// Sink flow appending every input buffer's valid bytes to a file.
///
/// Parameters: `path` (required), `open_mode` (defaults to write/truncate).
/// The backing file is closed when the EOF buffer arrives.
pub fn file_write_flow(param: &str) -> Result<Flow> {
	let map = parse_param_map(param);
	let path = params::require(&map, params::KEY_PATH)?;
	let stream_param = params::ParamBuilder::new()
		.set(params::KEY_PATH, path)
		.set(params::KEY_OPEN_MODE, map.get(params::KEY_OPEN_MODE).map(String::as_str).unwrap_or("w"))
		.build();
	let stream = registry::builtin_registry().streams().create("file_write_stream", &stream_param)?;
	let stream = Mutex::new(stream);

	let process: ProcessFn = Box::new(move |ctx, inputs| {
		let Some(buffer) = inputs.into_iter().flatten().next() else {
			return true;
		};
		let mut stream = stream.lock().unwrap();
		if buffer.eof() {
			if let Err(e) = stream.close() {
				tracing::warn!("Closing output failed: {e}.");
			}
			return true;
		}
		if !buffer.is_valid() {
			return true;
		}
		match stream.write(buffer.valid_bytes(), 1, buffer.valid_size()) {
			Ok(_) => true,
			Err(e) => {
				tracing::error!("Writing output failed: {e}.");
				ctx.flow().set_disable();
				false
			}
		}
	});

	Flow::install(
		FILE_WRITE_FLOW,
		SlotMap::simple(vec![SlotConfig::default()], Vec::new(), TransactionMode::Void, process),
	)
}
