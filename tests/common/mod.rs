//! Helpers shared by the integration tests: a recording sink stage and
//! small polling utilities.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mediaflow::buffer::MediaBuffer;
use mediaflow::flow::{Flow, ProcessFn, SlotConfig, SlotMap, TransactionMode};

pub fn init_logging() {
	use tracing_subscriber::EnvFilter;
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

/// A sink stage that records every buffer it consumes.
pub struct RecordingSink {
	pub flow: Flow,
	buffers: Arc<Mutex<Vec<Arc<MediaBuffer>>>>,
	eof: Arc<AtomicBool>,
}

impl RecordingSink {
	/// `delay` simulates a slow consumer; applied per data buffer.
	pub fn new(slot: SlotConfig, delay: Option<Duration>) -> Self {
		let buffers: Arc<Mutex<Vec<Arc<MediaBuffer>>>> = Arc::default();
		let eof = Arc::new(AtomicBool::new(false));
		let process: ProcessFn = {
			let buffers = buffers.clone();
			let eof = eof.clone();
			Box::new(move |_ctx, inputs| {
				for buffer in inputs.into_iter().flatten() {
					if buffer.eof() {
						eof.store(true, Ordering::SeqCst);
					} else if let Some(delay) = delay {
						std::thread::sleep(delay);
					}
					buffers.lock().unwrap().push(buffer);
				}
				true
			})
		};
		let flow = Flow::install(
			"recording_sink",
			SlotMap::simple(vec![slot], Vec::new(), TransactionMode::Void, process),
		)
		.expect("sink construction");
		Self { flow, buffers, eof }
	}

	pub fn saw_eof(&self) -> bool {
		self.eof.load(Ordering::SeqCst)
	}

	/// Every recorded buffer, EOF markers included.
	pub fn buffers(&self) -> Vec<Arc<MediaBuffer>> {
		self.buffers.lock().unwrap().clone()
	}

	/// Valid sizes of the data buffers, in arrival order.
	pub fn data_sizes(&self) -> Vec<usize> {
		self.buffers().iter().filter(|b| !b.eof()).map(|b| b.valid_size()).collect()
	}

	pub fn data_timestamps(&self) -> Vec<i64> {
		self.buffers().iter().filter(|b| !b.eof()).map(|b| b.timestamp()).collect()
	}

	pub fn data_count(&self) -> usize {
		self.buffers().iter().filter(|b| !b.eof()).count()
	}
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
	let deadline = Instant::now() + timeout;
	while Instant::now() < deadline {
		if condition() {
			return true;
		}
		std::thread::sleep(Duration::from_millis(5));
	}
	condition()
}

/// A pass-through stage forwarding input slot 0 to output slot 0.
pub fn relay(name: &str) -> Flow {
	relay_with_slot(name, SlotConfig::default())
}

pub fn relay_with_slot(name: &str, slot: SlotConfig) -> Flow {
	let process: ProcessFn = Box::new(|ctx, inputs| {
		for buffer in inputs.into_iter().flatten() {
			ctx.set_output(buffer, 0);
		}
		true
	});
	Flow::install(
		name,
		SlotMap::simple(vec![slot], vec![String::new()], TransactionMode::Void, process),
	)
	.expect("relay construction")
}

/// A buffer with no payload, tagged by timestamp.
pub fn tagged_buffer(tag: i64) -> Arc<MediaBuffer> {
	let mut buffer = MediaBuffer::default();
	buffer.set_timestamp(tag);
	Arc::new(buffer)
}
