//! Input slots: bounded FIFOs with a per-slot hold policy, each with its own
//! mutex/condvar pair.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::buffer::MediaBuffer;

/// What an input slot does with a new buffer when its queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HoldPolicy {
	/// The producer blocks until room is available or shutdown.
	#[default]
	Block,
	/// Evict the head of the queue, enqueue the new buffer.
	DropOldest,
	/// Discard the incoming buffer; the producer still reports success.
	DropLatest,
}

/// Configuration of one input slot.
#[derive(Clone, Debug)]
pub struct SlotConfig {
	pub capacity: usize,
	pub policy: HoldPolicy,
	/// Expected data-type tag (`image:nv12`, comma-separated alternatives);
	/// empty accepts anything.
	pub data_type: String,
}

impl Default for SlotConfig {
	fn default() -> Self {
		Self { capacity: 4, policy: HoldPolicy::Block, data_type: String::new() }
	}
}

impl SlotConfig {
	pub fn with_policy(capacity: usize, policy: HoldPolicy) -> Self {
		Self { capacity, policy, ..Default::default() }
	}
}

pub(crate) enum PushOutcome {
	/// Enqueued (possibly after evicting the oldest entry).
	Queued,
	/// DropLatest discarded the incoming buffer; this still counts as
	/// success for the producer.
	DroppedIncoming,
	/// The flow is disabled or the producer is shutting down.
	Refused,
}

pub(crate) struct InputSlot {
	data_type: String,
	capacity: usize,
	policy: HoldPolicy,
	queue: Mutex<VecDeque<Arc<MediaBuffer>>>,
	not_empty: Condvar,
	not_full: Condvar,
}

impl InputSlot {
	pub fn new(config: SlotConfig) -> Self {
		Self {
			data_type: config.data_type,
			capacity: config.capacity.max(1),
			policy: config.policy,
			queue: Mutex::new(VecDeque::new()),
			not_empty: Condvar::new(),
			not_full: Condvar::new(),
		}
	}

	pub fn data_type(&self) -> &str {
		&self.data_type
	}

	pub fn len(&self) -> usize {
		self.queue.lock().unwrap().len()
	}

	/// Enqueue according to the hold policy. `disabled` is the owning flow's
	/// disable flag; `quit` is the producer's shutdown flag, checked after
	/// every wakeup so a blocked producer stops promptly.
	pub fn push(
		&self,
		buffer: Arc<MediaBuffer>,
		disabled: &AtomicBool,
		quit: Option<&AtomicBool>,
	) -> PushOutcome {
		let mut queue = self.queue.lock().unwrap();
		if disabled.load(Ordering::SeqCst) {
			return PushOutcome::Refused;
		}
		match self.policy {
			HoldPolicy::Block => {
				while queue.len() >= self.capacity {
					queue = self.not_full.wait(queue).unwrap();
					if disabled.load(Ordering::SeqCst) || quit.is_some_and(|q| q.load(Ordering::SeqCst)) {
						return PushOutcome::Refused;
					}
				}
				queue.push_back(buffer);
			}
			HoldPolicy::DropOldest => {
				if queue.len() >= self.capacity {
					// The queue gives up its reference only; anyone still
					// holding the evicted buffer keeps it alive.
					queue.pop_front();
				}
				queue.push_back(buffer);
			}
			HoldPolicy::DropLatest => {
				if queue.len() >= self.capacity {
					// An EOF marker is the one buffer that must not be
					// discarded, or the end of the stream would never reach
					// the consumer. Wait for room instead.
					if buffer.eof() {
						while queue.len() >= self.capacity {
							queue = self.not_full.wait(queue).unwrap();
							if disabled.load(Ordering::SeqCst)
								|| quit.is_some_and(|q| q.load(Ordering::SeqCst))
							{
								return PushOutcome::Refused;
							}
						}
						queue.push_back(buffer);
						self.not_empty.notify_one();
						return PushOutcome::Queued;
					}
					return PushOutcome::DroppedIncoming;
				}
				queue.push_back(buffer);
			}
		}
		self.not_empty.notify_one();
		PushOutcome::Queued
	}

	/// Dequeue, waiting while the queue is empty. Returns `None` on shutdown
	/// or once the flow is disabled and the queue has drained.
	pub fn pop_wait(&self, disabled: &AtomicBool, quit: &AtomicBool) -> Option<Arc<MediaBuffer>> {
		let mut queue = self.queue.lock().unwrap();
		loop {
			if quit.load(Ordering::SeqCst) {
				return None;
			}
			if let Some(buffer) = queue.pop_front() {
				self.not_full.notify_one();
				return Some(buffer);
			}
			if disabled.load(Ordering::SeqCst) {
				return None;
			}
			queue = self.not_empty.wait(queue).unwrap();
		}
	}

	/// Block until the slot holds at least one buffer without consuming it.
	/// Returns false on shutdown, or when the flow is disabled and nothing
	/// is queued.
	pub fn wait_non_empty(&self, disabled: &AtomicBool, quit: &AtomicBool) -> bool {
		let mut queue = self.queue.lock().unwrap();
		loop {
			if quit.load(Ordering::SeqCst) {
				return false;
			}
			if !queue.is_empty() {
				return true;
			}
			if disabled.load(Ordering::SeqCst) {
				return false;
			}
			queue = self.not_empty.wait(queue).unwrap();
		}
	}

	/// Bounded wait used by multi-slot void workers that rotate over their
	/// slots.
	pub fn wait_non_empty_timeout(&self, timeout: Duration) {
		let queue = self.queue.lock().unwrap();
		if queue.is_empty() {
			let _ = self.not_empty.wait_timeout(queue, timeout).unwrap();
		}
	}

	pub fn try_pop(&self) -> Option<Arc<MediaBuffer>> {
		let buffer = self.queue.lock().unwrap().pop_front();
		if buffer.is_some() {
			self.not_full.notify_one();
		}
		buffer
	}

	/// Release every queued buffer. Used at teardown, after the workers have
	/// been joined.
	pub fn drain(&self) -> usize {
		let mut queue = self.queue.lock().unwrap();
		let count = queue.len();
		queue.clear();
		self.not_full.notify_all();
		count
	}

	/// Wake every waiter so it can re-check its shutdown condition.
	pub fn wake_all(&self) {
		let _guard = self.queue.lock().unwrap();
		self.not_empty.notify_all();
		self.not_full.notify_all();
	}
}
