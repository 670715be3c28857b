//! The flow runtime: pipeline stages as nodes of a DAG, each owning worker
//! threads and bounded input queues, connected output-to-input.
//!
//! A [`Flow`] is a cheaply cloneable handle; the graph holds strong
//! references downstream and weak references back upstream, so dropping a
//! consumer never leaks its producers and stopping a consumer detaches it
//! from them. Source flows poll an external origin on their own producer
//! thread and are *gated*: production does not start (or resume) until at
//! least one downstream consumer is attached.
//!
//! All scheduling is plain OS threads; the only cross-thread lifetime
//! primitive for payload data is the buffer's reference count.

pub mod file;
mod slot;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::buffer::MediaBuffer;
use crate::codec::{ChangeFlags, ChangeRequest, ParameterValue};
use crate::error::{Error, Result};
use crate::params::has_intersection;

pub use slot::{HoldPolicy, SlotConfig};
use slot::{InputSlot, PushOutcome};

/// How a worker bound to several input slots consumes them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransactionMode {
	/// Wait until every bound slot has a buffer, then consume one from each.
	#[default]
	Sync,
	/// Consume independently: whatever is available, per slot.
	Void,
}

/// The transform invoked by a worker. Receives one entry per input slot of
/// the flow (`None` for slots that produced nothing this round) and emits
/// results through [`FlowCtx::set_output`]. Returning `false` reports a
/// transient failure; the worker logs it and continues.
pub type ProcessFn = Box<dyn Fn(&FlowCtx, Vec<Option<Arc<MediaBuffer>>>) -> bool + Send + Sync>;

/// Callback applied to each pending change request before a process step.
pub type ChangeFn = Box<dyn Fn(&Flow, ChangeRequest) + Send + Sync>;

/// One worker thread: the input slots it consumes and how.
#[derive(Clone, Debug)]
pub struct WorkerBinding {
	pub slots: Vec<usize>,
	pub mode: TransactionMode,
}

/// Full stage description handed to [`Flow::install`].
pub struct SlotMap {
	pub inputs: Vec<SlotConfig>,
	/// Data-type tag per output slot (empty tag = untyped).
	pub outputs: Vec<String>,
	/// Worker layout; when empty, one `Sync` worker consumes every input.
	pub bindings: Vec<WorkerBinding>,
	pub process: ProcessFn,
	pub on_change: Option<ChangeFn>,
}

impl SlotMap {
	/// Single worker over every input slot.
	pub fn simple(inputs: Vec<SlotConfig>, outputs: Vec<String>, mode: TransactionMode, process: ProcessFn) -> Self {
		let slots = (0..inputs.len()).collect();
		Self { inputs, outputs, bindings: vec![WorkerBinding { slots, mode }], process, on_change: None }
	}
}

struct Gate {
	down_flows: usize,
	running: bool,
}

struct OutputSlot {
	data_type: String,
	connections: Mutex<Vec<Connection>>,
	last_timestamp: AtomicI64,
	eof_sent: AtomicBool,
}

#[derive(Clone)]
struct Connection {
	flow: Flow,
	slot: usize,
}

struct Worker {
	handle: JoinHandle<()>,
	quit: Arc<AtomicBool>,
}

struct Inner {
	name: String,
	tag: Mutex<String>,
	disabled: AtomicBool,
	inputs: Vec<InputSlot>,
	outputs: Vec<OutputSlot>,
	gate: Mutex<Gate>,
	gate_cond: Condvar,
	changes: Mutex<std::collections::VecDeque<ChangeRequest>>,
	upstream: Mutex<Vec<(Weak<Inner>, usize)>>,
	workers: Mutex<Vec<Worker>>,
}

/// A pipeline stage. Clone freely; all clones address the same stage.
#[derive(Clone)]
pub struct Flow {
	inner: Arc<Inner>,
}

impl Flow {
	/// Build a transform or sink stage and start its workers.
	pub fn install(name: &str, map: SlotMap) -> Result<Flow> {
		if map.inputs.is_empty() {
			return Err(Error::invalid("a stage needs at least one input slot; sources use Flow::source"));
		}
		let bindings = if map.bindings.is_empty() {
			vec![WorkerBinding { slots: (0..map.inputs.len()).collect(), mode: TransactionMode::Sync }]
		} else {
			map.bindings
		};
		let mut seen = vec![false; map.inputs.len()];
		for binding in &bindings {
			if binding.slots.is_empty() {
				return Err(Error::invalid("worker bound to no input slots"));
			}
			for &slot in &binding.slots {
				if slot >= map.inputs.len() {
					return Err(Error::invalid(format!("worker bound to missing input slot {slot}")));
				}
				if std::mem::replace(&mut seen[slot], true) {
					return Err(Error::invalid(format!("input slot {slot} bound to two workers")));
				}
			}
		}

		let flow = Flow {
			inner: Arc::new(Inner {
				name: name.to_string(),
				tag: Mutex::new(String::new()),
				disabled: AtomicBool::new(false),
				inputs: map.inputs.into_iter().map(InputSlot::new).collect(),
				outputs: map
					.outputs
					.into_iter()
					.map(|data_type| OutputSlot {
						data_type,
						connections: Mutex::new(Vec::new()),
						last_timestamp: AtomicI64::new(i64::MIN),
						eof_sent: AtomicBool::new(false),
					})
					.collect(),
				gate: Mutex::new(Gate { down_flows: 0, running: true }),
				gate_cond: Condvar::new(),
				changes: Mutex::new(std::collections::VecDeque::new()),
				upstream: Mutex::new(Vec::new()),
				workers: Mutex::new(Vec::new()),
			}),
		};

		let process: Arc<ProcessFn> = Arc::new(map.process);
		let on_change: Option<Arc<ChangeFn>> = map.on_change.map(Arc::new);
		let mut workers = flow.inner.workers.lock().unwrap();
		for binding in bindings {
			let quit = Arc::new(AtomicBool::new(false));
			let worker_flow = flow.clone();
			let worker_process = process.clone();
			let worker_on_change = on_change.clone();
			let worker_quit = quit.clone();
			let handle = std::thread::spawn(move || {
				worker_loop(worker_flow, binding, worker_process, worker_on_change, worker_quit);
			});
			workers.push(Worker { handle, quit });
		}
		drop(workers);
		Ok(flow)
	}

	/// Build a source stage: one pass-through worker per the given outputs,
	/// fed by a producer thread started with [`Flow::start_source`].
	///
	/// `tag` labels the origin (a path, a device) for diagnostics.
	pub fn source(name: &str, outputs: Vec<String>, tag: &str) -> Result<Flow> {
		let inputs = outputs.iter().map(|_| SlotConfig::default()).collect::<Vec<_>>();
		let process: ProcessFn = Box::new(|ctx, inputs| {
			for (slot, buffer) in inputs.into_iter().enumerate() {
				if let Some(buffer) = buffer {
					ctx.set_output(buffer, slot);
				}
			}
			true
		});
		let flow = Flow::install(
			name,
			SlotMap::simple(inputs, outputs, TransactionMode::Void, process),
		)?;
		*flow.inner.tag.lock().unwrap() = tag.to_string();
		Ok(flow)
	}

	/// Start the producer thread of a source flow. The closure owns the
	/// origin (stream handle, device) and drives [`SourceCtx`].
	pub fn start_source<F>(&self, producer: F)
	where
		F: FnOnce(SourceCtx) + Send + 'static,
	{
		let quit = Arc::new(AtomicBool::new(false));
		let ctx = SourceCtx { flow: self.clone(), quit: quit.clone() };
		let name = self.inner.name.clone();
		let handle = std::thread::spawn(move || {
			tracing::debug!("Source thread of flow '{name}' started.");
			producer(ctx);
			tracing::debug!("Source thread of flow '{name}' exited.");
		});
		self.inner.workers.lock().unwrap().push(Worker { handle, quit });
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	pub fn input_count(&self) -> usize {
		self.inner.inputs.len()
	}

	pub fn output_count(&self) -> usize {
		self.inner.outputs.len()
	}

	pub fn input_data_type(&self, slot: usize) -> Option<&str> {
		self.inner.inputs.get(slot).map(|s| s.data_type())
	}

	pub fn output_data_type(&self, slot: usize) -> Option<&str> {
		self.inner.outputs.get(slot).map(|s| s.data_type.as_str())
	}

	/// Buffers currently queued on an input slot.
	pub fn pending(&self, slot: usize) -> usize {
		self.inner.inputs.get(slot).map(|s| s.len()).unwrap_or(0)
	}

	/// Number of downstream consumers over all output slots.
	pub fn down_flow_count(&self) -> usize {
		self.inner.gate.lock().unwrap().down_flows
	}

	fn same(&self, other: &Flow) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	/// Connect `out_slot` of this flow to `in_slot` of `down`. Bumps the
	/// source gate so a waiting producer wakes up.
	///
	/// The expected data types of the two slots must overlap (empty tags
	/// match anything). Self-connection is rejected; wider cycles are the
	/// graph builder's responsibility.
	pub fn add_down_flow(&self, out_slot: usize, down: &Flow, in_slot: usize) -> Result<()> {
		if self.same(down) {
			return Err(Error::invalid("flow connected to itself"));
		}
		let out = self
			.inner
			.outputs
			.get(out_slot)
			.ok_or_else(|| Error::invalid(format!("no output slot {out_slot} on flow '{}'", self.name())))?;
		let input_type = down
			.input_data_type(in_slot)
			.ok_or_else(|| Error::invalid(format!("no input slot {in_slot} on flow '{}'", down.name())))?;
		if !out.data_type.is_empty() && !input_type.is_empty() && !has_intersection(&out.data_type, input_type)
		{
			return Err(Error::invalid(format!(
				"data type mismatch: '{}' output {} carries {:?}, '{}' input {} expects {:?}",
				self.name(),
				out_slot,
				out.data_type,
				down.name(),
				in_slot,
				input_type,
			)));
		}

		out.connections.lock().unwrap().push(Connection { flow: down.clone(), slot: in_slot });
		down.inner.upstream.lock().unwrap().push((Arc::downgrade(&self.inner), out_slot));

		let mut gate = self.inner.gate.lock().unwrap();
		gate.down_flows += 1;
		self.inner.gate_cond.notify_all();
		tracing::debug!(
			"Connected '{}' output {} to '{}' input {} ({} consumer(s) now attached).",
			self.name(),
			out_slot,
			down.name(),
			in_slot,
			gate.down_flows,
		);
		Ok(())
	}

	/// Remove every connection from this flow to `down`.
	pub fn remove_down_flow(&self, down: &Flow) {
		let mut removed = 0;
		for out in &self.inner.outputs {
			let mut connections = out.connections.lock().unwrap();
			let before = connections.len();
			connections.retain(|c| !c.flow.same(down));
			removed += before - connections.len();
		}
		if removed > 0 {
			down.inner
				.upstream
				.lock()
				.unwrap()
				.retain(|(weak, _)| !weak.upgrade().is_some_and(|up| Arc::ptr_eq(&up, &self.inner)));
			let mut gate = self.inner.gate.lock().unwrap();
			gate.down_flows -= removed;
			self.inner.gate_cond.notify_all();
			tracing::debug!(
				"Disconnected '{}' from '{}' ({} consumer(s) remain).",
				self.name(),
				down.name(),
				gate.down_flows,
			);
		}
	}

	/// Hand a buffer to an input slot, honoring its hold policy. This is the
	/// operation upstream flows use to deliver across a connection edge.
	pub fn send_input(&self, buffer: Arc<MediaBuffer>, slot: usize) -> Result<()> {
		match self.push_to_slot(buffer, slot, None)? {
			PushOutcome::Refused => Err(Error::Eof),
			_ => Ok(()),
		}
	}

	fn push_to_slot(
		&self,
		buffer: Arc<MediaBuffer>,
		slot: usize,
		quit: Option<&AtomicBool>,
	) -> Result<PushOutcome> {
		let input = self
			.inner
			.inputs
			.get(slot)
			.ok_or_else(|| Error::invalid(format!("no input slot {slot} on flow '{}'", self.name())))?;
		Ok(input.push(buffer, &self.inner.disabled, quit))
	}

	/// Append a dynamic change request; the stage consumes it before its
	/// next process step, in the order enqueued.
	pub fn request_change(&self, change: ChangeFlags, value: ParameterValue) {
		self.inner.changes.lock().unwrap().push_back(ChangeRequest { change, value });
	}

	/// Pop the oldest pending change request.
	pub fn peek_change(&self) -> Option<ChangeRequest> {
		self.inner.changes.lock().unwrap().pop_front()
	}

	pub fn is_disabled(&self) -> bool {
		self.inner.disabled.load(Ordering::SeqCst)
	}

	/// Mark the stage dead: refuse new inputs, emit EOF on every output that
	/// has not reached it yet, and let the workers drain out.
	pub fn set_disable(&self) {
		if self.inner.disabled.swap(true, Ordering::SeqCst) {
			return;
		}
		tracing::debug!("Flow '{}' disabled.", self.name());
		for slot in 0..self.inner.outputs.len() {
			if !self.inner.outputs[slot].eof_sent.load(Ordering::SeqCst) {
				self.deliver(Arc::new(MediaBuffer::eof_marker()), slot, None);
			}
		}
		for input in &self.inner.inputs {
			input.wake_all();
		}
	}

	/// Deliver a buffer to every consumer attached to `out_slot`. Returns
	/// false when the slot does not exist.
	fn deliver(&self, buffer: Arc<MediaBuffer>, out_slot: usize, quit: Option<&AtomicBool>) -> bool {
		let Some(out) = self.inner.outputs.get(out_slot) else {
			tracing::warn!("Flow '{}' produced on missing output slot {out_slot}.", self.name());
			return false;
		};
		if buffer.eof() {
			out.eof_sent.store(true, Ordering::SeqCst);
		} else {
			let ts = buffer.timestamp();
			let prev = out.last_timestamp.fetch_max(ts, Ordering::SeqCst);
			if ts < prev {
				tracing::warn!(
					"Flow '{}' output {} timestamp went backwards ({ts} after {prev}).",
					self.name(),
					out_slot,
				);
			}
		}
		// Snapshot the edge list so at most one downstream queue lock is
		// held at a time.
		let connections = out.connections.lock().unwrap().clone();
		for connection in connections {
			match connection.flow.push_to_slot(buffer.clone(), connection.slot, quit) {
				Ok(PushOutcome::Refused) => {
					tracing::trace!(
						"Flow '{}' refused input from '{}'.",
						connection.flow.name(),
						self.name(),
					);
				}
				Ok(_) => (),
				Err(e) => {
					tracing::warn!("Delivery from '{}' failed: {e}.", self.name());
				}
			}
		}
		true
	}

	/// Stop every worker and producer thread: set their shutdown flags,
	/// wake every condition they may be waiting on (the source gate, the
	/// input slots, and downstream queues a delivery may be blocked on),
	/// join them, then release whatever is still queued.
	pub fn stop_all_threads(&self) {
		self.inner.disabled.store(true, Ordering::SeqCst);
		{
			let mut gate = self.inner.gate.lock().unwrap();
			gate.running = false;
			self.inner.gate_cond.notify_all();
		}
		let workers: Vec<Worker> = {
			let mut workers = self.inner.workers.lock().unwrap();
			for worker in workers.iter() {
				worker.quit.store(true, Ordering::SeqCst);
			}
			workers.drain(..).collect()
		};
		for input in &self.inner.inputs {
			input.wake_all();
		}
		for out in &self.inner.outputs {
			let connections = out.connections.lock().unwrap().clone();
			for connection in connections {
				if let Some(slot) = connection.flow.inner.inputs.get(connection.slot) {
					slot.wake_all();
				}
			}
		}
		for worker in workers {
			if worker.handle.join().is_err() {
				tracing::error!("A worker of flow '{}' panicked.", self.name());
			}
		}
		let mut drained = 0;
		for input in &self.inner.inputs {
			drained += input.drain();
		}
		if drained > 0 {
			tracing::debug!("Flow '{}' released {drained} queued buffer(s) at shutdown.", self.name());
		}
		// Tell upstream producers this consumer is gone so gated sources
		// pause instead of producing into the void.
		let upstream: Vec<_> = self.inner.upstream.lock().unwrap().drain(..).collect();
		for (weak, _) in upstream {
			if let Some(up) = weak.upgrade() {
				Flow { inner: up }.remove_down_flow(self);
			}
		}
	}
}

impl std::fmt::Debug for Flow {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Flow")
			.field("name", &self.inner.name)
			.field("tag", &*self.inner.tag.lock().unwrap())
			.field("inputs", &self.inner.inputs.len())
			.field("outputs", &self.inner.outputs.len())
			.field("disabled", &self.is_disabled())
			.finish()
	}
}

/// Per-invocation view handed to the transform function.
pub struct FlowCtx<'a> {
	flow: &'a Flow,
	quit: &'a AtomicBool,
}

impl FlowCtx<'_> {
	pub fn flow(&self) -> &Flow {
		self.flow
	}

	/// True once shutdown has been requested; long transforms should bail.
	pub fn is_quitting(&self) -> bool {
		self.quit.load(Ordering::SeqCst)
	}

	/// Emit a buffer on an output slot, delivering to every attached
	/// consumer. An EOF buffer also ends the slot.
	pub fn set_output(&self, buffer: Arc<MediaBuffer>, slot: usize) -> bool {
		self.flow.deliver(buffer, slot, Some(self.quit))
	}

	/// Pop the oldest pending change request, for stages that apply changes
	/// themselves rather than through a change callback.
	pub fn peek_change(&self) -> Option<ChangeRequest> {
		self.flow.peek_change()
	}
}

/// Handle driving a source flow's producer thread.
pub struct SourceCtx {
	flow: Flow,
	quit: Arc<AtomicBool>,
}

impl SourceCtx {
	pub fn flow(&self) -> &Flow {
		&self.flow
	}

	/// True while the flow is live and shutdown has not been requested.
	pub fn running(&self) -> bool {
		!self.quit.load(Ordering::SeqCst) && !self.flow.is_disabled()
	}

	/// Block until at least one consumer is attached. Returns false when
	/// shutdown was requested instead, so callers exit promptly.
	///
	/// Called at the top of every production iteration: a source makes no
	/// progress while nobody consumes, and pauses again within one
	/// iteration of the last consumer detaching.
	pub fn wait_consumer(&self) -> bool {
		let inner = &self.flow.inner;
		let mut gate = inner.gate.lock().unwrap();
		loop {
			if !gate.running || self.quit.load(Ordering::SeqCst) {
				return false;
			}
			if gate.down_flows > 0 {
				return true;
			}
			tracing::trace!("Source flow '{}' waiting for a consumer.", self.flow.name());
			gate = inner.gate_cond.wait(gate).unwrap();
		}
	}

	/// Feed one buffer into the flow (input slot 0).
	pub fn send(&self, buffer: Arc<MediaBuffer>) -> Result<()> {
		self.send_to(buffer, 0)
	}

	/// Feed one buffer into a specific input slot.
	pub fn send_to(&self, buffer: Arc<MediaBuffer>, slot: usize) -> Result<()> {
		match self.flow.push_to_slot(buffer, slot, Some(&self.quit))? {
			PushOutcome::Refused => Err(Error::Eof),
			_ => Ok(()),
		}
	}

	/// Sleep in shutdown-sized steps, for rate-paced sources.
	pub fn sleep(&self, duration: Duration) {
		let step = Duration::from_millis(20);
		let mut remaining = duration;
		while remaining > Duration::ZERO && self.running() {
			let chunk = remaining.min(step);
			std::thread::sleep(chunk);
			remaining = remaining.saturating_sub(chunk);
		}
	}
}

fn worker_loop(
	flow: Flow,
	binding: WorkerBinding,
	process: Arc<ProcessFn>,
	on_change: Option<Arc<ChangeFn>>,
	quit: Arc<AtomicBool>,
) {
	let inner = flow.inner.clone();
	tracing::debug!("Flow '{}' worker started over slots {:?}.", inner.name, binding.slots);
	loop {
		if quit.load(Ordering::SeqCst) {
			break;
		}
		if let Some(on_change) = &on_change {
			while let Some(request) = flow.peek_change() {
				on_change(&flow, request);
			}
		}
		let Some(batch) = dequeue(&inner, &binding, &quit) else {
			break;
		};
		let had_eof = batch.iter().any(|(_, buffer)| buffer.eof());
		let mut inputs: Vec<Option<Arc<MediaBuffer>>> = (0..inner.inputs.len()).map(|_| None).collect();
		for (slot, buffer) in batch {
			inputs[slot] = Some(buffer);
		}
		let ctx = FlowCtx { flow: &flow, quit: quit.as_ref() };
		if !(process)(&ctx, inputs) {
			tracing::debug!("Flow '{}' process step failed; skipping.", inner.name);
		}
		if had_eof {
			// End of stream: make sure every output has carried an EOF, then
			// retire this worker.
			for slot in 0..inner.outputs.len() {
				if !inner.outputs[slot].eof_sent.load(Ordering::SeqCst) {
					flow.deliver(Arc::new(MediaBuffer::eof_marker()), slot, Some(&quit));
				}
			}
			break;
		}
		if !inner.outputs.is_empty()
			&& inner.outputs.iter().all(|out| out.eof_sent.load(Ordering::SeqCst))
		{
			break;
		}
	}
	tracing::debug!("Flow '{}' worker exited.", inner.name);
}

/// Collect one round of input according to the transaction mode. `None`
/// means the worker should retire (shutdown, or disabled with nothing left).
fn dequeue(
	inner: &Arc<Inner>,
	binding: &WorkerBinding,
	quit: &AtomicBool,
) -> Option<Vec<(usize, Arc<MediaBuffer>)>> {
	match binding.mode {
		TransactionMode::Sync => {
			for &slot in &binding.slots {
				if !inner.inputs[slot].wait_non_empty(&inner.disabled, quit) {
					return None;
				}
			}
			// Each slot is bound to exactly one worker, so what we just saw
			// is still there.
			let mut batch = Vec::with_capacity(binding.slots.len());
			for &slot in &binding.slots {
				batch.push((slot, inner.inputs[slot].try_pop()?));
			}
			Some(batch)
		}
		TransactionMode::Void => {
			if let [slot] = binding.slots[..] {
				return Some(vec![(slot, inner.inputs[slot].pop_wait(&inner.disabled, quit)?)]);
			}
			loop {
				if quit.load(Ordering::SeqCst) {
					return None;
				}
				let mut batch = Vec::new();
				for &slot in &binding.slots {
					if let Some(buffer) = inner.inputs[slot].try_pop() {
						batch.push((slot, buffer));
					}
				}
				if !batch.is_empty() {
					return Some(batch);
				}
				if inner.disabled.load(Ordering::SeqCst) {
					return None;
				}
				inner.inputs[binding.slots[0]].wait_non_empty_timeout(Duration::from_millis(5));
			}
		}
	}
}
