//! End-to-end scenarios around the file flows.

mod common;

use std::io::Write;
use std::time::{Duration, Instant};

use common::{init_logging, wait_until, RecordingSink};
use mediaflow::buffer::MediaBuffer;
use mediaflow::flow::{HoldPolicy, SlotConfig};
use mediaflow::params::ParamBuilder;
use mediaflow::pipeline::Pipeline;
use mediaflow::registry::builtin_registry;

fn input_file(bytes: &[u8]) -> tempfile::NamedTempFile {
	let mut file = tempfile::NamedTempFile::new().unwrap();
	file.write_all(bytes).unwrap();
	file.flush().unwrap();
	file
}

#[test]
fn chunked_read_delivers_exact_sizes_then_eof() {
	init_logging();
	let file = input_file(&vec![0x5A; 10_000]);
	let param = ParamBuilder::new()
		.set("path", &file.path().display().to_string())
		.set_num("mem_size_pertime", 4096)
		.set_num("loop_time", 0)
		.build();
	let source = builtin_registry().flows().create("file_read_flow", &param).unwrap();
	let sink = RecordingSink::new(SlotConfig::default(), None);
	source.add_down_flow(0, &sink.flow, 0).unwrap();

	assert!(wait_until(Duration::from_secs(5), || sink.saw_eof()));
	assert_eq!(sink.data_sizes(), vec![4096, 4096, 1808]);
	let eof_count = sink.buffers().iter().filter(|b| b.eof()).count();
	assert_eq!(eof_count, 1);
	// The EOF marker is the last delivery.
	assert!(sink.buffers().last().unwrap().eof());

	source.stop_all_threads();
	sink.flow.stop_all_threads();
}

#[test]
fn loop_time_adds_extra_passes() {
	init_logging();
	let file = input_file(&[1u8; 300]);
	let param = ParamBuilder::new()
		.set("path", &file.path().display().to_string())
		.set_num("mem_size_pertime", 128)
		.set_num("loop_time", 2)
		.build();
	let source = builtin_registry().flows().create("file_read_flow", &param).unwrap();
	let sink = RecordingSink::new(SlotConfig::default(), None);
	source.add_down_flow(0, &sink.flow, 0).unwrap();

	assert!(wait_until(Duration::from_secs(5), || sink.saw_eof()));
	// Three passes over the file: the initial one plus loop_time additions.
	assert_eq!(sink.data_sizes(), vec![128, 128, 44].repeat(3));

	source.stop_all_threads();
	sink.flow.stop_all_threads();
}

#[test]
fn reader_is_gated_until_a_consumer_attaches() {
	init_logging();
	let file = input_file(&[2u8; 256]);
	let param = ParamBuilder::new()
		.set("path", &file.path().display().to_string())
		.set_num("mem_size_pertime", 64)
		.build();
	let source = builtin_registry().flows().create("file_read_flow", &param).unwrap();

	// Nothing is consumed, so nothing may be lost while we dawdle.
	std::thread::sleep(Duration::from_millis(100));

	let sink = RecordingSink::new(SlotConfig::default(), None);
	source.add_down_flow(0, &sink.flow, 0).unwrap();
	assert!(wait_until(Duration::from_secs(5), || sink.saw_eof()));
	// Every byte of the file arrived despite the late attach.
	assert_eq!(sink.data_sizes().iter().sum::<usize>(), 256);

	source.stop_all_threads();
	sink.flow.stop_all_threads();
}

#[test]
fn paced_reader_with_drop_oldest_never_blocks_and_keeps_order() {
	init_logging();
	let frames = 40usize;
	let file = input_file(&vec![3u8; frames * 100]);
	let param = ParamBuilder::new()
		.set("path", &file.path().display().to_string())
		.set_num("mem_size_pertime", 100)
		.set_num("fps", 100)
		.build();
	let source = builtin_registry().flows().create("file_read_flow", &param).unwrap();
	// A consumer much slower than the producer, with a tiny queue.
	let sink = RecordingSink::new(
		SlotConfig::with_policy(2, HoldPolicy::DropOldest),
		Some(Duration::from_millis(25)),
	);

	let started = Instant::now();
	source.add_down_flow(0, &sink.flow, 0).unwrap();
	assert!(wait_until(Duration::from_secs(10), || sink.saw_eof()));

	let seen = sink.data_timestamps();
	// The producer ran at its own pace: the whole file went through well
	// under the time the sink would need for all 40 frames.
	assert!(started.elapsed() < Duration::from_secs(2), "producer was held back");
	// Overload dropped frames, and what survived is a monotonic subsequence
	// of production order.
	assert!(seen.len() < frames);
	assert!(!seen.is_empty());
	assert!(seen.windows(2).all(|w| w[0] <= w[1]));

	source.stop_all_threads();
	sink.flow.stop_all_threads();
}

#[test]
fn toml_pipeline_copies_a_file() {
	init_logging();
	let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
	let input = input_file(&payload);
	let out_dir = tempfile::tempdir().unwrap();
	let out_path = out_dir.path().join("copy.bin");

	let description = format!(
		r#"
		[[flow]]
		name = "reader"
		factory = "file_read_flow"
		[flow.params]
		path = "{}"
		mem_size_pertime = "4096"

		[[flow]]
		name = "writer"
		factory = "file_write_flow"
		[flow.params]
		path = "{}"

		[[link]]
		up = "reader"
		down = "writer"
		"#,
		input.path().display(),
		out_path.display(),
	);

	let pipeline = Pipeline::build(&description, builtin_registry()).unwrap();
	assert!(wait_until(Duration::from_secs(5), || {
		std::fs::read(&out_path).map(|data| data.len() == payload.len()).unwrap_or(false)
	}));
	pipeline.stop();
	assert_eq!(std::fs::read(&out_path).unwrap(), payload);
}

#[test]
fn allocation_failure_class_is_transient() {
	// The failure model: an allocation error is something a producer loop
	// swallows, skipping the frame.
	let err = MediaBuffer::alloc(usize::MAX / 4, mediaflow::MemType::Common).unwrap_err();
	assert!(err.is_transient());
}
