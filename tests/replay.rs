//! Determinism and binary-log round-trip properties.

mod common;

use common::{units, SharedRecorder};

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use schedsi::{
    replay, BinaryLog, EventSink, HierarchyBuilder, RoundRobin, Sjf, TextAlign, TextLog, Time,
    TimerMode, World, WorldConfig,
};

/// A byte buffer that can be read back after the world consumed the sink.
#[derive(Clone, Default)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    fn bytes(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A two-level hierarchy exercising timers, module switches, idling and
/// finishes.
fn run_workload(sink: Box<dyn EventSink>) -> Time {
    let mut hb = HierarchyBuilder::new();
    let kernel = hb.kernel("0", Box::new(RoundRobin::new(Some(units(10)))));
    hb.worker(kernel, Time::zero(), Some(units(15)));
    let child = hb.module(kernel, None, Box::new(Sjf::new()));
    hb.worker(child, Time::zero(), Some(units(8)));
    hb.worker(child, units(12), Some(units(4)));

    let config = WorldConfig {
        timer_mode: TimerMode::Local,
        ..WorldConfig::default()
    };
    let mut world = World::new(hb.build(), config, sink).unwrap();
    let end = world.run_until(units(400)).unwrap();
    world.log_statistics().unwrap();
    end
}

#[test]
fn identical_inputs_give_byte_identical_logs() {
    let first = SharedBuffer::default();
    let second = SharedBuffer::default();

    run_workload(Box::new(BinaryLog::new(first.clone())));
    run_workload(Box::new(BinaryLog::new(second.clone())));

    assert!(!first.bytes().is_empty());
    assert_eq!(first.bytes(), second.bytes());
}

#[test]
fn replaying_a_log_reproduces_the_event_stream() {
    let buffer = SharedBuffer::default();
    let live = SharedRecorder::new();
    let sinks: Vec<Box<dyn EventSink>> = vec![
        Box::new(BinaryLog::new(buffer.clone())),
        Box::new(live.clone()),
    ];
    run_workload(Box::new(schedsi::Multiplexer::new(sinks)));

    let replayed = SharedRecorder::new();
    let mut target = replayed.clone();
    let count = replay(buffer.bytes().as_slice(), &mut target).unwrap();

    assert_eq!(count as usize, live.events().len());
    assert_eq!(replayed.events(), live.events());
}

#[test]
fn replaying_into_a_binary_log_is_identity() {
    let buffer = SharedBuffer::default();
    run_workload(Box::new(BinaryLog::new(buffer.clone())));
    let original = buffer.bytes();

    let copy = SharedBuffer::default();
    let mut rewriter = BinaryLog::new(copy.clone());
    replay(original.as_slice(), &mut rewriter).unwrap();

    assert_eq!(original, copy.bytes());
}

#[test]
fn text_rendering_from_live_and_replayed_streams_matches() {
    let buffer = SharedBuffer::default();
    let live_text = SharedBuffer::default();
    let sinks: Vec<Box<dyn EventSink>> = vec![
        Box::new(BinaryLog::new(buffer.clone())),
        Box::new(TextLog::new(live_text.clone(), TextAlign::default(), 2)),
    ];
    run_workload(Box::new(schedsi::Multiplexer::new(sinks)));

    let replayed_text = SharedBuffer::default();
    let mut sink = TextLog::new(replayed_text.clone(), TextAlign::default(), 2);
    replay(buffer.bytes().as_slice(), &mut sink).unwrap();

    assert!(!live_text.bytes().is_empty());
    assert_eq!(live_text.bytes(), replayed_text.bytes());
}
