#![allow(dead_code)]

//! Shared helpers for the scenario tests: a recorder that can be inspected
//! after the world consumed it, and event-stream query shorthands.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use schedsi::{Event, EventKind, EventSink, Recorder, ThreadRef, Time};

/// A recorder handle that survives handing the sink to the world.
#[derive(Clone, Default)]
pub struct SharedRecorder(Rc<RefCell<Recorder>>);

impl SharedRecorder {
    pub fn new() -> SharedRecorder {
        SharedRecorder::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().events().to_vec()
    }

    pub fn total_runtime(&self, thread: &ThreadRef) -> Time {
        self.0.borrow().total_runtime(thread)
    }
}

impl EventSink for SharedRecorder {
    fn emit(&mut self, event: &Event) -> io::Result<()> {
        self.0.borrow_mut().emit(event)
    }
}

pub fn thread(module: &str, tid: u32) -> ThreadRef {
    ThreadRef {
        module: module.to_string(),
        tid,
    }
}

/// `(time, thread, run_time)` of every execution burst, in order.
pub fn executions(events: &[Event]) -> Vec<(Time, ThreadRef, Time)> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::ThreadExecute { thread, run_time } => {
                Some((e.time, thread.clone(), *run_time))
            }
            _ => None,
        })
        .collect()
}

/// `(time, thread)` of every finish, in order.
pub fn finishes(events: &[Event]) -> Vec<(Time, ThreadRef)> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::ThreadFinish { thread } => Some((e.time, thread.clone())),
            _ => None,
        })
        .collect()
}

pub fn units(n: i64) -> Time {
    Time::from_units(n)
}
