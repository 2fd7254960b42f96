//! The event stream: typed events emitted at every observable transition,
//! a sink trait the backends implement, and a synchronous fan-out.
//!
//! Events are self-contained: together with the `Schedule` chain summaries
//! and the `to` field of upward context switches, a consumer can rebuild
//! the scheduling chain of every core from the stream alone. That is what
//! makes binary-log replay equivalent to watching the live simulation.

mod binary;
mod gantt;
mod text;

pub use binary::{replay, BinaryLog};
pub use gantt::GanttLog;
pub use text::{TextAlign, TextLog};

use std::collections::BTreeMap;
use std::io;

use serde::{Deserialize, Serialize};

use crate::time::Time;
use crate::types::{CoreUid, Relationship};

/// A thread named by its module and per-module id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRef {
    pub module: String,
    pub tid: u32,
}

impl std::fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.module, self.tid)
    }
}

/// One entry of a chain summary, bottom to top. `relationship` compares
/// against the previous entry (the chain below for the first one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    pub thread: ThreadRef,
    pub relationship: Relationship,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchDirection {
    /// Control descends into a freshly appended chain.
    Down,
    /// Control returns toward the kernel after a split.
    Up,
}

/// Per-thread counters as flushed at end of simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadStatsRecord {
    pub execution_time: Time,
    /// `(start, duration)` of every completed burst.
    pub run: Vec<(Time, Time)>,
    pub wait: Vec<Time>,
    pub bg: Vec<Time>,
    pub ctx_switch_in: u64,
    pub ctx_switch_out: u64,
    pub finished_time: Option<Time>,
    pub remaining: Option<Time>,
}

/// Per-core counters as flushed at end of simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreStatsRecord {
    pub total_time: Time,
    pub crunch_time: Time,
    pub idle_time: Time,
    pub timer_delay: Time,
    pub thread_switch_time: Time,
    pub module_switch_time: Time,
    /// Execution time by module name.
    pub module_execution: BTreeMap<String, Time>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A chain (or chain suffix) was placed on the core: the initial chain
    /// at core creation, or the appended part on every dispatch down.
    Schedule { chain: Vec<ChainLink> },
    ContextSwitch {
        direction: SwitchDirection,
        /// The context that holds the CPU after the switch.
        to: ThreadRef,
        cost: Time,
    },
    ThreadExecute { thread: ThreadRef, run_time: Time },
    ThreadYield { thread: ThreadRef },
    ThreadFinish { thread: ThreadRef },
    TimerSet {
        ctx_index: usize,
        timeout: Option<Time>,
    },
    TimerElapsed { ctx_index: usize, delay: Time },
    CoreIdle { until: Time },
    ThreadStatistics {
        thread: ThreadRef,
        stats: ThreadStatsRecord,
    },
    CoreStatistics { stats: CoreStatsRecord },
    CoreFailure { reason: String },
}

/// One observable transition of a core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub core: CoreUid,
    pub time: Time,
    pub kind: EventKind,
}

/// Consumes the event stream. Implementations must not reorder events.
pub trait EventSink {
    fn emit(&mut self, event: &Event) -> io::Result<()>;
}

/// Forwards every event to several sinks, in order.
pub struct Multiplexer {
    sinks: Vec<Box<dyn EventSink>>,
}

impl Multiplexer {
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Multiplexer {
        Multiplexer { sinks }
    }
}

impl EventSink for Multiplexer {
    fn emit(&mut self, event: &Event) -> io::Result<()> {
        for sink in &mut self.sinks {
            sink.emit(event)?;
        }
        Ok(())
    }
}

/// Collects events in memory, with a few queries for tests and tools.
#[derive(Default)]
pub struct Recorder {
    events: Vec<Event>,
}

impl Recorder {
    pub fn new() -> Recorder {
        Recorder::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Total time a thread spent executing, summed over the stream.
    pub fn total_runtime(&self, thread: &ThreadRef) -> Time {
        self.events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::ThreadExecute { thread: t, run_time } if t == thread => Some(*run_time),
                _ => None,
            })
            .sum()
    }

    /// How often a thread received an execution burst.
    pub fn execute_count(&self, thread: &ThreadRef) -> usize {
        self.events
            .iter()
            .filter(|e| {
                matches!(&e.kind, EventKind::ThreadExecute { thread: t, .. } if t == thread)
            })
            .count()
    }
}

impl EventSink for Recorder {
    fn emit(&mut self, event: &Event) -> io::Result<()> {
        self.events.push(event.clone());
        Ok(())
    }
}

/// Rebuilds each core's scheduling chain from the event stream.
///
/// Rules: `Schedule` appends its links; an upward `ContextSwitch` pops
/// until its `to` thread is on top. Nothing else moves the chain.
#[derive(Default)]
pub struct ChainTracker {
    chains: BTreeMap<CoreUid, Vec<ChainLink>>,
}

impl ChainTracker {
    pub fn new() -> ChainTracker {
        ChainTracker::default()
    }

    pub fn apply(&mut self, event: &Event) {
        match &event.kind {
            EventKind::Schedule { chain } => {
                self.chains
                    .entry(event.core)
                    .or_default()
                    .extend(chain.iter().cloned());
            }
            EventKind::ContextSwitch {
                direction: SwitchDirection::Up,
                to,
                ..
            } => {
                if let Some(chain) = self.chains.get_mut(&event.core) {
                    while chain.len() > 1 && chain.last().map(|l| &l.thread) != Some(to) {
                        chain.pop();
                    }
                }
            }
            _ => {}
        }
    }

    pub fn chain(&self, core: CoreUid) -> &[ChainLink] {
        self.chains.get(&core).map_or(&[], |c| c.as_slice())
    }

    pub fn top(&self, core: CoreUid) -> Option<&ThreadRef> {
        self.chain(core).last().map(|l| &l.thread)
    }

    pub fn at(&self, core: CoreUid, idx: usize) -> Option<&ThreadRef> {
        self.chain(core).get(idx).map(|l| &l.thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread(module: &str, tid: u32) -> ThreadRef {
        ThreadRef {
            module: module.to_string(),
            tid,
        }
    }

    fn link(module: &str, tid: u32, rel: Relationship) -> ChainLink {
        ChainLink {
            thread: thread(module, tid),
            relationship: rel,
        }
    }

    #[test]
    fn tracker_follows_schedule_and_unwind() {
        let core = CoreUid(0);
        let mut tracker = ChainTracker::new();

        tracker.apply(&Event {
            core,
            time: Time::zero(),
            kind: EventKind::Schedule {
                chain: vec![link("0", 0, Relationship::Child)],
            },
        });
        tracker.apply(&Event {
            core,
            time: Time::zero(),
            kind: EventKind::Schedule {
                chain: vec![
                    link("0", 1, Relationship::Sibling),
                    link("0.0", 0, Relationship::Child),
                ],
            },
        });
        assert_eq!(tracker.chain(core).len(), 3);
        assert_eq!(tracker.top(core), Some(&thread("0.0", 0)));

        tracker.apply(&Event {
            core,
            time: Time::from_units(5),
            kind: EventKind::ContextSwitch {
                direction: SwitchDirection::Up,
                to: thread("0", 0),
                cost: Time::from_units(1),
            },
        });
        assert_eq!(tracker.chain(core).len(), 1);
        assert_eq!(tracker.top(core), Some(&thread("0", 0)));
    }
}
