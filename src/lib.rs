//! schedsi - Discrete-event simulator for hierarchical thread scheduling.
//!
//! A tree of modules, each with its own scheduler and threads, shares one
//! simulated CPU. The core drives suspendable computations one request at
//! a time, maintains the chain of nested scheduler and thread activations,
//! enforces nested timers, and emits a deterministic event stream that
//! text, binary and SVG backends consume.
//!
//! # Architecture
//!
//! - **Core**: request-driven step loop over the context chain
//! - **Chain**: stack of activations with an aggregate next-timeout cache
//! - **Threads**: workers, periodic workers, scheduler trampolines, VCPUs
//! - **Schedulers**: FCFS, SJF, round-robin, MLFQ, CFS, plus addons
//! - **Log**: typed event stream with text/binary/SVG sinks and replay
//!
//! # Usage
//!
//! ```rust,no_run
//! use schedsi::{
//!     HierarchyBuilder, Recorder, RoundRobin, Time, World, WorldConfig,
//! };
//!
//! let mut hb = HierarchyBuilder::new();
//! let kernel = hb.kernel("0", Box::new(RoundRobin::new(Some(Time::from_units(10)))));
//! hb.worker(kernel, Time::zero(), Some(Time::from_units(50)));
//!
//! let mut world = World::new(
//!     hb.build(),
//!     WorldConfig::default(),
//!     Box::new(Recorder::new()),
//! )
//! .unwrap();
//! world.run_until(Time::from_units(400)).unwrap();
//! ```

pub mod context;
pub mod core;
pub mod error;
pub mod hierarchy;
pub mod log;
pub mod module;
pub mod request;
pub mod sched;
pub mod thread;
pub mod time;
pub mod types;
pub mod world;

pub use crate::core::{Core, SwitchCosts, TimerMode};
pub use crate::error::SimError;
pub use crate::hierarchy::{Hierarchy, HierarchyBuilder};
pub use crate::log::{
    replay, BinaryLog, ChainLink, ChainTracker, CoreStatsRecord, Event, EventKind, EventSink,
    GanttLog, Multiplexer, Recorder, SwitchDirection, TextAlign, TextLog, ThreadRef,
    ThreadStatsRecord,
};
pub use crate::request::Request;
pub use crate::sched::{
    Addon, AddonScheduler, AddonVerdict, Cfs, Decision, Fcfs, Mlfq, Penalizer, RoundRobin,
    Scheduler, Sjf, TimeSliceFixer,
};
pub use crate::thread::{Thread, ThreadKind, Threads};
pub use crate::time::Time;
pub use crate::types::{CoreUid, ModuleId, Relationship, ThreadId};
pub use crate::world::{World, WorldConfig};
