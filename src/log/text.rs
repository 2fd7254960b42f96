//! Human-readable rendering of the event stream.

use std::io::{self, Write};


use crate::log::{ChainTracker, Event, EventKind, EventSink, SwitchDirection, ThreadRef};
use crate::time::Time;

/// Column padding for the per-event prefix.
#[derive(Debug, Clone, Copy)]
pub struct TextAlign {
    pub cpu: usize,
    pub time: usize,
    pub module: usize,
    pub thread: usize,
}

impl Default for TextAlign {
    fn default() -> TextAlign {
        TextAlign {
            cpu: 1,
            time: 3,
            module: 7,
            thread: 1,
        }
    }
}

/// Writes one line per event, in simulation order.
pub struct TextLog<W: Write> {
    out: W,
    align: TextAlign,
    precision: usize,
    tracker: ChainTracker,
}

impl<W: Write> TextLog<W> {
    pub fn new(out: W, align: TextAlign, precision: usize) -> TextLog<W> {
        TextLog {
            out,
            align,
            precision,
            tracker: ChainTracker::new(),
        }
    }

    fn timespan(&self, span: Time) -> String {
        let rendered = span.format_decimal(self.precision);
        let plural = if span == Time::from_units(1) { "" } else { "s" };
        format!("{rendered} unit{plural}")
    }

    fn prefix(&self, event: &Event) -> String {
        format!(
            "cpu {:>cpu$} @ {:>time$}: ",
            event.core.0,
            event.time.format_decimal(self.precision),
            cpu = self.align.cpu,
            time = self.align.time + self.precision + 1,
        )
    }

    fn thread_prefix(&self, event: &Event, thread: &ThreadRef) -> String {
        let width = (self.align.module + self.align.thread).saturating_sub(thread.module.len());
        format!(
            "{}thread {}-{:<width$} ",
            self.prefix(event),
            thread.module,
            thread.tid,
        )
    }

    fn module_prefix(&self, event: &Event, module: &str) -> String {
        let width = self.align.module + self.align.thread + 1;
        format!("{}module {:<width$} ", self.prefix(event), module)
    }

    fn top_module(&self, event: &Event) -> String {
        self.tracker
            .top(event.core)
            .map(|t| t.module.clone())
            .unwrap_or_default()
    }

    fn module_at(&self, event: &Event, idx: usize) -> String {
        self.tracker
            .at(event.core, idx)
            .map(|t| t.module.clone())
            .unwrap_or_default()
    }
}

impl<W: Write> EventSink for TextLog<W> {
    fn emit(&mut self, event: &Event) -> io::Result<()> {
        match &event.kind {
            EventKind::Schedule { chain } => {
                // A dispatch within the same module reads as a selection.
                if let Some(first) = chain.first() {
                    let current = self.top_module(event);
                    if first.thread.module == current && !current.is_empty() {
                        writeln!(
                            self.out,
                            "{}selects {}.",
                            self.module_prefix(event, &current),
                            first.thread.tid
                        )?;
                    }
                }
            }
            EventKind::ContextSwitch { direction, to, cost } => {
                if !cost.is_zero() {
                    let module = self.top_module(event);
                    let verb = match direction {
                        SwitchDirection::Down => "switch to",
                        SwitchDirection::Up => "switch back to",
                    };
                    writeln!(
                        self.out,
                        "{}spends {} to {} {}.",
                        self.module_prefix(event, &module),
                        self.timespan(*cost),
                        verb,
                        to.module
                    )?;
                }
            }
            EventKind::ThreadExecute { thread, run_time } => {
                writeln!(
                    self.out,
                    "{}runs for {}.",
                    self.thread_prefix(event, thread),
                    self.timespan(*run_time)
                )?;
            }
            EventKind::ThreadYield { thread } => {
                writeln!(self.out, "{}yields.", self.thread_prefix(event, thread))?;
            }
            EventKind::ThreadFinish { thread } => {
                writeln!(self.out, "{}finishes.", self.thread_prefix(event, thread))?;
            }
            EventKind::TimerSet { ctx_index, timeout } => {
                let module = self.module_at(event, *ctx_index);
                match timeout {
                    Some(timeout) => writeln!(
                        self.out,
                        "{}arms a timer for {}.",
                        self.module_prefix(event, &module),
                        self.timespan(*timeout)
                    )?,
                    None => writeln!(
                        self.out,
                        "{}clears its timer.",
                        self.module_prefix(event, &module)
                    )?,
                }
            }
            EventKind::TimerElapsed { ctx_index, delay } => {
                let module = self.module_at(event, *ctx_index);
                let mut line = format!("{}timer elapsed", self.module_prefix(event, &module));
                if !delay.is_zero() {
                    line.push_str(&format!(" ({} delay)", self.timespan(*delay)));
                }
                writeln!(self.out, "{line}.")?;
            }
            EventKind::CoreIdle { until } => {
                writeln!(
                    self.out,
                    "{}idle for {}.",
                    self.prefix(event),
                    self.timespan(*until - event.time)
                )?;
            }
            EventKind::ThreadStatistics { thread, stats } => {
                let rendered = serde_json::to_string_pretty(stats)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                writeln!(self.out, "Thread {thread} stats:\n{rendered}")?;
            }
            EventKind::CoreStatistics { stats } => {
                let rendered = serde_json::to_string_pretty(stats)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                writeln!(self.out, "Core {} stats:\n{rendered}", event.core.0)?;
            }
            EventKind::CoreFailure { reason } => {
                writeln!(self.out, "{}FAILED: {reason}", self.prefix(event))?;
            }
        }
        self.tracker.apply(event);
        Ok(())
    }
}
