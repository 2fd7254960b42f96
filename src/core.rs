//! The CPU core driver: pulls one request at a time out of the top
//! context, answers it, accounts time exactly, and records every
//! observable transition.
//!
//! One call to `execute` is one atomic operation: either the handling of a
//! single time-consuming request, or a timer interrupt, or an idle
//! advance. Requests that cost no time (current-time queries, timer
//! arming) are absorbed into the same step.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::context::Chain;
use crate::error::SimError;
use crate::log::{
    ChainLink, CoreStatsRecord, Event, EventKind, EventSink, SwitchDirection, ThreadRef,
};
use crate::module::Modules;
use crate::request::Request;
use crate::thread::Threads;
use crate::time::Time;
use crate::types::{CoreUid, Relationship, ThreadId};

/// Whether every context may own a timer or only the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Each context may arm an independent timer; preempted chains are
    /// suspended in place and resumed mid-decision.
    Local,
    /// Only the kernel arms timers. Losing the CPU tears the chain down
    /// to the kernel and child schedulers are re-entered from scratch.
    KernelOnly,
}

/// Context-switch cost parameters. Switching within a module costs
/// `thread`, crossing a module boundary costs `module`.
#[derive(Debug, Clone, Copy)]
pub struct SwitchCosts {
    pub thread: Time,
    pub module: Time,
}

impl Default for SwitchCosts {
    fn default() -> SwitchCosts {
        SwitchCosts {
            thread: Time::zero(),
            module: Time::from_units(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoreState {
    Running,
    Finished,
}

/// Mutable per-core state: the live chain and the clock.
struct Status {
    chain: Chain,
    current_time: Time,
    state: CoreState,
}

#[derive(Default)]
struct TimeStats {
    crunch_time: Time,
    idle_time: Time,
    timer_delay: Time,
    module_execution: BTreeMap<String, Time>,
}

#[derive(Default)]
struct CtxSwitchStats {
    thread_time: Time,
    module_time: Time,
}

enum SwitchKind {
    Thread,
    Module,
}

/// A simulated CPU core.
pub struct Core {
    uid: CoreUid,
    timer_mode: TimerMode,
    costs: SwitchCosts,
    status: Status,
    time_stats: TimeStats,
    ctxsw_stats: CtxSwitchStats,
}

impl Core {
    /// Create a core with the kernel scheduler as its chain bottom and
    /// announce the initial chain to the sink.
    pub fn new(
        uid: CoreUid,
        kernel_thread: ThreadId,
        timer_mode: TimerMode,
        costs: SwitchCosts,
        threads: &Threads,
        modules: &Modules,
        sink: &mut dyn EventSink,
    ) -> Result<Core, SimError> {
        let chain = Chain::from_thread(kernel_thread, threads);
        let core = Core {
            uid,
            timer_mode,
            costs,
            status: Status {
                chain,
                current_time: Time::zero(),
                state: CoreState::Running,
            },
            time_stats: TimeStats::default(),
            ctxsw_stats: CtxSwitchStats::default(),
        };
        let summary = core.chain_summary(&core.status.chain, 0, None, threads, modules);
        sink.emit(&core.event(EventKind::Schedule { chain: summary }))?;
        Ok(core)
    }

    pub fn uid(&self) -> CoreUid {
        self.uid
    }

    pub fn current_time(&self) -> Time {
        self.status.current_time
    }

    pub fn is_finished(&self) -> bool {
        self.status.state == CoreState::Finished
    }

    /// Advance by one atomic operation.
    pub fn execute(
        &mut self,
        threads: &mut Threads,
        modules: &Modules,
        sink: &mut dyn EventSink,
    ) -> Result<(), SimError> {
        if self.is_finished() {
            return Ok(());
        }
        if let Some(next_timeout) = self.status.chain.next_timeout() {
            if !next_timeout.is_positive() {
                return self.timer_interrupt(threads, sink);
            }
        }
        loop {
            let now = self.status.current_time;
            let request = self
                .status
                .chain
                .current_context_mut()
                .execute(now, threads)?;
            trace!(core = self.uid.0, request = request.name(), "request");
            if self.handle_request(request, threads, modules, sink)? {
                return Ok(());
            }
        }
    }

    /// Handle one request; `Ok(true)` ends the step.
    fn handle_request(
        &mut self,
        request: Request,
        threads: &mut Threads,
        modules: &Modules,
        sink: &mut dyn EventSink,
    ) -> Result<bool, SimError> {
        match request {
            Request::CurrentTime => Ok(false),
            Request::Timer(timeout) => {
                self.handle_timer(timeout, threads, sink)?;
                Ok(false)
            }
            Request::Execute(amount) => {
                self.handle_execute(amount, threads, sink)?;
                Ok(true)
            }
            Request::Idle => {
                let top = self.status.chain.top_thread();
                sink.emit(&self.event(EventKind::ThreadYield {
                    thread: self.thread_ref(top, threads),
                }))?;
                if self.status.chain.len() == 1 {
                    self.root_idle(threads, sink)?;
                } else {
                    self.switch_to_parent(threads, sink)?;
                }
                Ok(true)
            }
            Request::Resume(sub) => {
                self.handle_resume(sub, threads, modules, sink)?;
                Ok(true)
            }
            Request::Finish => {
                let top = self.status.chain.top_thread();
                if self.status.chain.len() == 1 {
                    return Err(self.malformed(top, threads, "the kernel cannot finish"));
                }
                sink.emit(&self.event(EventKind::ThreadFinish {
                    thread: self.thread_ref(top, threads),
                }))?;
                self.pop_finished(threads, sink)?;
                Ok(true)
            }
        }
    }

    fn handle_timer(
        &mut self,
        timeout: Option<Time>,
        threads: &Threads,
        sink: &mut dyn EventSink,
    ) -> Result<(), SimError> {
        let top = self.status.chain.top_thread();
        if let Some(value) = timeout {
            if !value.is_positive() {
                return Err(self.malformed(top, threads, "timer value must be positive"));
            }
        }
        if self.timer_mode == TimerMode::KernelOnly && self.status.chain.len() > 1 {
            return match timeout {
                // Clearing a timer that cannot exist is a tolerated no-op.
                None => Ok(()),
                Some(_) => {
                    let thread = &threads[top];
                    Err(SimError::ForeignTimer {
                        module: thread.module_name.clone(),
                        tid: thread.tid,
                    })
                }
            };
        }
        self.status.chain.set_top_timer(timeout);
        let ctx_index = self.status.chain.len() - 1;
        sink.emit(&self.event(EventKind::TimerSet { ctx_index, timeout }))?;
        Ok(())
    }

    fn handle_execute(
        &mut self,
        amount: Option<Time>,
        threads: &mut Threads,
        sink: &mut dyn EventSink,
    ) -> Result<(), SimError> {
        let top = self.status.chain.top_thread();
        if let Some(value) = amount {
            if !value.is_positive() {
                return Err(self.malformed(top, threads, "execute amount must be positive"));
            }
        }
        let remaining = threads[top].remaining;
        if remaining == Some(Time::zero()) {
            return Err(self.malformed(top, threads, "execute with no workload left"));
        }

        let budget = [amount, self.status.chain.next_timeout(), remaining]
            .into_iter()
            .flatten()
            .min();
        let Some(delta) = budget else {
            return Err(SimError::Hang);
        };
        debug_assert!(delta.is_positive());

        sink.emit(&self.event(EventKind::ThreadExecute {
            thread: self.thread_ref(top, threads),
            run_time: delta,
        }))?;
        debug!(
            core = self.uid.0,
            thread = %self.thread_ref(top, threads),
            run = %delta,
            "execute"
        );

        self.advance(delta);
        self.time_stats.crunch_time += delta;
        let module_name = threads[top].module_name.clone();
        let slot = self
            .time_stats
            .module_execution
            .entry(module_name)
            .or_insert_with(Time::zero);
        *slot += delta;

        let now = self.status.current_time;
        self.status.chain.run_background(now, delta, threads);
        threads.run_crunch(top, now, delta);

        if threads[top].is_finished() {
            sink.emit(&self.event(EventKind::ThreadFinish {
                thread: self.thread_ref(top, threads),
            }))?;
            self.pop_finished(threads, sink)?;
        }
        Ok(())
    }

    fn handle_resume(
        &mut self,
        sub: Chain,
        threads: &mut Threads,
        modules: &Modules,
        sink: &mut dyn EventSink,
    ) -> Result<(), SimError> {
        let top = self.status.chain.top_thread();
        if sub.is_empty() {
            return Err(self.malformed(top, threads, "resume of an empty chain"));
        }
        let sub = match self.timer_mode {
            TimerMode::Local => sub,
            TimerMode::KernelOnly => {
                // Suspended decisions cannot be resumed without local
                // timers; the dispatched thread restarts from scratch.
                debug_assert_eq!(sub.len(), 1);
                Chain::from_thread(sub.bottom_thread(), threads)
            }
        };

        let bottom_module = threads[sub.bottom_thread()].module;
        let top_module = threads[top].module;
        if bottom_module != top_module && !modules.is_child_of(bottom_module, top_module) {
            return Err(self.malformed(top, threads, "resume into an unrelated module"));
        }

        let to = sub.top_thread();
        let summary = self.chain_summary(&sub, 0, Some(top), threads, modules);
        sink.emit(&self.event(EventKind::Schedule { chain: summary }))?;

        let (cost, kind) = self.switch_cost(top, to, threads);
        sink.emit(&self.event(EventKind::ContextSwitch {
            direction: SwitchDirection::Down,
            to: self.thread_ref(to, threads),
            cost,
        }))?;
        self.charge_switch(cost, kind, threads);
        threads.ctx_switch_out(top);
        threads.ctx_switch_in(to);

        let start = self.status.chain.append_chain(sub)?;
        let now = self.status.current_time;
        let appended: Vec<ThreadId> = self
            .status
            .chain
            .iter_threads()
            .skip(start)
            .collect();
        for thread in appended {
            threads.resume(thread, now, false);
        }
        Ok(())
    }

    /// Pop the finished top context, handing it back to the parent.
    fn pop_finished(
        &mut self,
        threads: &mut Threads,
        sink: &mut dyn EventSink,
    ) -> Result<(), SimError> {
        let from = self.status.chain.top_thread();
        let split_at = self.status.chain.len() - 1;
        let mut tail = self.status.chain.split(split_at)?;
        let now = self.status.current_time;
        tail.suspend(now, threads);
        tail.finish(now, threads);

        let to = self.status.chain.top_thread();
        let (cost, kind) = self.switch_cost(from, to, threads);
        sink.emit(&self.event(EventKind::ContextSwitch {
            direction: SwitchDirection::Up,
            to: self.thread_ref(to, threads),
            cost,
        }))?;
        self.charge_switch(cost, kind, threads);
        threads.ctx_switch_out(from);
        threads.ctx_switch_in(to);

        self.status.chain.current_context_mut().inject_reply(tail);
        threads.resume(to, self.status.current_time, true);
        Ok(())
    }

    /// The top context went idle; return control toward the kernel.
    fn switch_to_parent(
        &mut self,
        threads: &mut Threads,
        sink: &mut dyn EventSink,
    ) -> Result<(), SimError> {
        let from = self.status.chain.top_thread();
        let split_at = match self.timer_mode {
            TimerMode::Local => self.status.chain.len() - 1,
            // Without local timers the whole tail is torn down and every
            // activation above the kernel is finished.
            TimerMode::KernelOnly => 1,
        };
        let mut tail = self.status.chain.split(split_at)?;
        let now = self.status.current_time;
        tail.suspend(now, threads);

        let to = self.status.chain.top_thread();
        let (cost, kind) = self.switch_cost(from, to, threads);
        sink.emit(&self.event(EventKind::ContextSwitch {
            direction: SwitchDirection::Up,
            to: self.thread_ref(to, threads),
            cost,
        }))?;
        self.charge_switch(cost, kind, threads);
        threads.ctx_switch_out(from);
        threads.ctx_switch_in(to);

        let reply = match self.timer_mode {
            TimerMode::Local => tail,
            TimerMode::KernelOnly => {
                let now = self.status.current_time;
                tail.finish(now, threads);
                Chain::from_thread(tail.bottom_thread(), threads)
            }
        };
        self.status.chain.current_context_mut().inject_reply(reply);
        threads.resume(to, self.status.current_time, true);
        Ok(())
    }

    /// The kernel itself idled: advance to the next pending start time or
    /// conclude the simulation.
    fn root_idle(&mut self, threads: &mut Threads, sink: &mut dyn EventSink) -> Result<(), SimError> {
        let now = self.status.current_time;
        if !threads.work_pending() {
            debug!(core = self.uid.0, time = %now, "simulation complete");
            self.status.state = CoreState::Finished;
            return Ok(());
        }
        if let Some(next_timeout) = self.status.chain.next_timeout() {
            // The kernel armed a wake-up timer before idling.
            sink.emit(&self.event(EventKind::CoreIdle {
                until: now + next_timeout,
            }))?;
            self.time_stats.idle_time += next_timeout;
            self.advance(next_timeout);
            return Ok(());
        }
        match threads.next_wake() {
            Some(wake) if wake > now => {
                sink.emit(&self.event(EventKind::CoreIdle { until: wake }))?;
                self.time_stats.idle_time += wake - now;
                self.status.current_time = wake;
                Ok(())
            }
            // Runnable work exists but the kernel idled without a timer.
            _ => Err(SimError::Hang),
        }
    }

    /// A timer reached zero: split the chain above the owning context and
    /// hand control back to it.
    fn timer_interrupt(
        &mut self,
        threads: &mut Threads,
        sink: &mut dyn EventSink,
    ) -> Result<(), SimError> {
        let Some(idx) = self.status.chain.find_elapsed_timer() else {
            return Ok(());
        };
        let overshoot = self
            .status
            .chain
            .next_timeout()
            .map_or_else(Time::zero, |t| -t);
        sink.emit(&self.event(EventKind::TimerElapsed {
            ctx_index: idx,
            delay: overshoot,
        }))?;
        self.time_stats.timer_delay += overshoot;
        debug!(core = self.uid.0, ctx_index = idx, "timer elapsed");

        if self.status.chain.len() > 1 && idx < self.status.chain.len() - 1 {
            let from = self.status.chain.top_thread();
            let mut tail = self.status.chain.split(idx + 1)?;
            let now = self.status.current_time;
            tail.suspend(now, threads);

            let to = self.status.chain.top_thread();
            let (cost, kind) = self.switch_cost(from, to, threads);
            sink.emit(&self.event(EventKind::ContextSwitch {
                direction: SwitchDirection::Up,
                to: self.thread_ref(to, threads),
                cost,
            }))?;
            self.charge_switch(cost, kind, threads);
            self.time_stats.timer_delay += cost;
            threads.ctx_switch_out(from);
            threads.ctx_switch_in(to);

            match self.timer_mode {
                TimerMode::Local => {
                    self.status.chain.current_context_mut().inject_reply(tail);
                    threads.resume(to, self.status.current_time, true);
                }
                TimerMode::KernelOnly => {
                    debug_assert_eq!(idx, 0, "only the kernel may own a timer");
                    let now = self.status.current_time;
                    tail.finish(now, threads);
                }
            }
        }
        self.status.chain.set_top_timer(None);

        if self.timer_mode == TimerMode::KernelOnly {
            // The kernel scheduler is re-entered from scratch.
            let now = self.status.current_time;
            self.status
                .chain
                .current_context_mut()
                .restart(now, threads);
        }
        Ok(())
    }

    fn advance(&mut self, delta: Time) {
        self.status.current_time += delta;
        self.status.chain.elapse(delta);
    }

    fn charge_switch(&mut self, cost: Time, kind: SwitchKind, threads: &mut Threads) {
        if cost.is_zero() {
            return;
        }
        match kind {
            SwitchKind::Thread => self.ctxsw_stats.thread_time += cost,
            SwitchKind::Module => self.ctxsw_stats.module_time += cost,
        }
        self.advance(cost);
        let now = self.status.current_time;
        self.status.chain.run_background(now, cost, threads);
    }

    fn switch_cost(&self, from: ThreadId, to: ThreadId, threads: &Threads) -> (Time, SwitchKind) {
        if threads[from].module == threads[to].module {
            (self.costs.thread, SwitchKind::Thread)
        } else {
            (self.costs.module, SwitchKind::Module)
        }
    }

    fn chain_summary(
        &self,
        chain: &Chain,
        from_idx: usize,
        below: Option<ThreadId>,
        threads: &Threads,
        modules: &Modules,
    ) -> Vec<ChainLink> {
        let mut summary = Vec::new();
        let mut prev = below;
        for thread in chain.iter_threads().skip(from_idx) {
            let relationship = match prev {
                None => Relationship::Child,
                Some(prev_thread) => {
                    if threads[prev_thread].module == threads[thread].module {
                        Relationship::Sibling
                    } else {
                        debug_assert!(modules
                            .is_child_of(threads[thread].module, threads[prev_thread].module));
                        Relationship::Child
                    }
                }
            };
            summary.push(ChainLink {
                thread: self.thread_ref(thread, threads),
                relationship,
            });
            prev = Some(thread);
        }
        summary
    }

    fn thread_ref(&self, thread: ThreadId, threads: &Threads) -> ThreadRef {
        let t = &threads[thread];
        ThreadRef {
            module: t.module_name.clone(),
            tid: t.tid,
        }
    }

    fn malformed(&self, thread: ThreadId, threads: &Threads, reason: &str) -> SimError {
        let t = &threads[thread];
        SimError::MalformedRequest {
            module: t.module_name.clone(),
            tid: t.tid,
            reason: reason.to_string(),
        }
    }

    fn event(&self, kind: EventKind) -> Event {
        Event {
            core: self.uid,
            time: self.status.current_time,
            kind,
        }
    }

    /// Counters for the final statistics flush.
    pub fn statistics(&self) -> CoreStatsRecord {
        CoreStatsRecord {
            total_time: self.status.current_time,
            crunch_time: self.time_stats.crunch_time,
            idle_time: self.time_stats.idle_time,
            timer_delay: self.time_stats.timer_delay,
            thread_switch_time: self.ctxsw_stats.thread_time,
            module_switch_time: self.ctxsw_stats.module_time,
            module_execution: self.time_stats.module_execution.clone(),
        }
    }
}
