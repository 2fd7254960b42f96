//! Thread model: identity, workload state, statistics, and the computation
//! state machines the core drives.
//!
//! The four thread kinds mirror the roles on a scheduling chain: plain
//! workers crunch their remaining workload, periodic workers crunch in
//! bursts, scheduler threads trampoline into their module's scheduler, and
//! VCPU threads proxy a child module's scheduler thread from the parent's
//! point of view.

use std::ops::{Index, IndexMut};

use crate::context::{Chain, Execution, Reply};
use crate::error::SimError;
use crate::request::Request;
use crate::sched::{Decision, Scheduler};
use crate::time::Time;
use crate::types::{ModuleId, ThreadId};

/// One recorded burst of execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSample {
    pub start: Time,
    pub duration: Time,
}

/// Per-thread counters, all in exact simulated time.
#[derive(Debug, Clone, Default)]
pub struct ThreadStats {
    /// Completed execution bursts.
    pub run: Vec<RunSample>,
    /// Time spent ready but not running, sampled at each dispatch.
    pub wait: Vec<Time>,
    /// Background time while on a chain below the top (scheduler and VCPU
    /// threads only).
    pub bg: Vec<Time>,
    pub ctx_switch_in: u64,
    pub ctx_switch_out: u64,
    pub finished_time: Option<Time>,
}

impl ThreadStats {
    /// Total time this thread has executed.
    pub fn execution_time(&self) -> Time {
        self.run.iter().map(|s| s.duration).sum()
    }
}

/// What a thread does when it executes.
pub enum ThreadKind {
    /// Crunches its remaining workload.
    Worker,
    /// Needs `burst` units of CPU every `period`, starting at `origin`.
    Periodic {
        period: Time,
        burst: Time,
        origin: Time,
    },
    /// Runs its module's scheduler. The box is taken out while the
    /// scheduler makes a decision so the decision can inspect the arena.
    Scheduler {
        scheduler: Option<Box<dyn Scheduler>>,
        bg_since_pick: Time,
    },
    /// Parent-side proxy for a child module's scheduler thread. Owns the
    /// child sub-chain between activations.
    Vcpu {
        child: ThreadId,
        chain: Option<Chain>,
    },
}

/// A simulated thread.
pub struct Thread {
    pub module: ModuleId,
    pub module_name: String,
    pub tid: u32,
    /// When the thread is next ready to run; `None` once finished for good.
    pub ready_time: Option<Time>,
    /// Workload left; `None` is an endless thread, `Some(0)` is finished.
    pub remaining: Option<Time>,
    /// Live on some chain right now. A thread may appear on at most one.
    pub active: bool,
    pub stats: ThreadStats,
    pub kind: ThreadKind,
}

impl Thread {
    pub fn new(
        module: ModuleId,
        module_name: String,
        tid: u32,
        start_time: Time,
        remaining: Option<Time>,
        kind: ThreadKind,
    ) -> Thread {
        Thread {
            module,
            module_name,
            tid,
            ready_time: Some(start_time),
            remaining,
            active: false,
            stats: ThreadStats::default(),
            kind,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.remaining == Some(Time::zero())
    }

    /// Ready to run: has work, its start time has come, and it is not
    /// already live on a chain elsewhere.
    pub fn is_ready(&self, now: Time) -> bool {
        !self.is_finished()
            && !self.active
            && self.ready_time.map_or(false, |rt| rt <= now)
    }

    fn touch_ready(&mut self, now: Time) {
        if let Some(rt) = self.ready_time {
            debug_assert!(rt <= now, "thread resumed before its ready time");
            self.ready_time = Some(now);
        }
    }

    /// Mark the workload complete.
    fn end(&mut self, now: Time) {
        self.remaining = Some(Time::zero());
        self.stats.finished_time = Some(now);
        self.ready_time = None;
    }
}

/// Arena of all threads in a world.
///
/// Thread lifecycle transitions live here rather than on `Thread` because
/// some of them read a second entry (a VCPU mirrors its child's state).
#[derive(Default)]
pub struct Threads {
    entries: Vec<Thread>,
}

impl Threads {
    pub fn add(&mut self, thread: Thread) -> ThreadId {
        let id = ThreadId(self.entries.len());
        self.entries.push(thread);
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ThreadId, &Thread)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, t)| (ThreadId(i), t))
    }

    /// Account an execution burst to the (top) thread.
    pub fn run_crunch(&mut self, id: ThreadId, now: Time, delta: Time) {
        let thread = &mut self.entries[id.0];
        thread.stats.run.push(RunSample {
            start: now - delta,
            duration: delta,
        });
        thread.ready_time = Some(now);
        if let Some(remaining) = thread.remaining {
            debug_assert!(remaining >= delta, "thread ran past its workload");
            thread.remaining = Some(remaining - delta);
            if thread.is_finished() {
                thread.end(now);
                return;
            }
        }
        // A periodic worker becomes ready again at its next burst.
        if let ThreadKind::Periodic {
            period,
            burst,
            origin,
        } = thread.kind
        {
            let done = thread.stats.execution_time() / burst;
            let ideal = Time::from_units(ideal_activations(now, origin, period));
            if done == ideal {
                thread.ready_time = Some(origin + done * period);
            }
        }
    }

    /// Account background time to a thread sitting below the top.
    pub fn run_background(&mut self, id: ThreadId, now: Time, delta: Time) {
        let thread = &mut self.entries[id.0];
        debug_assert!(
            matches!(
                thread.kind,
                ThreadKind::Scheduler { .. } | ThreadKind::Vcpu { .. }
            ),
            "worker threads never run in the background"
        );
        thread.stats.bg.push(delta);
        thread.touch_ready(now);
        if let ThreadKind::Scheduler { bg_since_pick, .. } = &mut thread.kind {
            *bg_since_pick += delta;
        }
    }

    /// The thread leaves the live chain but may be resumed later.
    pub fn suspend(&mut self, id: ThreadId, now: Time) {
        let thread = &mut self.entries[id.0];
        if thread.active {
            if let Some(rt) = thread.ready_time {
                thread.ready_time = Some(rt.max(now));
            }
        }
        // A VCPU advertises its child scheduler's state to the parent.
        if let ThreadKind::Vcpu { child, .. } = self.entries[id.0].kind {
            let (ready_time, remaining) = {
                let c = &self.entries[child.0];
                (c.ready_time, c.remaining)
            };
            let thread = &mut self.entries[id.0];
            thread.ready_time = ready_time;
            thread.remaining = remaining;
            if remaining == Some(Time::zero()) && thread.stats.finished_time.is_none() {
                thread.stats.finished_time = Some(now);
            }
        }
    }

    /// The thread (re)gains the top of a chain. `returning` distinguishes
    /// control flowing back up from a fresh dispatch down.
    pub fn resume(&mut self, id: ThreadId, now: Time, returning: bool) {
        let thread = &mut self.entries[id.0];
        if thread.is_finished() {
            return;
        }
        if returning {
            thread.touch_ready(now);
        } else if let Some(rt) = thread.ready_time {
            if rt <= now {
                thread.stats.wait.push(now - rt);
                thread.ready_time = Some(now);
            }
        }
    }

    /// The thread's activation ends (restartable unless its workload is
    /// done).
    pub fn finish(&mut self, id: ThreadId, _now: Time) {
        self.entries[id.0].active = false;
    }

    pub fn ctx_switch_in(&mut self, id: ThreadId) {
        self.entries[id.0].stats.ctx_switch_in += 1;
    }

    pub fn ctx_switch_out(&mut self, id: ThreadId) {
        self.entries[id.0].stats.ctx_switch_out += 1;
    }

    /// Next instant any workload thread becomes ready, if one is pending.
    /// Scheduler and VCPU threads derive their readiness from these.
    pub fn next_wake(&self) -> Option<Time> {
        self.entries
            .iter()
            .filter(|t| {
                matches!(t.kind, ThreadKind::Worker | ThreadKind::Periodic { .. })
                    && !t.is_finished()
            })
            .filter_map(|t| t.ready_time)
            .min()
    }

    /// Whether any workload thread still has work, now or in the future.
    pub fn work_pending(&self) -> bool {
        self.entries.iter().any(|t| {
            matches!(t.kind, ThreadKind::Worker | ThreadKind::Periodic { .. })
                && !t.is_finished()
                && t.ready_time.is_some()
        })
    }
}

impl Index<ThreadId> for Threads {
    type Output = Thread;
    fn index(&self, id: ThreadId) -> &Thread {
        &self.entries[id.0]
    }
}

impl IndexMut<ThreadId> for Threads {
    fn index_mut(&mut self, id: ThreadId) -> &mut Thread {
        &mut self.entries[id.0]
    }
}

fn ideal_activations(now: Time, origin: Time, period: Time) -> i64 {
    (now - origin).div_floor(period) + 1
}

/// Build the computation for a thread according to its kind.
pub fn execution_for(id: ThreadId, thread: &Thread) -> Box<dyn Execution> {
    match thread.kind {
        ThreadKind::Worker => Box::new(WorkerExecution { tid: id }),
        ThreadKind::Periodic { .. } => Box::new(PeriodicExecution { tid: id }),
        ThreadKind::Scheduler { .. } => Box::new(SchedulerExecution {
            tid: id,
            state: SchedState::Pick,
        }),
        ThreadKind::Vcpu { child, .. } => Box::new(VcpuExecution {
            tid: id,
            child,
            state: VcpuState::Enter,
        }),
    }
}

fn protocol_violation(thread: &Thread) -> SimError {
    SimError::ProtocolViolation {
        module: thread.module_name.clone(),
        tid: thread.tid,
    }
}

/// A worker crunches until its workload is gone.
struct WorkerExecution {
    tid: ThreadId,
}

impl Execution for WorkerExecution {
    fn resume(&mut self, input: Reply, threads: &mut Threads) -> Result<Request, SimError> {
        let Reply::Time(now) = input else {
            return Err(protocol_violation(&threads[self.tid]));
        };
        let thread = &mut threads[self.tid];
        if thread.is_finished() {
            return Ok(Request::Finish);
        }
        thread.touch_ready(now);
        Ok(Request::Execute(thread.remaining))
    }
}

/// A periodic worker runs in bursts: `burst` units of work become due every
/// `period`, and it idles once it has caught up with the ideal schedule.
struct PeriodicExecution {
    tid: ThreadId,
}

impl Execution for PeriodicExecution {
    fn resume(&mut self, input: Reply, threads: &mut Threads) -> Result<Request, SimError> {
        let Reply::Time(now) = input else {
            return Err(protocol_violation(&threads[self.tid]));
        };
        let thread = &threads[self.tid];
        if thread.is_finished() {
            return Ok(Request::Finish);
        }
        let ThreadKind::Periodic {
            period,
            burst,
            origin,
        } = thread.kind
        else {
            return Err(protocol_violation(thread));
        };
        let total = thread.stats.execution_time();

        let ideal_at = |delta: Time| Time::from_units(ideal_activations(now + delta, origin, period)) * burst;
        let mut ideal_run = ideal_at(Time::zero());
        if total > ideal_run {
            return Err(SimError::MalformedRequest {
                module: thread.module_name.clone(),
                tid: thread.tid,
                reason: "periodic thread ran past its burst quota".to_string(),
            });
        }
        // Grow the quota until the ideal schedule stops moving: running for
        // the quota may itself make further activations due.
        let mut quota = Time::zero();
        while total + quota < ideal_run {
            quota = ideal_run - total;
            ideal_run = ideal_at(quota);
        }
        if quota.is_zero() {
            return Ok(Request::Idle);
        }
        if let Some(remaining) = thread.remaining {
            quota = quota.min(remaining);
        }
        threads[self.tid].touch_ready(now);
        Ok(Request::Execute(Some(quota)))
    }
}

/// Protocol phases of a scheduler thread's trampoline.
enum SchedState {
    /// Ask the scheduler for a decision.
    Pick,
    /// Timer request is out; hand over the picked chain next.
    ArmedRun { chain: Chain },
    /// The picked chain is running; expect it back as a reply.
    AwaitReturn,
}

/// Drives a module's scheduler: emits the timer for the chosen time-slice,
/// resumes the chosen chain, and feeds the returned chain back into the
/// scheduler's queues.
struct SchedulerExecution {
    tid: ThreadId,
    state: SchedState,
}

impl SchedulerExecution {
    fn take_scheduler(&self, threads: &mut Threads) -> Result<Box<dyn Scheduler>, SimError> {
        let taken = match &mut threads[self.tid].kind {
            ThreadKind::Scheduler { scheduler, .. } => scheduler.take(),
            _ => None,
        };
        taken.ok_or_else(|| protocol_violation(&threads[self.tid]))
    }

    fn put_scheduler(&self, threads: &mut Threads, sched: Box<dyn Scheduler>) {
        if let ThreadKind::Scheduler { scheduler, .. } = &mut threads[self.tid].kind {
            *scheduler = Some(sched);
        }
    }

    fn take_bg(&self, threads: &mut Threads) -> Time {
        if let ThreadKind::Scheduler { bg_since_pick, .. } = &mut threads[self.tid].kind {
            std::mem::replace(bg_since_pick, Time::zero())
        } else {
            Time::zero()
        }
    }
}

impl Execution for SchedulerExecution {
    fn resume(&mut self, input: Reply, threads: &mut Threads) -> Result<Request, SimError> {
        match std::mem::replace(&mut self.state, SchedState::Pick) {
            SchedState::Pick => {
                let Reply::Time(now) = input else {
                    return Err(protocol_violation(&threads[self.tid]));
                };
                threads[self.tid].touch_ready(now);
                // The background counter survives computation restarts, so
                // a freshly re-entered scheduler still learns how long its
                // previous pick ran.
                let prev_run = Some(self.take_bg(threads));

                let mut sched = self.take_scheduler(threads)?;
                let decision = sched.pick(now, prev_run, threads);
                self.put_scheduler(threads, sched);

                match decision {
                    Decision::Run { chain, time_slice } => {
                        self.state = SchedState::ArmedRun { chain };
                        Ok(Request::Timer(time_slice))
                    }
                    Decision::Idle { wake_after } => {
                        match wake_after {
                            Some(delta) => {
                                // Advertise when this module has work
                                // again, so the parent can park the VCPU
                                // (or the core the kernel) until then.
                                threads[self.tid].ready_time = Some(now + delta);
                            }
                            None => {
                                // Every child thread has finished; so has
                                // this scheduler.
                                let thread = &mut threads[self.tid];
                                thread.remaining = Some(Time::zero());
                                thread.stats.finished_time = Some(now);
                                thread.ready_time = None;
                            }
                        }
                        self.state = SchedState::Pick;
                        Ok(Request::Idle)
                    }
                }
            }
            SchedState::ArmedRun { chain } => match input {
                Reply::Time(_) => {
                    self.state = SchedState::AwaitReturn;
                    Ok(Request::Resume(chain))
                }
                Reply::Chain(_) => Err(protocol_violation(&threads[self.tid])),
            },
            SchedState::AwaitReturn => match input {
                Reply::Chain(chain) => {
                    let mut sched = self.take_scheduler(threads)?;
                    sched.chain_returned(chain);
                    self.put_scheduler(threads, sched);
                    self.state = SchedState::Pick;
                    Ok(Request::CurrentTime)
                }
                Reply::Time(_) => Err(protocol_violation(&threads[self.tid])),
            },
        }
    }
}

/// Protocol phases of a VCPU proxy.
enum VcpuState {
    Enter,
    AwaitReturn,
    Gate,
}

/// Forwards execution into a child module's scheduler thread and parks
/// itself while the child has nothing to do.
struct VcpuExecution {
    tid: ThreadId,
    child: ThreadId,
    state: VcpuState,
}

impl VcpuExecution {
    fn take_chain(&self, threads: &mut Threads) -> Chain {
        let stored = match &mut threads[self.tid].kind {
            ThreadKind::Vcpu { chain, .. } => chain.take(),
            _ => None,
        };
        stored.unwrap_or_else(|| Chain::from_thread(self.child, threads))
    }
}

impl Execution for VcpuExecution {
    fn resume(&mut self, input: Reply, threads: &mut Threads) -> Result<Request, SimError> {
        match self.state {
            VcpuState::Enter => {
                let Reply::Time(now) = input else {
                    return Err(protocol_violation(&threads[self.tid]));
                };
                threads[self.tid].touch_ready(now);
                let chain = self.take_chain(threads);
                self.state = VcpuState::AwaitReturn;
                Ok(Request::Resume(chain))
            }
            VcpuState::AwaitReturn => match input {
                Reply::Chain(chain) => {
                    if let ThreadKind::Vcpu { chain: slot, .. } = &mut threads[self.tid].kind {
                        *slot = Some(chain);
                    }
                    self.state = VcpuState::Gate;
                    Ok(Request::CurrentTime)
                }
                Reply::Time(_) => Err(protocol_violation(&threads[self.tid])),
            },
            VcpuState::Gate => {
                let Reply::Time(now) = input else {
                    return Err(protocol_violation(&threads[self.tid]));
                };
                let child = &threads[self.child];
                let child_parked =
                    child.is_finished() || child.ready_time.map_or(true, |rt| rt > now);
                if child_parked {
                    self.state = VcpuState::Enter;
                    Ok(Request::Idle)
                } else {
                    threads[self.tid].touch_ready(now);
                    let chain = self.take_chain(threads);
                    self.state = VcpuState::AwaitReturn;
                    Ok(Request::Resume(chain))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(remaining: Option<i64>, start: i64) -> Thread {
        Thread::new(
            ModuleId(0),
            "m".to_string(),
            0,
            Time::from_units(start),
            remaining.map(Time::from_units),
            ThreadKind::Worker,
        )
    }

    #[test]
    fn crunch_accounts_exactly() {
        let mut threads = Threads::default();
        let id = threads.add(worker(Some(10), 0));

        threads.run_crunch(id, Time::from_units(4), Time::from_units(4));
        assert_eq!(threads[id].remaining, Some(Time::from_units(6)));
        assert_eq!(threads[id].stats.execution_time(), Time::from_units(4));
        assert_eq!(
            threads[id].stats.run,
            vec![RunSample {
                start: Time::zero(),
                duration: Time::from_units(4)
            }]
        );

        threads.run_crunch(id, Time::from_units(10), Time::from_units(6));
        assert!(threads[id].is_finished());
        assert_eq!(threads[id].stats.finished_time, Some(Time::from_units(10)));
        assert_eq!(threads[id].ready_time, None);
        // Workload conservation: remaining + executed == initial.
        assert_eq!(threads[id].stats.execution_time(), Time::from_units(10));
    }

    #[test]
    fn readiness_respects_start_time() {
        let t = worker(Some(5), 10);
        assert!(!t.is_ready(Time::from_units(9)));
        assert!(t.is_ready(Time::from_units(10)));
        let mut active = worker(Some(5), 0);
        active.active = true;
        assert!(!active.is_ready(Time::from_units(0)));
    }

    #[test]
    fn wait_is_sampled_on_dispatch() {
        let mut threads = Threads::default();
        let id = threads.add(worker(Some(5), 2));
        threads.resume(id, Time::from_units(6), false);
        assert_eq!(threads[id].stats.wait, vec![Time::from_units(4)]);
        assert_eq!(threads[id].ready_time, Some(Time::from_units(6)));
    }

    #[test]
    fn periodic_ready_time_advances_per_burst() {
        let mut threads = Threads::default();
        let id = threads.add(Thread::new(
            ModuleId(0),
            "m".to_string(),
            1,
            Time::zero(),
            Some(Time::from_units(6)),
            ThreadKind::Periodic {
                period: Time::from_units(10),
                burst: Time::from_units(2),
                origin: Time::zero(),
            },
        ));
        // First burst complete at t=2: next activation due at t=10.
        threads.run_crunch(id, Time::from_units(2), Time::from_units(2));
        assert_eq!(threads[id].ready_time, Some(Time::from_units(10)));
        // Half a burst at t=11 leaves the thread ready to finish it.
        threads.run_crunch(id, Time::from_units(11), Time::from_units(1));
        assert_eq!(threads[id].ready_time, Some(Time::from_units(11)));
    }

    #[test]
    fn periodic_quota_covers_missed_activations() {
        let mut threads = Threads::default();
        let id = threads.add(Thread::new(
            ModuleId(0),
            "m".to_string(),
            1,
            Time::zero(),
            None,
            ThreadKind::Periodic {
                period: Time::from_units(10),
                burst: Time::from_units(2),
                origin: Time::zero(),
            },
        ));
        let mut exec = PeriodicExecution { tid: id };
        // At t=25, activations at 0, 10 and 20 are due: 6 units of work.
        let req = exec
            .resume(Reply::Time(Time::from_units(25)), &mut threads)
            .unwrap();
        match req {
            Request::Execute(Some(quota)) => assert_eq!(quota, Time::from_units(6)),
            _ => panic!("expected an execute request"),
        }
    }

    #[test]
    fn next_wake_ignores_finished_threads() {
        let mut threads = Threads::default();
        let done = threads.add(worker(Some(0), 0));
        threads[done].ready_time = None;
        threads.add(worker(Some(5), 7));
        threads.add(worker(Some(5), 3));
        assert_eq!(threads.next_wake(), Some(Time::from_units(3)));
        assert!(threads.work_pending());
    }
}
