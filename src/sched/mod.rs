//! The scheduler contract and shared run-queue plumbing.
//!
//! A scheduler owns singleton chains for its module's threads and, asked
//! for a decision, either hands one out together with a time-slice or
//! reports that nothing is ready. The chain comes back (possibly longer,
//! if the thread nested further activations under itself) once control
//! returns, and is re-classified on the next decision.

mod addon;
mod cfs;
mod fcfs;
mod mlfq;
mod penalizer;
mod round_robin;
mod sjf;
mod time_slice_fixer;

pub use addon::{Addon, AddonScheduler, AddonVerdict};
pub use cfs::Cfs;
pub use fcfs::Fcfs;
pub use mlfq::Mlfq;
pub use penalizer::Penalizer;
pub use round_robin::RoundRobin;
pub use sjf::Sjf;
pub use time_slice_fixer::TimeSliceFixer;

use crate::context::Chain;
use crate::thread::Threads;
use crate::time::Time;
use crate::types::ThreadId;

/// One scheduling decision.
pub enum Decision {
    /// Dispatch this chain, optionally bounded by a time-slice.
    Run {
        chain: Chain,
        time_slice: Option<Time>,
    },
    /// Nothing is ready. `wake_after` is the span until the next waiting
    /// thread becomes ready; `None` means every thread has finished.
    Idle { wake_after: Option<Time> },
}

/// The contract between a module's scheduler and the thread driving it.
pub trait Scheduler {
    /// Take ownership of a (singleton) chain to schedule.
    fn add_chain(&mut self, chain: Chain, threads: &Threads);

    /// Decide what to run next. `prev_run_time` is how long the previously
    /// dispatched chain ran; `None` when the caller cannot know.
    fn pick(&mut self, now: Time, prev_run_time: Option<Time>, threads: &Threads) -> Decision;

    /// The chain handed out by the last `pick` flows back after it was
    /// preempted, yielded or finished.
    fn chain_returned(&mut self, chain: Chain);

    /// Threads currently in the ready queue(s), dispatch order.
    fn ready_threads(&self) -> Vec<ThreadId>;

    /// Total threads under management, finished ones included.
    fn num_threads(&self) -> usize;
}

/// How the shared ready queue is kept ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOrder {
    /// Arrival order.
    Fifo,
    /// Ascending remaining workload, endless threads last.
    ByRemaining,
}

struct Outstanding {
    idx: usize,
    thread: ThreadId,
}

/// Ready/waiting/finished chain queues plus the outstanding-dispatch slot,
/// shared by the single-queue policies.
pub struct RunQueues {
    order: ReadyOrder,
    ready: Vec<Chain>,
    waiting: Vec<Chain>,
    finished: Vec<Chain>,
    returned: Option<Chain>,
    outstanding: Option<Outstanding>,
}

impl RunQueues {
    pub fn new(order: ReadyOrder) -> RunQueues {
        RunQueues {
            order,
            ready: Vec::new(),
            waiting: Vec::new(),
            finished: Vec::new(),
            returned: None,
            outstanding: None,
        }
    }

    pub fn add_chain(&mut self, chain: Chain, threads: &Threads) {
        if threads[chain.bottom_thread()].is_finished() {
            self.finished.push(chain);
        } else {
            self.waiting.push(chain);
        }
    }

    pub fn chain_returned(&mut self, chain: Chain) {
        debug_assert!(self.returned.is_none());
        self.returned = Some(chain);
    }

    /// Re-classify the chain from the previous dispatch and promote newly
    /// ready threads. Called at the start of every decision.
    pub fn settle(&mut self, now: Time, threads: &Threads) {
        if let Some(outstanding) = self.outstanding.take() {
            // The chain is rebuilt from scratch when the dispatch was torn
            // down wholesale (kernel-only timer dispatch) and never handed
            // back.
            let chain = self
                .returned
                .take()
                .unwrap_or_else(|| Chain::from_thread(outstanding.thread, threads));
            let bottom = &threads[chain.bottom_thread()];
            if bottom.is_finished() {
                self.finished.push(chain);
            } else if bottom.ready_time.map_or(true, |rt| rt > now) {
                self.waiting.push(chain);
            } else {
                let idx = match self.order {
                    ReadyOrder::Fifo => outstanding.idx.min(self.ready.len()),
                    ReadyOrder::ByRemaining => self.insert_position(&chain, threads),
                };
                self.ready.insert(idx, chain);
            }
        }
        self.promote(now, threads);
    }

    fn promote(&mut self, now: Time, threads: &Threads) {
        let mut idx = 0;
        while idx < self.waiting.len() {
            let bottom = &threads[self.waiting[idx].bottom_thread()];
            if bottom.is_finished() {
                let chain = self.waiting.remove(idx);
                self.finished.push(chain);
            } else if bottom.ready_time.map_or(false, |rt| rt <= now) {
                let chain = self.waiting.remove(idx);
                let at = match self.order {
                    ReadyOrder::Fifo => self.ready.len(),
                    ReadyOrder::ByRemaining => self.insert_position(&chain, threads),
                };
                self.ready.insert(at, chain);
            } else {
                idx += 1;
            }
        }
    }

    fn insert_position(&self, chain: &Chain, threads: &Threads) -> usize {
        let key = threads[chain.bottom_thread()].remaining;
        self.ready.partition_point(|c| {
            let other = threads[c.bottom_thread()].remaining;
            match (other, key) {
                (Some(a), Some(b)) => a <= b,
                (Some(_), None) => true,
                (None, None) => true,
                (None, Some(_)) => false,
            }
        })
    }

    /// Remove and return the ready chain at `idx`, remembering the
    /// dispatch so the chain can be re-classified when it returns.
    pub fn take_at(&mut self, idx: usize) -> Chain {
        let chain = self.ready.remove(idx);
        self.outstanding = Some(Outstanding {
            idx,
            thread: chain.bottom_thread(),
        });
        chain
    }

    /// Span until the next waiting thread becomes ready.
    pub fn next_wake_delta(&self, now: Time, threads: &Threads) -> Option<Time> {
        self.waiting
            .iter()
            .filter_map(|c| threads[c.bottom_thread()].ready_time)
            .min()
            .map(|rt| rt - now)
    }

    pub fn ready(&self) -> &[Chain] {
        &self.ready
    }

    pub fn ready_threads(&self) -> Vec<ThreadId> {
        self.ready.iter().map(|c| c.bottom_thread()).collect()
    }

    pub fn num_threads(&self) -> usize {
        self.ready.len()
            + self.waiting.len()
            + self.finished.len()
            + usize::from(self.outstanding.is_some())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::thread::{Thread, ThreadKind};
    use crate::types::ModuleId;

    pub fn worker_arena(specs: &[(i64, Option<i64>)]) -> Threads {
        let mut threads = Threads::default();
        for (tid, (start, units)) in specs.iter().enumerate() {
            threads.add(Thread::new(
                ModuleId(0),
                "m".to_string(),
                tid as u32,
                Time::from_units(*start),
                units.map(Time::from_units),
                ThreadKind::Worker,
            ));
        }
        threads
    }

    pub fn register_all(sched: &mut dyn Scheduler, threads: &Threads) {
        for (id, _) in threads.iter() {
            sched.add_chain(Chain::from_thread(id, threads), threads);
        }
    }

    pub fn picked_thread(decision: &Decision) -> Option<ThreadId> {
        match decision {
            Decision::Run { chain, .. } => Some(chain.bottom_thread()),
            Decision::Idle { .. } => None,
        }
    }
}
