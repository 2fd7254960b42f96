//! Weighted fair scheduler in the style of Linux's CFS.
//!
//! Each thread carries shares; runtime is scaled by `default_shares /
//! shares` into a virtual runtime and the ready queue stays sorted by it.
//! The slice handed to the core is the thread's proportional cut of a
//! scheduling period, floored at the minimum granularity and bounded so
//! virtual runtimes cannot drift further apart than one slice.

use std::collections::BTreeMap;

use super::{Decision, Scheduler};
use crate::context::Chain;
use crate::thread::Threads;
use crate::time::Time;
use crate::types::ThreadId;

struct Outstanding {
    thread: ThreadId,
}

pub struct Cfs {
    default_shares: i64,
    min_period: Time,
    min_slice: Time,
    ready: Vec<Chain>,
    waiting: Vec<Chain>,
    finished: Vec<Chain>,
    vruntime: BTreeMap<ThreadId, Time>,
    shares: BTreeMap<ThreadId, i64>,
    min_vruntime: Option<Time>,
    returned: Option<Chain>,
    outstanding: Option<Outstanding>,
}

impl Cfs {
    /// `min_period` is the span within which every ready thread should run
    /// once; `min_slice` is the granularity floor.
    pub fn new(default_shares: i64, min_period: Time, min_slice: Time) -> Cfs {
        assert!(default_shares > 0, "shares must be positive");
        assert!(min_period.is_positive(), "the period must be positive");
        assert!(!min_slice.is_negative(), "the granularity cannot be negative");
        Cfs {
            default_shares,
            min_period,
            min_slice,
            ready: Vec::new(),
            waiting: Vec::new(),
            finished: Vec::new(),
            vruntime: BTreeMap::new(),
            shares: BTreeMap::new(),
            min_vruntime: None,
            returned: None,
            outstanding: None,
        }
    }

    /// Override the shares of one thread (defaults apply otherwise).
    pub fn set_shares(&mut self, thread: ThreadId, shares: i64) {
        assert!(shares > 0, "shares must be positive");
        self.shares.insert(thread, shares);
    }

    fn shares_of(&self, thread: ThreadId) -> i64 {
        self.shares.get(&thread).copied().unwrap_or(self.default_shares)
    }

    /// Scale factor from real runtime to virtual runtime.
    fn vruntime_factor(&self, thread: ThreadId) -> Time {
        Time::ratio(self.default_shares, self.shares_of(thread))
    }

    fn vruntime_of(&self, thread: ThreadId) -> Time {
        self.vruntime
            .get(&thread)
            .copied()
            .unwrap_or_else(Time::zero)
    }

    fn sorted_insert(&mut self, chain: Chain) -> usize {
        let key = self.vruntime_of(chain.bottom_thread());
        let idx = self
            .ready
            .partition_point(|c| self.vruntime_of(c.bottom_thread()) <= key);
        self.ready.insert(idx, chain);
        idx
    }

    fn settle(&mut self, now: Time, prev_run_time: Option<Time>, threads: &Threads) {
        if let Some(outstanding) = self.outstanding.take() {
            let chain = self
                .returned
                .take()
                .unwrap_or_else(|| Chain::from_thread(outstanding.thread, threads));
            let thread = chain.bottom_thread();

            if let Some(ran) = prev_run_time {
                let weighted = ran * self.vruntime_factor(thread);
                let vr = self.vruntime_of(thread) + weighted;
                self.vruntime.insert(thread, vr);
            }

            let bottom = &threads[thread];
            if bottom.is_finished() {
                self.finished.push(chain);
            } else if bottom.ready_time.map_or(true, |rt| rt > now) {
                self.waiting.push(chain);
            } else {
                let idx = self.sorted_insert(chain);
                // Force a different thread next round when one exists.
                if idx == 0 && self.ready.len() > 1 {
                    self.ready.swap(0, 1);
                }
            }
        }

        // Promote newly ready threads, clamping their virtual runtime to
        // the queue minimum so sleepers neither starve nor dominate.
        let floor = self.current_min_vruntime(now);
        let mut idx = 0;
        while idx < self.waiting.len() {
            let bottom = &threads[self.waiting[idx].bottom_thread()];
            if bottom.is_finished() {
                let chain = self.waiting.remove(idx);
                self.finished.push(chain);
            } else if bottom.ready_time.map_or(false, |rt| rt <= now) {
                let chain = self.waiting.remove(idx);
                let thread = chain.bottom_thread();
                let clamped = self.vruntime_of(thread).max(floor);
                self.vruntime.insert(thread, clamped);
                self.sorted_insert(chain);
            } else {
                idx += 1;
            }
        }

        self.min_vruntime = self
            .ready
            .iter()
            .map(|c| self.vruntime_of(c.bottom_thread()))
            .min()
            .or(self.min_vruntime);
    }

    fn current_min_vruntime(&mut self, now: Time) -> Time {
        *self.min_vruntime.get_or_insert(now)
    }

    fn slice_for(&self, thread: ThreadId) -> Time {
        let nr_ready = (self.ready.len() as i64).max(1);
        let period = (Time::from_units(nr_ready) * self.min_slice).max(self.min_period);
        let total: i64 = self
            .ready
            .iter()
            .map(|c| self.shares_of(c.bottom_thread()))
            .sum();
        let total = total.max(self.shares_of(thread));
        let mut slice = period * Time::ratio(self.shares_of(thread), total);

        // Keep virtual runtimes within one slice of the runner-up.
        if self.ready.len() > 1 {
            let next = self.ready[1].bottom_thread();
            let fact = self.vruntime_factor(thread);
            let vdelta = slice * fact;
            let future = self.vruntime_of(thread) + vdelta;
            let future_vdelta = future - self.vruntime_of(next);
            if future_vdelta > slice {
                slice -= (vdelta - slice) / fact;
            }
        }
        slice.max(self.min_slice)
    }
}

impl Scheduler for Cfs {
    fn add_chain(&mut self, chain: Chain, threads: &Threads) {
        if threads[chain.bottom_thread()].is_finished() {
            self.finished.push(chain);
        } else {
            self.waiting.push(chain);
        }
    }

    fn pick(&mut self, now: Time, prev_run_time: Option<Time>, threads: &Threads) -> Decision {
        self.settle(now, prev_run_time, threads);
        if self.ready.is_empty() {
            let wake_after = self
                .waiting
                .iter()
                .filter_map(|c| threads[c.bottom_thread()].ready_time)
                .min()
                .map(|rt| rt - now);
            return Decision::Idle { wake_after };
        }

        let thread = self.ready[0].bottom_thread();
        let time_slice = self.slice_for(thread);
        let chain = self.ready.remove(0);
        self.outstanding = Some(Outstanding { thread });
        Decision::Run {
            chain,
            time_slice: Some(time_slice),
        }
    }

    fn chain_returned(&mut self, chain: Chain) {
        debug_assert!(self.returned.is_none());
        self.returned = Some(chain);
    }

    fn ready_threads(&self) -> Vec<ThreadId> {
        self.ready.iter().map(|c| c.bottom_thread()).collect()
    }

    fn num_threads(&self) -> usize {
        self.ready.len()
            + self.waiting.len()
            + self.finished.len()
            + usize::from(self.outstanding.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::testutil::{picked_thread, register_all, worker_arena};

    fn cfs() -> Cfs {
        Cfs::new(1024, Time::from_units(12), Time::from_units(2))
    }

    #[test]
    fn alternates_between_equal_threads() {
        let threads = worker_arena(&[(0, Some(50)), (0, Some(50))]);
        let mut sched = cfs();
        register_all(&mut sched, &threads);

        let first = sched.pick(Time::zero(), None, &threads);
        assert_eq!(picked_thread(&first), Some(ThreadId(0)));
        let Decision::Run { chain, time_slice } = first else {
            panic!("expected a dispatch");
        };
        // Equal shares split the period evenly.
        assert_eq!(time_slice, Some(Time::from_units(6)));
        sched.chain_returned(chain);

        let second = sched.pick(Time::from_units(6), Some(Time::from_units(6)), &threads);
        assert_eq!(picked_thread(&second), Some(ThreadId(1)));
    }

    #[test]
    fn higher_shares_earn_a_longer_slice() {
        let threads = worker_arena(&[(0, Some(50)), (0, Some(50))]);
        let mut sched = cfs();
        sched.set_shares(ThreadId(0), 3072);
        register_all(&mut sched, &threads);

        let decision = sched.pick(Time::zero(), None, &threads);
        let Decision::Run { chain, time_slice } = decision else {
            panic!("expected a dispatch");
        };
        assert_eq!(picked_thread_of(&chain), ThreadId(0));
        // 3072 of 4096 total shares: three quarters of the 12-unit period.
        assert_eq!(time_slice, Some(Time::from_units(9)));
    }

    fn picked_thread_of(chain: &Chain) -> ThreadId {
        chain.bottom_thread()
    }

    #[test]
    fn runtime_pushes_a_thread_behind_its_peer() {
        let threads = worker_arena(&[(0, Some(50)), (0, Some(50))]);
        let mut sched = cfs();
        register_all(&mut sched, &threads);

        let Decision::Run { chain, .. } = sched.pick(Time::zero(), None, &threads) else {
            panic!("expected a dispatch");
        };
        sched.chain_returned(chain);
        let _ = sched.pick(Time::from_units(6), Some(Time::from_units(6)), &threads);

        assert_eq!(sched.vruntime_of(ThreadId(0)), Time::from_units(6));
        assert_eq!(sched.vruntime_of(ThreadId(1)), Time::zero());
    }
}
