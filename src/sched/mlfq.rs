//! Multi-level feedback queue.
//!
//! Lower level index means higher priority. Each level round-robins; a
//! thread that consumed processor time drops one level when re-queued, and
//! an optional periodic priority boost hoists everything back to the top
//! level to fight starvation.

use super::{Decision, Scheduler};
use crate::context::Chain;
use crate::thread::Threads;
use crate::time::Time;
use crate::types::ThreadId;

struct Outstanding {
    level: usize,
    thread: ThreadId,
}

pub struct Mlfq {
    level_slices: Vec<Option<Time>>,
    boost_period: Option<Time>,
    ready: Vec<Vec<Chain>>,
    waiting: Vec<Vec<Chain>>,
    finished: Vec<Chain>,
    returned: Option<Chain>,
    outstanding: Option<Outstanding>,
    last_boost: Option<Time>,
}

impl Mlfq {
    /// One ready/waiting queue pair per entry of `level_slices`. A boost
    /// period only makes sense with more than one level.
    pub fn new(level_slices: Vec<Option<Time>>, boost_period: Option<Time>) -> Mlfq {
        assert!(!level_slices.is_empty(), "need at least one level");
        assert!(
            boost_period.is_none() || level_slices.len() > 1,
            "a priority boost has no effect with a single level"
        );
        let levels = level_slices.len();
        Mlfq {
            level_slices,
            boost_period,
            ready: (0..levels).map(|_| Vec::new()).collect(),
            waiting: (0..levels).map(|_| Vec::new()).collect(),
            finished: Vec::new(),
            returned: None,
            outstanding: None,
            last_boost: None,
        }
    }

    /// The conventional eight-level configuration with one slice for all
    /// levels.
    pub fn with_uniform_slice(levels: usize, time_slice: Option<Time>, boost_period: Option<Time>) -> Mlfq {
        Mlfq::new(vec![time_slice; levels], boost_period)
    }

    fn settle(&mut self, now: Time, prev_run_time: Option<Time>, threads: &Threads) {
        if let Some(outstanding) = self.outstanding.take() {
            let chain = self
                .returned
                .take()
                .unwrap_or_else(|| Chain::from_thread(outstanding.thread, threads));
            let bottom = &threads[chain.bottom_thread()];
            if bottom.is_finished() {
                self.finished.push(chain);
            } else if bottom.ready_time.map_or(true, |rt| rt > now) {
                self.waiting[outstanding.level].push(chain);
            } else {
                // Consuming processor time costs one priority level.
                let ran = prev_run_time.map_or(false, |t| t.is_positive());
                let level = if ran {
                    (outstanding.level + 1).min(self.ready.len() - 1)
                } else {
                    outstanding.level
                };
                self.ready[level].push(chain);
            }
        }

        self.maybe_boost(now, prev_run_time);

        for level in 0..self.ready.len() {
            let mut idx = 0;
            while idx < self.waiting[level].len() {
                let bottom = &threads[self.waiting[level][idx].bottom_thread()];
                if bottom.is_finished() {
                    let chain = self.waiting[level].remove(idx);
                    self.finished.push(chain);
                } else if bottom.ready_time.map_or(false, |rt| rt <= now) {
                    let chain = self.waiting[level].remove(idx);
                    self.ready[level].push(chain);
                } else {
                    idx += 1;
                }
            }
        }
    }

    fn maybe_boost(&mut self, now: Time, prev_run_time: Option<Time>) {
        let Some(period) = self.boost_period else {
            return;
        };
        if !prev_run_time.map_or(false, |t| t.is_positive()) {
            return;
        }
        let last = *self.last_boost.get_or_insert(now);
        if now - last < period {
            return;
        }
        let mut hoisted: Vec<Chain> = Vec::new();
        for level in self.ready.iter_mut().skip(1) {
            hoisted.append(level);
        }
        self.ready[0].append(&mut hoisted);
        self.last_boost = Some(now);
    }

    fn active_level(&self) -> Option<usize> {
        self.ready.iter().position(|level| !level.is_empty())
    }
}

impl Scheduler for Mlfq {
    fn add_chain(&mut self, chain: Chain, threads: &Threads) {
        if threads[chain.bottom_thread()].is_finished() {
            self.finished.push(chain);
        } else {
            // New threads enter at the highest priority.
            self.waiting[0].push(chain);
        }
    }

    fn pick(&mut self, now: Time, prev_run_time: Option<Time>, threads: &Threads) -> Decision {
        self.settle(now, prev_run_time, threads);

        let Some(level) = self.active_level() else {
            let wake_after = self
                .waiting
                .iter()
                .flatten()
                .filter_map(|c| threads[c.bottom_thread()].ready_time)
                .min()
                .map(|rt| rt - now);
            return Decision::Idle { wake_after };
        };

        let chain = self.ready[level].remove(0);
        self.outstanding = Some(Outstanding {
            level,
            thread: chain.bottom_thread(),
        });
        Decision::Run {
            chain,
            time_slice: self.level_slices[level],
        }
    }

    fn chain_returned(&mut self, chain: Chain) {
        debug_assert!(self.returned.is_none());
        self.returned = Some(chain);
    }

    fn ready_threads(&self) -> Vec<ThreadId> {
        self.ready
            .iter()
            .flatten()
            .map(|c| c.bottom_thread())
            .collect()
    }

    fn num_threads(&self) -> usize {
        let queued: usize = self
            .ready
            .iter()
            .chain(self.waiting.iter())
            .map(|q| q.len())
            .sum();
        queued + self.finished.len() + usize::from(self.outstanding.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::testutil::{picked_thread, register_all, worker_arena};

    fn slice(units: i64) -> Option<Time> {
        Some(Time::from_units(units))
    }

    #[test]
    fn round_robins_within_a_level() {
        let threads = worker_arena(&[(0, Some(10)), (0, Some(10))]);
        let mut sched = Mlfq::new(vec![slice(3)], None);
        register_all(&mut sched, &threads);

        let first = sched.pick(Time::zero(), None, &threads);
        assert_eq!(picked_thread(&first), Some(ThreadId(0)));
        let Decision::Run { chain, time_slice } = first else {
            panic!("expected a dispatch");
        };
        assert_eq!(time_slice, slice(3));

        // The chain comes back having run its slice; the other thread is
        // next.
        sched.chain_returned(chain);
        let second = sched.pick(Time::from_units(3), Some(Time::from_units(3)), &threads);
        assert_eq!(picked_thread(&second), Some(ThreadId(1)));
    }

    #[test]
    fn running_costs_a_priority_level() {
        let threads = worker_arena(&[(0, Some(10)), (0, Some(10))]);
        let mut sched = Mlfq::new(vec![slice(4), slice(8)], None);
        register_all(&mut sched, &threads);

        let first = sched.pick(Time::zero(), None, &threads);
        let Decision::Run { chain, .. } = first else {
            panic!("expected a dispatch");
        };
        sched.chain_returned(chain);

        // Thread 0 drops to level 1; thread 1 still sits at level 0 and
        // wins the next round.
        let second = sched.pick(Time::from_units(4), Some(Time::from_units(4)), &threads);
        assert_eq!(picked_thread(&second), Some(ThreadId(1)));
        let Decision::Run { chain, .. } = second else {
            panic!("expected a dispatch");
        };
        sched.chain_returned(chain);

        // Both are now at level 1; its longer slice applies.
        let third = sched.pick(Time::from_units(8), Some(Time::from_units(4)), &threads);
        let Decision::Run { time_slice, .. } = third else {
            panic!("expected a dispatch");
        };
        assert_eq!(time_slice, slice(8));
    }

    #[test]
    fn boost_hoists_demoted_threads() {
        let threads = worker_arena(&[(0, Some(100)), (0, Some(100))]);
        let mut sched = Mlfq::new(vec![slice(2), slice(4)], Some(Time::from_units(6)));
        register_all(&mut sched, &threads);

        let mut now = Time::zero();
        // Run both threads down to level 1.
        for _ in 0..2 {
            let decision = sched.pick(now, Some(Time::from_units(2)), &threads);
            let Decision::Run { chain, .. } = decision else {
                panic!("expected a dispatch");
            };
            now += Time::from_units(2);
            sched.chain_returned(chain);
        }
        assert!(sched.ready[0].is_empty());

        // Past the boost period everything is back at level 0.
        now = Time::from_units(10);
        let decision = sched.pick(now, Some(Time::from_units(2)), &threads);
        let Decision::Run { time_slice, .. } = decision else {
            panic!("expected a dispatch");
        };
        assert_eq!(time_slice, slice(2));
        assert_eq!(sched.ready[0].len(), 1);
    }
}
