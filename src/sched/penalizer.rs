//! Addon that penalizes threads for overrunning their time-slice.
//!
//! Niceness is kept at or below zero: it records how far past its allotted
//! slice a thread ran, normalized by the slice. The thread with the worst
//! niceness sits out a round so the others catch up; threads that sat out
//! get credited for the time they ceded. This approximates time-slices
//! where no local timer can cut a thread off.

use std::collections::BTreeMap;

use super::{Addon, AddonVerdict};
use crate::thread::Threads;
use crate::time::Time;
use crate::types::ThreadId;

pub struct Penalizer {
    override_time_slice: Option<Time>,
    niceness: BTreeMap<ThreadId, Time>,
    sat_out: Vec<ThreadId>,
    last_slice: Option<Time>,
    last_pick: Option<ThreadId>,
}

impl Penalizer {
    pub fn new(override_time_slice: Option<Time>) -> Penalizer {
        Penalizer {
            override_time_slice,
            niceness: BTreeMap::new(),
            sat_out: Vec::new(),
            last_slice: None,
            last_pick: None,
        }
    }

    /// Does the niceness of `picked` warrant sitting the round out?
    /// The worst offender is blocked unless everybody is at zero.
    fn should_block(&self, picked: ThreadId) -> bool {
        let worst = match self.niceness.values().min() {
            Some(worst) => *worst,
            None => return false,
        };
        !worst.is_zero() && self.niceness.get(&picked) == Some(&worst)
    }

    /// Shift all niceness values so the maximum sits at zero.
    fn normalize(&mut self) {
        let Some(max) = self.niceness.values().max().copied() else {
            return;
        };
        if max.is_zero() {
            return;
        }
        for value in self.niceness.values_mut() {
            *value -= max;
        }
    }
}

impl Addon for Penalizer {
    fn thread_added(&mut self, thread: ThreadId, threads: &Threads) {
        if !threads[thread].is_finished() {
            self.niceness.insert(thread, Time::zero());
        }
    }

    fn round_start(&mut self, prev_run_time: Option<Time>, threads: &Threads) {
        let (Some(ran), Some(slice), Some(last)) =
            (prev_run_time, self.last_slice.take(), self.last_pick.take())
        else {
            return;
        };

        if threads[last].is_finished() {
            self.niceness.remove(&last);
        } else if ran.is_zero() {
            // Never actually ran; treat it as sat out.
            if !self.sat_out.contains(&last) {
                self.sat_out.push(last);
            }
        } else if let Some(value) = self.niceness.get_mut(&last) {
            *value += (slice - ran) / slice;
        }

        // Credit the threads that ceded their round.
        if ran.is_positive() && self.sat_out.last() != Some(&last) {
            let credit = ran / slice;
            for tid in self.sat_out.drain(..) {
                if let Some(value) = self.niceness.get_mut(&tid) {
                    *value += credit;
                }
            }
        }
        self.normalize();
    }

    fn filter(
        &mut self,
        picked: ThreadId,
        time_slice: Option<Time>,
        ready: &[ThreadId],
        _threads: &Threads,
    ) -> AddonVerdict {
        if self.sat_out.contains(&picked) {
            // The scheduler insists on a thread we stalled; let it run.
            self.sat_out.clear();
        } else if !ready.is_empty() && self.should_block(picked) {
            self.sat_out.push(picked);
            return AddonVerdict::Block;
        }

        self.last_slice = time_slice;
        self.last_pick = Some(picked);
        AddonVerdict::Proceed {
            time_slice: self.override_time_slice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::testutil::{picked_thread, register_all, worker_arena};
    use crate::sched::{AddonScheduler, Decision, RoundRobin, Scheduler};

    fn penalized_rr(threads: &Threads) -> AddonScheduler {
        let mut sched = AddonScheduler::new(
            Box::new(RoundRobin::new(Some(Time::from_units(4)))),
            Box::new(Penalizer::new(None)),
        );
        register_all(&mut sched, threads);
        sched
    }

    #[test]
    fn overrunner_sits_out_a_round() {
        let threads = worker_arena(&[(0, Some(40)), (0, Some(40))]);
        let mut sched = penalized_rr(&threads);

        // Thread 0 runs twice its slice (no timer cut it off).
        let first = sched.pick(Time::zero(), None, &threads);
        assert_eq!(picked_thread(&first), Some(ThreadId(0)));
        let Decision::Run { chain, .. } = first else {
            panic!("expected a dispatch");
        };
        sched.chain_returned(chain);

        // Round-robin would hand out thread 1 next either way; it behaves.
        let second = sched.pick(Time::from_units(8), Some(Time::from_units(8)), &threads);
        assert_eq!(picked_thread(&second), Some(ThreadId(1)));
        let Decision::Run { chain, .. } = second else {
            panic!("expected a dispatch");
        };
        sched.chain_returned(chain);

        // Thread 0 is now the worst offender: it gets blocked once and
        // thread 1 runs again in its stead.
        let third = sched.pick(Time::from_units(12), Some(Time::from_units(4)), &threads);
        assert_eq!(picked_thread(&third), Some(ThreadId(1)));
    }
}
