//! Addon that replaces every time-slice with a fixed value.
//!
//! With `None` this strips time-slices entirely, which is what lets
//! time-slicing schedulers run inside non-kernel modules under kernel-only
//! timer dispatch, where they may not arm timers.

use super::{Addon, AddonVerdict};
use crate::thread::Threads;
use crate::time::Time;
use crate::types::ThreadId;

pub struct TimeSliceFixer {
    override_time_slice: Option<Time>,
}

impl TimeSliceFixer {
    pub fn new(override_time_slice: Option<Time>) -> TimeSliceFixer {
        TimeSliceFixer {
            override_time_slice,
        }
    }
}

impl Addon for TimeSliceFixer {
    fn filter(
        &mut self,
        _picked: ThreadId,
        _time_slice: Option<Time>,
        _ready: &[ThreadId],
        _threads: &Threads,
    ) -> AddonVerdict {
        AddonVerdict::Proceed {
            time_slice: self.override_time_slice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::testutil::{register_all, worker_arena};
    use crate::sched::{AddonScheduler, Decision, RoundRobin, Scheduler};

    #[test]
    fn overrides_the_scheduler_slice() {
        let threads = worker_arena(&[(0, Some(10))]);
        let mut sched = AddonScheduler::new(
            Box::new(RoundRobin::new(Some(Time::from_units(3)))),
            Box::new(TimeSliceFixer::new(None)),
        );
        register_all(&mut sched, &threads);

        let Decision::Run { time_slice, .. } = sched.pick(Time::zero(), None, &threads) else {
            panic!("expected a dispatch");
        };
        assert_eq!(time_slice, None);
    }
}
