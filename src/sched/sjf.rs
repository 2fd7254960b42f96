//! Shortest-job-first: the ready queue is kept ordered by remaining
//! workload, endless threads last.

use super::{Decision, ReadyOrder, RunQueues, Scheduler};
use crate::context::Chain;
use crate::thread::Threads;
use crate::time::Time;
use crate::types::ThreadId;

pub struct Sjf {
    queues: RunQueues,
}

impl Sjf {
    pub fn new() -> Sjf {
        Sjf {
            queues: RunQueues::new(ReadyOrder::ByRemaining),
        }
    }
}

impl Default for Sjf {
    fn default() -> Sjf {
        Sjf::new()
    }
}

impl Scheduler for Sjf {
    fn add_chain(&mut self, chain: Chain, threads: &Threads) {
        self.queues.add_chain(chain, threads);
    }

    fn pick(&mut self, now: Time, _prev_run_time: Option<Time>, threads: &Threads) -> Decision {
        self.queues.settle(now, threads);
        if self.queues.ready().is_empty() {
            return Decision::Idle {
                wake_after: self.queues.next_wake_delta(now, threads),
            };
        }
        Decision::Run {
            chain: self.queues.take_at(0),
            time_slice: None,
        }
    }

    fn chain_returned(&mut self, chain: Chain) {
        self.queues.chain_returned(chain);
    }

    fn ready_threads(&self) -> Vec<ThreadId> {
        self.queues.ready_threads()
    }

    fn num_threads(&self) -> usize {
        self.queues.num_threads()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::testutil::{picked_thread, register_all, worker_arena};

    #[test]
    fn shortest_job_goes_first() {
        let threads = worker_arena(&[(0, Some(9)), (0, Some(2)), (0, Some(5))]);
        let mut sched = Sjf::new();
        register_all(&mut sched, &threads);

        let decision = sched.pick(Time::zero(), None, &threads);
        assert_eq!(picked_thread(&decision), Some(ThreadId(1)));
    }

    #[test]
    fn endless_threads_sort_last() {
        let threads = worker_arena(&[(0, None), (0, Some(4))]);
        let mut sched = Sjf::new();
        register_all(&mut sched, &threads);

        let decision = sched.pick(Time::zero(), None, &threads);
        assert_eq!(picked_thread(&decision), Some(ThreadId(1)));
    }
}
