//! First-come-first-serve: run the oldest ready thread to completion.

use super::{Decision, ReadyOrder, RunQueues, Scheduler};
use crate::context::Chain;
use crate::thread::Threads;
use crate::time::Time;
use crate::types::ThreadId;

pub struct Fcfs {
    queues: RunQueues,
}

impl Fcfs {
    pub fn new() -> Fcfs {
        Fcfs {
            queues: RunQueues::new(ReadyOrder::Fifo),
        }
    }
}

impl Default for Fcfs {
    fn default() -> Fcfs {
        Fcfs::new()
    }
}

impl Scheduler for Fcfs {
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
