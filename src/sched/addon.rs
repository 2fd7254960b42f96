//! Scheduler addons: wrappers that observe each decision before the core
//! sees it, overriding the time-slice or vetoing the pick for one round.

use super::{Decision, Scheduler};
use crate::context::Chain;
use crate::thread::Threads;
use crate::time::Time;
use crate::types::ThreadId;

/// What an addon decided about a pick.
pub enum AddonVerdict {
    /// Let the pick through, with this (possibly overridden) time-slice.
    Proceed { time_slice: Option<Time> },
    /// Reject the pick; the scheduler chooses again this round.
    Block,
}

/// Hooks called around every scheduling decision.
pub trait Addon {
    /// A thread joined the wrapped scheduler.
    fn thread_added(&mut self, _thread: ThreadId, _threads: &Threads) {}

    /// A new decision round begins. `prev_run_time` is how long the
    /// previous pick actually ran.
    fn round_start(&mut self, _prev_run_time: Option<Time>, _threads: &Threads) {}

    /// Judge a pick before it is dispatched. `ready` lists the other
    /// ready threads.
    fn filter(
        &mut self,
        picked: ThreadId,
        time_slice: Option<Time>,
        ready: &[ThreadId],
        threads: &Threads,
    ) -> AddonVerdict;
}

/// A scheduler with an addon attached.
pub struct AddonScheduler {
    inner: Box<dyn Scheduler>,
    addon: Box<dyn Addon>,
}

impl AddonScheduler {
    pub fn new(inner: Box<dyn Scheduler>, addon: Box<dyn Addon>) -> AddonScheduler {
        AddonScheduler { inner, addon }
    }
}

impl Scheduler for AddonScheduler {
    fn add_chain(&mut self, chain: Chain, threads: &Threads) {
        self.addon.thread_added(chain.bottom_thread(), threads);
        self.inner.add_chain(chain, threads);
    }

    fn pick(&mut self, now: Time, prev_run_time: Option<Time>, threads: &Threads) -> Decision {
        self.addon.round_start(prev_run_time, threads);
        let mut prev = prev_run_time;
        loop {
            match self.inner.pick(now, prev, threads) {
                Decision::Run { chain, time_slice } => {
                    let picked = chain.bottom_thread();
                    let ready = self.inner.ready_threads();
                    match self.addon.filter(picked, time_slice, &ready, threads) {
                        AddonVerdict::Proceed { time_slice } => {
                            return Decision::Run { chain, time_slice };
                        }
                        AddonVerdict::Block => {
                            // Hand the chain straight back; the zero run
                            // time tells the scheduler it never ran.
                            self.inner.chain_returned(chain);
                            prev = Some(Time::zero());
                        }
                    }
                }
                idle => return idle,
            }
        }
    }

    fn chain_returned(&mut self, chain: Chain) {
        self.inner.chain_returned(chain);
    }

    fn ready_threads(&self) -> Vec<ThreadId> {
        self.inner.ready_threads()
    }

    fn num_threads(&self) -> usize {
        self.inner.num_threads()
    }
}
