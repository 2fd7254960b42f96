//! Activation contexts and the scheduling chain.
//!
//! A `Context` is one live activation: a thread, its in-progress
//! computation, and the countdown of its local timer. A `Chain` stacks
//! contexts bottom (kernel scheduler) to top (currently executing) and
//! caches the index of the soonest timeout so the core can bound every
//! execution request in O(1).

use crate::error::SimError;
use crate::request::Request;
use crate::thread::{execution_for, Threads};
use crate::time::Time;
use crate::types::ThreadId;

/// Maximum chain depth. Exceeding it means a runaway hierarchy.
pub const K_MAX: usize = 32;

/// What a computation receives when it is resumed.
pub enum Reply {
    /// The current simulated time (the default answer to any request).
    Time(Time),
    /// The sub-chain split back off the core's chain, answering a
    /// `Request::Resume`.
    Chain(Chain),
}

/// A suspendable computation driven by the core.
///
/// Implementations are explicit state machines: each `resume` consumes one
/// reply, advances internal state, and produces the next request.
pub trait Execution {
    fn resume(&mut self, input: Reply, threads: &mut Threads) -> Result<Request, SimError>;
}

/// One activation record on a chain.
pub struct Context {
    thread: ThreadId,
    execution: Box<dyn Execution>,
    started: bool,
    timeout: Option<Time>,
    reply: Option<Chain>,
}

impl Context {
    /// Create a fresh context for `thread` with a new computation.
    pub fn from_thread(thread: ThreadId, threads: &Threads) -> Context {
        Context {
            thread,
            execution: execution_for(thread, &threads[thread]),
            started: false,
            timeout: None,
            reply: None,
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn timeout(&self) -> Option<Time> {
        self.timeout
    }

    pub fn started(&self) -> bool {
        self.started
    }

    /// Inject the reply for the next resumption. Used by the core to hand
    /// a split-off chain back to the context that scheduled it.
    pub fn inject_reply(&mut self, chain: Chain) {
        debug_assert!(self.started, "cannot reply to a context that never ran");
        debug_assert!(self.reply.is_none(), "cannot overwrite a pending reply");
        self.reply = Some(chain);
    }

    /// Drive the computation one step. The pending injected reply, if any,
    /// is delivered; otherwise the computation sees the current time.
    pub fn execute(&mut self, now: Time, threads: &mut Threads) -> Result<Request, SimError> {
        if !self.started {
            let thread = &mut threads[self.thread];
            if thread.active {
                return Err(SimError::ThreadAliased {
                    module: thread.module_name.clone(),
                    tid: thread.tid,
                });
            }
            thread.active = true;
            self.started = true;
        }
        let input = match self.reply.take() {
            Some(chain) => Reply::Chain(chain),
            None => Reply::Time(now),
        };
        self.execution.resume(input, threads)
    }

    /// Finish the thread and restart the computation from scratch.
    /// Used by kernel-only timer dispatch when the kernel is re-entered.
    pub fn restart(&mut self, now: Time, threads: &mut Threads) {
        debug_assert!(self.started);
        threads.finish(self.thread, now);
        self.execution = execution_for(self.thread, &threads[self.thread]);
        self.started = false;
        self.reply = None;
    }
}

/// The stack of contexts for one scheduling chain.
///
/// May be partial: the bottom need not be the kernel (sub-chains stored in
/// scheduler queues and VCPU slots are exactly that).
pub struct Chain {
    contexts: Vec<Context>,
    /// Index of the context holding the soonest timeout, lowest index on
    /// ties; `None` when no context has a timeout.
    next_timeout_idx: Option<usize>,
}

impl Chain {
    /// A chain of exactly one existing context.
    pub fn from_context(context: Context) -> Chain {
        let next_timeout_idx = context.timeout.map(|_| 0);
        Chain {
            contexts: vec![context],
            next_timeout_idx,
        }
    }

    /// A chain of one fresh context for `thread`.
    pub fn from_thread(thread: ThreadId, threads: &Threads) -> Chain {
        Chain::from_context(Context::from_thread(thread, threads))
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// The currently executing (top) context.
    pub fn current_context(&self) -> &Context {
        self.contexts.last().expect("chain is never empty")
    }

    pub fn current_context_mut(&mut self) -> &mut Context {
        self.contexts.last_mut().expect("chain is never empty")
    }

    pub fn context_at(&self, idx: usize) -> &Context {
        &self.contexts[idx]
    }

    pub fn bottom_thread(&self) -> ThreadId {
        self.contexts[0].thread
    }

    pub fn top_thread(&self) -> ThreadId {
        self.current_context().thread
    }

    /// The thread directly below the top, if the chain is that long.
    pub fn parent_thread(&self) -> Option<ThreadId> {
        (self.len() >= 2).then(|| self.contexts[self.len() - 2].thread)
    }

    /// Thread at `idx`; negative indices count from the back.
    pub fn thread_at(&self, idx: isize) -> Result<ThreadId, SimError> {
        let len = self.len();
        let resolved = if idx < 0 {
            len as isize + idx
        } else {
            idx
        };
        if resolved < 0 || resolved as usize >= len {
            return Err(SimError::IndexOutOfRange { index: idx, len });
        }
        Ok(self.contexts[resolved as usize].thread)
    }

    /// The soonest timeout anywhere on the chain.
    pub fn next_timeout(&self) -> Option<Time> {
        self.next_timeout_idx
            .and_then(|idx| self.contexts[idx].timeout)
    }

    pub fn iter_threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.contexts.iter().map(|ctx| ctx.thread)
    }

    /// Splice `tail` on top of this chain, consuming it. Returns the index
    /// of the first newly appended context.
    pub fn append_chain(&mut self, tail: Chain) -> Result<usize, SimError> {
        let offset = self.len();
        let depth = offset + tail.len();
        if depth > K_MAX {
            return Err(SimError::ChainOverflow { depth });
        }
        if let Some(tail_idx) = tail.next_timeout_idx {
            let tail_timeout = tail.contexts[tail_idx].timeout;
            if self.next_timeout().is_none() || tail_timeout < self.next_timeout() {
                self.next_timeout_idx = Some(tail_idx + offset);
            }
        }
        self.contexts.extend(tail.contexts);
        Ok(offset)
    }

    /// Assign the timeout of the context at `idx`, maintaining the cache.
    pub fn set_timer(&mut self, timeout: Option<Time>, idx: usize) {
        debug_assert!(idx < self.len());
        let prev_min = self.next_timeout();
        self.contexts[idx].timeout = timeout;

        match (self.next_timeout_idx, timeout) {
            (None, Some(_)) => self.next_timeout_idx = Some(idx),
            (None, None) => {}
            (Some(min_idx), Some(new)) => {
                let prev = prev_min.expect("cache index points at a live timeout");
                if new < prev || (new == prev && idx < min_idx) {
                    self.next_timeout_idx = Some(idx);
                } else if min_idx == idx {
                    self.recompute_timeout();
                }
            }
            (Some(min_idx), None) => {
                if min_idx == idx {
                    self.recompute_timeout();
                }
            }
        }
        debug_assert_eq!(self.next_timeout(), self.scan_min_timeout());
    }

    pub fn set_top_timer(&mut self, timeout: Option<Time>) {
        let top = self.len() - 1;
        self.set_timer(timeout, top);
    }

    /// Count `delta` down from every armed timer on the chain.
    ///
    /// The uniform subtraction keeps the cached minimum index valid. When
    /// the minimum has already elapsed (a context switch overran it) only
    /// the contexts up to the cached minimum count down; the rest are left
    /// for the tick that handles them, so their delay is not inflated by
    /// time they never saw.
    pub fn elapse(&mut self, delta: Time) {
        let Some(min_idx) = self.next_timeout_idx else {
            return;
        };
        let already_elapsed = self.contexts[min_idx]
            .timeout
            .map_or(false, |t| !t.is_positive());

        for (idx, ctx) in self.contexts[..=min_idx].iter_mut().enumerate() {
            if let Some(timeout) = &mut ctx.timeout {
                debug_assert!(timeout.is_positive() || idx == min_idx);
                *timeout -= delta;
            }
        }
        if already_elapsed {
            return;
        }
        for ctx in &mut self.contexts[min_idx + 1..] {
            if let Some(timeout) = &mut ctx.timeout {
                debug_assert!(timeout.is_positive());
                *timeout -= delta;
            }
        }
    }

    /// Lowest index whose timer has elapsed, if any.
    pub fn find_elapsed_timer(&self) -> Option<usize> {
        let idx = self.next_timeout_idx?;
        let timeout = self.contexts[idx].timeout?;
        (!timeout.is_positive()).then_some(idx)
    }

    /// Split off and return `[idx..]`, keeping `[..idx]`. Both caches are
    /// recomputed. `idx` must be in `1..=len-1`.
    pub fn split(&mut self, idx: usize) -> Result<Chain, SimError> {
        if idx == 0 || idx >= self.len() {
            return Err(SimError::IndexOutOfRange {
                index: idx as isize,
                len: self.len(),
            });
        }
        let tail_contexts = self.contexts.split_off(idx);
        let mut tail = Chain {
            contexts: tail_contexts,
            next_timeout_idx: None,
        };
        tail.recompute_timeout();
        self.recompute_timeout();
        Ok(tail)
    }

    /// Finish every thread on the chain, bottom to top. Contexts that never
    /// ran hold no activation and are skipped.
    pub fn finish(&mut self, now: Time, threads: &mut Threads) {
        for ctx in &self.contexts {
            if ctx.started {
                threads.finish(ctx.thread, now);
            }
        }
    }

    /// Suspend every thread on the chain (it is leaving the core's chain
    /// but may be resumed later).
    pub fn suspend(&self, now: Time, threads: &mut Threads) {
        for ctx in &self.contexts {
            threads.suspend(ctx.thread, now);
        }
    }

    /// Account `delta` of background time to every thread except the top.
    pub fn run_background(&self, now: Time, delta: Time, threads: &mut Threads) {
        let len = self.len();
        for ctx in &self.contexts[..len.saturating_sub(1)] {
            threads.run_background(ctx.thread, now, delta);
        }
    }

    fn recompute_timeout(&mut self) {
        let mut best: Option<(Time, usize)> = None;
        for (idx, ctx) in self.contexts.iter().enumerate() {
            if let Some(timeout) = ctx.timeout {
                if best.map_or(true, |(min, _)| timeout < min) {
                    best = Some((timeout, idx));
                }
            }
        }
        self.next_timeout_idx = best.map(|(_, idx)| idx);
    }

    fn scan_min_timeout(&self) -> Option<Time> {
        self.contexts.iter().filter_map(|ctx| ctx.timeout).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{Thread, ThreadKind};
    use crate::types::ModuleId;

    fn worker_threads(n: usize) -> Threads {
        let mut threads = Threads::default();
        for tid in 0..n {
            threads.add(Thread::new(
                ModuleId(0),
                "m".to_string(),
                tid as u32,
                Time::zero(),
                Some(Time::from_units(10)),
                ThreadKind::Worker,
            ));
        }
        threads
    }

    fn chain_of(n: usize, threads: &Threads) -> Chain {
        let mut chain = Chain::from_thread(ThreadId(0), threads);
        for i in 1..n {
            chain
                .append_chain(Chain::from_thread(ThreadId(i), threads))
                .unwrap();
        }
        chain
    }

    #[test]
    fn cache_follows_set_timer() {
        let threads = worker_threads(3);
        let mut chain = chain_of(3, &threads);
        assert_eq!(chain.next_timeout(), None);

        chain.set_timer(Some(Time::from_units(5)), 1);
        assert_eq!(chain.next_timeout(), Some(Time::from_units(5)));

        // A larger value elsewhere leaves the minimum alone.
        chain.set_timer(Some(Time::from_units(9)), 2);
        assert_eq!(chain.next_timeout(), Some(Time::from_units(5)));

        // A smaller one takes over.
        chain.set_timer(Some(Time::from_units(2)), 0);
        assert_eq!(chain.next_timeout(), Some(Time::from_units(2)));

        // Raising the current minimum forces a rescan.
        chain.set_timer(Some(Time::from_units(20)), 0);
        assert_eq!(chain.next_timeout(), Some(Time::from_units(5)));

        // Clearing the minimum rescans too.
        chain.set_timer(None, 1);
        assert_eq!(chain.next_timeout(), Some(Time::from_units(9)));
        chain.set_timer(None, 2);
        chain.set_timer(None, 0);
        assert_eq!(chain.next_timeout(), None);
    }

    #[test]
    fn set_timer_twice_is_idempotent() {
        let threads = worker_threads(2);
        let mut chain = chain_of(2, &threads);
        chain.set_timer(Some(Time::from_units(4)), 1);
        let before = chain.next_timeout();
        chain.set_timer(Some(Time::from_units(4)), 1);
        assert_eq!(chain.next_timeout(), before);
        assert_eq!(chain.context_at(1).timeout(), Some(Time::from_units(4)));
    }

    #[test]
    fn elapse_counts_all_timers_down() {
        let threads = worker_threads(3);
        let mut chain = chain_of(3, &threads);
        chain.set_timer(Some(Time::from_units(5)), 0);
        chain.set_timer(Some(Time::from_units(3)), 2);

        chain.elapse(Time::from_units(2));
        assert_eq!(chain.context_at(0).timeout(), Some(Time::from_units(3)));
        assert_eq!(chain.context_at(2).timeout(), Some(Time::from_units(1)));
        assert_eq!(chain.next_timeout(), Some(Time::from_units(1)));
        assert_eq!(chain.find_elapsed_timer(), None);

        chain.elapse(Time::from_units(1));
        assert_eq!(chain.find_elapsed_timer(), Some(2));
    }

    #[test]
    fn elapse_zero_is_a_noop() {
        let threads = worker_threads(2);
        let mut chain = chain_of(2, &threads);
        chain.set_timer(Some(Time::from_units(3)), 1);
        chain.elapse(Time::zero());
        assert_eq!(chain.next_timeout(), Some(Time::from_units(3)));
    }

    #[test]
    fn equal_timeouts_elapse_to_lowest_index() {
        let threads = worker_threads(4);
        let mut chain = chain_of(4, &threads);
        chain.set_timer(Some(Time::from_units(3)), 1);
        chain.set_timer(Some(Time::from_units(3)), 3);

        chain.elapse(Time::from_units(3));
        assert_eq!(chain.context_at(1).timeout(), Some(Time::zero()));
        assert_eq!(chain.context_at(3).timeout(), Some(Time::zero()));
        assert_eq!(chain.find_elapsed_timer(), Some(1));
    }

    #[test]
    fn split_and_append_round_trip() {
        let threads = worker_threads(4);
        let mut chain = chain_of(4, &threads);
        chain.set_timer(Some(Time::from_units(7)), 0);
        chain.set_timer(Some(Time::from_units(4)), 2);

        let tail = chain.split(2).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(chain.next_timeout(), Some(Time::from_units(7)));
        assert_eq!(tail.next_timeout(), Some(Time::from_units(4)));
        assert_eq!(tail.bottom_thread(), ThreadId(2));

        chain.append_chain(tail).unwrap();
        assert_eq!(chain.len(), 4);
        assert_eq!(chain.next_timeout(), Some(Time::from_units(4)));
        let ids: Vec<_> = chain.iter_threads().collect();
        assert_eq!(
            ids,
            vec![ThreadId(0), ThreadId(1), ThreadId(2), ThreadId(3)]
        );
    }

    #[test]
    fn split_bounds_are_checked() {
        let threads = worker_threads(2);
        let mut chain = chain_of(2, &threads);
        assert!(chain.split(0).is_err());
        assert!(chain.split(2).is_err());
    }

    #[test]
    fn thread_at_supports_negative_indices() {
        let threads = worker_threads(3);
        let chain = chain_of(3, &threads);
        assert_eq!(chain.thread_at(0).unwrap(), ThreadId(0));
        assert_eq!(chain.thread_at(-1).unwrap(), ThreadId(2));
        assert_eq!(chain.thread_at(-3).unwrap(), ThreadId(0));
        assert!(chain.thread_at(3).is_err());
        assert!(chain.thread_at(-4).is_err());
    }

    #[test]
    fn append_past_depth_cap_fails() {
        let threads = worker_threads(K_MAX + 1);
        let mut chain = Chain::from_thread(ThreadId(0), &threads);
        for i in 1..K_MAX {
            chain
                .append_chain(Chain::from_thread(ThreadId(i), &threads))
                .unwrap();
        }
        let overflow = chain.append_chain(Chain::from_thread(ThreadId(K_MAX), &threads));
        assert!(matches!(overflow, Err(SimError::ChainOverflow { .. })));
    }
}
