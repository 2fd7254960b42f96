//! Round-robin, expressed as a multi-level feedback queue with a single
//! level (which round-robins its active queue anyway).

use super::Mlfq;
use crate::time::Time;

pub struct RoundRobin;

impl RoundRobin {
    pub fn new(time_slice: Option<Time>) -> Mlfq {
        Mlfq::new(vec![time_slice], None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::testutil::{picked_thread, register_all, worker_arena};
    use crate::sched::{Decision, Scheduler};
    use crate::types::ThreadId;

    #[test]
    fn rotates_through_ready_threads() {
        let threads = worker_arena(&[(0, Some(9)), (0, Some(9)), (0, Some(9))]);
        let mut sched = RoundRobin::new(Some(Time::from_units(3)));
        register_all(&mut sched, &threads);

        let mut now = Time::zero();
        let mut order = Vec::new();
        for _ in 0..4 {
            let decision = sched.pick(now, Some(Time::from_units(3)), &threads);
            order.push(picked_thread(&decision).unwrap());
            let Decision::Run { chain, .. } = decision else {
                panic!("expected a dispatch");
            };
            now += Time::from_units(3);
            sched.chain_returned(chain);
        }
        assert_eq!(
            order,
            vec![ThreadId(0), ThreadId(1), ThreadId(2), ThreadId(0)]
        );
    }
}
