//! The request protocol between computations and the core.
//!
//! A computation (thread or scheduler) suspends by producing exactly one
//! `Request`; the core answers it and the computation continues. Producing
//! a request is the only suspension point there is.

use crate::context::Chain;
use crate::time::Time;

/// One suspension's worth of intent, handed to the core.
pub enum Request {
    /// Ask for the current simulated time. Costs nothing.
    CurrentTime,
    /// Splice a sub-chain on top of the core's chain and follow control
    /// into its top context.
    Resume(Chain),
    /// Nothing to do; surrender the remaining budget upward.
    Idle,
    /// Consume up to the given span of processor time at the top context.
    /// `None` runs until a timer elapses or the workload runs out.
    Execute(Option<Time>),
    /// Arm (or clear, with `None`) the top context's timer.
    Timer(Option<Time>),
    /// Terminal: the thread's workload is complete.
    Finish,
}

impl Request {
    /// Short tag for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Request::CurrentTime => "current_time",
            Request::Resume(_) => "resume",
            Request::Idle => "idle",
            Request::Execute(_) => "execute",
            Request::Timer(_) => "timer",
            Request::Finish => "finish",
        }
    }
}
