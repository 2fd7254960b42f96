//! Fatal error taxonomy of the simulator.
//!
//! None of these are recoverable: the world emits a failure event and stops
//! the cores. Deterministic reproduction is the simulator's value, so a
//! diagnostic beats a guess.

use std::io;

use thiserror::Error;

use crate::context::K_MAX;

#[derive(Debug, Error)]
pub enum SimError {
    /// Appending would exceed the chain depth cap; the hierarchy is too deep.
    #[error("context chain overflow: depth {depth} exceeds the limit of {K_MAX}")]
    ChainOverflow { depth: usize },

    /// A chain was indexed out of range.
    #[error("context index {index} out of range for chain of length {len}")]
    IndexOutOfRange { index: isize, len: usize },

    /// A computation produced a request with an illegal payload.
    #[error("thread {module}-{tid} issued an illegal request: {reason}")]
    MalformedRequest {
        module: String,
        tid: u32,
        reason: String,
    },

    /// Under kernel-only timer dispatch, only the kernel may arm timers.
    #[error("timer request from non-kernel thread {module}-{tid}")]
    ForeignTimer { module: String, tid: u32 },

    /// A thread was activated while already live on a chain.
    #[error("thread {module}-{tid} is already active on a scheduling chain")]
    ThreadAliased { module: String, tid: u32 },

    /// Unbounded execution with no timer anywhere on the chain.
    #[error("core hang: unyielding execution without a timer set")]
    Hang,

    /// The reply protocol between the core and a computation was violated.
    #[error("thread {module}-{tid} computation resumed with an unexpected reply")]
    ProtocolViolation { module: String, tid: u32 },

    /// An event sink failed to accept an event.
    #[error("event sink failure")]
    Sink(#[from] io::Error),
}
