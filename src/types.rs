//! Newtype wrappers for domain identifiers.
//!
//! Newtypes for thread, module and core identifiers prevent silent id
//! confusion between the different arenas.

use serde::{Deserialize, Serialize};

/// Index of a thread in the thread arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub usize);

/// Index of a module in the module arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub usize);

/// Identifier of a simulated CPU core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoreUid(pub u32);

/// How a context relates to the one below it on a scheduling chain.
///
/// The bottom entry of a full chain is always `Child` (of the synthetic
/// root above the kernel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    /// Both threads belong to the same module.
    Sibling,
    /// The upper thread belongs to a child module of the lower one.
    Child,
}
