//! Register allocation.
//!
//! This module contains data structures and algorithms used for register allocation.

pub mod coloring;
pub mod groups;
pub mod interference;
pub mod intervals;
pub mod linear_scan;
pub mod liveness;
pub mod node;
pub mod spill_area;
pub mod spilling;

mod colour;
mod context;
mod rename;
mod verify;

pub use self::colour::{Assignment, Colour, ColourBudget, ColourKind};
pub use self::context::{
    allocate, AllocationSummary, Analysis, Context, RegisterAllocationStrategy, Restart, Session,
    Solution,
};
pub use self::node::{Node, NodeFlags, NodeInfo, NodeLayout};
