//! Register allocation for a GPU shader compiler backend.
//!
//! The allocator maps the virtual registers ("nodes") of a shader program onto
//! the typed hardware register banks of the GPU: primary attributes, shader
//! outputs, internal (GPI) registers and temporaries. It honours per-operand
//! bank legality, groups of registers that must be consecutive, pre-assigned
//! colours for shader inputs and outputs, and spills values to scratch memory
//! when the temporary budget is exceeded.
//!
//! The entry point is [`allocate`], or [`Context::run`] when the same
//! configuration is reused for several programs:
//!
//! ```ignore
//! let mut config = Config::new();
//! config.strategy(Strategy::LinearScan).temps(16);
//! let summary = shader_regalloc::allocate(&mut program, &config)?;
//! ```

pub use cranelift_entity as entity;

pub mod ir;
pub mod regalloc;
pub mod settings;

mod result;

pub use crate::regalloc::{allocate, AllocationSummary, Context};
pub use crate::result::{InternalError, RegallocError, RegallocResult};
pub use crate::settings::{Config, Strategy};

/// Even when trace logging is disabled, the trace macro has a significant performance cost so we
/// disable it by default.
#[macro_export]
macro_rules! trace {
    ($($tt:tt)*) => {
        if cfg!(any(feature = "trace-log", debug_assertions)) {
            ::log::trace!($($tt)*);
        }
    };
}

/// Dynamic check for whether trace logging is enabled.
#[macro_export]
macro_rules! trace_log_enabled {
    () => {
        cfg!(any(feature = "trace-log", debug_assertions))
            && ::log::log_enabled!(::log::Level::Trace)
    };
}
