//! Result and error types representing the outcome of allocating a program.

use crate::regalloc::Node;
use thiserror::Error;

/// A register allocation error.
///
/// Allocation either succeeds completely or fails with one of these. There is
/// no partial result: an incorrect assignment would corrupt the emitted
/// program, so every failure surfaces to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegallocError {
    /// The linear-scan engine found no colour for a node that is not a
    /// temporary. Primary-attribute and output nodes cannot be spilled.
    #[error("no colour available for non-temporary node {node}")]
    NonTemporaryUncolourable {
        /// The node that could not be coloured.
        node: Node,
    },

    /// A node could not be coloured and there is nothing left to spill.
    #[error("out of registers while colouring {node}")]
    OutOfRegisters {
        /// The node that could not be coloured.
        node: Node,
    },

    /// Internal registers are never spilled, so running out of them is fatal.
    #[error("internal registers exhausted while colouring {node}")]
    InternalRegistersExhausted {
        /// The internal node that could not be coloured.
        node: Node,
    },

    /// The restart loop did not converge.
    #[error("register allocation did not converge after {limit} iterations")]
    IterationLimit {
        /// The configured iteration bound.
        limit: u32,
    },

    /// The post-allocation verifier rejected the assignment.
    #[error("verifier errors: {0}")]
    Verifier(String),

    /// An internal error.
    ///
    /// This error means that an internal invariant was not met and usually
    /// implies an allocator bug or malformed input.
    #[error("register allocator internal error: {0}")]
    Internal(#[from] InternalError),
}

/// An internal error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InternalError {
    /// A register group chain is not consistent.
    #[error("inconsistent register group at {0}")]
    GroupInconsistent(Node),
    /// Two alignment requirements on one group contradict each other.
    #[error("incompatible alignment requirements in group containing {0}")]
    AlignmentConflict(Node),
    /// A fixed colour is still unusable after its binding was relocated.
    #[error("fixed colour for {0} cannot be satisfied")]
    FixedColourConflict(Node),
    /// A fixed binding names a register outside the hardware bank.
    #[error("fixed binding for {0} is outside its register bank")]
    FixedOutOfRange(Node),
    /// An instruction names a register outside the declared register file.
    #[error("operand {0} is outside the declared register file")]
    OperandOutOfRange(String),
    /// A node was renamed without having received a colour.
    #[error("{0} reached the rename pass without a colour")]
    Uncoloured(Node),
    /// A program point that the allocator relies on no longer exists.
    #[error("instruction {0} is not in the layout")]
    MissingInstruction(String),
}

impl RegallocError {
    pub(crate) const fn group_inconsistent(node: Node) -> Self {
        Self::Internal(InternalError::GroupInconsistent(node))
    }

    pub(crate) const fn alignment_conflict(node: Node) -> Self {
        Self::Internal(InternalError::AlignmentConflict(node))
    }

    pub(crate) const fn fixed_colour_conflict(node: Node) -> Self {
        Self::Internal(InternalError::FixedColourConflict(node))
    }

    pub(crate) const fn fixed_out_of_range(node: Node) -> Self {
        Self::Internal(InternalError::FixedOutOfRange(node))
    }

    pub(crate) const fn uncoloured(node: Node) -> Self {
        Self::Internal(InternalError::Uncoloured(node))
    }
}

/// A convenient alias for a `Result` that uses `RegallocError` as the error type.
pub type RegallocResult<T> = Result<T, RegallocError>;
