//! Error types for the tapir IR.

/// Structural violations detected by [`crate::Graph::verify`].
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// An operand references a value whose owning operation was erased.
    #[error("operation '{op}' references a value of an erased operation")]
    DeadOperand { op: String },

    /// An operand references a result or argument index that does not exist.
    #[error("operation '{op}' references an out-of-bounds value index")]
    BadValueIndex { op: String },

    /// A live operation is not contained in any block, or its parent link
    /// disagrees with the block that contains it.
    #[error("operation '{op}' is not attached to a block")]
    DetachedOp { op: String },
}
