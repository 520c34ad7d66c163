//! Error types for buffer assignment.
//!
//! All errors are reported against the operation being processed and
//! propagate synchronously to the caller; no rewrite step is left
//! half-applied for a single operand.

/// Failures raised during analysis or rewriting.
#[derive(Debug, thiserror::Error)]
pub enum BufferizeError {
    /// A copy of an unranked tensor was requested.
    #[error("copying of unranked tensors is not implemented (operation '{op}')")]
    UnsupportedRank { op: String },

    /// Buffer type inference needed a default memory space, but none was
    /// configured.
    #[error("could not infer memory space (operation '{op}')")]
    UnknownMemorySpace { op: String },

    /// A shape reification hook returned the wrong number of dynamic
    /// extents for a result.
    #[error(
        "shape reification for '{op}' produced {got} dynamic extents, expected {expected}"
    )]
    ShapeReification {
        op: String,
        expected: usize,
        got: usize,
    },

    /// A tensor-to-buffer reinterpret would change the rank of the value.
    #[error("reinterpret to buffer would change rank ({tensor_rank} to {buffer_rank})")]
    InvalidRewriteRank {
        tensor_rank: usize,
        buffer_rank: usize,
    },

    /// A user-supplied allocation/deallocation/copy callback failed.
    #[error("emission callback failed: {reason}")]
    Callback { reason: String },
}
