//! Buffer assignment for the tapir IR.
//!
//! Rewrites value-semantics tensor programs into explicit-buffer form:
//! a conservative alias analysis answers where copies are unavoidable,
//! a conflict resolver inserts the allocations and copies, and buffer
//! type inference decides the concrete buffer each tensor becomes.
//! Per-operation knowledge lives behind the [`BufferizableOp`] trait;
//! operations without a registered implementation are treated as opaque
//! and handled maximally conservatively.

pub mod buffer_type;
pub mod error;
pub mod interface;
pub mod ops;
pub mod options;
pub mod resolve;
pub mod state;
pub mod traversal;

#[cfg(test)]
pub(crate) mod fixtures;

pub use buffer_type::{buffer_type, buffer_type_with_pinned, BufferTypeMap};
pub use error::BufferizeError;
pub use interface::{AliasingOperand, AliasingResult, BufferRelation, BufferizableOp, OpRegistry};
pub use options::{
    AllocationFn, BufferizationOptions, CopyFn, DeallocationFn, FunctionArgLayout, OpFilter,
    OpPredicate, StateInitFn,
};
pub use resolve::{
    allocate_tensor_for_value, bufferize_op, get_buffer, replace_op_with_bufferized_values,
    resolve_op_operand_conflicts, InsertPos,
};
pub use state::{AnalysisState, InPlaceDecisions};
pub use traversal::TraversalConfig;

use tapir_ir::Graph;

/// A named graph transformation.
pub trait Pass: std::fmt::Debug {
    fn name(&self) -> &str;

    /// Runs the pass. Returns `true` if the graph changed.
    fn run(
        &self,
        graph: &mut Graph,
        options: &BufferizationOptions,
    ) -> Result<bool, BufferizeError>;
}

/// Inserts the allocations and copies required to make every operand of
/// every allowed operation rewritable in place.
///
/// Operations are visited in definition order over a snapshot of the
/// graph, so copies inserted for one operation are not revisited.
#[derive(Debug, Default)]
pub struct TensorCopyInsertion;

impl Pass for TensorCopyInsertion {
    fn name(&self) -> &str {
        "tensor-copy-insertion"
    }

    fn run(
        &self,
        graph: &mut Graph,
        options: &BufferizationOptions,
    ) -> Result<bool, BufferizeError> {
        let state = AnalysisState::new(options);
        let worklist: Vec<_> = graph
            .walk()
            .into_iter()
            .filter(|&id| options.bufferizable_op(graph.op(id)).is_some())
            .collect();
        let mut changed = false;
        for id in worklist {
            if !graph.is_live(id) {
                continue;
            }
            changed |= resolve::resolve_op_operand_conflicts(graph, id, &state)?;
        }
        log::debug!(
            "{}: {}",
            self.name(),
            if changed { "inserted copies" } else { "no change" }
        );
        Ok(changed)
    }
}
