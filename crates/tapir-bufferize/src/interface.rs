//! The capability interface: per-operation-kind knowledge about memory
//! behavior.
//!
//! Implementations are registered in an [`OpRegistry`] keyed by
//! [`OpKind`]; operations with no registered implementation are opaque
//! and receive maximally conservative answers from the analysis state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tapir_ir::{BufferType, Graph, OpId, OpKind, OpOperand, Value};

use crate::buffer_type::BufferTypeMap;
use crate::error::BufferizeError;
use crate::options::BufferizationOptions;
use crate::state::AnalysisState;

/// How two aliasing SSA values relate as memory regions.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BufferRelation {
    /// The values are backed by the exact same region.
    Equivalent,
    /// Some aliasing relationship holds, but nothing more is known
    /// (a sub-view, an overlapping view, or a maybe-alias).
    Unknown,
}

/// One result value that may alias a queried operand.
#[derive(Clone, Copy, Debug)]
pub struct AliasingResult {
    pub result: Value,
    pub relation: BufferRelation,
    /// `false` when the aliasing itself is conditional (may or may not
    /// materialize at runtime).
    pub definite: bool,
}

/// One operand slot that may alias a queried result.
#[derive(Clone, Copy, Debug)]
pub struct AliasingOperand {
    pub operand: OpOperand,
    pub relation: BufferRelation,
    pub definite: bool,
}

/// Memory behavior of one operation kind.
///
/// Only the forward aliasing direction and the read/write predicates are
/// mandatory; everything else has a conservative default.
pub trait BufferizableOp: fmt::Debug + Send + Sync {
    /// Result values that may share memory with `operand` after buffer
    /// assignment. An empty vector means the operand's buffer is consumed
    /// without surfacing in any result.
    fn aliasing_results(
        &self,
        graph: &Graph,
        operand: OpOperand,
        state: &AnalysisState,
    ) -> Vec<AliasingResult>;

    /// Operand slots that may share memory with `result`, which may also
    /// be an entry argument of one of this operation's regions. The default
    /// inverts [`BufferizableOp::aliasing_results`] by scanning the
    /// operation's tensor operands (and answers nothing for arguments).
    fn aliasing_operands(
        &self,
        graph: &Graph,
        result: Value,
        state: &AnalysisState,
    ) -> Vec<AliasingOperand> {
        detail::invert_aliasing_results(graph, result, state)
    }

    /// Returns `true` if the operation reads through `operand`'s future
    /// buffer.
    fn reads_memory(&self, graph: &Graph, operand: OpOperand, state: &AnalysisState) -> bool;

    /// Returns `true` if the operation writes through `operand`'s future
    /// buffer.
    fn writes_memory(&self, graph: &Graph, operand: OpOperand, state: &AnalysisState) -> bool;

    /// Returns `true` if the operation only forwards `operand`'s buffer
    /// (or a view of it) without reading or writing, like a slice or cast.
    fn is_pure_alias(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }

    /// Returns `true` if `result`'s future buffer holds data written by
    /// this operation (as opposed to forwarded operand contents).
    fn result_writes_memory(&self, graph: &Graph, result: Value, state: &AnalysisState) -> bool {
        detail::default_result_writes_memory(graph, result, state)
    }

    /// Infers the buffer type `value` will take. `pinned` holds types
    /// already decided for values currently being inferred, breaking
    /// cycles through region arguments.
    fn buffer_type(
        &self,
        graph: &Graph,
        value: Value,
        options: &BufferizationOptions,
        pinned: &BufferTypeMap,
    ) -> Result<BufferType, BufferizeError> {
        detail::default_buffer_type(graph, value, options, pinned)
    }

    /// Returns `true` if the given region's body may execute more than
    /// once per execution of the operation (a loop body).
    fn is_repeated_region(&self, _graph: &Graph, _op: OpId, _region: u32) -> bool {
        false
    }

    /// Returns `true` if `result` is backed by an allocation made by this
    /// operation itself.
    fn allocates_result(&self, _graph: &Graph, _result: Value) -> bool {
        false
    }

    /// Returns `true` if the operation forwards its operands out of the
    /// enclosing region or function, like a return or yield.
    fn is_return_like(&self) -> bool {
        false
    }

    /// Materializes index values for the dynamic extents of `result`, in
    /// dimension order, without inserting per-dimension probe operations.
    /// `None` defers to generic `tensor.dim` synthesis.
    fn reify_result_shape(&self, _graph: &mut Graph, _result: Value) -> Option<Vec<Value>> {
        None
    }
}

/// Registry mapping operation kinds to their capability implementations.
#[derive(Clone, Default)]
pub struct OpRegistry {
    map: HashMap<OpKind, Arc<dyn BufferizableOp>>,
}

impl OpRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the implementation for `kind`.
    pub fn register(&mut self, kind: OpKind, imp: Arc<dyn BufferizableOp>) {
        self.map.insert(kind, imp);
    }

    /// Looks up the implementation for `kind`.
    pub fn get(&self, kind: OpKind) -> Option<&dyn BufferizableOp> {
        self.map.get(&kind).map(Arc::as_ref)
    }

    /// Returns `true` if `kind` has a registered implementation.
    pub fn is_registered(&self, kind: OpKind) -> bool {
        self.map.contains_key(&kind)
    }
}

impl fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.map.keys().map(|k| k.0).collect();
        kinds.sort_unstable();
        f.debug_struct("OpRegistry").field("kinds", &kinds).finish()
    }
}

pub(crate) mod detail {
    use super::*;
    use crate::buffer_type::{buffer_type_with_pinned, unknown_buffer_type};
    use crate::traversal::TraversalConfig;

    /// Conservative answer for opaque operations: every tensor result of
    /// the owner may alias the operand, relation unknown, not definite.
    pub(crate) fn unknown_aliasing_results(
        graph: &Graph,
        operand: OpOperand,
    ) -> Vec<AliasingResult> {
        graph
            .results_of(operand.op)
            .into_iter()
            .filter(|&r| graph.value_type(r).is_tensor())
            .map(|result| AliasingResult {
                result,
                relation: BufferRelation::Unknown,
                definite: false,
            })
            .collect()
    }

    /// Conservative answer for opaque operations: every tensor operand of
    /// the defining operation may alias the result. Region entry arguments
    /// have no defining operation and alias nothing.
    pub(crate) fn unknown_aliasing_operands(graph: &Graph, result: Value) -> Vec<AliasingOperand> {
        let Some(op) = result.defining_op() else {
            return Vec::new();
        };
        let operation = graph.op(op);
        (0..operation.operands.len())
            .map(|i| OpOperand {
                op,
                index: i as u32,
            })
            .filter(|&o| graph.value_type(graph.operand_value(o)).is_tensor())
            .map(|operand| AliasingOperand {
                operand,
                relation: BufferRelation::Unknown,
                definite: false,
            })
            .collect()
    }

    /// Derives the reverse aliasing direction from the forward one.
    pub(crate) fn invert_aliasing_results(
        graph: &Graph,
        result: Value,
        state: &AnalysisState,
    ) -> Vec<AliasingOperand> {
        let Some(op) = result.defining_op() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for i in 0..graph.op(op).operands.len() {
            let operand = OpOperand {
                op,
                index: i as u32,
            };
            if !graph.value_type(graph.operand_value(operand)).is_tensor() {
                continue;
            }
            for alias in state.aliasing_results(graph, operand) {
                if alias.result == result {
                    out.push(AliasingOperand {
                        operand,
                        relation: alias.relation,
                        definite: alias.definite,
                    });
                }
            }
        }
        out
    }

    /// Default for [`BufferizableOp::result_writes_memory`].
    ///
    /// A result with no aliasing operands is freshly defined by the
    /// operation. A result aliasing a written operand inherits that write.
    /// Otherwise the result holds written data only if some write to the
    /// forwarded memory happens inside the operation's own regions.
    pub(crate) fn default_result_writes_memory(
        graph: &Graph,
        result: Value,
        state: &AnalysisState,
    ) -> bool {
        let aliases = state.aliasing_operands(graph, result);
        if aliases.is_empty() {
            return true;
        }
        if aliases
            .iter()
            .any(|a| state.writes_memory(graph, a.operand))
        {
            return true;
        }
        let Some(def) = result.defining_op() else {
            return false;
        };
        let config = TraversalConfig {
            always_include_leaves: false,
            ..TraversalConfig::default()
        };
        for alias in &aliases {
            let source = graph.operand_value(alias.operand);
            let writes = state.find_in_reverse_chain(
                graph,
                source,
                &|g, v| {
                    g.is_ancestor(def, g.owner_of(v)) && state.value_writes_memory(g, v)
                },
                config,
            );
            if !writes.is_empty() {
                return true;
            }
        }
        false
    }

    /// Default for [`BufferizableOp::buffer_type`]: forward the type of an
    /// equivalent operand if there is exactly one such candidate, fall back
    /// to a fully dynamic layout in the default storage space otherwise.
    pub(crate) fn default_buffer_type(
        graph: &Graph,
        value: Value,
        options: &BufferizationOptions,
        pinned: &BufferTypeMap,
    ) -> Result<BufferType, BufferizeError> {
        if value.defining_op().is_some() {
            let state = AnalysisState::new(options);
            let aliases = state.aliasing_operands(graph, value);
            if let [alias] = aliases.as_slice() {
                if alias.relation == BufferRelation::Equivalent {
                    return buffer_type_with_pinned(
                        graph,
                        graph.operand_value(alias.operand),
                        options,
                        pinned,
                    );
                }
            }
        }
        unknown_buffer_type(graph, value, options, pinned)
    }
}
