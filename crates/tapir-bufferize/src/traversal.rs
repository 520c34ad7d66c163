//! Reverse alias traversal: walking use-def chains backwards through
//! aliasing operands.

use std::collections::HashSet;

use tapir_ir::{Graph, Value};

use crate::interface::BufferRelation;
use crate::state::AnalysisState;

/// Controls which edges [`AnalysisState::find_in_reverse_chain`] follows
/// and which values it reports.
#[derive(Clone, Copy, Debug)]
pub struct TraversalConfig {
    /// Report chain endpoints (values whose traversal stopped without the
    /// condition matching) alongside condition matches.
    pub always_include_leaves: bool,
    /// Continue through opaque operations using the conservative aliasing
    /// answer instead of stopping at them.
    pub follow_unknown_ops: bool,
    /// Follow only edges whose relation is
    /// [`BufferRelation::Equivalent`].
    pub follow_equivalent_only: bool,
    /// Follow only edges whose operand bufferizes in place.
    pub follow_in_place_only: bool,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            always_include_leaves: true,
            follow_unknown_ops: false,
            follow_equivalent_only: false,
            follow_in_place_only: false,
        }
    }
}

impl AnalysisState<'_> {
    /// Walks the reverse aliasing chain from `start` and collects, in
    /// deterministic first-visit order, every value matching `condition`
    /// plus (per the config) the endpoints where the walk stopped.
    ///
    /// Diamond-shaped alias graphs are handled with a visited set, so each
    /// value is expanded at most once and the walk terminates.
    pub fn find_in_reverse_chain(
        &self,
        graph: &Graph,
        start: Value,
        condition: &dyn Fn(&Graph, Value) -> bool,
        config: TraversalConfig,
    ) -> Vec<Value> {
        let mut result = Vec::new();
        let mut in_result = HashSet::new();
        let mut record = |value: Value, result: &mut Vec<Value>| {
            if in_result.insert(value) {
                result.push(value);
            }
        };

        let mut worklist = vec![start];
        let mut visited: HashSet<Value> = worklist.iter().copied().collect();
        while let Some(value) = worklist.pop() {
            if condition(graph, value) {
                record(value, &mut result);
                continue;
            }

            let Some(op) = value.defining_op() else {
                // Region entry arguments end the chain.
                if config.always_include_leaves {
                    record(value, &mut result);
                }
                continue;
            };

            if self.options().bufferizable_op(graph.op(op)).is_none()
                && !config.follow_unknown_ops
            {
                if config.always_include_leaves {
                    record(value, &mut result);
                }
                continue;
            }

            let aliases = self.aliasing_operands(graph, value);
            if aliases.is_empty() {
                if config.always_include_leaves {
                    record(value, &mut result);
                }
                continue;
            }

            for alias in aliases {
                if config.follow_equivalent_only
                    && alias.relation != BufferRelation::Equivalent
                {
                    if config.always_include_leaves {
                        record(value, &mut result);
                    }
                    continue;
                }
                if config.follow_in_place_only && !self.is_in_place(graph, alias.operand) {
                    if config.always_include_leaves {
                        record(value, &mut result);
                    }
                    continue;
                }
                let next = graph.operand_value(alias.operand);
                if visited.insert(next) {
                    worklist.push(next);
                }
            }
        }
        result
    }

    /// The closest values in the reverse chain of `start` whose buffers
    /// hold written data. Endpoints that are merely unknown are not
    /// reported.
    pub fn find_defining_writes(&self, graph: &Graph, start: Value) -> Vec<Value> {
        let config = TraversalConfig {
            always_include_leaves: false,
            ..TraversalConfig::default()
        };
        self.find_in_reverse_chain(
            graph,
            start,
            &|g, v| self.value_writes_memory(g, v),
            config,
        )
    }
}
