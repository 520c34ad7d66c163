//! The analysis state: a query façade over the capability registry.
//!
//! Every query degrades to a maximally conservative answer when the
//! operation involved is opaque (unregistered or filtered out), so
//! callers never need to special-case unknown operations.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};

use tapir_ir::{Graph, OpId, OpOperand, Value};

use crate::interface::{detail, AliasingOperand, AliasingResult};
use crate::ops;
use crate::options::BufferizationOptions;

/// Explicit per-operand in-place decisions produced by a prior analysis.
///
/// Installed as a state extension (typically through a state
/// initializer), these override the default in-place policy of
/// [`AnalysisState::is_in_place`].
#[derive(Debug, Default)]
pub struct InPlaceDecisions {
    decisions: HashMap<OpOperand, bool>,
}

impl InPlaceDecisions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a decision for one operand slot.
    pub fn set(&mut self, operand: OpOperand, in_place: bool) {
        self.decisions.insert(operand, in_place);
    }

    /// The recorded decision, if any.
    pub fn get(&self, operand: OpOperand) -> Option<bool> {
        self.decisions.get(&operand).copied()
    }
}

/// Read-only alias and access queries against a graph, parameterized by
/// one [`BufferizationOptions`].
///
/// The state holds no reference to the graph; each query takes it as an
/// argument, so rewrites can interleave with queries freely.
pub struct AnalysisState<'a> {
    options: &'a BufferizationOptions,
    extensions: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl<'a> AnalysisState<'a> {
    /// Creates a state and runs the configured state initializers.
    pub fn new(options: &'a BufferizationOptions) -> Self {
        let mut state = Self {
            options,
            extensions: HashMap::new(),
        };
        for init in &options.state_initializers {
            init(&mut state);
        }
        state
    }

    /// The configuration this state answers queries under.
    pub fn options(&self) -> &'a BufferizationOptions {
        self.options
    }

    /// Stores extension data, keyed by type. Replaces any previous value
    /// of the same type.
    pub fn insert_extension<T: Any + Send>(&mut self, ext: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(ext));
    }

    /// Retrieves extension data by type.
    pub fn extension<T: Any>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref())
    }

    /// Mutable access to extension data by type.
    pub fn extension_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|b| b.downcast_mut())
    }

    /// Result values that may share memory with `operand`.
    pub fn aliasing_results(&self, graph: &Graph, operand: OpOperand) -> Vec<AliasingResult> {
        if let Some(imp) = self.options.bufferizable_op(graph.op(operand.op)) {
            return imp.aliasing_results(graph, operand, self);
        }
        detail::unknown_aliasing_results(graph, operand)
    }

    /// Operand slots that may share memory with `value`. Dispatches to the
    /// owning operation's implementation, so region entry arguments (loop
    /// iteration values, boundary arguments) can be answered too.
    pub fn aliasing_operands(&self, graph: &Graph, value: Value) -> Vec<AliasingOperand> {
        let owner = graph.owner_of(value);
        if let Some(imp) = self.options.bufferizable_op(graph.op(owner)) {
            return imp.aliasing_operands(graph, value, self);
        }
        detail::unknown_aliasing_operands(graph, value)
    }

    /// Returns `true` if the owning operation reads through `operand`'s
    /// future buffer. Opaque operations are assumed to read.
    pub fn reads_memory(&self, graph: &Graph, operand: OpOperand) -> bool {
        match self.options.bufferizable_op(graph.op(operand.op)) {
            Some(imp) => imp.reads_memory(graph, operand, self),
            None => true,
        }
    }

    /// Returns `true` if the owning operation writes through `operand`'s
    /// future buffer. Opaque operations are assumed to write.
    pub fn writes_memory(&self, graph: &Graph, operand: OpOperand) -> bool {
        match self.options.bufferizable_op(graph.op(operand.op)) {
            Some(imp) => imp.writes_memory(graph, operand, self),
            None => true,
        }
    }

    /// Returns `true` if the owning operation only forwards `operand`'s
    /// buffer. Opaque operations never qualify.
    pub fn is_pure_alias(&self, graph: &Graph, operand: OpOperand) -> bool {
        match self.options.bufferizable_op(graph.op(operand.op)) {
            Some(imp) => imp.is_pure_alias(graph, operand, self),
            None => false,
        }
    }

    /// Returns `true` if `value`'s future buffer holds data written by its
    /// owner. Region arguments and results of opaque operations are
    /// assumed written.
    pub fn value_writes_memory(&self, graph: &Graph, value: Value) -> bool {
        let Some(op) = value.defining_op() else {
            return true;
        };
        match self.options.bufferizable_op(graph.op(op)) {
            Some(imp) => imp.result_writes_memory(graph, value, self),
            None => true,
        }
    }

    /// Returns `true` if `value` is read, directly or through a chain of
    /// pure-alias forwards.
    pub fn is_value_read(&self, graph: &Graph, value: Value) -> bool {
        debug_assert!(graph.value_type(value).is_tensor());
        let mut worklist: Vec<OpOperand> = graph.uses_of(value);
        let mut visited: HashSet<OpOperand> = worklist.iter().copied().collect();
        while let Some(operand) = worklist.pop() {
            if self.reads_memory(graph, operand) {
                return true;
            }
            if self.is_pure_alias(graph, operand) {
                for alias in self.aliasing_results(graph, operand) {
                    for use_ in graph.uses_of(alias.result) {
                        if visited.insert(use_) {
                            worklist.push(use_);
                        }
                    }
                }
            }
        }
        false
    }

    /// Returns `true` if no private copy is needed for `operand` even
    /// though the use may clobber shared memory.
    pub fn can_omit_copy(&self, graph: &Graph, operand: OpOperand) -> bool {
        let value = graph.operand_value(operand);
        if self.has_undefined_contents(graph, value) {
            return true;
        }
        let reads = self.reads_memory(graph, operand);
        if self.writes_memory(graph, operand) && !reads {
            // Full overwrite; the previous contents are dead here.
            return true;
        }
        if !reads
            && !self
                .aliasing_results(graph, operand)
                .iter()
                .any(|a| self.is_value_read(graph, a.result))
        {
            return true;
        }
        false
    }

    /// Returns `true` if `operand` can reuse its incoming buffer in place.
    ///
    /// An explicit [`InPlaceDecisions`] entry wins. Otherwise,
    /// reinterpret-to-buffer operations are always in place and everything
    /// else is in place exactly when it does not write.
    pub fn is_in_place(&self, graph: &Graph, operand: OpOperand) -> bool {
        if let Some(decision) = self
            .extension::<InPlaceDecisions>()
            .and_then(|d| d.get(operand))
        {
            return decision;
        }
        if graph.op(operand.op).kind == ops::TO_BUFFER {
            return true;
        }
        !self.writes_memory(graph, operand)
    }

    /// Returns `true` if `value`'s buffer may outlive its defining block
    /// (reaches a return-like operation or a reinterpret-to-buffer).
    ///
    /// The answer is precise only for results of allocating operations;
    /// any other value is conservatively considered yielded. Uses owned
    /// by opaque operations are skipped: whoever rewrites those later is
    /// responsible for the values they forward.
    pub fn is_yielded(&self, graph: &Graph, value: Value) -> bool {
        let allocated = value.defining_op().is_some_and(|op| {
            self.options
                .registry
                .get(graph.op(op).kind)
                .is_some_and(|imp| imp.allocates_result(graph, value))
        });
        if !allocated {
            return true;
        }
        let mut worklist: Vec<OpOperand> = graph.uses_of(value);
        let mut visited: HashSet<OpOperand> = worklist.iter().copied().collect();
        while let Some(operand) = worklist.pop() {
            let op = graph.op(operand.op);
            let Some(imp) = self.options.bufferizable_op(op) else {
                continue;
            };
            if op.kind == ops::TO_BUFFER || imp.is_return_like() {
                return true;
            }
            for alias in imp.aliasing_results(graph, operand, self) {
                for use_ in graph.uses_of(alias.result) {
                    if visited.insert(use_) {
                        worklist.push(use_);
                    }
                }
            }
        }
        false
    }

    /// Returns `true` if the two values are known to share the exact same
    /// buffer. Without a prior analysis there is no such knowledge.
    pub fn are_equivalent(&self, _graph: &Graph, _a: Value, _b: Value) -> bool {
        false
    }

    /// Returns `true` if the two values may share memory. Without a prior
    /// analysis, any pair may.
    pub fn may_alias(&self, _graph: &Graph, _a: Value, _b: Value) -> bool {
        true
    }

    /// Returns `true` if `value`'s contents are known to be undefined
    /// (never initialized). Without a prior analysis, nothing is.
    pub fn has_undefined_contents(&self, _graph: &Graph, _value: Value) -> bool {
        false
    }

    /// The innermost region enclosing `op` whose body may execute more
    /// than once, with its owning operation.
    pub fn enclosing_repetitive_region_of_op(
        &self,
        graph: &Graph,
        op: OpId,
    ) -> Option<(OpId, u32)> {
        let mut cur = graph.parent_of(op);
        while let Some((owner, region)) = cur {
            if let Some(imp) = self.options.bufferizable_op(graph.op(owner)) {
                if imp.is_repeated_region(graph, owner, region) {
                    return Some((owner, region));
                }
            }
            cur = graph.parent_of(owner);
        }
        None
    }

    /// The innermost repetitive region strictly enclosing `owner`'s
    /// `region`-th region.
    pub fn next_enclosing_repetitive_region(
        &self,
        graph: &Graph,
        owner: OpId,
        _region: u32,
    ) -> Option<(OpId, u32)> {
        self.enclosing_repetitive_region_of_op(graph, owner)
    }

    /// The innermost repetitive region enclosing `value`. For an entry
    /// argument of a repetitive region, that region itself counts.
    pub fn enclosing_repetitive_region_of_value(
        &self,
        graph: &Graph,
        value: Value,
    ) -> Option<(OpId, u32)> {
        if let Value::Argument { op, region, .. } = value {
            if let Some(imp) = self.options.bufferizable_op(graph.op(op)) {
                if imp.is_repeated_region(graph, op, region) {
                    return Some((op, region));
                }
            }
        }
        self.enclosing_repetitive_region_of_op(graph, graph.owner_of(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, READ, VIEW, WRITE};
    use crate::interface::BufferRelation;
    use tapir_ir::{OpKind, Operation, Region, ValueType};

    #[test]
    fn opaque_ops_get_conservative_answers() {
        let mut g = Graph::new();
        let src = fixtures::source(&mut g);
        let opaque = g.append_top(
            Operation::new(OpKind("mystery.op"))
                .with_operand(src)
                .with_result(fixtures::tensor_4()),
        );
        let options = fixtures::options();
        let state = AnalysisState::new(&options);

        let operand = OpOperand { op: opaque, index: 0 };
        assert!(state.reads_memory(&g, operand));
        assert!(state.writes_memory(&g, operand));
        assert!(!state.is_pure_alias(&g, operand));

        let aliases = state.aliasing_results(&g, operand);
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].relation, BufferRelation::Unknown);
        assert!(!aliases[0].definite);
        assert!(state.value_writes_memory(&g, Value::result(opaque, 0)));
    }

    #[test]
    fn filtered_ops_look_opaque() {
        let mut g = Graph::new();
        let src = fixtures::source(&mut g);
        let write = g.append_top(
            Operation::new(WRITE)
                .with_operand(src)
                .with_result(fixtures::tensor_4()),
        );
        let mut options = fixtures::options();
        options.filter.deny_kind(WRITE);
        let state = AnalysisState::new(&options);

        // The registered implementation would say "no read"; the filter
        // forces the conservative answer instead.
        assert!(state.reads_memory(&g, OpOperand { op: write, index: 0 }));
    }

    #[test]
    fn is_value_read_chases_pure_aliases() {
        let mut g = Graph::new();
        let src = fixtures::source(&mut g);
        let view = g.append_top(
            Operation::new(VIEW)
                .with_operand(src)
                .with_result(fixtures::tensor_4()),
        );
        let options = fixtures::options();
        let state = AnalysisState::new(&options);

        // No reader yet.
        assert!(!state.is_value_read(&g, src));

        g.append_top(Operation::new(READ).with_operand(Value::result(view, 0)));
        assert!(state.is_value_read(&g, src));
    }

    #[test]
    fn full_overwrite_can_omit_copy() {
        let mut g = Graph::new();
        let src = fixtures::source(&mut g);
        let fill = g.append_top(
            Operation::new(fixtures::FILL)
                .with_operand(src)
                .with_result(fixtures::tensor_4()),
        );
        let options = fixtures::options();
        let state = AnalysisState::new(&options);
        assert!(state.can_omit_copy(&g, OpOperand { op: fill, index: 0 }));

        // A write that also reads cannot omit the copy.
        let write = g.append_top(
            Operation::new(WRITE)
                .with_operand(src)
                .with_result(fixtures::tensor_4()),
        );
        assert!(!state.can_omit_copy(&g, OpOperand { op: write, index: 0 }));
    }

    #[test]
    fn unused_result_can_omit_copy() {
        let mut g = Graph::new();
        let src = fixtures::source(&mut g);
        // A pure view that writes nothing and whose result nobody reads.
        let view = g.append_top(
            Operation::new(VIEW)
                .with_operand(src)
                .with_result(fixtures::tensor_4()),
        );
        let options = fixtures::options();
        let state = AnalysisState::new(&options);
        assert!(state.can_omit_copy(&g, OpOperand { op: view, index: 0 }));
    }

    #[test]
    fn yield_detection_is_precise_for_allocations() {
        let mut g = Graph::new();
        let alloc = g.append_top(fixtures::alloc_4());
        let other = g.append_top(fixtures::alloc_4());
        g.append_top(Operation::new(crate::ops::YIELD).with_operand(Value::result(other, 0)));

        let options = fixtures::options();
        let state = AnalysisState::new(&options);
        assert!(!state.is_yielded(&g, Value::result(alloc, 0)));
        assert!(state.is_yielded(&g, Value::result(other, 0)));

        // Non-allocated values are conservatively yielded.
        let opaque = g.append_top(
            Operation::new(OpKind("mystery.op")).with_result(fixtures::tensor_4()),
        );
        let src = Value::result(opaque, 0);
        assert!(state.is_yielded(&g, src));
    }

    #[test]
    fn repetitive_region_lookup_walks_parents() {
        let mut g = Graph::new();
        let loop_op = g.append_top(
            Operation::new(fixtures::LOOP).with_region(Region::new(vec![fixtures::tensor_4()])),
        );
        let inner = g.append_in_region(
            loop_op,
            0,
            Operation::new(READ).with_operand(Value::argument(loop_op, 0, 0)),
        );

        let options = fixtures::options();
        let state = AnalysisState::new(&options);
        assert_eq!(
            state.enclosing_repetitive_region_of_op(&g, inner),
            Some((loop_op, 0))
        );
        assert_eq!(
            state.enclosing_repetitive_region_of_value(&g, Value::argument(loop_op, 0, 0)),
            Some((loop_op, 0))
        );
        assert_eq!(state.enclosing_repetitive_region_of_op(&g, loop_op), None);
        // "Next" skips the given region itself, even when repetitive.
        assert_eq!(state.next_enclosing_repetitive_region(&g, loop_op, 0), None);
    }

    #[test]
    fn explicit_decisions_override_in_place_policy() {
        let mut g = Graph::new();
        let src = fixtures::source(&mut g);
        let view = g.append_top(
            Operation::new(VIEW)
                .with_operand(src)
                .with_result(fixtures::tensor_4()),
        );
        let operand = OpOperand { op: view, index: 0 };

        let options = fixtures::options();
        let mut state = AnalysisState::new(&options);
        // Default policy: a non-writing operand is in place.
        assert!(state.is_in_place(&g, operand));

        let mut decisions = InPlaceDecisions::new();
        decisions.set(operand, false);
        state.insert_extension(decisions);
        assert!(!state.is_in_place(&g, operand));
    }

    #[test]
    fn extensions_are_typed_storage() {
        #[derive(Debug, PartialEq)]
        struct Marker(u32);

        let options = fixtures::options();
        let mut state = AnalysisState::new(&options);
        assert!(state.extension::<Marker>().is_none());
        state.insert_extension(Marker(7));
        assert_eq!(state.extension::<Marker>(), Some(&Marker(7)));
        state.extension_mut::<Marker>().unwrap().0 = 9;
        assert_eq!(state.extension::<Marker>(), Some(&Marker(9)));
    }

    #[test]
    fn state_initializers_run_on_construction() {
        #[derive(Debug)]
        struct Seeded;

        let mut options = fixtures::options();
        options
            .state_initializers
            .push(Box::new(|state| state.insert_extension(Seeded)));
        let state = AnalysisState::new(&options);
        assert!(state.extension::<Seeded>().is_some());
    }

    #[test]
    fn value_type_of_argument() {
        let mut g = Graph::new();
        let loop_op = g.append_top(
            Operation::new(fixtures::LOOP).with_region(Region::new(vec![ValueType::Index])),
        );
        assert!(!g.value_type(Value::argument(loop_op, 0, 0)).is_tensor());
    }
}
