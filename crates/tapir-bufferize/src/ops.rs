//! Canonical operations of the `buffer` namespace, their capability
//! implementations, and the allocation escape policy.

use std::sync::Arc;

use tapir_ir::{
    Attribute, BufferType, Graph, Layout, MemorySpace, OpOperand, OpKind, Operation, TensorType,
    Value, ValueType,
};

use crate::buffer_type::{buffer_type_with_pinned, BufferTypeMap};
use crate::error::BufferizeError;
use crate::interface::{AliasingResult, BufferizableOp, OpRegistry};
use crate::options::BufferizationOptions;
use crate::state::AnalysisState;

/// Allocates a new tensor, optionally seeded with a copy of another
/// tensor. Operands are the dynamic extents, then the copy source if the
/// [`COPY_ATTR`] marker is set.
pub const ALLOC_TENSOR: OpKind = OpKind("buffer.alloc_tensor");
/// Reinterprets a tensor as a buffer.
pub const TO_BUFFER: OpKind = OpKind("buffer.to_buffer");
/// Reinterprets a buffer as a tensor.
pub const TO_TENSOR: OpKind = OpKind("buffer.to_tensor");
/// A raw buffer allocation (post-rewrite form).
pub const BUFFER_ALLOC: OpKind = OpKind("buffer.alloc");
/// Releases a buffer.
pub const BUFFER_DEALLOC: OpKind = OpKind("buffer.dealloc");
/// Copies one buffer into another.
pub const BUFFER_COPY: OpKind = OpKind("buffer.copy");
/// Probes one extent of a tensor; [`DIM_INDEX_ATTR`] holds the dimension.
pub const TENSOR_DIM: OpKind = OpKind("tensor.dim");
/// Yields values out of an enclosing region.
pub const YIELD: OpKind = OpKind("cf.yield");
/// Returns values out of a function body.
pub const FUNC_RETURN: OpKind = OpKind("func.return");

/// Per-result escape decision on allocating operations (`BoolArray`).
pub const ESCAPE_ATTR: &str = "escape";
/// Storage space recorded on unseeded allocations (`Int`).
pub const MEMORY_SPACE_ATTR: &str = "memory_space";
/// Marks the last operand of an allocation as a copy source (`Bool`).
pub const COPY_ATTR: &str = "copy";
/// Alignment in bytes on raw allocations (`Int`).
pub const ALIGNMENT_ATTR: &str = "alignment";
/// Probed dimension on [`TENSOR_DIM`] (`Int`).
pub const DIM_INDEX_ATTR: &str = "index";

/// Builds an allocation of `ty`, seeded from `copy` if given. The caller
/// supplies one dynamic extent value per dynamic dimension when no copy
/// source is present.
pub fn alloc_tensor(ty: TensorType, dynamic_sizes: Vec<Value>, copy: Option<Value>) -> Operation {
    let mut op = Operation::new(ALLOC_TENSOR)
        .with_operands(dynamic_sizes)
        .with_result(ValueType::Tensor(ty));
    if let Some(src) = copy {
        op = op.with_operand(src).with_attr(COPY_ATTR, Attribute::Bool(true));
    }
    op
}

/// The copy source of an allocation, if it has one.
pub fn copy_source(op: &Operation) -> Option<Value> {
    match op.attr(COPY_ATTR) {
        Some(Attribute::Bool(true)) => op.operands.last().copied(),
        _ => None,
    }
}

/// Builds a probe of `source`'s `index`-th extent.
pub fn dim(source: Value, index: usize) -> Operation {
    Operation::new(TENSOR_DIM)
        .with_operand(source)
        .with_attr(DIM_INDEX_ATTR, Attribute::Int(index as i64))
        .with_result(ValueType::Index)
}

/// Builds a tensor view of `buffer`.
pub fn to_tensor(buffer_ty: &BufferType, buffer: Value) -> Operation {
    let tensor = TensorType {
        scalar: buffer_ty.scalar,
        shape: buffer_ty.shape.clone(),
    };
    Operation::new(TO_TENSOR)
        .with_operand(buffer)
        .with_result(ValueType::Tensor(tensor))
}

/// Builds a buffer view of `tensor`.
pub fn to_buffer(ty: BufferType, tensor: Value) -> Operation {
    Operation::new(TO_BUFFER)
        .with_operand(tensor)
        .with_result(ValueType::Buffer(ty))
}

/// A registry pre-populated with the canonical operations.
pub fn core_registry() -> OpRegistry {
    let mut registry = OpRegistry::new();
    registry.register(ALLOC_TENSOR, Arc::new(AllocTensor));
    registry.register(TO_BUFFER, Arc::new(ToBuffer));
    registry.register(TO_TENSOR, Arc::new(ToTensor));
    registry.register(TENSOR_DIM, Arc::new(Dim));
    registry.register(YIELD, Arc::new(ReturnLike));
    registry.register(FUNC_RETURN, Arc::new(ReturnLike));
    registry
}

/// Whether a deallocation should be emitted for `value`, which must be a
/// result of an allocating operation.
///
/// An explicit escape decision on the operation wins; otherwise the
/// answer follows the global dealloc policy and a yield analysis.
pub fn should_deallocate(graph: &Graph, value: Value, options: &BufferizationOptions) -> bool {
    let Some(op) = value.defining_op() else {
        return false;
    };
    debug_assert!(options
        .registry
        .get(graph.op(op).kind)
        .is_some_and(|imp| imp.allocates_result(graph, value)));
    if let Some(Attribute::BoolArray(bits)) = graph.op(op).attr(ESCAPE_ATTR) {
        let Value::Result { index, .. } = value else {
            return false;
        };
        return !bits[index as usize];
    }
    if options.create_deallocs {
        let state = AnalysisState::new(options);
        return !state.is_yielded(graph, value);
    }
    false
}

/// Returns `true` only when an explicit escape decision says the
/// allocation backing `value` stays local. Absent a decision, escape must
/// be assumed.
pub fn allocation_does_not_escape(graph: &Graph, value: Value) -> bool {
    let Some(op) = value.defining_op() else {
        return false;
    };
    match (graph.op(op).attr(ESCAPE_ATTR), value) {
        (Some(Attribute::BoolArray(bits)), Value::Result { index, .. }) => {
            !bits[index as usize]
        }
        _ => false,
    }
}

#[derive(Debug)]
struct AllocTensor;

impl BufferizableOp for AllocTensor {
    fn aliasing_results(
        &self,
        _graph: &Graph,
        _operand: OpOperand,
        _state: &AnalysisState,
    ) -> Vec<AliasingResult> {
        // The result is a fresh allocation; the copy source is copied
        // into it, never aliased.
        Vec::new()
    }

    fn reads_memory(&self, graph: &Graph, operand: OpOperand, _state: &AnalysisState) -> bool {
        copy_source(graph.op(operand.op)) == Some(graph.operand_value(operand))
    }

    fn writes_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }

    fn result_writes_memory(&self, _graph: &Graph, _result: Value, _state: &AnalysisState) -> bool {
        true
    }

    fn buffer_type(
        &self,
        graph: &Graph,
        value: Value,
        options: &BufferizationOptions,
        pinned: &BufferTypeMap,
    ) -> Result<BufferType, BufferizeError> {
        let op = graph.op(graph.owner_of(value));
        let space = match op.attr(MEMORY_SPACE_ATTR) {
            Some(&Attribute::Int(n)) => MemorySpace(n as u32),
            _ => match copy_source(op) {
                Some(src) => buffer_type_with_pinned(graph, src, options, pinned)?.space,
                None => options.default_memory_space.ok_or_else(|| {
                    BufferizeError::UnknownMemorySpace {
                        op: op.kind.0.to_string(),
                    }
                })?,
            },
        };
        let tensor = graph
            .value_type(value)
            .as_tensor()
            .cloned()
            .unwrap_or_else(|| panic!("allocation result {value} is not a tensor"));
        Ok(BufferType::of_tensor(&tensor, Layout::Identity, space))
    }

    fn allocates_result(&self, _graph: &Graph, _result: Value) -> bool {
        true
    }

    fn reify_result_shape(&self, graph: &mut Graph, result: Value) -> Option<Vec<Value>> {
        let op = graph.op(graph.owner_of(result));
        if copy_source(op).is_some() {
            return None;
        }
        // Without a copy source, the operands are exactly the dynamic
        // extents.
        Some(op.operands.clone())
    }
}

#[derive(Debug)]
struct ToBuffer;

impl BufferizableOp for ToBuffer {
    fn aliasing_results(
        &self,
        _graph: &Graph,
        _operand: OpOperand,
        _state: &AnalysisState,
    ) -> Vec<AliasingResult> {
        // The result is buffer-typed; aliasing is tracked on tensors only.
        Vec::new()
    }

    fn reads_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }

    fn writes_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }
}

#[derive(Debug)]
struct ToTensor;

impl BufferizableOp for ToTensor {
    fn aliasing_results(
        &self,
        _graph: &Graph,
        _operand: OpOperand,
        _state: &AnalysisState,
    ) -> Vec<AliasingResult> {
        Vec::new()
    }

    fn reads_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }

    fn writes_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }

    fn buffer_type(
        &self,
        graph: &Graph,
        value: Value,
        _options: &BufferizationOptions,
        _pinned: &BufferTypeMap,
    ) -> Result<BufferType, BufferizeError> {
        // The view's buffer is the underlying buffer.
        let op = graph.op(graph.owner_of(value));
        let buffer = graph
            .value_type(op.operands[0])
            .as_buffer()
            .cloned()
            .unwrap_or_else(|| panic!("view source {} is not a buffer", op.operands[0]));
        Ok(buffer)
    }
}

#[derive(Debug)]
struct Dim;

impl BufferizableOp for Dim {
    fn aliasing_results(
        &self,
        _graph: &Graph,
        _operand: OpOperand,
        _state: &AnalysisState,
    ) -> Vec<AliasingResult> {
        Vec::new()
    }

    fn reads_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        // Shape metadata only; the elements are not touched.
        false
    }

    fn writes_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }
}

#[derive(Debug)]
struct ReturnLike;

impl BufferizableOp for ReturnLike {
    fn aliasing_results(
        &self,
        _graph: &Graph,
        _operand: OpOperand,
        _state: &AnalysisState,
    ) -> Vec<AliasingResult> {
        Vec::new()
    }

    fn reads_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }

    fn writes_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }

    fn is_return_like(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn alloc_tensor_copy_marker() {
        let mut g = Graph::new();
        let src = fixtures::source(&mut g);
        let plain = alloc_tensor(fixtures::tensor_ty_4(), Vec::new(), None);
        assert_eq!(copy_source(&plain), None);

        let seeded = alloc_tensor(fixtures::tensor_ty_4(), Vec::new(), Some(src));
        assert_eq!(copy_source(&seeded), Some(src));
    }

    #[test]
    fn escape_attr_decides_deallocation() {
        let mut g = Graph::new();
        let options = fixtures::options();

        let mut kept = fixtures::alloc_4();
        kept.attrs
            .insert(ESCAPE_ATTR, Attribute::BoolArray(vec![true]));
        let kept = g.append_top(kept);
        assert!(!should_deallocate(&g, Value::result(kept, 0), &options));
        assert!(!allocation_does_not_escape(&g, Value::result(kept, 0)));

        let mut local = fixtures::alloc_4();
        local
            .attrs
            .insert(ESCAPE_ATTR, Attribute::BoolArray(vec![false]));
        let local = g.append_top(local);
        assert!(should_deallocate(&g, Value::result(local, 0), &options));
        assert!(allocation_does_not_escape(&g, Value::result(local, 0)));
    }

    #[test]
    fn unannotated_allocations_follow_the_yield_analysis() {
        let mut g = Graph::new();
        let alloc = g.append_top(fixtures::alloc_4());
        let yielded = g.append_top(fixtures::alloc_4());
        g.append_top(Operation::new(YIELD).with_operand(Value::result(yielded, 0)));

        let mut options = fixtures::options();
        assert!(should_deallocate(&g, Value::result(alloc, 0), &options));
        assert!(!should_deallocate(&g, Value::result(yielded, 0), &options));

        // Without an escape decision, nothing is known to stay local.
        assert!(!allocation_does_not_escape(&g, Value::result(alloc, 0)));

        options.create_deallocs = false;
        assert!(!should_deallocate(&g, Value::result(alloc, 0), &options));
    }

    #[test]
    fn dim_probe_shape() {
        let mut g = Graph::new();
        let src = fixtures::source(&mut g);
        let probe = g.append_top(dim(src, 0));
        assert_eq!(*g.value_type(Value::result(probe, 0)), ValueType::Index);
        assert_eq!(
            g.op(probe).attr(DIM_INDEX_ATTR),
            Some(&Attribute::Int(0))
        );
    }

    #[test]
    fn reify_uses_extent_operands() {
        let mut g = Graph::new();
        let src = fixtures::source(&mut g);
        let probe = g.append_top(dim(src, 0));
        let extent = Value::result(probe, 0);
        let alloc = g.append_top(alloc_tensor(
            TensorType::ranked(tapir_ir::Scalar::F32, tapir_ir::Shape::all_dynamic(1)),
            vec![extent],
            None,
        ));
        let imp = AllocTensor;
        assert_eq!(
            imp.reify_result_shape(&mut g, Value::result(alloc, 0)),
            Some(vec![extent])
        );

        let seeded = g.append_top(alloc_tensor(fixtures::tensor_ty_4(), Vec::new(), Some(src)));
        assert_eq!(imp.reify_result_shape(&mut g, Value::result(seeded, 0)), None);
    }
}
